//! Loop devices and mounts as owned guards.
//!
//! A loop binding outlives the process that made it, so every attach must
//! be matched by a detach on every exit path. [`LoopDevice`] and [`Mount`]
//! release their resource on drop; the explicit `detach`/`unmount` methods
//! exist so the happy path can surface release errors instead of only
//! logging them.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::process::{Cmd, Privilege};

/// How long to wait for `/dev/loopNpM` to show up after `--partscan`.
const PARTITION_WAIT: Duration = Duration::from_secs(5);
const PARTITION_POLL: Duration = Duration::from_millis(100);

/// A loop device bound to an image file. Detaches on drop.
#[derive(Debug)]
pub struct LoopDevice {
    device: PathBuf,
    privilege: Privilege,
    attached: bool,
}

impl LoopDevice {
    /// Bind `image` to the first free loop device, scanning partitions.
    pub fn attach(image: &Path, privilege: &Privilege) -> Result<Self> {
        if !image.is_file() {
            bail!("Image not found: {}", image.display());
        }

        let result = Cmd::new("losetup")
            .args(["--find", "--show", "--partscan"])
            .arg_path(image)
            .privileged(privilege)
            .error_msg(format!("losetup failed for {}", image.display()))
            .run()?;

        let device = result.stdout_trimmed();
        if device.is_empty() {
            bail!("losetup did not report a device for {}", image.display());
        }

        println!("  Attached {} -> {}", image.display(), device);
        Ok(Self {
            device: PathBuf::from(device),
            privilege: privilege.clone(),
            attached: true,
        })
    }

    pub fn device(&self) -> &Path {
        &self.device
    }

    /// Device node of partition `n` (1-based), e.g. `/dev/loop3p1`.
    pub fn partition_path(&self, n: u32) -> PathBuf {
        partition_node(&self.device, n)
    }

    /// Wait for the kernel to create the partition node.
    pub fn wait_for_partition(&self, n: u32) -> Result<PathBuf> {
        let part = self.partition_path(n);
        let mut waited = Duration::ZERO;
        while !part.exists() {
            if waited >= PARTITION_WAIT {
                bail!(
                    "Partition {} of {} did not appear within {:?}",
                    n,
                    self.device.display(),
                    PARTITION_WAIT
                );
            }
            thread::sleep(PARTITION_POLL);
            waited += PARTITION_POLL;
        }
        Ok(part)
    }

    /// Detach now, reporting failure.
    pub fn detach(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if !self.attached {
            return Ok(());
        }
        self.attached = false;
        Cmd::new("losetup")
            .arg("--detach")
            .arg_path(&self.device)
            .privileged(&self.privilege)
            .error_msg(format!("Failed to detach {}", self.device.display()))
            .run()?;
        println!("  Detached {}", self.device.display());
        Ok(())
    }
}

impl Drop for LoopDevice {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            eprintln!("[WARN] {:#}", e);
        }
    }
}

/// Mount flags used by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountMode {
    ReadOnly,
    ReadWrite,
}

impl MountMode {
    fn option(self) -> &'static str {
        match self {
            MountMode::ReadOnly => "ro",
            MountMode::ReadWrite => "rw",
        }
    }
}

/// A mounted filesystem. Flushes and unmounts on drop.
#[derive(Debug)]
pub struct Mount {
    target: PathBuf,
    privilege: Privilege,
    mounted: bool,
}

impl Mount {
    /// Mount `device` on `target`, creating the mount point if needed.
    pub fn new(device: &Path, target: &Path, mode: MountMode, privilege: &Privilege) -> Result<Self> {
        fs::create_dir_all(target)
            .with_context(|| format!("Failed to create mount point {}", target.display()))?;

        Cmd::new("mount")
            .args(["-o", mode.option()])
            .arg_path(device)
            .arg_path(target)
            .privileged(privilege)
            .error_msg(format!(
                "Failed to mount {} on {}",
                device.display(),
                target.display()
            ))
            .run()?;

        println!("  Mounted {} on {} ({})", device.display(), target.display(), mode.option());
        Ok(Self {
            target: target.to_path_buf(),
            privilege: privilege.clone(),
            mounted: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.target
    }

    /// Flush and unmount now, reporting failure.
    pub fn unmount(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if !self.mounted {
            return Ok(());
        }
        self.mounted = false;
        if let Err(e) = sync() {
            eprintln!("[WARN] {:#}", e);
        }
        unmount_path(&self.target, &self.privilege)?;
        println!("  Unmounted {}", self.target.display());
        Ok(())
    }
}

impl Drop for Mount {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            eprintln!("[WARN] {:#}", e);
        }
    }
}

/// A partition of a loop-attached image, mounted.
///
/// Field order matters: the mount drops before the loop device under it.
#[derive(Debug)]
pub struct MountedImage {
    mount: Mount,
    loop_device: LoopDevice,
}

impl MountedImage {
    /// Attach `image` and mount partition `partition` on `target`.
    pub fn open(
        image: &Path,
        partition: u32,
        target: &Path,
        mode: MountMode,
        privilege: &Privilege,
    ) -> Result<Self> {
        let loop_device = LoopDevice::attach(image, privilege)?;
        let part = loop_device.wait_for_partition(partition)?;
        let mount = Mount::new(&part, target, mode, privilege)?;
        Ok(Self { mount, loop_device })
    }

    pub fn root(&self) -> &Path {
        self.mount.path()
    }

    pub fn device(&self) -> &Path {
        self.loop_device.device()
    }

    /// Unmount, then detach.
    pub fn release(self) -> Result<()> {
        let Self { mount, loop_device } = self;
        let unmounted = mount.unmount();
        let detached = loop_device.detach();
        unmounted?;
        detached
    }
}

/// Flush filesystem buffers.
pub fn sync() -> Result<()> {
    Cmd::new("sync").error_msg("sync failed").run()?;
    Ok(())
}

/// Unmount a path.
pub fn unmount_path(target: &Path, privilege: &Privilege) -> Result<()> {
    Cmd::new("umount")
        .arg_path(target)
        .privileged(privilege)
        .error_msg(format!("Failed to unmount {}", target.display()))
        .run()?;
    Ok(())
}

/// Loop devices currently bound to `image`, via `losetup -j`.
pub fn bound_devices(image: &Path) -> Result<Vec<PathBuf>> {
    if !image.exists() {
        return Ok(Vec::new());
    }
    let image = image
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", image.display()))?;
    let result = Cmd::new("losetup")
        .arg("-j")
        .arg_path(&image)
        .error_msg("losetup -j failed")
        .run()?;
    Ok(parse_bound_devices(&result.stdout))
}

/// Parse `losetup -j` output: `/dev/loop0: [2049]:1234 (/path/base.img)`.
pub fn parse_bound_devices(output: &str) -> Vec<PathBuf> {
    output
        .lines()
        .filter_map(|line| line.split_once(':').map(|(dev, _)| dev.trim()))
        .filter(|dev| dev.starts_with("/dev/"))
        .map(PathBuf::from)
        .collect()
}

/// Whether `path` is a mount point according to `/proc/self/mountinfo`.
pub fn is_mount_point(path: &Path) -> bool {
    let Ok(mountinfo) = fs::read_to_string("/proc/self/mountinfo") else {
        return false;
    };
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    mount_points(&mountinfo).iter().any(|p| *p == path)
}

/// Mount points listed in a mountinfo table (field 5, octal escapes decoded).
pub fn mount_points(mountinfo: &str) -> Vec<PathBuf> {
    mountinfo
        .lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .map(|field| PathBuf::from(unescape_mountinfo(field)))
        .collect()
}

fn unescape_mountinfo(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn partition_node(device: &Path, n: u32) -> PathBuf {
    let mut node = device.as_os_str().to_os_string();
    node.push(format!("p{}", n));
    PathBuf::from(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_node() {
        assert_eq!(
            partition_node(Path::new("/dev/loop7"), 1),
            PathBuf::from("/dev/loop7p1")
        );
    }

    #[test]
    fn test_parse_bound_devices() {
        let output = "/dev/loop0: [2049]:1311 (/home/u/amber/build/base.img)\n\
                      /dev/loop12: [2049]:1311 (/home/u/amber/build/base.img)\n";
        assert_eq!(
            parse_bound_devices(output),
            vec![PathBuf::from("/dev/loop0"), PathBuf::from("/dev/loop12")]
        );
    }

    #[test]
    fn test_parse_bound_devices_empty() {
        assert!(parse_bound_devices("").is_empty());
        assert!(parse_bound_devices("losetup: warning\n").is_empty());
    }

    #[test]
    fn test_mount_points_decodes_spaces() {
        let mountinfo = "22 1 259:2 / / rw,relatime shared:1 - ext4 /dev/nvme0n1p2 rw\n\
                         97 22 7:0 / /home/u/amber\\040dev/build/mnt ro - vfat /dev/loop0p1 ro\n";
        let points = mount_points(mountinfo);
        assert_eq!(points[0], PathBuf::from("/"));
        assert_eq!(points[1], PathBuf::from("/home/u/amber dev/build/mnt"));
    }

    #[test]
    fn test_bound_devices_missing_image() {
        let devices = bound_devices(Path::new("/nonexistent/base.img")).unwrap();
        assert!(devices.is_empty());
    }

    #[test]
    fn test_attach_missing_image_fails_before_losetup() {
        let err = LoopDevice::attach(Path::new("/nonexistent/base.img"), &Privilege::Current)
            .unwrap_err();
        assert!(err.to_string().contains("Image not found"));
    }
}
