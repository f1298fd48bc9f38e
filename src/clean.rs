//! Build artifact cleaning.
//!
//! Cleaning never fails: each problem is reported as a warning and the rest
//! of the cleanup still runs, so `clean` can always recover a build
//! directory left behind by an aborted run.

use std::fs;
use std::path::Path;

use crate::layout::BuildLayout;
use crate::loopdev;
use crate::process::{self, Cmd, Privilege};
use crate::squashfs::remove_tree;

/// What `clean` did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanSummary {
    pub unmounted: bool,
    pub detached: usize,
    pub removed: usize,
    pub warnings: usize,
}

/// Remove the build directory and every deliverable.
pub fn clean_all(layout: &BuildLayout, privilege: &Privilege) -> CleanSummary {
    let mut summary = CleanSummary::default();
    let warn = |summary: &mut CleanSummary, msg: String| {
        eprintln!("[WARN] {}", msg);
        summary.warnings += 1;
    };

    // A crashed package-image run can leave the boot partition mounted and
    // the image attached; removing the tree underneath would fail or hang.
    if layout.mount_dir.exists() && loopdev::is_mount_point(&layout.mount_dir) {
        println!("Unmounting {}...", layout.mount_dir.display());
        match loopdev::unmount_path(&layout.mount_dir, privilege) {
            Ok(()) => summary.unmounted = true,
            Err(e) => warn(&mut summary, format!("{:#}", e)),
        }
    }

    // Without losetup nothing can have been attached.
    let bound = if process::exists("losetup") {
        loopdev::bound_devices(&layout.image)
    } else {
        Ok(Vec::new())
    };
    match bound {
        Ok(devices) => {
            for device in devices {
                println!("Detaching {}...", device.display());
                let detached = Cmd::new("losetup")
                    .arg("-d")
                    .arg_path(&device)
                    .privileged(privilege)
                    .error_msg(format!("Failed to detach {}", device.display()))
                    .run();
                match detached {
                    Ok(_) => summary.detached += 1,
                    Err(e) => warn(&mut summary, format!("{:#}", e)),
                }
            }
        }
        Err(e) => warn(&mut summary, format!("Could not list loop devices: {:#}", e)),
    }

    if fs::symlink_metadata(&layout.build_dir).is_ok() {
        println!("Removing {}...", layout.build_dir.display());
        match remove_tree(&layout.build_dir, privilege) {
            Ok(()) => summary.removed += 1,
            Err(e) => warn(&mut summary, format!("{:#}", e)),
        }
    }

    for output in layout.outputs() {
        if let Some(result) = remove_file(output) {
            match result {
                Ok(()) => {
                    println!("Removed {}", output.display());
                    summary.removed += 1;
                }
                Err(e) => warn(
                    &mut summary,
                    format!("Failed to remove {}: {}", output.display(), e),
                ),
            }
        }
    }

    // The output directory goes too, but only once it is empty.
    if layout.output_dir.is_dir() {
        let _ = fs::remove_dir(&layout.output_dir);
    }

    if summary == CleanSummary::default() {
        println!("Nothing to clean.");
    } else {
        println!("Clean complete.");
    }
    summary
}

/// `None` when there was nothing to remove.
fn remove_file(path: &Path) -> Option<std::io::Result<()>> {
    fs::symlink_metadata(path).ok()?;
    Some(fs::remove_file(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::collections::HashMap;

    fn layout_in(dir: &Path) -> BuildLayout {
        BuildLayout::new(&Config::from_vars(dir, &HashMap::new()))
    }

    #[test]
    fn test_clean_removes_build_and_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_in(dir.path());
        fs::create_dir_all(layout.rootfs.join("usr/bin")).unwrap();
        fs::write(layout.rootfs.join("usr/bin/foo"), "x").unwrap();
        fs::create_dir_all(&layout.output_dir).unwrap();
        fs::write(&layout.overlay_archive, "hsqs").unwrap();
        fs::write(&layout.final_image_checksum, "abc  AmberG350.img\n").unwrap();

        let summary = clean_all(&layout, &Privilege::Current);
        assert_eq!(summary.warnings, 0);
        assert_eq!(summary.removed, 3);
        assert!(!layout.build_dir.exists());
        assert!(!layout.overlay_archive.exists());
        assert!(!layout.output_dir.exists());
    }

    #[test]
    fn test_clean_keeps_unrelated_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_in(dir.path());
        fs::create_dir_all(&layout.output_dir).unwrap();
        fs::write(layout.output_dir.join("notes.txt"), "keep").unwrap();

        clean_all(&layout, &Privilege::Current);
        assert!(layout.output_dir.join("notes.txt").exists());
    }

    #[test]
    fn test_clean_on_empty_project_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let summary = clean_all(&layout_in(dir.path()), &Privilege::Current);
        assert_eq!(summary, CleanSummary::default());
    }
}
