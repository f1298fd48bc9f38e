//! `package-image`: merge the overlay into the downloaded base image.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::{preserve, Driver, PipelineReport, Stage, StageOutcome};
use crate::common::{restore_ownership, write_checksum_file, write_file_with_dirs};
use crate::config::{Config, DEFAULT_SQUASHFS_BLOCK_SIZE, DEFAULT_SQUASHFS_COMPRESSION};
use crate::decompress;
use crate::download;
use crate::layout::BuildLayout;
use crate::loopdev::{self, MountMode, MountedImage};
use crate::overlay::{self, Excludes};
use crate::process::{Cmd, Privilege};
use crate::squashfs::{self, PackOptions, SuperblockInfo};

/// The boot partition holding the `SYSTEM` archive.
const BOOT_PARTITION: u32 = 1;

/// Knobs for a single `package-image` run.
#[derive(Debug, Clone, Default)]
pub struct PackageOptions {
    /// Keep an existing download instead of fetching again.
    pub reuse_download: bool,
}

/// State carried between stages of one run.
pub struct ImagePipeline<'a> {
    config: &'a Config,
    layout: BuildLayout,
    options: PackageOptions,
    privilege: Privilege,
    /// The mounted image, between Mount/Extract and Remount/Replace.
    held: Option<MountedImage>,
    /// Superblock of the base image's archive, read during Extract.
    base_archive: Option<SuperblockInfo>,
}

impl<'a> ImagePipeline<'a> {
    pub fn new(config: &'a Config, options: PackageOptions) -> Self {
        Self {
            config,
            layout: BuildLayout::new(config),
            options,
            privilege: config.privilege(),
            held: None,
            base_archive: None,
        }
    }

    /// Run every stage. On a fatal failure the held image (if any) is
    /// unmounted and detached before the error is returned.
    pub fn run(mut self) -> Result<PipelineReport> {
        println!("=== Packaging {} ===", self.config.image_name);

        let mut driver = Driver::new();
        for stage in Stage::ALL {
            if let Err(e) = driver.run_stage(stage, || self.execute(stage)) {
                self.abort();
                return Err(e.into());
            }
        }

        let report = driver.finish();
        println!("\n=== Image Build Complete ===");
        println!("  Output: {}", self.layout.final_image.display());
        report.print_summary();
        Ok(report)
    }

    fn execute(&mut self, stage: Stage) -> Result<StageOutcome> {
        match stage {
            Stage::Download => self.download(),
            Stage::Decompress => self.decompress(),
            Stage::Mount => self.mount(MountMode::ReadOnly),
            Stage::Extract => self.extract(),
            Stage::Backup => self.backup(),
            Stage::Overlay => self.overlay(),
            Stage::Verify => self.verify(),
            Stage::Repackage => self.repackage(),
            Stage::Remount => self.mount(MountMode::ReadWrite),
            Stage::Replace => self.replace(),
            Stage::Finalize => self.finalize(),
        }
    }

    fn abort(&mut self) {
        if let Some(held) = self.held.take() {
            eprintln!("[WARN] Aborting: releasing {}", held.device().display());
            if let Err(e) = held.release() {
                eprintln!("[WARN] {:#}", e);
            }
        }
    }

    fn download(&mut self) -> Result<StageOutcome> {
        let dest = &self.layout.download;
        if self.options.reuse_download && dest.is_file() {
            println!("Reusing {}", dest.display());
            return Ok(StageOutcome::Completed);
        }

        let url = self.config.require_base_image_url()?;
        fs::create_dir_all(&self.layout.build_dir)
            .with_context(|| format!("Failed to create {}", self.layout.build_dir.display()))?;
        println!("Downloading {}", url);
        let bytes = download::fetch(url, dest)?;
        println!("  Downloaded {} MB", bytes / 1024 / 1024);
        Ok(StageOutcome::Completed)
    }

    fn decompress(&mut self) -> Result<StageOutcome> {
        // A leftover binding from a crashed run would pin the old image.
        if !loopdev::bound_devices(&self.layout.image)?.is_empty() {
            bail!(
                "{} is still attached to a loop device. Run 'amberpack clean' first.",
                self.layout.image.display()
            );
        }
        println!("Decompressing {}...", self.layout.download.display());
        let bytes = decompress::decompress_image(&self.layout.download, &self.layout.image)?;
        println!("  Image: {} MB", bytes / 1024 / 1024);
        Ok(StageOutcome::Completed)
    }

    fn mount(&mut self, mode: MountMode) -> Result<StageOutcome> {
        if self.held.is_some() {
            bail!("Image is already mounted");
        }
        self.held = Some(MountedImage::open(
            &self.layout.image,
            BOOT_PARTITION,
            &self.layout.mount_dir,
            mode,
            &self.privilege,
        )?);
        Ok(StageOutcome::Completed)
    }

    /// The archive inside the held mount.
    fn held_archive(&self) -> Result<PathBuf> {
        let held = self.held.as_ref().context("Image is not mounted")?;
        let archive = held
            .root()
            .join(self.config.system_archive.trim_start_matches('/'));
        if !preserve::present(&archive) {
            bail!(
                "{} not found in partition {} of {}",
                self.config.system_archive,
                BOOT_PARTITION,
                self.layout.image.display()
            );
        }
        Ok(archive)
    }

    fn extract(&mut self) -> Result<StageOutcome> {
        let archive = self.held_archive()?;

        let info = SuperblockInfo::read(&archive)?;
        println!(
            "Base {}: squashfs {}.{}, {}, {} byte blocks, {} inodes",
            self.config.system_archive,
            info.version.0,
            info.version.1,
            info.compressor,
            info.block_size,
            info.inode_count
        );
        self.base_archive = Some(info);

        squashfs::extract_squashfs(&archive, &self.layout.rootfs, &self.privilege)?;

        if let Some(held) = self.held.take() {
            held.release()?;
        }
        Ok(StageOutcome::Completed)
    }

    fn backup(&mut self) -> Result<StageOutcome> {
        preserve::backup_paths(
            &self.layout.rootfs,
            &self.layout.backup_dir,
            &self.config.critical_paths,
            &self.privilege,
        )
    }

    fn overlay(&mut self) -> Result<StageOutcome> {
        let excludes = Excludes::denylist(&self.config.overlay_excludes);
        overlay::mirror(
            &self.config.overlay_dir,
            &self.layout.rootfs,
            &excludes,
            &self.privilege,
        )?;
        println!(
            "  {} overlay files merged",
            overlay::count_files(&self.config.overlay_dir)
        );
        Ok(StageOutcome::Completed)
    }

    fn verify(&mut self) -> Result<StageOutcome> {
        Ok(preserve::verify_paths(
            &self.layout.rootfs,
            &self.config.critical_paths,
        ))
    }

    fn repackage(&mut self) -> Result<StageOutcome> {
        let options = PackOptions::resolve(
            self.config.squashfs_compression.as_deref(),
            self.config.squashfs_block_size.as_deref(),
            self.base_archive.as_ref(),
            (DEFAULT_SQUASHFS_COMPRESSION, DEFAULT_SQUASHFS_BLOCK_SIZE),
        )?;
        squashfs::create_squashfs(
            &self.layout.rootfs,
            &self.layout.new_archive,
            &options,
            &self.privilege,
        )?;
        Ok(StageOutcome::Completed)
    }

    fn replace(&mut self) -> Result<StageOutcome> {
        let archive = self.held_archive()?;

        println!("Replacing {}...", archive.display());
        self.copy_into_image(&self.layout.new_archive, &archive)?;

        // The device's updater checks SYSTEM against SYSTEM.md5 when present.
        let md5_in_image = md5_companion(&archive);
        if preserve::present(&md5_in_image) {
            let digest = Cmd::new("md5sum")
                .arg_path(&self.layout.new_archive)
                .error_msg("md5sum failed")
                .run()?;
            let hash = digest
                .stdout_trimmed()
                .split_whitespace()
                .next()
                .context("md5sum printed nothing")?
                .to_string();
            write_file_with_dirs(
                &self.layout.new_archive_md5,
                format!("{}  {}\n", hash, file_name(&archive)),
            )?;
            self.copy_into_image(&self.layout.new_archive_md5, &md5_in_image)?;
            println!("  Refreshed {}", md5_in_image.display());
        }

        loopdev::sync()?;
        if let Some(held) = self.held.take() {
            held.release()?;
        }
        Ok(StageOutcome::Completed)
    }

    fn copy_into_image(&self, src: &Path, dest: &Path) -> Result<()> {
        Cmd::new("cp")
            .arg_path(src)
            .arg_path(dest)
            .privileged(&self.privilege)
            .error_msg(format!("Failed to write {}", dest.display()))
            .run()?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<StageOutcome> {
        let layout = &self.layout;
        fs::create_dir_all(&layout.output_dir)
            .with_context(|| format!("Failed to create {}", layout.output_dir.display()))?;

        println!("Copying image to {}...", layout.final_image.display());
        fs::copy(&layout.image, &layout.final_image).with_context(|| {
            format!(
                "Failed to copy {} to {}",
                layout.image.display(),
                layout.final_image.display()
            )
        })?;

        let hash = write_checksum_file(&layout.final_image, &layout.final_image_checksum)?;
        println!("  SHA256: {}", hash);

        if self.config.compress_output {
            println!("Compressing {}...", layout.final_image_gz.display());
            let size = decompress::gzip_file(&layout.final_image, &layout.final_image_gz)?;
            println!("  {} MB", size / 1024 / 1024);
        } else if layout.final_image_gz.exists() {
            // Never leave a stale compressed image next to a fresh one.
            fs::remove_file(&layout.final_image_gz)?;
        }

        restore_ownership(
            &[
                &layout.new_archive,
                &layout.new_archive_md5,
                &layout.final_image,
                &layout.final_image_checksum,
                &layout.final_image_gz,
            ],
            &self.privilege,
        )?;
        Ok(StageOutcome::Completed)
    }
}

fn md5_companion(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_os_string();
    name.push(".md5");
    PathBuf::from(name)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
