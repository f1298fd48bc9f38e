//! `build`: pack the overlay tree into a standalone SYSTEM archive.
//!
//! No base image is involved, so nothing is protected: every file in the
//! overlay lands in the archive. Entries are squashed as owned by root with
//! no xattrs, since the tree belongs to whoever checked it out.

use anyhow::Result;
use std::fs;

use crate::common::{prepare_work_dir, restore_ownership};
use crate::config::{Config, DEFAULT_SQUASHFS_BLOCK_SIZE, DEFAULT_SQUASHFS_COMPRESSION};
use crate::layout::BuildLayout;
use crate::overlay::{self, Excludes};
use crate::process::Privilege;
use crate::squashfs::{self, PackOptions, SuperblockInfo};
use crate::timing::Timer;

/// Build `output/SYSTEM` from the overlay alone.
pub fn build_overlay_archive(config: &Config) -> Result<SuperblockInfo> {
    let layout = BuildLayout::new(config);
    println!("=== Building overlay {} ===", config.system_archive);

    let timer = Timer::start("stage overlay");
    let staging = prepare_work_dir(&layout.overlay_staging)?;
    overlay::mirror(
        &config.overlay_dir,
        staging,
        &Excludes::default(),
        &Privilege::Current,
    )?;
    let files = overlay::count_files(staging);
    println!("  {} files staged", files);
    timer.finish();

    let timer = Timer::start("mksquashfs");
    let options = PackOptions::resolve(
        config.squashfs_compression.as_deref(),
        config.squashfs_block_size.as_deref(),
        None,
        (DEFAULT_SQUASHFS_COMPRESSION, DEFAULT_SQUASHFS_BLOCK_SIZE),
    )?
    .all_root(true)
    .xattrs(false);
    let info = squashfs::create_squashfs(
        staging,
        &layout.overlay_archive,
        &options,
        &Privilege::Current,
    )?;
    timer.finish();

    // Only matters when the whole process runs under sudo.
    restore_ownership(&[layout.overlay_archive.as_path()], &Privilege::Current)?;

    println!("\n=== Build Complete ===");
    println!("  Output: {}", layout.overlay_archive.display());
    println!("  Files:  {}", files);
    println!(
        "  Size:   {} KB",
        fs::metadata(&layout.overlay_archive)?.len() / 1024
    );
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_missing_overlay_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_vars(dir.path(), &HashMap::new());
        let err = build_overlay_archive(&config).unwrap_err();
        assert!(err.to_string().contains("Overlay directory not found"));
        assert!(!BuildLayout::new(&config).overlay_archive.exists());
    }

    #[test]
    fn test_bad_compressor_is_rejected_before_packing() {
        if !crate::process::exists("rsync") {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("overlay/etc")).unwrap();
        fs::write(dir.path().join("overlay/etc/motd"), "hi\n").unwrap();
        let vars: HashMap<String, String> =
            [("SQUASHFS_COMPRESSION".to_string(), "brotli".to_string())].into();
        let config = Config::from_vars(dir.path(), &vars);

        let err = build_overlay_archive(&config).unwrap_err();
        assert!(err.to_string().contains("brotli"));
        assert!(!BuildLayout::new(&config).overlay_archive.exists());
    }
}
