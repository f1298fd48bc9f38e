//! Backup and verification of boot-critical paths.
//!
//! Both steps are advisory. The backup is a copy to look at after a bad
//! build; nothing restores from it automatically.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use super::StageOutcome;
use crate::process::{Cmd, Privilege};

/// Whether `path` exists without following symlinks.
///
/// Absolute symlinks inside an extracted rootfs point into the host, so
/// `Path::exists` would answer for the wrong filesystem.
pub fn present(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Copy each critical path from `root` into `backup_dir`.
///
/// Paths missing from the base, or failing to copy, become warnings.
pub fn backup_paths(
    root: &Path,
    backup_dir: &Path,
    paths: &[String],
    privilege: &Privilege,
) -> Result<StageOutcome> {
    crate::squashfs::remove_tree(backup_dir, privilege)?;
    fs::create_dir_all(backup_dir)
        .with_context(|| format!("Failed to create {}", backup_dir.display()))?;

    let mut warnings = Vec::new();
    for rel in paths {
        let rel = rel.trim_start_matches('/');
        let source = root.join(rel);
        if !present(&source) {
            warnings.push(format!("{} not present in base image, nothing to back up", rel));
            continue;
        }

        let dest = backup_dir.join(rel);
        if let Some(parent) = dest.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warnings.push(format!("Failed to back up {}: {}", rel, e));
                continue;
            }
        }

        let copied = Cmd::new("cp")
            .arg("-a")
            .arg_path(&source)
            .arg_path(&dest)
            .privileged(privilege)
            .error_msg(format!("Failed to back up {}", rel))
            .run();
        match copied {
            Ok(_) => println!("  Backed up /{}", rel),
            Err(e) => warnings.push(format!("{:#}", e)),
        }
    }

    Ok(StageOutcome::from_warnings(warnings))
}

/// Check that each critical path still exists under `root`.
pub fn verify_paths(root: &Path, paths: &[String]) -> StageOutcome {
    let mut warnings = Vec::new();
    for rel in paths {
        let rel = rel.trim_start_matches('/');
        if present(&root.join(rel)) {
            println!("  ✓ /{}", rel);
        } else {
            println!("  ✗ /{}", rel);
            warnings.push(format!("Critical path /{} is missing after overlay", rel));
        }
    }
    StageOutcome::from_warnings(warnings)
}
