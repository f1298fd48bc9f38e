//! Overlay merge: mirror the distribution tree onto a root filesystem.
//!
//! rsync does the copying. Links, permissions, ownership (when root), device
//! nodes and times are preserved; the overlay always wins on conflicts; files
//! only present in the target are left alone. Denylisted paths are anchored
//! excludes, so rsync neither copies nor touches them in the target.
//!
//! Files are compared by content, never by size and mtime alone.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use crate::process::{Cmd, Privilege};

/// Root-relative paths to leave out of a mirror, matched only at that
/// location.
#[derive(Debug, Clone, Default)]
pub struct Excludes {
    pub anchored: Vec<String>,
}

impl Excludes {
    /// The denylist alone.
    pub fn denylist(paths: &[String]) -> Self {
        Self {
            anchored: paths.to_vec(),
        }
    }

    fn rsync_args(&self) -> impl Iterator<Item = String> + '_ {
        self.anchored
            .iter()
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .map(|p| format!("--exclude=/{}", p))
    }
}

/// rsync argv (without the program) for mirroring `source` into `dest`.
pub fn rsync_args(source: &Path, dest: &Path, excludes: &Excludes) -> Vec<String> {
    let mut args = vec!["-a".to_string(), "--checksum".to_string()];
    args.extend(excludes.rsync_args());
    // Trailing slashes: copy the contents, not the directory itself.
    args.push(format!("{}/", source.display()));
    args.push(format!("{}/", dest.display()));
    args
}

/// Mirror `source` on top of `dest`.
pub fn mirror(source: &Path, dest: &Path, excludes: &Excludes, privilege: &Privilege) -> Result<()> {
    if !source.is_dir() {
        bail!("Overlay directory not found: {}", source.display());
    }
    fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create {}", dest.display()))?;

    println!("Overlaying {} onto {}...", source.display(), dest.display());
    for path in &excludes.anchored {
        println!("  Protected: /{}", path.trim_start_matches('/'));
    }

    Cmd::new("rsync")
        .args(rsync_args(source, dest, excludes))
        .privileged(privilege)
        .error_msg("rsync overlay failed. Install rsync.")
        .run()?;

    Ok(())
}

/// Number of regular files in a tree.
pub fn count_files(root: &Path) -> usize {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}
