//! Squashfs archives: the `SYSTEM` root filesystem of the device.
//!
//! The archive is built twice per image build. The standalone `build`
//! command packs the overlay tree on its own; `package-image` unpacks the
//! base image's archive, merges the overlay into it and packs the result.
//! Both directions are delegated to squashfs-tools.

pub mod pack;
pub mod superblock;

use anyhow::{bail, Result};
use std::fs;
use std::path::Path;

use crate::process::{Cmd, Privilege};

pub use pack::{create_squashfs, PackOptions};
pub use superblock::{Compressor, SuperblockInfo};

/// Unpack `archive` into `dest`, replacing whatever was there.
///
/// Runs privileged so ownership, device nodes and xattrs in the archive
/// survive. Any non-zero exit is an error, even when part of the tree was
/// written.
pub fn extract_squashfs(archive: &Path, dest: &Path, privilege: &Privilege) -> Result<()> {
    if fs::symlink_metadata(archive).is_err() {
        bail!("Squashfs archive not found: {}", archive.display());
    }

    remove_tree(dest, privilege)?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    println!("Extracting {} to {}...", archive.display(), dest.display());

    // Extended attributes (file capabilities) must survive the round trip,
    // so a failure to restore one is as fatal as a read error.
    Cmd::new("unsquashfs")
        .args(["-d"])
        .arg_path(dest)
        .arg("-f")
        .arg_path(archive)
        .privileged(privilege)
        .error_msg(format!("unsquashfs failed for {}", archive.display()))
        .run()?;

    Ok(())
}

/// Remove a directory tree that may contain root-owned files.
pub fn remove_tree(path: &Path, privilege: &Privilege) -> Result<()> {
    if fs::symlink_metadata(path).is_err() {
        return Ok(());
    }
    if fs::remove_dir_all(path).is_ok() {
        return Ok(());
    }
    Cmd::new("rm")
        .arg("-rf")
        .arg_path(path)
        .privileged(privilege)
        .error_msg(format!("Failed to remove {}", path.display()))
        .run()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_missing_archive_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_squashfs(
            &dir.path().join("SYSTEM"),
            &dir.path().join("rootfs"),
            &Privilege::Current,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    #[serial_test::serial]
    fn test_extract_fails_on_partial_tree() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        // Writes one file, then dies the way unsquashfs does on a corrupt block.
        let tool = bin.join("unsquashfs");
        fs::write(
            &tool,
            "#!/bin/sh\nmkdir -p \"$2/usr/bin\"\necho x > \"$2/usr/bin/first\"\n\
             echo 'FATAL ERROR: read_block: failed to read block' >&2\nexit 1\n",
        )
        .unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();
        let archive = dir.path().join("SYSTEM");
        fs::write(&archive, "hsqs").unwrap();
        let dest = dir.path().join("rootfs");

        let old_path = std::env::var_os("PATH").unwrap_or_default();
        let mut paths = vec![bin.clone()];
        paths.extend(std::env::split_paths(&old_path));
        std::env::set_var("PATH", std::env::join_paths(paths).unwrap());
        let result = extract_squashfs(&archive, &dest, &Privilege::Current);
        std::env::set_var("PATH", &old_path);

        assert!(dest.join("usr/bin/first").exists());
        let msg = format!("{:#}", result.unwrap_err());
        assert!(msg.contains("unsquashfs failed"));
        assert!(msg.contains("read_block"));
    }

    #[test]
    fn test_remove_tree_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let tree = dir.path().join("rootfs");
        fs::create_dir_all(tree.join("usr/bin")).unwrap();
        fs::write(tree.join("usr/bin/foo"), "x").unwrap();

        remove_tree(&tree, &Privilege::Current).unwrap();
        assert!(!tree.exists());
        remove_tree(&tree, &Privilege::Current).unwrap();
    }
}
