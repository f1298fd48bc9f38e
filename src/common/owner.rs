//! Hand files created by privileged steps back to the invoking user.

use anyhow::Result;
use std::path::Path;

use crate::process::{self, Cmd, Privilege};

/// chown `paths` to the user who started the build.
///
/// Only needed when something ran as root: either the whole process (sudo)
/// or individual commands through the privilege helper. Missing paths are
/// skipped.
pub fn restore_ownership(paths: &[&Path], privilege: &Privilege) -> Result<()> {
    if !process::is_root() && *privilege == Privilege::Current {
        return Ok(());
    }

    let existing: Vec<&Path> = paths.iter().copied().filter(|p| p.exists()).collect();
    if existing.is_empty() {
        return Ok(());
    }

    let (uid, gid) = process::invoking_user();
    let mut cmd = Cmd::new("chown").arg(format!("{}:{}", uid, gid));
    for path in &existing {
        cmd = cmd.arg_path(path);
    }
    cmd.privileged(privilege)
        .error_msg("Failed to restore ownership of build outputs")
        .run()?;

    for path in existing {
        println!("  Owner of {} set to {}:{}", path.display(), uid, gid);
    }
    Ok(())
}
