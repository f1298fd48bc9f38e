//! Utilities for managing scratch directories.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Prepare a work directory, removing it if it exists and creating it fresh
/// (parents included).
pub fn prepare_work_dir(work_dir: &Path) -> Result<&Path> {
    if work_dir.exists() {
        fs::remove_dir_all(work_dir)
            .with_context(|| format!("Failed to clear {}", work_dir.display()))?;
    }
    fs::create_dir_all(work_dir)
        .with_context(|| format!("Failed to create {}", work_dir.display()))?;

    Ok(work_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_work_dir_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("build/overlay-staging");
        fs::create_dir_all(staging.join("old")).unwrap();

        let prepared = prepare_work_dir(&staging).unwrap();
        assert_eq!(prepared, staging.as_path());
        assert_eq!(fs::read_dir(&prepared).unwrap().count(), 0);
    }
}
