//! Shared test utilities for amberpack tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use amberpack::config::Config;
use amberpack::layout::BuildLayout;

/// Test environment: a throwaway project directory with an overlay tree and
/// a fake extracted base root filesystem.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Project root simulation
    pub base_dir: PathBuf,
    /// `overlay/` inside the project
    pub overlay: PathBuf,
    /// Stand-in for an extracted base SYSTEM
    pub rootfs: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base_dir = temp_dir.path().to_path_buf();
        let overlay = base_dir.join("overlay");
        let rootfs = base_dir.join("base-rootfs");

        fs::create_dir_all(&overlay).expect("Failed to create overlay dir");
        fs::create_dir_all(&rootfs).expect("Failed to create rootfs dir");

        Self {
            _temp_dir: temp_dir,
            base_dir,
            overlay,
            rootfs,
        }
    }

    /// Config for this project; privileged commands run directly.
    pub fn config(&self, vars: &[(&str, &str)]) -> Config {
        let mut map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        map.entry("PRIVILEGE_HELPER".to_string()).or_default();
        Config::from_vars(&self.base_dir, &map)
    }

    pub fn layout(&self) -> BuildLayout {
        BuildLayout::new(&self.config(&[]))
    }
}

/// Write `content` to `root/rel` with `mode`, creating parents.
pub fn write_file(root: &Path, rel: &str, content: &str, mode: u32) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().expect("path has a parent")).expect("Failed to create dirs");
    fs::write(&path, content).expect("Failed to write file");
    fs::set_permissions(&path, fs::Permissions::from_mode(mode)).expect("Failed to chmod");
    path
}

/// Populate `rootfs` with the bits of an AmberELEC SYSTEM the tests care about.
pub fn create_mock_base(rootfs: &Path) {
    write_file(rootfs, "usr/lib/systemd/systemd", "systemd-binary", 0o755);
    write_file(rootfs, "usr/lib/systemd/system/default.target", "[Unit]\n", 0o644);
    write_file(rootfs, "usr/bin/autostart.sh", "#!/bin/sh\nbase autostart\n", 0o755);
    write_file(rootfs, "usr/lib/amberelec/fs-resize", "#!/bin/sh\nbase resize\n", 0o755);
    write_file(rootfs, "etc/os-release", "NAME=AmberELEC\n", 0o644);
}

/// Every regular file under `root`, keyed by relative path.
pub fn tree_files(root: &Path) -> BTreeMap<String, Vec<u8>> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e
                .path()
                .strip_prefix(root)
                .expect("walkdir yields paths under root")
                .to_string_lossy()
                .into_owned();
            let bytes = fs::read(e.path()).expect("Failed to read file");
            (rel, bytes)
        })
        .collect()
}

/// True when every tool is in PATH. Tests that shell out return early
/// otherwise.
pub fn have_tools(tools: &[&str]) -> bool {
    let missing: Vec<&str> = tools
        .iter()
        .copied()
        .filter(|t| !amberpack::process::exists(t))
        .collect();
    if !missing.is_empty() {
        eprintln!("skipping: {} not installed", missing.join(", "));
    }
    missing.is_empty()
}

pub fn mode_of(path: &Path) -> u32 {
    fs::metadata(path).expect("Failed to stat").permissions().mode() & 0o7777
}

pub fn assert_file_exists(path: &Path) {
    assert!(path.exists(), "Expected {} to exist", path.display());
}

pub fn assert_file_content(path: &Path, expected: &str) {
    let content = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
    assert_eq!(content, expected, "Unexpected content in {}", path.display());
}
