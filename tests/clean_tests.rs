//! `clean` behaviour on realistic leftovers.

mod helpers;

use helpers::{write_file, TestEnv};
use std::fs;
use std::path::Path;

use amberpack::clean::{clean_all, CleanSummary};
use amberpack::process::Privilege;

/// Relative paths of everything left under `root`, dirs included.
fn snapshot(root: &Path) -> Vec<String> {
    walkdir::WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.path().strip_prefix(root).unwrap().to_string_lossy().into_owned())
        .collect()
}

fn populate_leftovers(env: &TestEnv) {
    let layout = env.layout();
    write_file(&layout.build_dir, "base.img.download", "gz", 0o644);
    write_file(&layout.build_dir, "base.img", "img", 0o644);
    write_file(&layout.rootfs, "usr/bin/foo", "foo", 0o755);
    write_file(&layout.backup_dir, "usr/bin/autostart.sh", "sh", 0o755);
    fs::create_dir_all(&layout.mount_dir).unwrap();
    fs::create_dir_all(&layout.output_dir).unwrap();
    fs::write(&layout.overlay_archive, "hsqs").unwrap();
    fs::write(&layout.final_image, "img").unwrap();
    fs::write(&layout.final_image_checksum, "sum").unwrap();
    fs::write(&layout.final_image_gz, "gz").unwrap();
}

#[test]
fn test_clean_twice_equals_clean_once() {
    let env = TestEnv::new();
    write_file(&env.overlay, "usr/bin/foo", "foo", 0o755);
    populate_leftovers(&env);
    let layout = env.layout();

    let first = clean_all(&layout, &Privilege::Current);
    assert!(first.removed >= 5);
    let after_once = snapshot(&env.base_dir);

    let second = clean_all(&layout, &Privilege::Current);
    assert_eq!(second, CleanSummary::default());
    assert_eq!(snapshot(&env.base_dir), after_once);
}

#[test]
fn test_clean_preserves_overlay_and_env() {
    let env = TestEnv::new();
    write_file(&env.overlay, "usr/bin/foo", "foo", 0o755);
    fs::write(env.base_dir.join(".env"), "BASE_IMAGE_URL=https://example.invalid/a.img.gz\n")
        .unwrap();
    populate_leftovers(&env);
    let layout = env.layout();

    clean_all(&layout, &Privilege::Current);

    assert!(env.overlay.join("usr/bin/foo").exists());
    assert!(env.base_dir.join(".env").exists());
    assert!(!layout.build_dir.exists());
    for output in layout.outputs() {
        assert!(!output.exists(), "{} survived clean", output.display());
    }
}
