//! Configuration loading from `.env` and the environment.

mod helpers;

use helpers::TestEnv;
use serial_test::serial;
use std::fs;

use amberpack::config::Config;

const KEYS: &[&str] = &["BASE_IMAGE_URL", "IMAGE_NAME", "OVERLAY_EXCLUDES"];

fn clear_env() {
    for key in KEYS {
        std::env::remove_var(key);
    }
}

#[test]
#[serial]
fn test_env_file_is_read() {
    clear_env();
    let env = TestEnv::new();
    fs::write(
        env.base_dir.join(".env"),
        "# base image\nBASE_IMAGE_URL=https://mirror.invalid/base.img.gz\nIMAGE_NAME=test.img\n",
    )
    .unwrap();

    let config = Config::load(&env.base_dir);
    assert_eq!(
        config.require_base_image_url().unwrap(),
        "https://mirror.invalid/base.img.gz"
    );
    assert_eq!(config.image_name, "test.img");
    assert_eq!(config.overlay_dir, env.base_dir.join("overlay"));
}

#[test]
#[serial]
fn test_environment_overrides_env_file() {
    clear_env();
    let env = TestEnv::new();
    fs::write(env.base_dir.join(".env"), "IMAGE_NAME=from-file.img\n").unwrap();
    std::env::set_var("IMAGE_NAME", "from-env.img");
    std::env::set_var("OVERLAY_EXCLUDES", "etc/fstab");

    let config = Config::load(&env.base_dir);
    clear_env();

    assert_eq!(config.image_name, "from-env.img");
    assert!(config.overlay_excludes.contains(&"etc/fstab".to_string()));
    assert!(config
        .overlay_excludes
        .contains(&"usr/lib/amberelec/fs-resize".to_string()));
}

#[test]
#[serial]
fn test_missing_env_file_uses_defaults() {
    clear_env();
    let env = TestEnv::new();
    let config = Config::load(&env.base_dir);
    assert!(config.require_base_image_url().is_err());
    assert_eq!(config.image_name, "AmberG350.img");
}
