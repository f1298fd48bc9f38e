//! Configuration management for amberpack.
//!
//! Reads configuration from a `.env` file in the project directory and from
//! environment variables. Environment variables take precedence over `.env`.

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::process::Privilege;

/// Paths inside the base image's root filesystem that the overlay must never
/// overwrite. The filesystem-resize helper grows the storage partition on
/// first boot and has to match the base image's partition layout.
pub const DEFAULT_OVERLAY_EXCLUDES: &[&str] = &["usr/lib/amberelec/fs-resize"];

/// Paths that must survive the overlay for the image to boot.
pub const DEFAULT_CRITICAL_PATHS: &[&str] = &["usr/lib/systemd", "usr/bin/autostart.sh"];

/// Name of the embedded root filesystem archive on the boot partition.
pub const DEFAULT_SYSTEM_ARCHIVE: &str = "SYSTEM";

pub const DEFAULT_IMAGE_NAME: &str = "AmberG350.img";
pub const DEFAULT_SQUASHFS_COMPRESSION: &str = "gzip";
pub const DEFAULT_SQUASHFS_BLOCK_SIZE: &str = "512K";
pub const DEFAULT_CONTAINER_IMAGE: &str = "amberpack-build:latest";

/// amberpack configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Project root; relative paths resolve against it.
    pub base_dir: PathBuf,
    /// URL of the compressed base image (BASE_IMAGE_URL).
    pub base_image_url: Option<String>,
    /// Distribution overlay tree (default: overlay/).
    pub overlay_dir: PathBuf,
    /// Scratch directory (default: build/).
    pub build_dir: PathBuf,
    /// Deliverables directory (default: output/).
    pub output_dir: PathBuf,
    /// File name of the final disk image.
    pub image_name: String,
    /// Archive path relative to the boot partition root.
    pub system_archive: String,
    /// mksquashfs compressor. `None` means "same as the base archive" for
    /// the merged image and the default for the standalone build.
    pub squashfs_compression: Option<String>,
    /// mksquashfs block size. Same fallback rules as compression.
    pub squashfs_block_size: Option<String>,
    /// Denylist, relative to the filesystem root.
    pub overlay_excludes: Vec<String>,
    /// Paths backed up before and checked after the overlay.
    pub critical_paths: Vec<String>,
    /// Program used to elevate privileged commands (default: sudo).
    pub privilege_helper: String,
    /// Also write a gzip-compressed copy of the final image.
    pub compress_output: bool,
    /// Container runtime for `amberpack container`.
    pub container_runtime: String,
    /// Build image for `amberpack container`.
    pub container_image: String,
}

impl Config {
    /// Load configuration from `<base_dir>/.env` and the environment.
    pub fn load(base_dir: &Path) -> Self {
        let mut vars = HashMap::new();

        let env_path = base_dir.join(".env");
        match dotenvy::from_path_iter(&env_path) {
            Ok(iter) => {
                for item in iter {
                    match item {
                        Ok((key, value)) => {
                            vars.insert(key, value);
                        }
                        Err(e) => {
                            eprintln!("[WARN] Skipping bad line in {}: {}", env_path.display(), e);
                        }
                    }
                }
            }
            Err(e) if env_path.exists() => {
                eprintln!("[WARN] Failed to read {}: {}", env_path.display(), e);
            }
            Err(_) => {}
        }

        // Environment variables override .env file
        vars.extend(std::env::vars());

        Self::from_vars(base_dir, &vars)
    }

    /// Build a config from an explicit variable map.
    pub fn from_vars(base_dir: &Path, vars: &HashMap<String, String>) -> Self {
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let path = |key: &str, default: &str| {
            let path = PathBuf::from(get(key).unwrap_or_else(|| default.to_string()));
            if path.is_absolute() {
                path
            } else {
                base_dir.join(path)
            }
        };

        let mut overlay_excludes: Vec<String> = DEFAULT_OVERLAY_EXCLUDES
            .iter()
            .map(|s| s.to_string())
            .collect();
        if let Some(extra) = get("OVERLAY_EXCLUDES") {
            for entry in split_list(&extra) {
                if !overlay_excludes.contains(&entry) {
                    overlay_excludes.push(entry);
                }
            }
        }

        let critical_paths = match get("CRITICAL_PATHS") {
            Some(list) => split_list(&list),
            None => DEFAULT_CRITICAL_PATHS.iter().map(|s| s.to_string()).collect(),
        };

        let compress_output = get("COMPRESS_OUTPUT")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self {
            base_dir: base_dir.to_path_buf(),
            base_image_url: get("BASE_IMAGE_URL"),
            overlay_dir: path("OVERLAY_DIR", "overlay"),
            build_dir: path("BUILD_DIR", "build"),
            output_dir: path("OUTPUT_DIR", "output"),
            image_name: get("IMAGE_NAME").unwrap_or_else(|| DEFAULT_IMAGE_NAME.to_string()),
            system_archive: get("SYSTEM_ARCHIVE")
                .unwrap_or_else(|| DEFAULT_SYSTEM_ARCHIVE.to_string()),
            squashfs_compression: get("SQUASHFS_COMPRESSION"),
            squashfs_block_size: get("SQUASHFS_BLOCK_SIZE"),
            overlay_excludes,
            critical_paths,
            privilege_helper: vars
                .get("PRIVILEGE_HELPER")
                .cloned()
                .unwrap_or_else(|| "sudo".to_string()),
            compress_output,
            container_runtime: get("CONTAINER_RUNTIME").unwrap_or_else(|| "docker".to_string()),
            container_image: get("CONTAINER_IMAGE")
                .unwrap_or_else(|| DEFAULT_CONTAINER_IMAGE.to_string()),
        }
    }

    /// The base image URL, or an error telling the user where to set it.
    pub fn require_base_image_url(&self) -> Result<&str> {
        match self.base_image_url.as_deref() {
            Some(url) => Ok(url),
            None => bail!(
                "BASE_IMAGE_URL is not set.\n\
                 Add it to {} or export it in the environment.",
                self.base_dir.join(".env").display()
            ),
        }
    }

    /// Privilege mode for commands that need root.
    pub fn privilege(&self) -> Privilege {
        Privilege::detect(&self.privilege_helper)
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        let or_auto = |v: &Option<String>| v.clone().unwrap_or_else(|| "auto".to_string());
        println!("Configuration:");
        println!(
            "  BASE_IMAGE_URL:       {}",
            self.base_image_url.as_deref().unwrap_or("(not set)")
        );
        println!("  OVERLAY_DIR:          {}", self.overlay_dir.display());
        println!("  BUILD_DIR:            {}", self.build_dir.display());
        println!("  OUTPUT_DIR:           {}", self.output_dir.display());
        println!("  IMAGE_NAME:           {}", self.image_name);
        println!("  SYSTEM_ARCHIVE:       {}", self.system_archive);
        println!("  SQUASHFS_COMPRESSION: {}", or_auto(&self.squashfs_compression));
        println!("  SQUASHFS_BLOCK_SIZE:  {}", or_auto(&self.squashfs_block_size));
        println!("  OVERLAY_EXCLUDES:     {}", self.overlay_excludes.join(", "));
        println!("  CRITICAL_PATHS:       {}", self.critical_paths.join(", "));
        println!(
            "  PRIVILEGE_HELPER:     {}",
            self.privilege().helper().unwrap_or("(none, running as root)")
        );
        println!("  COMPRESS_OUTPUT:      {}", self.compress_output);
        println!("  CONTAINER_RUNTIME:    {}", self.container_runtime);
        println!("  CONTAINER_IMAGE:      {}", self.container_image);
        if self.overlay_dir.is_dir() {
            println!("  Overlay: FOUND");
        } else {
            println!("  Overlay: NOT FOUND");
        }
    }
}

/// Split a comma-separated list, dropping blanks and leading slashes.
fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().trim_start_matches('/'))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
