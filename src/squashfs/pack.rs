//! Squashfs packing using mksquashfs.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use super::superblock::{format_block_size, parse_block_size, Compressor, SuperblockInfo};
use crate::process::{Cmd, Privilege};

/// Compressor and block size for an mksquashfs run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackOptions {
    pub compressor: Compressor,
    pub block_size: u32,
    /// Force root ownership of every entry (for trees owned by the builder).
    pub all_root: bool,
    /// Store extended attributes from the source tree.
    pub xattrs: bool,
}

impl PackOptions {
    /// Options from configured strings, each falling back to `base` and
    /// then to the given defaults.
    pub fn resolve(
        compression: Option<&str>,
        block_size: Option<&str>,
        base: Option<&SuperblockInfo>,
        defaults: (&str, &str),
    ) -> Result<Self> {
        let compressor = match compression {
            Some(name) => Compressor::from_name(name)
                .with_context(|| format!("Unknown squashfs compressor '{}'", name))?,
            None => match base {
                Some(info) => info.compressor,
                None => Compressor::from_name(defaults.0)
                    .with_context(|| format!("Unknown squashfs compressor '{}'", defaults.0))?,
            },
        };
        let block_size = match block_size {
            Some(size) => parse_block_size(size)?,
            None => match base {
                Some(info) => info.block_size,
                None => parse_block_size(defaults.1)?,
            },
        };
        Ok(Self {
            compressor,
            block_size,
            all_root: false,
            xattrs: true,
        })
    }

    pub fn all_root(mut self, all_root: bool) -> Self {
        self.all_root = all_root;
        self
    }

    pub fn xattrs(mut self, xattrs: bool) -> Self {
        self.xattrs = xattrs;
        self
    }

    /// mksquashfs arguments after source and destination.
    pub fn mksquashfs_args(&self) -> Vec<String> {
        let mut args = vec![
            "-comp".to_string(),
            self.compressor.name().to_string(),
            "-b".to_string(),
            format_block_size(self.block_size),
            "-noappend".to_string(),
        ];
        if !self.xattrs {
            args.push("-no-xattrs".to_string());
        }
        if self.all_root {
            args.push("-all-root".to_string());
        }
        args
    }
}

/// Create a squashfs archive from `source` and check the result.
///
/// The archive's superblock must carry the requested compressor and block
/// size, otherwise the device may refuse to mount it.
pub fn create_squashfs(
    source: &Path,
    output: &Path,
    options: &PackOptions,
    privilege: &Privilege,
) -> Result<SuperblockInfo> {
    if !source.is_dir() {
        bail!("Squashfs source {} is not a directory", source.display());
    }

    println!(
        "Creating squashfs with {} compression, {} blocks...",
        options.compressor,
        format_block_size(options.block_size)
    );

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    // -noappend replaces the file, but a stale root-owned archive would
    // still block an unprivileged run.
    if output.exists() {
        Cmd::new("rm")
            .arg("-f")
            .arg_path(output)
            .privileged(privilege)
            .error_msg(format!("Failed to remove old {}", output.display()))
            .run()?;
    }

    Cmd::new("mksquashfs")
        .arg_path(source)
        .arg_path(output)
        .args(options.mksquashfs_args())
        .privileged(privilege)
        .error_msg("mksquashfs failed. Install squashfs-tools.")
        .run_interactive()?;

    let info = SuperblockInfo::read(output)?;
    if info.compressor != options.compressor || info.block_size != options.block_size {
        bail!(
            "{} was built with {} / {} but {} / {} was requested",
            output.display(),
            info.compressor,
            format_block_size(info.block_size),
            options.compressor,
            format_block_size(options.block_size)
        );
    }

    let size = fs::metadata(output)?.len();
    println!("Squashfs created: {} MB", size / 1024 / 1024);
    Ok(info)
}
