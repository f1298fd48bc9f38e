//! Show command - displays information.

use anyhow::{bail, Result};
use std::path::PathBuf;

use crate::config::Config;
use crate::layout::BuildLayout;
use crate::loopdev;
use crate::squashfs::SuperblockInfo;

/// Show target for the show command.
pub enum ShowTarget {
    /// Show configuration
    Config,
    /// Show squashfs superblock of an archive (default: the overlay build)
    Archive(Option<PathBuf>),
    /// Show loop devices still bound to the build image
    Loops,
}

/// Execute the show command.
pub fn cmd_show(target: ShowTarget, config: &Config) -> Result<()> {
    let layout = BuildLayout::new(config);
    match target {
        ShowTarget::Config => {
            config.print();
        }
        ShowTarget::Archive(path) => {
            let archive = path.unwrap_or(layout.overlay_archive);
            if !archive.exists() {
                bail!(
                    "{} not found. Run 'amberpack build' first.",
                    archive.display()
                );
            }
            SuperblockInfo::read(&archive)?.print(&archive);
        }
        ShowTarget::Loops => {
            let devices = loopdev::bound_devices(&layout.image)?;
            if devices.is_empty() {
                println!("No loop devices bound to {}", layout.image.display());
            }
            for device in devices {
                println!("  {}", device.display());
            }
            if loopdev::is_mount_point(&layout.mount_dir) {
                println!("  {} is still mounted", layout.mount_dir.display());
            }
        }
    }
    Ok(())
}
