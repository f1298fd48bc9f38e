//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `build` - Pack the overlay into a standalone SYSTEM archive
//! - `package` - Merge the overlay into the base image
//! - `clean` - Clean build artifacts
//! - `container` - Run `build` inside a container
//! - `show` - Display information
//! - `preflight` - Run preflight checks

pub mod build;
pub mod clean;
pub mod container;
pub mod package;
mod preflight;
pub mod show;

pub use build::cmd_build;
pub use clean::cmd_clean;
pub use container::cmd_container;
pub use package::cmd_package_image;
pub use preflight::cmd_preflight;
pub use show::cmd_show;
