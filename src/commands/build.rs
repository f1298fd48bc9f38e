//! Build command - packs the overlay into a standalone archive.

use anyhow::Result;

use crate::build;
use crate::config::Config;
use crate::preflight::{self, PreflightScope};
use crate::timing::Timer;

/// Execute the build command.
pub fn cmd_build(config: &Config) -> Result<()> {
    preflight::run_preflight_or_fail(config, PreflightScope::Build)?;

    let timer = Timer::start("build");
    build::build_overlay_archive(config)?;
    timer.finish();
    Ok(())
}
