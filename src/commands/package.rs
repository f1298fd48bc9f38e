//! Package-image command - runs the full image pipeline.

use anyhow::Result;

use crate::config::Config;
use crate::pipeline::{image::PackageOptions, ImagePipeline};
use crate::preflight::{self, PreflightScope};
use crate::timing::Timer;

/// Execute the package-image command.
///
/// Warnings from advisory stages are printed in the summary but never
/// change the result.
pub fn cmd_package_image(config: &Config, reuse_download: bool) -> Result<()> {
    preflight::run_preflight_or_fail(config, PreflightScope::Package)?;

    let timer = Timer::start("package-image");
    ImagePipeline::new(config, PackageOptions { reuse_download }).run()?;
    timer.finish();
    Ok(())
}
