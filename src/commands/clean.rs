//! Clean command - removes build artifacts.

use crate::clean;
use crate::config::Config;
use crate::layout::BuildLayout;

/// Execute the clean command. Problems are printed as warnings.
pub fn cmd_clean(config: &Config) {
    let summary = clean::clean_all(&BuildLayout::new(config), &config.privilege());
    if summary.warnings > 0 {
        println!("{} warning(s) while cleaning.", summary.warnings);
    }
}
