//! Preflight checks for amberpack.
//!
//! Validates host tools and configuration before a build starts.
//! Run with `amberpack preflight` to check everything is ready.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::process::{self, Privilege};

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    /// Check passed.
    Pass,
    /// Check failed - build will fail.
    Fail,
    /// Check passed but with a warning.
    Warn,
    /// Check skipped (not applicable).
    Skip,
}

impl CheckResult {
    fn pass(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Pass,
            details: None,
        }
    }

    fn pass_with(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Pass,
            details: Some(details.to_string()),
        }
    }

    fn fail(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Fail,
            details: Some(details.to_string()),
        }
    }

    fn warn(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warn,
            details: Some(details.to_string()),
        }
    }

    fn skip(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Skip,
            details: Some(details.to_string()),
        }
    }
}

/// Which command the checks are for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreflightScope {
    /// Overlay-only archive: no loop devices, no download.
    Build,
    /// Full image packaging.
    Package,
}

/// Results of all preflight checks.
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    /// Returns true if all checks passed (no failures).
    pub fn all_passed(&self) -> bool {
        !self.checks.iter().any(|c| c.status == CheckStatus::Fail)
    }

    /// Count of failed checks.
    pub fn fail_count(&self) -> usize {
        self.checks.iter().filter(|c| c.status == CheckStatus::Fail).count()
    }

    /// Count of warnings.
    pub fn warn_count(&self) -> usize {
        self.checks.iter().filter(|c| c.status == CheckStatus::Warn).count()
    }

    pub fn get(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }

    /// Print the report to stdout.
    pub fn print(&self) {
        println!("=== Preflight Check Results ===\n");

        for check in &self.checks {
            let icon = match check.status {
                CheckStatus::Pass => "✓",
                CheckStatus::Fail => "✗",
                CheckStatus::Warn => "⚠",
                CheckStatus::Skip => "○",
            };

            let status_str = match check.status {
                CheckStatus::Pass => "PASS",
                CheckStatus::Fail => "FAIL",
                CheckStatus::Warn => "WARN",
                CheckStatus::Skip => "SKIP",
            };

            print!("  {} [{}] {}", icon, status_str, check.name);
            if let Some(details) = &check.details {
                println!(": {}", details);
            } else {
                println!();
            }
        }

        println!();
        let total = self.checks.len();
        let passed = self
            .checks
            .iter()
            .filter(|c| c.status == CheckStatus::Pass)
            .count();
        let failed = self.fail_count();
        let warned = self.warn_count();

        println!("Summary: {}/{} passed", passed, total);
        if failed > 0 {
            println!("         {} FAILED - build will not succeed", failed);
        }
        if warned > 0 {
            println!("         {} warnings", warned);
        }
    }
}

/// Tools needed by each scope: (tool, package, purpose).
fn required_tools(scope: PreflightScope) -> Vec<(&'static str, &'static str, &'static str)> {
    let mut tools = vec![
        ("mksquashfs", "squashfs-tools", "Required to create the SYSTEM archive"),
        ("rsync", "rsync", "Required to copy the overlay"),
    ];
    if scope == PreflightScope::Package {
        tools.extend([
            ("losetup", "util-linux", "Required to attach the base image"),
            ("mount", "util-linux", "Required to mount the boot partition"),
            ("umount", "util-linux", "Required to unmount the boot partition"),
            ("unsquashfs", "squashfs-tools", "Required to extract the base SYSTEM"),
            ("sync", "coreutils", "Required to flush the image before detaching"),
            ("md5sum", "coreutils", "Required to refresh SYSTEM.md5"),
            ("chown", "coreutils", "Required to hand outputs back to the user"),
        ]);
    }
    tools
}

/// Run the checks for `scope`.
pub fn run_preflight(config: &Config, scope: PreflightScope) -> PreflightReport {
    let mut checks = Vec::new();

    println!("Running preflight checks...\n");

    println!("Checking host tools...");
    for (tool, package, purpose) in required_tools(scope) {
        checks.push(check_tool_exists(tool, package, purpose));
    }

    println!("Checking configuration...");
    checks.extend(check_configuration(config, scope));

    println!();

    PreflightReport { checks }
}

/// Check if a tool exists in PATH.
fn check_tool_exists(tool: &str, package: &str, purpose: &str) -> CheckResult {
    match process::which(tool) {
        Some(path) => CheckResult::pass_with(tool, &path),
        None => CheckResult::fail(
            tool,
            &format!("Not found. Install '{}' package. {}", package, purpose),
        ),
    }
}

fn check_configuration(config: &Config, scope: PreflightScope) -> Vec<CheckResult> {
    let mut results = Vec::new();

    if config.overlay_dir.is_dir() {
        let files = crate::overlay::count_files(&config.overlay_dir);
        if files == 0 {
            results.push(CheckResult::warn(
                "Overlay directory",
                &format!("{} is empty", config.overlay_dir.display()),
            ));
        } else {
            results.push(CheckResult::pass_with(
                "Overlay directory",
                &format!("{} ({} files)", config.overlay_dir.display(), files),
            ));
        }
    } else {
        results.push(CheckResult::fail(
            "Overlay directory",
            &format!("{} not found", config.overlay_dir.display()),
        ));
    }

    if scope == PreflightScope::Build {
        return results;
    }

    results.push(match config.privilege() {
        Privilege::Current if process::is_root() => CheckResult::pass_with("Privileges", "running as root"),
        Privilege::Current => CheckResult::warn(
            "Privileges",
            "Not root and PRIVILEGE_HELPER is empty. losetup and mount will likely fail.",
        ),
        Privilege::Helper(helper) => check_tool_exists(
            &helper,
            &helper,
            "Required to run losetup and mount as root (PRIVILEGE_HELPER)",
        ),
    });

    results.push(match config.base_image_url.as_deref() {
        Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
            CheckResult::pass_with("BASE_IMAGE_URL", url)
        }
        Some(url) => CheckResult::fail(
            "BASE_IMAGE_URL",
            &format!("'{}' is not an http(s) URL", url),
        ),
        None => CheckResult::fail("BASE_IMAGE_URL", "Not set. Add it to .env."),
    });

    if config.compress_output {
        results.push(CheckResult::pass("COMPRESS_OUTPUT"));
    } else {
        results.push(CheckResult::skip(
            "COMPRESS_OUTPUT",
            "disabled, no .gz copy of the image",
        ));
    }

    results
}

/// Run preflight and fail if any checks fail.
pub fn run_preflight_or_fail(config: &Config, scope: PreflightScope) -> Result<()> {
    let report = run_preflight(config, scope);
    report.print();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above before building.",
            report.fail_count()
        );
    }

    println!("All preflight checks passed!\n");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    fn config_with(dir: &std::path::Path, pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(dir, &vars)
    }

    #[test]
    fn test_build_scope_needs_fewer_tools() {
        let build: Vec<_> = required_tools(PreflightScope::Build)
            .into_iter()
            .map(|t| t.0)
            .collect();
        let package: Vec<_> = required_tools(PreflightScope::Package)
            .into_iter()
            .map(|t| t.0)
            .collect();
        assert!(!build.contains(&"losetup"));
        assert!(package.contains(&"losetup"));
        assert!(package.contains(&"md5sum"));
        assert!(build.iter().all(|t| package.contains(t)));
    }

    #[test]
    fn test_missing_overlay_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(dir.path(), &[]);
        let results = check_configuration(&config, PreflightScope::Build);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, CheckStatus::Fail);
    }

    #[test]
    fn test_empty_overlay_warns() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("overlay")).unwrap();
        let config = config_with(dir.path(), &[]);
        let results = check_configuration(&config, PreflightScope::Build);
        assert_eq!(results[0].status, CheckStatus::Warn);
    }

    #[test]
    fn test_package_scope_checks_url() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("overlay/usr/bin")).unwrap();
        fs::write(dir.path().join("overlay/usr/bin/foo"), "x").unwrap();

        let report = PreflightReport {
            checks: check_configuration(
                &config_with(dir.path(), &[("PRIVILEGE_HELPER", "")]),
                PreflightScope::Package,
            ),
        };
        assert_eq!(report.get("Overlay directory").unwrap().status, CheckStatus::Pass);
        assert_eq!(report.get("BASE_IMAGE_URL").unwrap().status, CheckStatus::Fail);
        assert!(!report.all_passed());

        let report = PreflightReport {
            checks: check_configuration(
                &config_with(
                    dir.path(),
                    &[("BASE_IMAGE_URL", "ftp://mirror/img.gz"), ("PRIVILEGE_HELPER", "")],
                ),
                PreflightScope::Package,
            ),
        };
        assert!(report.get("BASE_IMAGE_URL").unwrap().details.as_deref().unwrap().contains("ftp"));
    }

    #[test]
    fn test_report_counts() {
        let report = PreflightReport {
            checks: vec![
                CheckResult::pass("a"),
                CheckResult::warn("b", "meh"),
                CheckResult::fail("c", "no"),
                CheckResult::skip("d", "n/a"),
            ],
        };
        assert_eq!(report.fail_count(), 1);
        assert_eq!(report.warn_count(), 1);
        assert!(!report.all_passed());
    }
}
