//! Centralized command execution with consistent error handling.
//!
//! Every host tool the pipeline drives (losetup, mount, unsquashfs, rsync...)
//! goes through [`Cmd`], so failures always carry the program name, exit code
//! and captured stderr. Commands that touch loop devices, mounts or root-owned
//! trees are marked [`Cmd::privileged`] and get wrapped in the configured
//! privilege helper when the process is not already root.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit status of the command.
    pub status: ExitStatus,
    /// Captured stdout as a string.
    pub stdout: String,
    /// Captured stderr as a string.
    pub stderr: String,
}

impl CommandResult {
    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Get the exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    /// Get stdout, trimmed of whitespace.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Get stderr, trimmed of whitespace.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// How privileged commands are launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Privilege {
    /// Run as the current user (already root, or no elevation wanted).
    Current,
    /// Prefix privileged commands with a helper such as `sudo`.
    Helper(String),
}

impl Privilege {
    /// Pick the privilege mode for this process.
    ///
    /// Root never needs a helper. An empty helper name disables elevation.
    pub fn detect(helper: &str) -> Self {
        if is_root() || helper.trim().is_empty() {
            Privilege::Current
        } else {
            Privilege::Helper(helper.trim().to_string())
        }
    }

    /// The helper program, if any.
    pub fn helper(&self) -> Option<&str> {
        match self {
            Privilege::Current => None,
            Privilege::Helper(h) => Some(h),
        }
    }
}

/// Builder for configuring command execution.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    /// Wrapper program (privilege helper) placed in front of `program`.
    wrapper: Option<String>,
    /// If true, don't fail on non-zero exit.
    allow_fail: bool,
    /// Custom error message prefix.
    error_prefix: Option<String>,
}

impl Cmd {
    /// Create a new command builder.
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            wrapper: None,
            allow_fail: false,
            error_prefix: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Add a path as an argument.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Run through the privilege helper when one is configured.
    pub fn privileged(mut self, privilege: &Privilege) -> Self {
        self.wrapper = privilege.helper().map(str::to_string);
        self
    }

    /// Allow non-zero exit codes without failing.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Set a custom error message prefix.
    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_string());
        self
    }

    /// The full argv as it will be executed, helper included.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 2);
        if let Some(ref wrapper) = self.wrapper {
            argv.push(wrapper.clone());
        }
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    fn command(&self) -> Command {
        let argv = self.argv();
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        cmd
    }

    fn failure_prefix(&self) -> String {
        self.error_prefix
            .clone()
            .unwrap_or_else(|| format!("'{}' failed", self.program))
    }

    /// Run the command and capture output.
    pub fn run(self) -> Result<CommandResult> {
        let output = self.command().output().with_context(|| {
            format!("Failed to execute '{}'. Is it installed?", self.argv()[0])
        })?;

        let result = CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !self.allow_fail && !result.success() {
            let prefix = self.failure_prefix();
            let stderr = result.stderr_trimmed();
            if stderr.is_empty() {
                bail!("{} (exit code {})", prefix, result.code());
            } else {
                bail!("{} (exit code {}):\n{}", prefix, result.code(), stderr);
            }
        }

        Ok(result)
    }

    /// Run the command with inherited stdio (interactive/streaming).
    ///
    /// Output goes directly to the terminal. Use for long-running commands
    /// where the user should see progress (mksquashfs, unsquashfs, rsync).
    pub fn run_interactive(self) -> Result<ExitStatus> {
        let mut cmd = self.command();
        cmd.stdin(Stdio::inherit());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());

        let status = cmd.status().with_context(|| {
            format!("Failed to execute '{}'. Is it installed?", self.argv()[0])
        })?;

        if !self.allow_fail && !status.success() {
            bail!(
                "{} (exit code {})",
                self.failure_prefix(),
                status.code().unwrap_or(-1)
            );
        }

        Ok(status)
    }
}

// =============================================================================
// Convenience functions
// =============================================================================

/// Check if a program exists in PATH.
///
/// Returns the full path if found, None otherwise.
pub fn which(program: &str) -> Option<String> {
    which::which(program)
        .ok()
        .map(|path| path.to_string_lossy().into_owned())
}

/// Check if a program exists in PATH (bool version).
pub fn exists(program: &str) -> bool {
    which(program).is_some()
}

/// True when the effective user is root.
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// The user who asked for the build.
///
/// Under sudo this is `SUDO_UID`/`SUDO_GID`, otherwise the real uid/gid.
pub fn invoking_user() -> (u32, u32) {
    let from_env = |key: &str| std::env::var(key).ok().and_then(|v| v.parse::<u32>().ok());
    // SAFETY: getuid/getgid have no preconditions and cannot fail.
    let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
    (
        from_env("SUDO_UID").unwrap_or(uid),
        from_env("SUDO_GID").unwrap_or(gid),
    )
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_success() {
        let result = Cmd::new("echo").arg("hello").run().unwrap();
        assert!(result.success());
        assert_eq!(result.stdout_trimmed(), "hello");
    }

    #[test]
    fn test_run_captures_stderr() {
        let result = Cmd::new("ls")
            .arg("/nonexistent_path_12345")
            .allow_fail()
            .run()
            .unwrap();

        assert!(!result.success());
        assert!(!result.stderr.is_empty());
    }

    #[test]
    fn test_run_failure_includes_stderr() {
        let err = Cmd::new("ls")
            .arg("/nonexistent_path_12345")
            .run()
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("No such file") || msg.contains("cannot access"));
    }

    #[test]
    fn test_custom_error_message() {
        let err = Cmd::new("false")
            .error_msg("mksquashfs failed")
            .run()
            .unwrap_err();

        assert!(err.to_string().contains("mksquashfs failed"));
    }

    #[test]
    fn test_allow_fail() {
        let result = Cmd::new("false").allow_fail().run().unwrap();
        assert!(!result.success());
        assert_eq!(result.code(), 1);
    }

    #[test]
    fn test_privileged_wraps_in_helper() {
        let cmd = Cmd::new("losetup")
            .args(["--find", "--show"])
            .privileged(&Privilege::Helper("sudo".into()));
        assert_eq!(cmd.argv(), vec!["sudo", "losetup", "--find", "--show"]);
    }

    #[test]
    fn test_privileged_current_runs_directly() {
        let cmd = Cmd::new("umount").arg("/mnt").privileged(&Privilege::Current);
        assert_eq!(cmd.argv(), vec!["umount", "/mnt"]);
    }

    #[test]
    fn test_privilege_empty_helper_disables_elevation() {
        assert_eq!(Privilege::detect("  "), Privilege::Current);
    }

    #[test]
    fn test_which_exists() {
        assert!(which("sh").is_some());
        assert!(!exists("nonexistent_program_12345"));
    }
}
