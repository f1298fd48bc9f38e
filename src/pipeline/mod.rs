//! The image packaging pipeline.
//!
//! ```text
//! Start -> Downloaded -> Decompressed -> Mounted -> Extracted -> BackedUp
//!       -> Overlaid -> Verified -> Repackaged -> Remounted -> Replaced
//!       -> Finalized -> Done
//! ```
//!
//! Every stage either completes, completes with advisory warnings, or fails.
//! Whether a failure aborts the run is decided here from the stage's
//! [`FailurePolicy`], not by the stage itself. Only backup and verification
//! are advisory.

pub mod image;
pub mod preserve;

use std::fmt;

use crate::timing::Timer;

pub use image::ImagePipeline;

/// One step of `package-image`, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Download,
    Decompress,
    Mount,
    Extract,
    Backup,
    Overlay,
    Verify,
    Repackage,
    Remount,
    Replace,
    Finalize,
}

impl Stage {
    pub const ALL: [Stage; 11] = [
        Stage::Download,
        Stage::Decompress,
        Stage::Mount,
        Stage::Extract,
        Stage::Backup,
        Stage::Overlay,
        Stage::Verify,
        Stage::Repackage,
        Stage::Remount,
        Stage::Replace,
        Stage::Finalize,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Decompress => "decompress",
            Stage::Mount => "mount",
            Stage::Extract => "extract",
            Stage::Backup => "backup",
            Stage::Overlay => "overlay",
            Stage::Verify => "verify",
            Stage::Repackage => "repackage",
            Stage::Remount => "remount",
            Stage::Replace => "replace",
            Stage::Finalize => "finalize",
        }
    }

    pub fn policy(self) -> FailurePolicy {
        match self {
            // TODO: a missing init system after the overlay cannot boot; make
            // Verify fatal once existing overlays are known to pass it.
            Stage::Backup | Stage::Verify => FailurePolicy::Advisory,
            _ => FailurePolicy::Fatal,
        }
    }

    /// State reached when this stage succeeds.
    pub fn completes(self) -> PipelineState {
        match self {
            Stage::Download => PipelineState::Downloaded,
            Stage::Decompress => PipelineState::Decompressed,
            Stage::Mount => PipelineState::Mounted,
            Stage::Extract => PipelineState::Extracted,
            Stage::Backup => PipelineState::BackedUp,
            Stage::Overlay => PipelineState::Overlaid,
            Stage::Verify => PipelineState::Verified,
            Stage::Repackage => PipelineState::Repackaged,
            Stage::Remount => PipelineState::Remounted,
            Stage::Replace => PipelineState::Replaced,
            Stage::Finalize => PipelineState::Finalized,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Start,
    Downloaded,
    Decompressed,
    Mounted,
    Extracted,
    BackedUp,
    Overlaid,
    Verified,
    Repackaged,
    Remounted,
    Replaced,
    Finalized,
    Done,
    /// A fatal stage failed; held resources were released.
    Abort,
}

/// What happens when a stage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop the pipeline.
    Fatal,
    /// Record a warning and continue.
    Advisory,
}

/// Successful stage result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    /// Completed, but something worth a warning was noticed.
    Advisory(Vec<String>),
}

impl StageOutcome {
    /// `Completed` when there is nothing to warn about.
    pub fn from_warnings(warnings: Vec<String>) -> Self {
        if warnings.is_empty() {
            StageOutcome::Completed
        } else {
            StageOutcome::Advisory(warnings)
        }
    }
}

/// A fatal stage failure.
#[derive(Debug)]
pub struct StageError {
    pub stage: Stage,
    pub source: anyhow::Error,
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage '{}' failed", self.stage)
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.source)
    }
}

/// A warning raised by an advisory stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub stage: Stage,
    pub message: String,
}

/// Everything the driver observed during a run.
#[derive(Debug, Default)]
pub struct PipelineReport {
    pub warnings: Vec<Warning>,
    pub completed: Vec<Stage>,
    /// True once every stage through `Finalize` has run.
    pub done: bool,
}

impl PipelineReport {
    pub fn warnings_for(&self, stage: Stage) -> Vec<&str> {
        self.warnings
            .iter()
            .filter(|w| w.stage == stage)
            .map(|w| w.message.as_str())
            .collect()
    }

    pub fn print_summary(&self) {
        if self.warnings.is_empty() {
            println!("No warnings.");
            return;
        }
        println!("{} warning(s):", self.warnings.len());
        for w in &self.warnings {
            println!("  [{}] {}", w.stage, w.message);
        }
    }
}

/// Runs stages in order and applies the failure policy.
#[derive(Debug)]
pub struct Driver {
    state: PipelineState,
    report: PipelineReport,
}

impl Default for Driver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver {
    pub fn new() -> Self {
        Self {
            state: PipelineState::Start,
            report: PipelineReport::default(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn report(&self) -> &PipelineReport {
        &self.report
    }

    /// Run one stage. Returns `Err` only for failures the policy treats as
    /// fatal; the driver is then in `Abort`.
    pub fn run_stage<F>(&mut self, stage: Stage, exec: F) -> Result<(), StageError>
    where
        F: FnOnce() -> anyhow::Result<StageOutcome>,
    {
        if self.state == PipelineState::Abort {
            return Err(StageError {
                stage,
                source: anyhow::anyhow!("pipeline already aborted"),
            });
        }

        println!("\n=== [{}] {} ===", self.report.completed.len() + 1, stage);
        let timer = Timer::start(stage.name());

        let warnings = match (exec(), stage.policy()) {
            (Ok(StageOutcome::Completed), _) => Vec::new(),
            (Ok(StageOutcome::Advisory(warnings)), _) => warnings,
            (Err(e), FailurePolicy::Advisory) => vec![format!("{:#}", e)],
            (Err(e), FailurePolicy::Fatal) => {
                self.state = PipelineState::Abort;
                return Err(StageError { stage, source: e });
            }
        };

        for message in warnings {
            eprintln!("[WARN] {}", message);
            self.report.warnings.push(Warning { stage, message });
        }

        timer.finish();
        self.report.completed.push(stage);
        self.state = stage.completes();
        Ok(())
    }

    /// Mark the run finished and hand back the report.
    pub fn finish(mut self) -> PipelineReport {
        if self.state == PipelineState::Finalized {
            self.state = PipelineState::Done;
            self.report.done = true;
        }
        self.report
    }
}
