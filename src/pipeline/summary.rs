use super::context::FixRecord;
use super::step::PipelineStep;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

pub const SUMMARY_FILE: &str = "summary.json";
pub const FIXES_FILE: &str = "fixes.json";
pub const REPORT_FILE: &str = "report.md";

/// Why a step did not run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// The step's skip predicate fired
    Condition(String),
    /// Optional stage whose inputs or credentials are missing
    Unavailable(String),
    /// An upstream step failed
    DependenciesNotMet,
    /// A required step failed earlier in the run
    PipelineHalted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Condition(reason) => write!(f, "{}", reason),
            SkipReason::Unavailable(reason) => write!(f, "unavailable: {}", reason),
            SkipReason::DependenciesNotMet => write!(f, "dependencies not met"),
            SkipReason::PipelineHalted => write!(f, "pipeline halted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped(SkipReason),
}

/// Outcome of one step within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub display_name: String,
    #[serde(flatten)]
    pub status: StepStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub required: bool,
    pub continue_on_error: bool,
}

impl StepResult {
    fn base(step: &PipelineStep, status: StepStatus) -> Self {
        Self {
            step_id: step.id.clone(),
            display_name: step.display_name.clone(),
            status,
            duration_ms: 0,
            error: None,
            required: step.required,
            continue_on_error: step.continue_on_error,
        }
    }

    pub fn succeeded(step: &PipelineStep, duration_ms: u64) -> Self {
        Self {
            duration_ms,
            ..Self::base(step, StepStatus::Succeeded)
        }
    }

    pub fn failed(step: &PipelineStep, duration_ms: u64, error: String) -> Self {
        Self {
            duration_ms,
            error: Some(error),
            ..Self::base(step, StepStatus::Failed)
        }
    }

    pub fn skipped(step: &PipelineStep, reason: SkipReason) -> Self {
        Self::base(step, StepStatus::Skipped(reason))
    }

    /// Counts against the run's exit status
    pub fn is_blocking_failure(&self) -> bool {
        match &self.status {
            StepStatus::Failed => !self.continue_on_error,
            StepStatus::Skipped(SkipReason::DependenciesNotMet) => self.required,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCounts {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Record of one end-to-end run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_duration_ms: u64,
    /// Step whose failure halted the run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted_by: Option<String>,
    pub counts: StepCounts,
    /// One entry per registered step, in declaration order
    pub steps: Vec<StepResult>,
}

impl RunSummary {
    pub fn new(
        run_id: String,
        started_at: DateTime<Utc>,
        total_duration_ms: u64,
        halted_by: Option<String>,
        steps: Vec<StepResult>,
    ) -> Self {
        let mut counts = StepCounts::default();
        for step in &steps {
            match step.status {
                StepStatus::Succeeded => counts.succeeded += 1,
                StepStatus::Failed => counts.failed += 1,
                StepStatus::Skipped(_) => counts.skipped += 1,
            }
        }
        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            total_duration_ms,
            halted_by,
            counts,
            steps,
        }
    }

    pub fn success(&self) -> bool {
        !self.steps.iter().any(StepResult::is_blocking_failure)
    }

    /// Process exit code for this run
    pub fn exit_code(&self) -> i32 {
        if self.success() { 0 } else { 1 }
    }

    pub fn step(&self, id: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.step_id == id)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} was already written for this run")]
    AlreadyWritten(PathBuf),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize {0}: {1}")]
    Serialize(&'static str, #[source] serde_json::Error),
}

/// Write-once store for one run's artifacts
pub struct RunStore {
    dir: PathBuf,
}

impl RunStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn write_summary(&self, summary: &RunSummary) -> Result<PathBuf, StoreError> {
        let content = serde_json::to_string_pretty(summary)
            .map_err(|e| StoreError::Serialize("run summary", e))?;
        self.write_once(SUMMARY_FILE, &content)
    }

    pub fn write_fixes(&self, records: &[FixRecord]) -> Result<PathBuf, StoreError> {
        let content = serde_json::to_string_pretty(records)
            .map_err(|e| StoreError::Serialize("fix records", e))?;
        self.write_once(FIXES_FILE, &content)
    }

    pub fn write_report(&self, markdown: &str) -> Result<PathBuf, StoreError> {
        self.write_once(REPORT_FILE, markdown)
    }

    fn write_once(&self, name: &str, content: &str) -> Result<PathBuf, StoreError> {
        let path = self.dir.join(name);
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(&self.dir).map_err(io_err)?;
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyWritten(path));
            }
            Err(e) => return Err(io_err(e)),
        };
        file.write_all(content.as_bytes()).map_err(io_err)?;
        info!("Wrote {}", path.display());
        Ok(path)
    }
}
