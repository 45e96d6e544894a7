use crate::config::Config;
use crate::fix::{AttemptTrace, ValidationResult};
use crate::types::{Analysis, Fix, Violation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Confidence a fix needs before it may be applied without a human
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.90;

/// Per-run switches from the command line
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Run the interactive human-review step
    pub interactive: bool,
    /// Run the apply step
    pub auto_apply: bool,
    pub confidence_threshold: f64,
    /// Copy files aside before applying fixes
    pub backup: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            interactive: false,
            auto_apply: false,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            backup: true,
        }
    }
}

/// Auto-apply gate outcome for one fix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub eligible: bool,
    /// Why the fix was held back (empty when eligible)
    pub reasons: Vec<String>,
}

/// Human review outcome for one fix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    Approved,
    Rejected,
    /// Reviewer skipped the fix
    Deferred,
}

/// Everything known about one confirmed violation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixRecord {
    pub violation: Violation,
    pub analysis: Analysis,
    /// Last attempt's fix, present even when it failed validation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<Fix>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
    /// Agent error when no fix could be produced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate: Option<GateDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewVerdict>,
    #[serde(default)]
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apply_error: Option<String>,
}

impl FixRecord {
    pub fn new(violation: Violation, analysis: Analysis) -> Self {
        Self {
            violation,
            analysis,
            fix: None,
            validation: None,
            error: None,
            gate: None,
            review: None,
            applied: false,
            apply_error: None,
        }
    }

    /// Gate passed and, if a human reviewed it, approved
    pub fn ready_to_apply(&self) -> bool {
        self.fix.is_some()
            && self.gate.as_ref().is_some_and(|g| g.eligible)
            && self
                .review
                .is_none_or(|verdict| verdict == ReviewVerdict::Approved)
    }
}

/// Attempts made for one violation, written to the trace file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationTrace {
    pub violation: Violation,
    pub elapsed_secs: f64,
    pub attempts: Vec<AttemptTrace>,
}

/// Shared state threaded through every stage of one run
pub struct RunContext {
    pub config: Config,
    pub options: RunOptions,
    /// API key for the generation service, if any
    pub api_key: Option<String>,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    /// Directory receiving this run's artifacts
    pub run_dir: PathBuf,
    /// Violations loaded by the scan stage
    pub violations: Vec<Violation>,
    /// Fix records in violation order
    pub records: Vec<FixRecord>,
    pub traces: Vec<ViolationTrace>,
}

impl RunContext {
    pub fn new(config: Config, options: RunOptions, api_key: Option<String>) -> Self {
        let started_at = Utc::now();
        let run_id = format!("run-{}", started_at.format("%Y%m%dT%H%M%S%3fZ"));
        let run_dir = config.pipeline.output_dir.join(&run_id);
        Self {
            config,
            options,
            api_key,
            run_id,
            started_at,
            run_dir,
            violations: Vec::new(),
            records: Vec::new(),
            traces: Vec::new(),
        }
    }

    /// Resolve a violation or fix path against the project root
    pub fn project_path(&self, relative: &str) -> PathBuf {
        self.config.pipeline.project_root.join(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fix::testing::{complete_fix, real_analysis, violation};

    fn record() -> FixRecord {
        let v = violation("src/api.ts", 3);
        let a = real_analysis(&v);
        FixRecord::new(v, a)
    }

    #[test]
    fn test_ready_to_apply_requires_gate() {
        let mut r = record();
        r.fix = Some(complete_fix());
        assert!(!r.ready_to_apply());

        r.gate = Some(GateDecision {
            eligible: true,
            reasons: vec![],
        });
        assert!(r.ready_to_apply());

        r.gate = Some(GateDecision {
            eligible: false,
            reasons: vec!["low".into()],
        });
        assert!(!r.ready_to_apply());
    }

    #[test]
    fn test_ready_to_apply_respects_review() {
        let mut r = record();
        r.fix = Some(complete_fix());
        r.gate = Some(GateDecision {
            eligible: true,
            reasons: vec![],
        });
        r.review = Some(ReviewVerdict::Rejected);
        assert!(!r.ready_to_apply());
        r.review = Some(ReviewVerdict::Deferred);
        assert!(!r.ready_to_apply());
        r.review = Some(ReviewVerdict::Approved);
        assert!(r.ready_to_apply());
    }

    #[test]
    fn test_run_dir_under_output_dir() {
        let ctx = RunContext::new(Config::default(), RunOptions::default(), None);
        assert!(ctx.run_id.starts_with("run-"));
        assert_eq!(ctx.run_dir, PathBuf::from("remediation/runs").join(&ctx.run_id));
    }
}
