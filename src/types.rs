use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Priority assigned to a violation by the scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

/// A single rule infraction detected by the external scanner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// File path, relative to the project root
    pub file: String,
    /// Line number (1-indexed)
    pub line: u32,
    /// Source snippet around the offending line
    #[serde(default)]
    pub snippet: String,
    /// Rule identifier (e.g. "no-any-type")
    pub rule: String,
    pub priority: Priority,
}

impl Violation {
    /// Short human-readable location, e.g. `src/app.ts:12 [no-any-type]`
    pub fn location(&self) -> String {
        format!("{}:{} [{}]", self.file, self.line, self.rule)
    }
}

/// Upstream judgment of whether a violation is worth fixing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    /// File of the analyzed violation
    pub file: String,
    /// Line of the analyzed violation
    pub line: u32,
    /// Rule of the analyzed violation
    pub rule: String,
    pub is_real_violation: bool,
    #[serde(default)]
    pub severity: String,
    /// Free-text rationale from the analyzer
    #[serde(default)]
    pub rationale: String,
}

impl Analysis {
    /// Whether this analysis refers to the given violation
    pub fn refers_to(&self, violation: &Violation) -> bool {
        self.file == violation.file && self.line == violation.line && self.rule == violation.rule
    }
}

/// Kind of remediation proposed by the generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixType {
    /// Single-file change
    Simple,
    /// Change spanning additional files
    Complex,
    /// The generator could not produce a fix
    Error,
}

impl fmt::Display for FixType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixType::Simple => write!(f, "simple"),
            FixType::Complex => write!(f, "complex"),
            FixType::Error => write!(f, "error"),
        }
    }
}

/// Inclusive line range (1-indexed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

impl LineRange {
    pub fn single(line: u32) -> Self {
        Self {
            start: line,
            end: line,
        }
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// The main edit of a fix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryChange {
    pub description: String,
    /// Replacement code for `lines`, copied verbatim from the response
    pub code: String,
    /// Target file (empty when the response did not name one)
    pub file: String,
    pub lines: Option<LineRange>,
}

/// Extra file created or rewritten by a complex fix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdditionalFile {
    pub path: String,
    pub purpose: String,
    /// Full file content, copied verbatim from the response
    pub content: String,
}

/// The generator's own assessment of its fix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfValidation {
    /// Completeness score (0-100)
    pub completeness_score: u8,
    pub reasoning: String,
}

/// A generated remediation proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub source_agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub fix_type: FixType,
    /// Generator confidence (0.0-1.0)
    pub confidence: f64,
    pub attempt_number: u32,
    pub primary_change: PrimaryChange,
    pub additional_files: Vec<AdditionalFile>,
    pub testing_notes: String,
    pub risks: Vec<String>,
    pub compliance_checklist: BTreeMap<String, bool>,
    pub self_validation: SelfValidation,
}
