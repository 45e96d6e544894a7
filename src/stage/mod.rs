//! Stages behind each pipeline step.

mod analyze;
mod apply;
mod confidence;
mod generate;
mod report;
mod review;
mod scan;

pub use analyze::AnalyzeStage;
pub use apply::ApplyStage;
pub use confidence::ConfidenceStage;
pub use generate::GenerateStage;
pub use report::ReportStage;
pub use review::ReviewStage;
pub use scan::ScanStage;

use anyhow::Context;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Load a list of records from a `.json`, `.yaml` or `.yml` file
pub fn load_records<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    );
    if is_yaml {
        serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Invalid YAML in {}", path.display()))
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {}", path.display()))
    }
}
