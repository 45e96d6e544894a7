//! Step registry, orchestrator and run artifacts.

pub mod context;
pub mod orchestrator;
pub mod render;
pub mod step;
pub mod summary;

use crate::stage::{
    AnalyzeStage, ApplyStage, ConfidenceStage, GenerateStage, ReportStage, ReviewStage, ScanStage,
};
use anyhow::bail;
use context::{RunContext, ViolationTrace};
use orchestrator::Orchestrator;
use std::path::Path;
use step::{PipelineStep, RegistryError, StepRegistry};
use summary::{RunStore, RunSummary};
use tracing::{error, info};

/// The remediation steps in declaration order
pub fn default_registry(generate: GenerateStage) -> Result<StepRegistry, RegistryError> {
    StepRegistry::build(vec![
        (
            PipelineStep::new("scan", "Scan for violations"),
            Box::new(ScanStage),
        ),
        (
            PipelineStep::new("analyze", "Analyze violations").depends_on(&["scan"]),
            Box::new(AnalyzeStage),
        ),
        (
            PipelineStep::new("fix", "Generate fixes")
                .depends_on(&["analyze"])
                .optional(),
            Box::new(generate),
        ),
        (
            PipelineStep::new("confidence", "Score confidence")
                .depends_on(&["fix"])
                .optional(),
            Box::new(ConfidenceStage),
        ),
        (
            PipelineStep::new("review", "Human review")
                .depends_on(&["confidence"])
                .optional()
                .continue_on_error()
                .skip_when(|o| (!o.interactive).then_some("interactive review not requested")),
            Box::new(ReviewStage),
        ),
        (
            PipelineStep::new("apply", "Apply fixes")
                .depends_on(&["confidence", "review"])
                .optional()
                .continue_on_error()
                .skip_when(|o| (!o.auto_apply).then_some("auto-apply not requested")),
            Box::new(ApplyStage),
        ),
        (
            PipelineStep::new("report", "Write report")
                .depends_on(&["analyze"])
                .optional()
                .continue_on_error(),
            Box::new(ReportStage),
        ),
    ])
}

/// Run every step, then persist the fix records, the summary and, when
/// requested, the trace. Records are persisted even when the run halts.
pub async fn execute(
    orchestrator: &Orchestrator,
    ctx: &mut RunContext,
    trace: Option<&Path>,
) -> anyhow::Result<RunSummary> {
    let summary = orchestrator.run(ctx).await;
    let store = RunStore::new(&ctx.run_dir);

    let mut errors = 0;
    if let Err(e) = store.write_fixes(&ctx.records) {
        error!("Failed to persist fix records: {}", e);
        errors += 1;
    }
    if let Some(path) = trace {
        if let Err(e) = write_trace(path, &ctx.traces) {
            error!("Failed to write trace: {:#}", e);
            errors += 1;
        }
    }
    if let Err(e) = store.write_summary(&summary) {
        error!("Failed to persist run summary: {}", e);
        errors += 1;
    }

    if errors > 0 {
        bail!("{} run artifact(s) could not be written", errors);
    }
    Ok(summary)
}

/// Output format of a trace file, chosen by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFormat {
    Json,
    Markdown,
}

impl TraceFormat {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("md") => Ok(Self::Markdown),
            _ => bail!("Trace file must end with .md or .json"),
        }
    }
}

/// Write trace data to file in JSON or Markdown format
pub fn write_trace(path: &Path, traces: &[ViolationTrace]) -> anyhow::Result<()> {
    let content = match TraceFormat::from_path(path)? {
        TraceFormat::Json => serde_json::to_string_pretty(traces)?,
        TraceFormat::Markdown => render::format_trace_markdown(traces),
    };
    std::fs::write(path, content)?;
    info!("Trace written to {}", path.display());
    Ok(())
}
