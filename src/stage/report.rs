use crate::pipeline::context::RunContext;
use crate::pipeline::render::format_report;
use crate::pipeline::step::{Stage, StepOutcome};
use crate::pipeline::summary::RunStore;
use async_trait::async_trait;

/// Renders the fix records into the run's Markdown report
pub struct ReportStage;

#[async_trait]
impl Stage for ReportStage {
    async fn run(&self, ctx: &mut RunContext) -> StepOutcome {
        let markdown = format_report(&ctx.run_id, &ctx.records);
        RunStore::new(&ctx.run_dir)
            .write_report(&markdown)
            .map(|_| ())
            .map_err(anyhow::Error::from)
            .into()
    }
}
