use crate::fix::FixAgent;
use crate::llm::{GenerationService, OpenAiService};
use crate::pipeline::context::{RunContext, ViolationTrace};
use crate::pipeline::step::{Stage, StepOutcome};
use anyhow::{Context, bail};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Asks the generation service for a fix per confirmed violation
#[derive(Default)]
pub struct GenerateStage {
    service: Option<Arc<dyn GenerationService>>,
}

impl GenerateStage {
    /// Connects to the configured service at run time using the run's API key
    pub fn new() -> Self {
        Self { service: None }
    }

    pub fn with_service(service: Arc<dyn GenerationService>) -> Self {
        Self {
            service: Some(service),
        }
    }

    fn service(&self, ctx: &RunContext) -> anyhow::Result<Arc<dyn GenerationService>> {
        if let Some(service) = &self.service {
            return Ok(service.clone());
        }
        let api_key = ctx.api_key.as_deref().context("No API key provided")?;
        Ok(Arc::new(OpenAiService::new(&ctx.config.llm, api_key)?))
    }
}

#[async_trait]
impl Stage for GenerateStage {
    fn unavailable_reason(&self, ctx: &RunContext) -> Option<String> {
        (self.service.is_none() && ctx.api_key.is_none())
            .then(|| "no API key (set REMEDY_LLM_API_KEY or pass --api-key)".to_string())
    }

    async fn run(&self, ctx: &mut RunContext) -> StepOutcome {
        self.generate(ctx).await.into()
    }
}

impl GenerateStage {
    async fn generate(&self, ctx: &mut RunContext) -> anyhow::Result<()> {
        if ctx.records.is_empty() {
            info!("[Step fix] No confirmed violations to fix");
            return Ok(());
        }

        let agent = FixAgent::new(
            self.service(ctx)?,
            &ctx.config.agent,
            ctx.config.llm.max_tokens,
            ctx.config.llm.temperature,
        );
        let call_delay = Duration::from_millis(ctx.config.agent.call_delay_ms);
        let total = ctx.records.len();
        let mut failures = 0;

        for (i, record) in ctx.records.iter_mut().enumerate() {
            if i > 0 && !call_delay.is_zero() {
                debug!("Pausing {:?} before next violation", call_delay);
                tokio::time::sleep(call_delay).await;
            }

            let n = i + 1;
            info!(
                "[Violation {}/{}] Generating fix for {}",
                n,
                total,
                record.violation.location()
            );
            let start = Instant::now();
            let report = agent.generate_fix(&record.violation, &record.analysis).await;
            let elapsed_secs = start.elapsed().as_secs_f64();

            match report.result {
                Ok(generated) => {
                    info!(
                        "[Violation {}/{}] Attempt {} scored {}/100{}",
                        n,
                        total,
                        generated.fix.attempt_number,
                        generated.validation.score,
                        if generated.validation.passed {
                            ""
                        } else {
                            " (not validated)"
                        }
                    );
                    record.fix = Some(generated.fix);
                    record.validation = Some(generated.validation);
                }
                Err(e) => {
                    error!("[Violation {}/{}] {}", n, total, e);
                    record.error = Some(e.to_string());
                    failures += 1;
                }
            }

            ctx.traces.push(ViolationTrace {
                violation: record.violation.clone(),
                elapsed_secs,
                attempts: report.attempts,
            });
        }

        if failures == total {
            bail!("No fix could be generated for any of {} violations", total);
        }
        info!(
            "[Step fix] Generated {} fixes, {} failed",
            total - failures,
            failures
        );
        Ok(())
    }
}
