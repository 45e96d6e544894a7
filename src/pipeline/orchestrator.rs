use super::context::RunContext;
use super::step::{StepOutcome, StepRegistry};
use super::summary::{RunSummary, SkipReason, StepResult};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Walks the step registry in declaration order and runs each stage.
///
/// Policy per step:
/// - a skip predicate that fires records `skipped` and counts as completed
/// - unmet dependencies record `skipped: dependencies not met`; for a
///   required step this halts the run
/// - an unavailable stage is skipped when optional and fails the run when
///   required
/// - a failure with `continue_on_error` counts as completed; a required
///   failure without it halts the run; an optional failure without it is
///   logged and its dependents will not run
///
/// Once halted, steps that depend directly on a failed step are recorded as
/// `dependencies not met`, all others as `pipeline halted`.
pub struct Orchestrator {
    registry: StepRegistry,
    step_delay: Duration,
}

impl Orchestrator {
    pub fn new(registry: StepRegistry, step_delay: Duration) -> Self {
        Self {
            registry,
            step_delay,
        }
    }

    pub async fn run(&self, ctx: &mut RunContext) -> RunSummary {
        let start = Instant::now();
        if self.registry.is_empty() {
            warn!("No steps registered for run {}", ctx.run_id);
        }
        info!(
            "Starting run {} with {} steps",
            ctx.run_id,
            self.registry.len()
        );

        let mut completed: HashSet<String> = HashSet::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut results: Vec<StepResult> = Vec::with_capacity(self.registry.len());
        let mut halted_by: Option<String> = None;
        let mut executed_any = false;

        for (step, stage) in self.registry.entries() {
            if halted_by.is_some() {
                let reason = if step.depends_on.iter().any(|d| failed.contains(d)) {
                    SkipReason::DependenciesNotMet
                } else {
                    SkipReason::PipelineHalted
                };
                info!("[Step {}] Skipped: {}", step.id, reason);
                results.push(StepResult::skipped(step, reason));
                continue;
            }

            if let Some(reason) = step.skip_reason(&ctx.options) {
                info!("[Step {}] Skipped: {}", step.id, reason);
                completed.insert(step.id.clone());
                results.push(StepResult::skipped(
                    step,
                    SkipReason::Condition(reason.to_string()),
                ));
                continue;
            }

            if !step.dependencies_met(&completed) {
                let missing: Vec<&str> = step
                    .depends_on
                    .iter()
                    .filter(|d| !completed.contains(*d))
                    .map(String::as_str)
                    .collect();
                results.push(StepResult::skipped(step, SkipReason::DependenciesNotMet));
                if step.required {
                    error!(
                        "[Step {}] Required step cannot run, dependencies not met: {:?}",
                        step.id, missing
                    );
                    halted_by = Some(step.id.clone());
                } else {
                    warn!(
                        "[Step {}] Skipped, dependencies not met: {:?}",
                        step.id, missing
                    );
                }
                continue;
            }

            if let Some(reason) = stage.unavailable_reason(ctx) {
                if step.required {
                    error!("[Step {}] Required stage unavailable: {}", step.id, reason);
                    failed.insert(step.id.clone());
                    results.push(StepResult::failed(step, 0, reason));
                    halted_by = Some(step.id.clone());
                } else {
                    warn!("[Step {}] Skipped, stage unavailable: {}", step.id, reason);
                    results.push(StepResult::skipped(step, SkipReason::Unavailable(reason)));
                }
                continue;
            }

            // Courtesy pause for services called by consecutive stages
            if executed_any && !self.step_delay.is_zero() {
                debug!("Pausing {:?} before step {}", self.step_delay, step.id);
                tokio::time::sleep(self.step_delay).await;
            }
            executed_any = true;

            info!("[Step {}] Running: {}", step.id, step.display_name);
            let step_start = Instant::now();
            let outcome = stage.run(ctx).await;
            let duration_ms = step_start.elapsed().as_millis() as u64;

            match outcome {
                StepOutcome::Succeeded => {
                    info!("[Step {}] Succeeded ({} ms)", step.id, duration_ms);
                    completed.insert(step.id.clone());
                    results.push(StepResult::succeeded(step, duration_ms));
                }
                StepOutcome::Failed(message) => {
                    if step.continue_on_error {
                        warn!(
                            "[Step {}] Failed, continuing: {} ({} ms)",
                            step.id, message, duration_ms
                        );
                        completed.insert(step.id.clone());
                    } else if step.required {
                        error!(
                            "[Step {}] Required step failed, halting: {} ({} ms)",
                            step.id, message, duration_ms
                        );
                        failed.insert(step.id.clone());
                        halted_by = Some(step.id.clone());
                    } else {
                        warn!(
                            "[Step {}] Optional step failed: {} ({} ms)",
                            step.id, message, duration_ms
                        );
                        failed.insert(step.id.clone());
                    }
                    results.push(StepResult::failed(step, duration_ms, message));
                }
            }
        }

        let summary = RunSummary::new(
            ctx.run_id.clone(),
            ctx.started_at,
            start.elapsed().as_millis() as u64,
            halted_by,
            results,
        );
        let counts = summary.counts;
        if let Some(step) = &summary.halted_by {
            error!(
                "Run {} halted at step '{}': {} succeeded, {} failed, {} skipped",
                summary.run_id, step, counts.succeeded, counts.failed, counts.skipped
            );
        } else {
            info!(
                "Run {} complete: {} succeeded, {} failed, {} skipped",
                summary.run_id, counts.succeeded, counts.failed, counts.skipped
            );
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::pipeline::context::RunOptions;
    use crate::pipeline::step::{PipelineStep, Stage};
    use crate::pipeline::summary::StepStatus;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Stage that records its invocation and returns a fixed outcome
    struct Fake {
        id: &'static str,
        outcome: StepOutcome,
        unavailable: Option<&'static str>,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Stage for Fake {
        fn unavailable_reason(&self, _ctx: &RunContext) -> Option<String> {
            self.unavailable.map(str::to_string)
        }

        async fn run(&self, _ctx: &mut RunContext) -> StepOutcome {
            self.calls.lock().unwrap().push(self.id);
            self.outcome.clone()
        }
    }

    struct Builder {
        registry: StepRegistry,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Builder {
        fn new() -> Self {
            Self {
                registry: StepRegistry::new(),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn add(self, step: PipelineStep, outcome: StepOutcome) -> Self {
            self.add_with(step, outcome, None)
        }

        fn add_with(
            mut self,
            step: PipelineStep,
            outcome: StepOutcome,
            unavailable: Option<&'static str>,
        ) -> Self {
            let id: &'static str = Box::leak(step.id.clone().into_boxed_str());
            let stage = Fake {
                id,
                outcome,
                unavailable,
                calls: self.calls.clone(),
            };
            self.registry.register(step, Box::new(stage)).unwrap();
            self
        }

        async fn run(self, options: RunOptions) -> (RunSummary, Vec<&'static str>) {
            let orchestrator = Orchestrator::new(self.registry, Duration::ZERO);
            let mut ctx = RunContext::new(Config::default(), options, None);
            let summary = orchestrator.run(&mut ctx).await;
            let calls = self.calls.lock().unwrap().clone();
            (summary, calls)
        }
    }

    fn ok() -> StepOutcome {
        StepOutcome::Succeeded
    }

    fn fail() -> StepOutcome {
        StepOutcome::Failed("boom".into())
    }

    fn status(summary: &RunSummary, id: &str) -> StepStatus {
        summary.step(id).unwrap().status.clone()
    }

    #[tokio::test]
    async fn test_all_steps_succeed() {
        let (summary, calls) = Builder::new()
            .add(PipelineStep::new("a", "A"), ok())
            .add(PipelineStep::new("b", "B").depends_on(&["a"]), ok())
            .run(RunOptions::default())
            .await;
        assert_eq!(calls, vec!["a", "b"]);
        assert_eq!(summary.counts.succeeded, 2);
        assert_eq!(summary.exit_code(), 0);
        assert!(summary.halted_by.is_none());
    }

    #[tokio::test]
    async fn test_required_failure_halts_run() {
        let (summary, calls) = Builder::new()
            .add(PipelineStep::new("a", "A"), ok())
            .add(PipelineStep::new("b", "B"), fail())
            .add(PipelineStep::new("c", "C").depends_on(&["a", "b"]), ok())
            .add(PipelineStep::new("d", "D").depends_on(&["a"]), ok())
            .add(PipelineStep::new("e", "E"), ok())
            .run(RunOptions::default())
            .await;

        assert_eq!(calls, vec!["a", "b"]);
        let ids: Vec<&str> = summary.steps.iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(status(&summary, "a"), StepStatus::Succeeded);
        assert_eq!(status(&summary, "b"), StepStatus::Failed);
        assert_eq!(
            status(&summary, "c"),
            StepStatus::Skipped(SkipReason::DependenciesNotMet)
        );
        assert_eq!(
            status(&summary, "d"),
            StepStatus::Skipped(SkipReason::PipelineHalted)
        );
        assert_eq!(
            status(&summary, "e"),
            StepStatus::Skipped(SkipReason::PipelineHalted)
        );
        assert_eq!(summary.halted_by.as_deref(), Some("b"));
        assert_eq!(summary.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_every_later_step_skipped_after_halt() {
        let (summary, calls) = Builder::new()
            .add(PipelineStep::new("a", "A"), fail())
            .add(PipelineStep::new("b", "B").optional(), ok())
            .add(PipelineStep::new("c", "C").optional().continue_on_error(), ok())
            .run(RunOptions::default())
            .await;
        assert_eq!(calls, vec!["a"]);
        for id in ["b", "c"] {
            assert_eq!(
                status(&summary, id),
                StepStatus::Skipped(SkipReason::PipelineHalted)
            );
        }
        assert_eq!(summary.steps.len(), 3);
    }

    #[tokio::test]
    async fn test_continue_on_error_satisfies_dependents() {
        let (summary, calls) = Builder::new()
            .add(PipelineStep::new("a", "A").continue_on_error(), fail())
            .add(PipelineStep::new("b", "B").depends_on(&["a"]), ok())
            .run(RunOptions::default())
            .await;
        assert_eq!(calls, vec!["a", "b"]);
        assert_eq!(status(&summary, "a"), StepStatus::Failed);
        assert_eq!(status(&summary, "b"), StepStatus::Succeeded);
        assert_eq!(summary.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_optional_failure_blocks_dependents_only() {
        let (summary, calls) = Builder::new()
            .add(PipelineStep::new("a", "A").optional(), fail())
            .add(PipelineStep::new("b", "B").depends_on(&["a"]).optional(), ok())
            .add(PipelineStep::new("c", "C"), ok())
            .add(PipelineStep::new("d", "D").depends_on(&["a"]), ok())
            .add(PipelineStep::new("e", "E"), ok())
            .run(RunOptions::default())
            .await;

        assert_eq!(calls, vec!["a", "c"]);
        assert_eq!(
            status(&summary, "b"),
            StepStatus::Skipped(SkipReason::DependenciesNotMet)
        );
        assert_eq!(status(&summary, "c"), StepStatus::Succeeded);
        // Required dependent cannot run, which halts the run
        assert_eq!(
            status(&summary, "d"),
            StepStatus::Skipped(SkipReason::DependenciesNotMet)
        );
        assert_eq!(
            status(&summary, "e"),
            StepStatus::Skipped(SkipReason::PipelineHalted)
        );
        assert_eq!(summary.halted_by.as_deref(), Some("d"));
        assert_eq!(summary.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_skip_predicate_counts_as_completed() {
        let (summary, calls) = Builder::new()
            .add(PipelineStep::new("a", "A"), ok())
            .add(
                PipelineStep::new("review", "Review")
                    .depends_on(&["a"])
                    .optional()
                    .skip_when(|o| (!o.interactive).then_some("interactive review disabled")),
                ok(),
            )
            .add(PipelineStep::new("apply", "Apply").depends_on(&["review"]), ok())
            .run(RunOptions::default())
            .await;

        assert_eq!(calls, vec!["a", "apply"]);
        assert_eq!(
            status(&summary, "review"),
            StepStatus::Skipped(SkipReason::Condition("interactive review disabled".into()))
        );
        assert_eq!(status(&summary, "apply"), StepStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_unavailable_stages() {
        let (summary, calls) = Builder::new()
            .add_with(PipelineStep::new("a", "A").optional(), ok(), Some("no input"))
            .add(PipelineStep::new("b", "B"), ok())
            .add_with(PipelineStep::new("c", "C"), ok(), Some("no credentials"))
            .add(PipelineStep::new("d", "D"), ok())
            .run(RunOptions::default())
            .await;

        assert_eq!(calls, vec!["b"]);
        assert_eq!(
            status(&summary, "a"),
            StepStatus::Skipped(SkipReason::Unavailable("no input".into()))
        );
        assert_eq!(status(&summary, "c"), StepStatus::Failed);
        assert_eq!(summary.step("c").unwrap().error.as_deref(), Some("no credentials"));
        assert_eq!(
            status(&summary, "d"),
            StepStatus::Skipped(SkipReason::PipelineHalted)
        );
    }

    #[tokio::test]
    async fn test_results_match_registry_order_and_count() {
        let (summary, _) = Builder::new()
            .add(PipelineStep::new("s1", "1"), ok())
            .add(PipelineStep::new("s2", "2").optional(), fail())
            .add(PipelineStep::new("s3", "3").depends_on(&["s2"]).optional(), ok())
            .add(PipelineStep::new("s4", "4"), ok())
            .run(RunOptions::default())
            .await;
        let ids: Vec<&str> = summary.steps.iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2", "s3", "s4"]);
        assert_eq!(
            summary.counts.succeeded + summary.counts.failed + summary.counts.skipped,
            4
        );
    }
}
