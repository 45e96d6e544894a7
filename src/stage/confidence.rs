use crate::fix::{ValidationResult, validate};
use crate::fix::validate::PASS_THRESHOLD;
use crate::pipeline::context::{GateDecision, RunContext};
use crate::pipeline::step::{Stage, StepOutcome};
use crate::types::Fix;
use async_trait::async_trait;
use tracing::{debug, info};

/// Scores each generated fix and decides whether it may be applied
/// without a human
pub struct ConfidenceStage;

#[async_trait]
impl Stage for ConfidenceStage {
    async fn run(&self, ctx: &mut RunContext) -> StepOutcome {
        let threshold = ctx.options.confidence_threshold;
        let mut eligible = 0;

        for record in &mut ctx.records {
            let Some(fix) = &record.fix else {
                record.gate = Some(GateDecision {
                    eligible: false,
                    reasons: vec!["No fix was generated".to_string()],
                });
                continue;
            };
            let validation = validate(fix);
            let gate = evaluate_gate(fix, &validation, threshold);
            debug!(
                "[Step confidence] {}: score {}/100, confidence {:.2}, eligible {}",
                record.violation.location(),
                validation.score,
                fix.confidence,
                gate.eligible
            );
            if gate.eligible {
                eligible += 1;
            }
            record.validation = Some(validation);
            record.gate = Some(gate);
        }

        info!(
            "[Step confidence] {} of {} fixes eligible for auto-apply (threshold {:.2})",
            eligible,
            ctx.records.len(),
            threshold
        );
        StepOutcome::Succeeded
    }
}

/// A fix is eligible only when its confidence reaches the threshold and it
/// passed validation.
pub fn evaluate_gate(fix: &Fix, validation: &ValidationResult, threshold: f64) -> GateDecision {
    let mut reasons = Vec::new();
    if fix.confidence < threshold {
        reasons.push(format!(
            "Confidence {:.2} below threshold {:.2}",
            fix.confidence, threshold
        ));
    }
    if !validation.passed {
        reasons.push(format!(
            "Validation score {}/100 below {}",
            validation.score, PASS_THRESHOLD
        ));
    }
    GateDecision {
        eligible: reasons.is_empty(),
        reasons,
    }
}
