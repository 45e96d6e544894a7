use super::context::{FixRecord, RunOptions, ViolationTrace};
use super::step::StepRegistry;
use super::summary::{RunSummary, StepStatus};
use crate::fix::agent::AttemptOutcome;
use std::collections::HashSet;

const ELAPSED_TIME_PRECISION: usize = 2;

/// Format fix records as a Markdown report
pub fn format_report(run_id: &str, records: &[FixRecord]) -> String {
    let mut output = format!("# Remediation report: {}\n\n", run_id);
    if records.is_empty() {
        output.push_str("No confirmed violations\n");
        return output;
    }

    let generated = records.iter().filter(|r| r.fix.is_some()).count();
    let eligible = records
        .iter()
        .filter(|r| r.gate.as_ref().is_some_and(|g| g.eligible))
        .count();
    let applied = records.iter().filter(|r| r.applied).count();
    output.push_str(&format!(
        "- Violations: {}\n- Fixes generated: {}\n- Eligible for auto-apply: {}\n- Applied: {}\n\n",
        records.len(),
        generated,
        eligible,
        applied
    ));

    for record in records {
        let v = &record.violation;
        output.push_str(&format!("## {}\n\n", v.location()));
        output.push_str(&format!(
            "**Priority:** {} | **Severity:** {}\n\n",
            v.priority,
            if record.analysis.severity.is_empty() {
                "-"
            } else {
                record.analysis.severity.as_str()
            }
        ));
        let rationale = record.analysis.rationale.trim();
        if !rationale.is_empty() {
            output.push_str(&format!("> {}\n\n", rationale));
        }

        if let Some(error) = &record.error {
            output.push_str(&format!("**Error:** {}\n\n", error));
        }

        if let Some(fix) = &record.fix {
            output.push_str(&format!(
                "**Fix:** {} (attempt {}, confidence {:.2})\n\n",
                fix.fix_type, fix.attempt_number, fix.confidence
            ));
            output.push_str(&format!("{}\n\n", fix.primary_change.description.trim()));
            let backticks = get_fence_backticks(&fix.primary_change.code);
            let lines = fix
                .primary_change
                .lines
                .map(|l| format!(" lines {}", l))
                .unwrap_or_default();
            output.push_str(&format!(
                "`{}`{}\n\n{}\n{}\n{}\n\n",
                fix.primary_change.file,
                lines,
                backticks,
                fix.primary_change.code.trim_end(),
                backticks
            ));
            for file in &fix.additional_files {
                output.push_str(&format!("- Additional file `{}`: {}\n", file.path, file.purpose));
            }
            if !fix.additional_files.is_empty() {
                output.push('\n');
            }
        }

        if let Some(validation) = &record.validation {
            output.push_str(&format!(
                "**Validation:** {}/100 ({})\n\n",
                validation.score,
                if validation.passed { "passed" } else { "failed" }
            ));
            for issue in &validation.issues {
                output.push_str(&format!("- {}\n", issue));
            }
            if !validation.issues.is_empty() {
                output.push('\n');
            }
        }

        if let Some(gate) = &record.gate {
            if gate.eligible {
                output.push_str("**Auto-apply:** eligible\n\n");
            } else {
                output.push_str(&format!("**Auto-apply:** held back ({})\n\n", gate.reasons.join("; ")));
            }
        }
        if let Some(review) = record.review {
            output.push_str(&format!("**Review:** {:?}\n\n", review));
        }
        if record.applied {
            output.push_str("**Applied:** yes\n\n");
        } else if let Some(error) = &record.apply_error {
            output.push_str(&format!("**Applied:** no ({})\n\n", error));
        }
    }
    output.trim_end().to_string() + "\n"
}

/// Format one line per step, for logging after a run
pub fn format_summary(summary: &RunSummary) -> String {
    let mut output = String::new();
    for step in &summary.steps {
        let status = match &step.status {
            StepStatus::Succeeded => "succeeded".to_string(),
            StepStatus::Failed => format!(
                "failed: {}",
                step.error.as_deref().unwrap_or("unknown error")
            ),
            StepStatus::Skipped(reason) => format!("skipped ({})", reason),
        };
        output.push_str(&format!(
            "{:<12} {:>7} ms  {}\n",
            step.step_id, step.duration_ms, status
        ));
    }
    output.push_str(&format!(
        "{} succeeded, {} failed, {} skipped in {} ms",
        summary.counts.succeeded,
        summary.counts.failed,
        summary.counts.skipped,
        summary.total_duration_ms
    ));
    output
}

/// Describe the steps a run would take with the given options
pub fn format_plan(registry: &StepRegistry, options: &RunOptions) -> String {
    let mut output = String::new();
    for (i, step) in registry.steps().enumerate() {
        let mut flags = vec![if step.required { "required" } else { "optional" }];
        if step.continue_on_error {
            flags.push("continue on error");
        }
        output.push_str(&format!(
            "Step {}: {} ({}) [{}]",
            i + 1,
            step.id,
            step.display_name,
            flags.join(", ")
        ));
        if !step.depends_on.is_empty() {
            output.push_str(&format!(" after {}", step.depends_on.join(", ")));
        }
        if let Some(reason) = step.skip_reason(options) {
            output.push_str(&format!(" - will skip: {}", reason));
        }
        output.push('\n');
    }
    let ready: Vec<&str> = registry
        .executable(&HashSet::new(), &HashSet::new())
        .into_iter()
        .map(|s| s.id.as_str())
        .collect();
    output.push_str(&format!("Ready at start: {}", ready.join(", ")));
    output
}

/// Format traces as Markdown with every prompt and response per attempt
pub fn format_trace_markdown(traces: &[ViolationTrace]) -> String {
    let mut output = String::new();
    for trace in traces {
        output.push_str(&format!("# Violation: {}\n\n", trace.violation.location()));
        let backticks = get_fence_backticks(&trace.violation.snippet);
        output.push_str(&format!(
            "{}\n{}\n{}\n\n",
            backticks,
            trace.violation.snippet.trim_end(),
            backticks
        ));
        output.push_str(&format!(
            "**Elapsed:** {:.prec$}s\n\n",
            trace.elapsed_secs,
            prec = ELAPSED_TIME_PRECISION
        ));

        for attempt in &trace.attempts {
            output.push_str(&format!("## Attempt {}\n\n", attempt.attempt));
            match &attempt.outcome {
                AttemptOutcome::Validated {
                    score,
                    passed,
                    issues,
                } => {
                    output.push_str(&format!(
                        "**Outcome:** {}/100 ({})\n\n",
                        score,
                        if *passed { "passed" } else { "failed" }
                    ));
                    for issue in issues {
                        output.push_str(&format!("- {}\n", issue));
                    }
                    if !issues.is_empty() {
                        output.push('\n');
                    }
                }
                AttemptOutcome::ParseFailed { error } => {
                    output.push_str(&format!("**Outcome:** unparseable response: {}\n\n", error));
                }
                AttemptOutcome::ServiceFailed { error } => {
                    output.push_str(&format!("**Outcome:** service error: {}\n\n", error));
                }
            }

            output.push_str("### Prompt\n\n");
            let backticks = get_fence_backticks(&attempt.prompt);
            output.push_str(&format!(
                "{}markdown\n{}\n{}\n\n",
                backticks, attempt.prompt, backticks
            ));

            if let Some(response) = &attempt.response {
                output.push_str("### Response\n\n");
                let backticks = get_fence_backticks(response);
                output.push_str(&format!("{}xml\n{}\n{}\n\n", backticks, response, backticks));
            }
        }
        output.push_str("\n---\n\n");
    }
    output
}

/// Get appropriate number of backticks for Markdown code fence
/// Returns at least 3 backticks, or more if content contains backtick sequences
pub fn get_fence_backticks(content: &str) -> String {
    const MIN_BACKTICKS: usize = 3;
    let max_backticks = content
        .as_bytes()
        .split(|&b| b != b'`')
        .filter(|s| !s.is_empty())
        .map(|s| s.len())
        .max()
        .unwrap_or(0);
    "`".repeat((max_backticks + 1).max(MIN_BACKTICKS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fix::agent::AttemptTrace;
    use crate::fix::testing::{complete_fix, real_analysis, violation};
    use crate::fix::validate;
    use crate::pipeline::context::GateDecision;
    use crate::pipeline::step::PipelineStep;
    use crate::pipeline::summary::{SkipReason, StepResult};
    use chrono::Utc;

    #[test]
    fn test_fence_backticks() {
        assert_eq!(get_fence_backticks("plain"), "```");
        assert_eq!(get_fence_backticks("a ```rust``` b"), "````");
        assert_eq!(get_fence_backticks("`````"), "``````");
    }

    #[test]
    fn test_report_sections() {
        let v = violation("src/api.ts", 3);
        let a = real_analysis(&v);
        let mut fixed = FixRecord::new(v.clone(), a.clone());
        let fix = complete_fix();
        fixed.validation = Some(validate(&fix));
        fixed.fix = Some(fix);
        fixed.gate = Some(GateDecision {
            eligible: true,
            reasons: vec![],
        });
        fixed.applied = true;

        let mut errored = FixRecord::new(violation("src/db.ts", 9), a);
        errored.error = Some("generation service unavailable after 3 attempts".into());

        let report = format_report("run-1", &[fixed, errored]);
        assert!(report.starts_with("# Remediation report: run-1\n"));
        assert!(report.contains("- Violations: 2\n- Fixes generated: 1\n"));
        assert!(report.contains("## src/api.ts:3 [no-any-type]"));
        assert!(report.contains("**Validation:** 100/100 (passed)"));
        assert!(report.contains("**Auto-apply:** eligible"));
        assert!(report.contains("**Applied:** yes"));
        assert!(report.contains("**Error:** generation service unavailable"));
    }

    #[test]
    fn test_empty_report() {
        assert!(format_report("run-1", &[]).contains("No confirmed violations"));
    }

    #[test]
    fn test_summary_lines() {
        let a = PipelineStep::new("scan", "Scan");
        let b = PipelineStep::new("fix", "Fix");
        let summary = RunSummary::new(
            "run-1".into(),
            Utc::now(),
            12,
            None,
            vec![
                StepResult::succeeded(&a, 5),
                StepResult::skipped(&b, SkipReason::Unavailable("no API key".into())),
            ],
        );
        let text = format_summary(&summary);
        assert!(text.contains("skipped (unavailable: no API key)"));
        assert!(text.ends_with("1 succeeded, 0 failed, 1 skipped in 12 ms"));
    }

    #[test]
    fn test_plan_marks_skips_and_roots() {
        let registry = crate::pipeline::default_registry(crate::stage::GenerateStage::new()).unwrap();
        let plan = format_plan(&registry, &RunOptions::default());
        assert!(plan.starts_with("Step 1: scan (Scan for violations) [required]\n"));
        assert!(plan.contains("Step 5: review (Human review) [optional, continue on error] after confidence - will skip: interactive review not requested"));
        assert!(plan.ends_with("Ready at start: scan"));
    }

    #[test]
    fn test_trace_markdown() {
        let v = violation("src/api.ts", 3);
        let traces = vec![ViolationTrace {
            violation: v,
            elapsed_secs: 1.5,
            attempts: vec![
                AttemptTrace {
                    attempt: 1,
                    prompt: "Fix it".into(),
                    response: None,
                    outcome: AttemptOutcome::ServiceFailed {
                        error: "timed out".into(),
                    },
                },
                AttemptTrace {
                    attempt: 2,
                    prompt: "Fix it again".into(),
                    response: Some("<fix></fix>".into()),
                    outcome: AttemptOutcome::Validated {
                        score: 68,
                        passed: false,
                        issues: vec!["Confidence below 90%".into()],
                    },
                },
            ],
        }];
        let md = format_trace_markdown(&traces);
        assert!(md.contains("# Violation: src/api.ts:3 [no-any-type]"));
        assert!(md.contains("**Elapsed:** 1.50s"));
        assert!(md.contains("**Outcome:** service error: timed out"));
        assert!(md.contains("**Outcome:** 68/100 (failed)\n\n- Confidence below 90%"));
        assert!(md.contains("```xml\n<fix></fix>\n```"));
    }
}
