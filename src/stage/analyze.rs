use super::load_records;
use crate::pipeline::context::{FixRecord, RunContext};
use crate::pipeline::step::{Stage, StepOutcome};
use crate::types::{Analysis, Violation};
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Joins scanned violations with the analyzer's verdicts
pub struct AnalyzeStage;

#[async_trait]
impl Stage for AnalyzeStage {
    fn unavailable_reason(&self, ctx: &RunContext) -> Option<String> {
        let path = &ctx.config.analyze.analyses;
        (!path.exists()).then(|| format!("{} not found", path.display()))
    }

    async fn run(&self, ctx: &mut RunContext) -> StepOutcome {
        analyze(ctx).into()
    }
}

fn analyze(ctx: &mut RunContext) -> anyhow::Result<()> {
    let analyses: Vec<Analysis> = load_records(&ctx.config.analyze.analyses)?;
    debug!("[Step analyze] Loaded {} analyses", analyses.len());
    ctx.records = confirmed_records(&ctx.violations, &analyses);
    info!(
        "[Step analyze] {} of {} violations confirmed for fixing",
        ctx.records.len(),
        ctx.violations.len()
    );
    Ok(())
}

/// One record per violation that the analyzer confirmed, in violation order.
/// False positives and violations without an analysis are dropped.
pub fn confirmed_records(violations: &[Violation], analyses: &[Analysis]) -> Vec<FixRecord> {
    violations
        .iter()
        .filter_map(|violation| {
            let Some(analysis) = analyses.iter().find(|a| a.refers_to(violation)) else {
                warn!(
                    "[Step analyze] No analysis for {}, skipping",
                    violation.location()
                );
                return None;
            };
            if !analysis.is_real_violation {
                debug!(
                    "[Step analyze] False positive {}: {}",
                    violation.location(),
                    analysis.rationale
                );
                return None;
            }
            Some(FixRecord::new(violation.clone(), analysis.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::fix::testing::{real_analysis, violation};
    use crate::pipeline::context::RunOptions;

    #[test]
    fn test_false_positives_are_dropped() {
        let violations = vec![
            violation("src/a.ts", 1),
            violation("src/b.ts", 2),
            violation("src/c.ts", 3),
        ];
        let mut false_positive = real_analysis(&violations[1]);
        false_positive.is_real_violation = false;
        let analyses = vec![
            real_analysis(&violations[2]),
            false_positive,
            real_analysis(&violations[0]),
        ];

        let records = confirmed_records(&violations, &analyses);
        let files: Vec<&str> = records.iter().map(|r| r.violation.file.as_str()).collect();
        assert_eq!(files, vec!["src/a.ts", "src/c.ts"]);
        assert!(records.iter().all(|r| r.analysis.is_real_violation));
    }

    #[test]
    fn test_unanalyzed_violation_is_dropped() {
        let violations = vec![violation("src/a.ts", 1), violation("src/a.ts", 2)];
        let analyses = vec![real_analysis(&violations[1])];
        let records = confirmed_records(&violations, &analyses);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].violation.line, 2);
    }

    #[tokio::test]
    async fn test_analyze_stage_reads_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analyses.yaml");
        std::fs::write(
            &path,
            "- file: src/a.ts\n  line: 1\n  rule: no-any-type\n  is_real_violation: true\n",
        )
        .unwrap();
        let mut config = Config::default();
        config.analyze.analyses = path;
        let mut ctx = RunContext::new(config, RunOptions::default(), None);
        ctx.violations = vec![violation("src/a.ts", 1), violation("src/b.ts", 5)];

        assert_eq!(AnalyzeStage.unavailable_reason(&ctx), None);
        assert_eq!(AnalyzeStage.run(&mut ctx).await, StepOutcome::Succeeded);
        assert_eq!(ctx.records.len(), 1);
    }

    #[test]
    fn test_analyze_unavailable_without_file() {
        let mut config = Config::default();
        config.analyze.analyses = "does/not/exist.json".into();
        let ctx = RunContext::new(config, RunOptions::default(), None);
        assert!(AnalyzeStage.unavailable_reason(&ctx).is_some());
    }
}
