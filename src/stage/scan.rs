use super::load_records;
use crate::pipeline::context::RunContext;
use crate::pipeline::step::{Stage, StepOutcome};
use crate::types::Violation;
use anyhow::Context;
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Loads scanner output, optionally running the scanner first
pub struct ScanStage;

#[async_trait]
impl Stage for ScanStage {
    fn unavailable_reason(&self, ctx: &RunContext) -> Option<String> {
        let scan = &ctx.config.scan;
        (scan.command.is_none() && !scan.violations.exists()).then(|| {
            format!(
                "{} not found and no scan command configured",
                scan.violations.display()
            )
        })
    }

    async fn run(&self, ctx: &mut RunContext) -> StepOutcome {
        scan(ctx).await.into()
    }
}

async fn scan(ctx: &mut RunContext) -> anyhow::Result<()> {
    let scan = &ctx.config.scan;
    if let Some(command) = &scan.command {
        run_scanner(command, &ctx.config.pipeline.project_root).await?;
    }

    let violations: Vec<Violation> = load_records(&scan.violations)?;
    let exclude = build_globset(&scan.exclude)?;
    let total = violations.len();
    let kept: Vec<Violation> = violations
        .into_iter()
        .filter(|v| {
            let excluded = exclude.is_match(&v.file);
            if excluded {
                debug!("[Step scan] Excluded {}", v.location());
            }
            !excluded
        })
        .collect();

    info!(
        "[Step scan] Loaded {} violations ({} excluded)",
        kept.len(),
        total - kept.len()
    );
    ctx.violations = kept;
    Ok(())
}

/// Run the configured scanner. Linters commonly exit non-zero when they find
/// violations, so only a failure to start is an error.
async fn run_scanner(command: &str, dir: &Path) -> anyhow::Result<()> {
    info!("[Step scan] Running: {}", command);
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(dir)
        .output()
        .await
        .with_context(|| format!("Failed to start scan command '{}'", command))?;

    if !output.status.success() {
        warn!(
            "[Step scan] Scan command exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    debug!(
        "[Step scan] Scanner output: {}",
        String::from_utf8_lossy(&output.stdout).trim()
    );
    Ok(())
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => builder.add(glob),
            Err(e) => {
                warn!("Invalid exclude pattern '{}': {}", pattern, e);
                continue;
            }
        };
    }
    builder.build().context("Failed to build exclude globset")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::pipeline::context::RunOptions;

    const VIOLATIONS: &str = r#"[
        {"file": "src/api.ts", "line": 3, "rule": "no-any-type", "priority": "high"},
        {"file": "src/gen/client.ts", "line": 9, "rule": "no-any-type", "priority": "low"},
        {"file": "src/db.ts", "line": 40, "rule": "no-floating-promise", "priority": "critical"}
    ]"#;

    fn context(dir: &Path) -> RunContext {
        let mut config = Config::default();
        config.scan.violations = dir.join("violations.json");
        config.pipeline.project_root = dir.to_path_buf();
        RunContext::new(config, RunOptions::default(), None)
    }

    #[tokio::test]
    async fn test_scan_loads_and_excludes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("violations.json"), VIOLATIONS).unwrap();
        let mut ctx = context(dir.path());
        ctx.config.scan.exclude = vec!["**/gen/**".into(), "[".into()];

        assert_eq!(ScanStage.unavailable_reason(&ctx), None);
        assert_eq!(ScanStage.run(&mut ctx).await, StepOutcome::Succeeded);
        let files: Vec<&str> = ctx.violations.iter().map(|v| v.file.as_str()).collect();
        assert_eq!(files, vec!["src/api.ts", "src/db.ts"]);
    }

    #[tokio::test]
    async fn test_scan_runs_command_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());
        std::fs::write(dir.path().join("source.json"), VIOLATIONS).unwrap();
        ctx.config.scan.command = Some("cp source.json violations.json; exit 1".into());

        assert_eq!(ScanStage.unavailable_reason(&ctx), None);
        assert_eq!(ScanStage.run(&mut ctx).await, StepOutcome::Succeeded);
        assert_eq!(ctx.violations.len(), 3);
    }

    #[tokio::test]
    async fn test_scan_unavailable_without_input() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let reason = ScanStage.unavailable_reason(&ctx).unwrap();
        assert!(reason.contains("violations.json"));
    }

    #[tokio::test]
    async fn test_scan_fails_on_malformed_input() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("violations.json"), "[{\"file\": 1}]").unwrap();
        let mut ctx = context(dir.path());
        assert!(matches!(
            ScanStage.run(&mut ctx).await,
            StepOutcome::Failed(_)
        ));
    }
}
