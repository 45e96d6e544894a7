use crate::pipeline::context::{FixRecord, ReviewVerdict, RunContext};
use crate::pipeline::render::get_fence_backticks;
use crate::pipeline::step::{Stage, StepOutcome};
use anyhow::Context;
use async_trait::async_trait;
use std::io::{BufRead, IsTerminal, Write};
use tracing::info;

/// Asks a human to approve each fix that passed the auto-apply gate
pub struct ReviewStage;

#[async_trait]
impl Stage for ReviewStage {
    fn unavailable_reason(&self, _ctx: &RunContext) -> Option<String> {
        (!std::io::stdin().is_terminal()).then(|| "stdin is not a terminal".to_string())
    }

    async fn run(&self, ctx: &mut RunContext) -> StepOutcome {
        let records = &mut ctx.records;
        tokio::task::block_in_place(|| {
            let stdin = std::io::stdin();
            review_records(records, stdin.lock(), std::io::stdout())
        })
        .into()
    }
}

/// Prompt for every gate-eligible fix. A rejected gate is never reopened.
/// Fixes left when input ends are deferred.
pub fn review_records<R: BufRead, W: Write>(
    records: &mut [FixRecord],
    mut input: R,
    mut output: W,
) -> anyhow::Result<()> {
    let pending = records
        .iter()
        .filter(|r| r.fix.is_some() && r.gate.as_ref().is_some_and(|g| g.eligible))
        .count();
    let mut index = 0;
    let mut closed = false;

    for record in records.iter_mut() {
        let Some(fix) = &record.fix else { continue };
        if !record.gate.as_ref().is_some_and(|g| g.eligible) {
            continue;
        }
        index += 1;
        if closed {
            record.review = Some(ReviewVerdict::Deferred);
            continue;
        }

        let backticks = get_fence_backticks(&fix.primary_change.code);
        writeln!(
            output,
            "\n[{}/{}] {} (confidence {:.2})\n{}\n{}\n{}\n{}",
            index,
            pending,
            record.violation.location(),
            fix.confidence,
            fix.primary_change.description.trim(),
            backticks,
            fix.primary_change.code.trim_end(),
            backticks
        )?;

        let verdict = loop {
            write!(output, "Apply this fix? [y]es / [n]o / [s]kip: ")?;
            output.flush()?;
            let mut line = String::new();
            if input.read_line(&mut line).context("Failed to read answer")? == 0 {
                closed = true;
                break ReviewVerdict::Deferred;
            }
            match line.trim().to_lowercase().as_str() {
                "y" | "yes" => break ReviewVerdict::Approved,
                "n" | "no" => break ReviewVerdict::Rejected,
                "s" | "skip" | "" => break ReviewVerdict::Deferred,
                other => writeln!(output, "Unrecognized answer '{}'", other)?,
            }
        };
        record.review = Some(verdict);
    }

    let approved = records
        .iter()
        .filter(|r| r.review == Some(ReviewVerdict::Approved))
        .count();
    info!("[Step review] {} of {} fixes approved", approved, pending);
    Ok(())
}
