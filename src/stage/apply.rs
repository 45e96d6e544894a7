use crate::pipeline::context::RunContext;
use crate::pipeline::step::{Stage, StepOutcome};
use crate::types::{Fix, LineRange};
use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, error, info, warn};

const BACKUP_DIR: &str = "backup";

/// Writes approved fixes into the project tree
pub struct ApplyStage;

#[async_trait]
impl Stage for ApplyStage {
    async fn run(&self, ctx: &mut RunContext) -> StepOutcome {
        apply(ctx).into()
    }
}

fn apply(ctx: &mut RunContext) -> anyhow::Result<()> {
    let root = ctx.config.pipeline.project_root.clone();
    let backup_dir = ctx
        .options
        .backup
        .then(|| ctx.run_dir.join(BACKUP_DIR));

    // Ready fixes grouped by the file their primary change edits
    let mut groups: BTreeMap<PathBuf, Vec<(usize, &Fix)>> = BTreeMap::new();
    let mut results: Vec<(usize, anyhow::Result<()>)> = Vec::new();
    for (i, record) in ctx.records.iter().enumerate() {
        if !record.ready_to_apply() {
            continue;
        }
        let Some(fix) = &record.fix else { continue };
        match project_path(&fix.primary_change.file) {
            Ok(relative) => groups.entry(relative).or_default().push((i, fix)),
            Err(e) => results.push((i, Err(e))),
        }
    }
    for (relative, fixes) in &groups {
        results.extend(apply_file(&root, relative, fixes, backup_dir.as_deref()));
    }
    results.sort_by_key(|(i, _)| *i);

    let mut applied = 0;
    let mut failed = 0;
    for (i, result) in results {
        let record = &mut ctx.records[i];
        match result {
            Ok(()) => {
                info!("[Step apply] Applied fix for {}", record.violation.location());
                record.applied = true;
                applied += 1;
            }
            Err(e) => {
                error!(
                    "[Step apply] Failed to apply fix for {}: {:#}",
                    record.violation.location(),
                    e
                );
                record.apply_error = Some(format!("{:#}", e));
                failed += 1;
            }
        }
    }

    if applied == 0 && failed == 0 {
        info!("[Step apply] No fixes ready to apply");
    }
    if failed > 0 {
        bail!("{} of {} fixes failed to apply", failed, applied + failed);
    }
    Ok(())
}

/// Check that a path from a fix stays inside the project root and return it
/// without `.` components
fn project_path(relative: &str) -> anyhow::Result<PathBuf> {
    let path = Path::new(relative.trim());
    if path.as_os_str().is_empty() {
        bail!("Fix does not name a file");
    }
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        bail!("Refusing to write {}: path must stay inside the project root", relative);
    }
    Ok(path
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect())
}

/// A fix checked against the project root, ready to splice in
struct Planned<'a> {
    index: usize,
    fix: &'a Fix,
    range: LineRange,
    additional: Vec<PathBuf>,
}

fn plan_fix<'a>(index: usize, fix: &'a Fix) -> anyhow::Result<Planned<'a>> {
    let Some(range) = fix.primary_change.lines else {
        bail!("Fix for {} has no line range", fix.primary_change.file);
    };
    let additional = fix
        .additional_files
        .iter()
        .map(|file| project_path(&file.path))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Planned {
        index,
        fix,
        range,
        additional,
    })
}

/// Apply every fix that edits one file. Line ranges refer to the file as it
/// was scanned, so replacements run bottom-up and overlapping ranges are
/// refused. The file is written once.
fn apply_file(
    root: &Path,
    relative: &Path,
    fixes: &[(usize, &Fix)],
    backup_dir: Option<&Path>,
) -> Vec<(usize, anyhow::Result<()>)> {
    let target = root.join(relative);
    let content = match fs::read_to_string(&target) {
        Ok(content) => content,
        Err(e) => {
            return fixes
                .iter()
                .map(|(i, _)| (*i, Err(anyhow!("Failed to read {}: {}", target.display(), e))))
                .collect();
        }
    };

    let mut results = Vec::new();
    let mut planned = Vec::new();
    for &(i, fix) in fixes {
        match plan_fix(i, fix) {
            Ok(plan) => planned.push(plan),
            Err(e) => results.push((i, Err(e))),
        }
    }
    planned.sort_by_key(|p| p.range.start);

    let mut accepted: Vec<Planned> = Vec::new();
    for plan in planned {
        if let Some(prev) = accepted.last()
            && plan.range.start <= prev.range.end
        {
            let err = anyhow!(
                "Lines {} overlap lines {} changed by another fix in {}",
                plan.range,
                prev.range,
                relative.display()
            );
            results.push((plan.index, Err(err)));
            continue;
        }
        accepted.push(plan);
    }

    let mut updated = content;
    let mut spliced = Vec::new();
    for plan in accepted.into_iter().rev() {
        match replace_lines(&updated, plan.range, &plan.fix.primary_change.code) {
            Ok(next) => {
                updated = next;
                spliced.push(plan);
            }
            Err(e) => results.push((plan.index, Err(e))),
        }
    }
    if spliced.is_empty() {
        return results;
    }

    if let Err(e) = write_file(root, relative, &updated, backup_dir) {
        let message = format!("{:#}", e);
        results.extend(spliced.iter().map(|p| (p.index, Err(anyhow!("{}", message)))));
        return results;
    }
    for plan in spliced {
        let written = plan
            .fix
            .additional_files
            .iter()
            .zip(&plan.additional)
            .try_for_each(|(file, path)| -> anyhow::Result<()> {
                write_file(root, path, &file.content, backup_dir)?;
                debug!("[Step apply] Wrote {} ({})", file.path, file.purpose);
                Ok(())
            });
        results.push((plan.index, written));
    }
    results
}

/// Write a file under the project root, backing up any existing copy first
fn write_file(
    root: &Path,
    relative: &Path,
    content: &str,
    backup_dir: Option<&Path>,
) -> anyhow::Result<()> {
    let path = root.join(relative);
    if let Some(dir) = backup_dir
        && path.exists()
    {
        backup(&path, relative, dir)?;
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))
}

fn backup(path: &Path, relative: &Path, dir: &Path) -> anyhow::Result<PathBuf> {
    let dest = dir.join(relative);
    if dest.exists() {
        warn!(
            "[Step apply] Backup of {} already taken, keeping the first",
            relative.display()
        );
        return Ok(dest);
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::copy(path, &dest)
        .with_context(|| format!("Failed to back up {} to {}", path.display(), dest.display()))?;
    debug!("[Step apply] Backed up {} to {}", relative.display(), dest.display());
    Ok(dest)
}

/// Replace lines `range.start..=range.end` (1-indexed) with `code`,
/// keeping the file's trailing newline.
fn replace_lines(content: &str, range: LineRange, code: &str) -> anyhow::Result<String> {
    let lines: Vec<&str> = content.lines().collect();
    if range.start == 0 || range.end < range.start || range.end as usize > lines.len() {
        bail!(
            "Line range {} is outside the file ({} lines)",
            range,
            lines.len()
        );
    }
    let start = range.start as usize - 1;
    let end = range.end as usize;

    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    out.extend(&lines[..start]);
    out.extend(code.trim_end_matches('\n').lines());
    out.extend(&lines[end..]);

    let mut result = out.join("\n");
    if content.ends_with('\n') {
        result.push('\n');
    }
    Ok(result)
}
