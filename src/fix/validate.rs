use crate::types::{Fix, FixType};
use serde::{Deserialize, Serialize};

/// Minimum total score for a fix to pass validation
pub const PASS_THRESHOLD: u8 = 85;

const CONFIDENCE_POINTS: u8 = 20;
const DESCRIPTION_POINTS: u8 = 15;
const CODE_POINTS: u8 = 25;
const FILES_POINTS: u8 = 20;
const COMPLIANCE_POINTS: u8 = 20;

/// Confidence at or above this earns full points
const HIGH_CONFIDENCE: f64 = 0.90;
/// Confidence at or above this earns partial points
const MEDIUM_CONFIDENCE: f64 = 0.80;
const MIN_DESCRIPTION_CHARS: usize = 100;
const MIN_CODE_CHARS: usize = 50;
const PARTIAL_CODE_CHARS: usize = 20;
/// Complex fixes with this many additional files earn full points
const FULL_ADDITIONAL_FILES: usize = 3;

const TRUNCATION_MARKERS: [&str; 3] = ["...", "…", "[truncated]"];
const UNFINISHED_MARKERS: [&str; 4] = ["TODO", "FIXME", "unimplemented!", "not implemented"];

/// Outcome of scoring a fix against the completeness rubric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    /// Total score (0-100)
    pub score: u8,
    /// One entry per rubric category that did not score its maximum
    pub issues: Vec<String>,
}

fn has_marker(text: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| text.contains(m))
}

fn score_confidence(fix: &Fix, issues: &mut Vec<String>) -> u8 {
    if fix.confidence >= HIGH_CONFIDENCE {
        return CONFIDENCE_POINTS;
    }
    issues.push("Confidence below 90%".to_string());
    if fix.confidence >= MEDIUM_CONFIDENCE { 15 } else { 5 }
}

fn score_description(fix: &Fix, issues: &mut Vec<String>) -> u8 {
    let description = &fix.primary_change.description;
    if description.chars().count() > MIN_DESCRIPTION_CHARS
        && !has_marker(description, &TRUNCATION_MARKERS)
    {
        return DESCRIPTION_POINTS;
    }
    issues.push(format!(
        "Description is too short or truncated (needs more than {} characters)",
        MIN_DESCRIPTION_CHARS
    ));
    5
}

/// Elision in code: a line that is only `...`, a comment containing one, or
/// an explicit `[truncated]`. Spread and rest syntax (`...args`) is code.
fn is_truncated_code(code: &str) -> bool {
    code.lines().any(|line| {
        let line = line.trim();
        if line.contains("[truncated]") {
            return true;
        }
        let elided = |s: &str| s.contains("...") || s.contains('…');
        if matches!(line.trim_end_matches([';', ',']), "..." | "…") {
            return true;
        }
        let comment_start = if line.starts_with('#') {
            Some(0)
        } else {
            ["//", "/*", "<!--"].iter().filter_map(|m| line.find(m)).min()
        };
        comment_start.is_some_and(|i| elided(&line[i..]))
    })
}

fn score_code(fix: &Fix, issues: &mut Vec<String>) -> u8 {
    let code = &fix.primary_change.code;
    let len = code.chars().count();
    let truncated = is_truncated_code(code);
    let unfinished = has_marker(code, &UNFINISHED_MARKERS);
    if len > MIN_CODE_CHARS && !truncated && !unfinished {
        return CODE_POINTS;
    }
    if truncated {
        issues.push("Code contains a truncation marker; provide the complete code".to_string());
    } else if unfinished {
        issues.push("Code contains unfinished work markers (TODO/FIXME)".to_string());
    } else {
        issues.push(format!(
            "Code is too short to be a complete change ({} characters)",
            len
        ));
    }
    if len > PARTIAL_CODE_CHARS { 10 } else { 0 }
}

fn score_additional_files(fix: &Fix, issues: &mut Vec<String>) -> u8 {
    match fix.fix_type {
        FixType::Simple => FILES_POINTS,
        FixType::Error => {
            issues.push("Generator reported an error instead of a fix".to_string());
            0
        }
        FixType::Complex => {
            let count = fix.additional_files.len();
            if count >= FULL_ADDITIONAL_FILES {
                return FILES_POINTS;
            }
            issues.push(format!(
                "Complex fix includes {} additional files; include every file the change touches",
                count
            ));
            if count >= 1 { 10 } else { 0 }
        }
    }
}

fn score_compliance(fix: &Fix, issues: &mut Vec<String>) -> u8 {
    let total = fix.compliance_checklist.len();
    let unmet: Vec<&str> = fix
        .compliance_checklist
        .iter()
        .filter(|(_, ok)| !**ok)
        .map(|(name, _)| name.as_str())
        .collect();
    if total == 0 {
        issues.push("Compliance checklist is empty".to_string());
        return 0;
    }
    let met = total - unmet.len();
    let points = ((met as f64 / total as f64) * COMPLIANCE_POINTS as f64).round() as u8;
    if !unmet.is_empty() {
        issues.push(format!("Compliance checks not met: {}", unmet.join(", ")));
    }
    points
}

/// Score a fix against the completeness rubric.
///
/// Pure: the same fix always yields the same result.
pub fn validate(fix: &Fix) -> ValidationResult {
    let mut issues = Vec::new();
    let score = score_confidence(fix, &mut issues)
        + score_description(fix, &mut issues)
        + score_code(fix, &mut issues)
        + score_additional_files(fix, &mut issues)
        + score_compliance(fix, &mut issues);
    ValidationResult {
        passed: score >= PASS_THRESHOLD,
        score,
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fix::testing::{complete_fix, with_compliance};
    use crate::types::AdditionalFile;

    #[test]
    fn test_complete_fix_scores_full_marks() {
        let result = validate(&complete_fix());
        assert_eq!(result.score, 100);
        assert!(result.passed);
        assert!(result.issues.is_empty());
    }

    #[test]
    fn test_confidence_tiers() {
        let mut fix = complete_fix();
        fix.confidence = 0.85;
        let result = validate(&fix);
        assert_eq!(result.score, 95);
        assert!(result.issues.contains(&"Confidence below 90%".to_string()));

        fix.confidence = 0.5;
        assert_eq!(validate(&fix).score, 85);
        assert!(validate(&fix).passed);
    }

    #[test]
    fn test_low_confidence_scenario_scores_68() {
        let mut fix = with_compliance(complete_fix(), 1);
        fix.confidence = 0.72;
        let result = validate(&fix);
        assert_eq!(result.score, 68);
        assert!(!result.passed);
        assert!(result.issues.contains(&"Confidence below 90%".to_string()));
    }

    #[test]
    fn test_high_confidence_scenario_scores_91() {
        let mut fix = with_compliance(complete_fix(), 4);
        fix.confidence = 0.93;
        let result = validate(&fix);
        assert_eq!(result.score, 91);
        assert!(result.passed);
    }

    #[test]
    fn test_truncated_description() {
        let mut fix = complete_fix();
        fix.primary_change.description = format!("{}...", "x".repeat(120));
        let result = validate(&fix);
        assert_eq!(result.score, 90);
        assert_eq!(result.issues.len(), 1);
    }

    #[test]
    fn test_spread_syntax_is_not_truncation() {
        let mut fix = complete_fix();
        fix.primary_change.code = "export function withDefaults(overrides: Partial<Options>): Options {\n\
            \x20   const merged = { ...DEFAULTS, ...overrides };\n\
            \x20   return log(...Object.values(merged)) ?? merged;\n\
            }\n"
            .to_string();
        let result = validate(&fix);
        assert_eq!(result.score, 100);
        assert!(result.issues.is_empty());
    }

    #[test]
    fn test_elided_code_is_truncation() {
        let body = "export function handle(body: RequestBody) {\n    validate(body);\n";
        for elision in ["    ...\n", "    // ... rest unchanged\n", "    /* … */\n", "    # ...\n"] {
            let mut fix = complete_fix();
            fix.primary_change.code = format!("{}{}}}\n", body, elision);
            let result = validate(&fix);
            assert_eq!(result.score, 85, "elision {:?}", elision);
            assert_eq!(
                result.issues,
                vec!["Code contains a truncation marker; provide the complete code".to_string()]
            );
        }
    }

    #[test]
    fn test_code_tiers() {
        let mut fix = complete_fix();
        fix.primary_change.code = format!("{}\n// TODO: handle errors", "let value = compute();\n".repeat(3));
        assert_eq!(validate(&fix).score, 85);

        fix.primary_change.code = "let value = compute_all();".to_string();
        assert_eq!(validate(&fix).score, 85);

        fix.primary_change.code = "x = 1".to_string();
        assert_eq!(validate(&fix).score, 75);
    }

    #[test]
    fn test_additional_files_for_complex_fixes() {
        let mut fix = complete_fix();
        fix.fix_type = FixType::Complex;
        assert_eq!(validate(&fix).score, 80);

        let file = AdditionalFile {
            path: "src/a.ts".into(),
            purpose: "helper".into(),
            content: "export {}".into(),
        };
        fix.additional_files = vec![file.clone()];
        assert_eq!(validate(&fix).score, 90);

        fix.additional_files = vec![file.clone(), file.clone(), file];
        assert_eq!(validate(&fix).score, 100);

        fix.fix_type = FixType::Error;
        assert!(!validate(&fix).passed);
    }

    #[test]
    fn test_compliance_rounding() {
        let fix = with_compliance(complete_fix(), 0);
        assert_eq!(validate(&fix).score, 80);
        let fix = with_compliance(complete_fix(), 6);
        // 6/7 * 20 = 17.14
        assert_eq!(validate(&fix).score, 97);
    }

    #[test]
    fn test_validation_is_deterministic() {
        let mut fix = with_compliance(complete_fix(), 3);
        fix.confidence = 0.81;
        let first = validate(&fix);
        for _ in 0..10 {
            assert_eq!(validate(&fix), first);
        }
    }
}
