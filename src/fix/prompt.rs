use super::parse::COMPLIANCE_FLAGS;
use crate::types::{Analysis, Violation};

pub const SYSTEM_PROMPT: &str = "You are a senior engineer fixing code quality violations. \
You receive one violation and an analysis confirming it is real. \
Produce a complete, directly applicable fix. Never abbreviate code, never leave TODOs, \
and answer only in the response format you are given.";

/// Build the user prompt for one fix attempt.
///
/// From the second attempt on, `prior_issues` lists what was wrong with the
/// previous attempt so the service can address it instead of retrying blindly.
pub fn build_prompt(
    violation: &Violation,
    analysis: &Analysis,
    agent_id: &str,
    attempt: u32,
    prior_issues: &[String],
) -> String {
    let mut prompt = format!(
        "Violation:\n\n\
        - File: {}\n\
        - Line: {}\n\
        - Rule: {}\n\
        - Priority: {}\n\n\
        Source:\n\n```\n{}\n```\n\n\
        Analysis:\n\n\
        - Severity: {}\n\
        - Rationale: {}\n\n",
        violation.file,
        violation.line,
        violation.rule,
        violation.priority,
        violation.snippet.trim_end(),
        if analysis.severity.is_empty() {
            "unspecified"
        } else {
            analysis.severity.as_str()
        },
        analysis.rationale.trim(),
    );

    if attempt > 1 && !prior_issues.is_empty() {
        prompt.push_str(&format!(
            "<previous_attempt>\n\n\
            Attempt {} was rejected. Address every issue below in this attempt:\n\n- {}\n\n\
            </previous_attempt>\n\n",
            attempt - 1,
            prior_issues.join("\n- ")
        ));
    }

    prompt.push_str(&response_format(agent_id, attempt));
    prompt
}

fn response_format(agent_id: &str, attempt: u32) -> String {
    let flags: String = COMPLIANCE_FLAGS
        .iter()
        .map(|f| format!("    <{f}>true|false</{f}>\n"))
        .collect();
    format!(
        "Respond with exactly one <fix> element. Wrap code and file contents in \
        <![CDATA[ ... ]]> blocks; they are copied verbatim.\n\n\
        <fix>\n\
        \x20 <agent_id>{agent_id}</agent_id>\n\
        \x20 <timestamp>RFC 3339 timestamp</timestamp>\n\
        \x20 <fix_type>simple|complex|error</fix_type>\n\
        \x20 <confidence>0.0-1.0</confidence>\n\
        \x20 <attempt>{attempt}</attempt>\n\
        \x20 <primary_change>\n\
        \x20   <description>What changes and why (more than 100 characters)</description>\n\
        \x20   <file>path of the file to change</file>\n\
        \x20   <lines>start-end lines replaced by the code</lines>\n\
        \x20   <code><![CDATA[complete replacement code]]></code>\n\
        \x20 </primary_change>\n\
        \x20 <additional_files>\n\
        \x20   <file>\n\
        \x20     <path>path</path>\n\
        \x20     <purpose>why this file is needed</purpose>\n\
        \x20     <content><![CDATA[full file content]]></content>\n\
        \x20   </file>\n\
        \x20 </additional_files>\n\
        \x20 <testing_notes>how to verify the fix</testing_notes>\n\
        \x20 <risks>\n\
        \x20   <risk>one risk per element</risk>\n\
        \x20 </risks>\n\
        \x20 <compliance>\n{flags}\
        \x20 </compliance>\n\
        \x20 <self_validation>\n\
        \x20   <completeness_score>0-100</completeness_score>\n\
        \x20   <reasoning>why the fix is complete</reasoning>\n\
        \x20 </self_validation>\n\
        </fix>\n"
    )
}
