//! Response parser for tagged fix responses.
//!
//! The generation service answers with a document of nested tags:
//!
//! ```text
//! document  := ( noise | element )*
//! element   := "<" NAME ">" content "</" NAME ">"  |  "<" NAME "/>"
//! content   := ( text | literal | element )*
//! literal   := "<![CDATA[" any-chars "]]>"
//! NAME      := [A-Za-z_][A-Za-z0-9_-]*
//! ```
//!
//! A `<` that does not start a well-formed tag or literal is plain text.
//! Literal blocks are opaque: their contents are never unescaped or trimmed.
//! Everything outside the `<fix>` root element is ignored.

use crate::types::{AdditionalFile, Fix, FixType, LineRange, PrimaryChange, SelfValidation};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::trace;

const ROOT_TAG: &str = "fix";
const LITERAL_OPEN: &str = "<![CDATA[";
const LITERAL_CLOSE: &str = "]]>";

/// Confidence assumed when the response does not state one
pub const DEFAULT_CONFIDENCE: f64 = 0.7;
/// Placeholder used when the response lists no risks
pub const DEFAULT_RISK_NOTE: &str = "No risks were identified by the generator";
/// Agent id used when the response does not name its author
pub const UNKNOWN_AGENT_ID: &str = "unknown";

/// Fixed set of compliance checks every fix reports on
pub const COMPLIANCE_FLAGS: [&str; 7] = [
    "addresses_root_cause",
    "preserves_behavior",
    "follows_conventions",
    "type_safe",
    "handles_errors",
    "no_new_violations",
    "tests_considered",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("response is empty")]
    EmptyResponse,
    #[error("literal block opened at byte {offset} is never closed")]
    UnterminatedLiteral { offset: usize },
    #[error("section <{name}> is never closed")]
    UnclosedSection { name: String },
    #[error("unexpected </{found}> at byte {offset}, expected </{expected}>")]
    MismatchedClose {
        found: String,
        expected: String,
        offset: usize,
    },
    #[error("response has no <primary_change> section")]
    MissingPrimaryChange,
}

#[derive(Debug, Clone, PartialEq)]
enum Token<'a> {
    Open(&'a str),
    Close(&'a str),
    Empty(&'a str),
    Text(&'a str),
    Literal(&'a str),
}

#[derive(Debug, Clone, PartialEq)]
enum Node<'a> {
    Element(Element<'a>),
    Text(&'a str),
    Literal(&'a str),
}

#[derive(Debug, Clone, PartialEq, Default)]
struct Element<'a> {
    name: &'a str,
    children: Vec<Node<'a>>,
}

impl<'a> Element<'a> {
    fn new(name: &'a str) -> Self {
        Self {
            name,
            children: Vec::new(),
        }
    }

    /// First child element with the given name
    fn child(&self, name: &str) -> Option<&Element<'a>> {
        self.elements().find(|e| e.name == name)
    }

    fn elements(&self) -> impl Iterator<Item = &Element<'a>> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    /// Literal blocks verbatim if there are any, otherwise the trimmed text
    fn content(&self) -> String {
        let literals: Vec<&str> = self
            .children
            .iter()
            .filter_map(|n| match n {
                Node::Literal(s) => Some(*s),
                _ => None,
            })
            .collect();
        if !literals.is_empty() {
            return literals.concat();
        }
        self.text()
    }

    fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            match node {
                Node::Text(s) | Node::Literal(s) => out.push_str(s),
                Node::Element(_) => {}
            }
        }
        out.trim().to_string()
    }

    fn child_text(&self, name: &str) -> Option<String> {
        self.child(name).map(Element::text).filter(|s| !s.is_empty())
    }
}

fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

/// Try to read a tag at the start of `s` (which begins with `<`).
/// Returns the token and the number of bytes consumed.
fn scan_tag(s: &str) -> Option<(Token<'_>, usize)> {
    let bytes = s.as_bytes();
    let closing = bytes.get(1) == Some(&b'/');
    let name_start = if closing { 2 } else { 1 };
    if !bytes.get(name_start).is_some_and(|b| is_name_start(*b)) {
        return None;
    }
    let mut i = name_start + 1;
    while bytes.get(i).is_some_and(|b| is_name_char(*b)) {
        i += 1;
    }
    let name = &s[name_start..i];
    while bytes.get(i).is_some_and(|b| *b == b' ' || *b == b'\t') {
        i += 1;
    }
    match bytes.get(i) {
        Some(b'>') if closing => Some((Token::Close(name), i + 1)),
        Some(b'>') => Some((Token::Open(name), i + 1)),
        Some(b'/') if !closing && bytes.get(i + 1) == Some(&b'>') => {
            Some((Token::Empty(name), i + 2))
        }
        _ => None,
    }
}

/// A token and the raw text it was read from
#[derive(Debug, Clone, PartialEq)]
struct Spanned<'a> {
    offset: usize,
    raw: &'a str,
    token: Token<'a>,
}

fn tokenize(input: &str) -> Result<Vec<Spanned<'_>>, ParseError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut text_start = 0;
    let mut pos = 0;

    while pos < bytes.len() {
        if bytes[pos] != b'<' {
            pos += 1;
            continue;
        }
        let rest = &input[pos..];
        let (token, consumed) = if rest.starts_with(LITERAL_OPEN) {
            let body_start = pos + LITERAL_OPEN.len();
            let Some(len) = input[body_start..].find(LITERAL_CLOSE) else {
                return Err(ParseError::UnterminatedLiteral { offset: pos });
            };
            (
                Token::Literal(&input[body_start..body_start + len]),
                LITERAL_OPEN.len() + len + LITERAL_CLOSE.len(),
            )
        } else if let Some(tag) = scan_tag(rest) {
            tag
        } else {
            pos += 1;
            continue;
        };

        if text_start < pos {
            let raw = &input[text_start..pos];
            tokens.push(Spanned {
                offset: text_start,
                raw,
                token: Token::Text(raw),
            });
        }
        tokens.push(Spanned {
            offset: pos,
            raw: &input[pos..pos + consumed],
            token,
        });
        pos += consumed;
        text_start = pos;
    }
    if text_start < bytes.len() {
        let raw = &input[text_start..];
        tokens.push(Spanned {
            offset: text_start,
            raw,
            token: Token::Text(raw),
        });
    }
    Ok(tokens)
}

/// Sections whose content is prose or code rather than nested sections.
/// Inside them only the section's own close tag is markup, so text such as
/// `Array<string>` stays text.
fn is_leaf(parent: &str, name: &str) -> bool {
    match name {
        "file" => parent == "primary_change",
        "description" | "code" | "lines" | "path" | "purpose" | "content" | "testing_notes"
        | "risk" | "reasoning" | "agent_id" | "timestamp" | "fix_type" | "confidence"
        | "attempt" | "completeness_score" => true,
        _ => COMPLIANCE_FLAGS.contains(&name),
    }
}

/// Build the element tree under the `<fix>` root. Responses without a root
/// element are parsed as if the whole document were the root.
fn parse_tree(input: &str) -> Result<Element<'_>, ParseError> {
    let tokens = tokenize(input)?;
    let root_at = tokens
        .iter()
        .position(|t| t.token == Token::Open(ROOT_TAG));
    let (body, wrapped) = match root_at {
        Some(i) => (&tokens[i + 1..], true),
        None => (&tokens[..], false),
    };

    let mut stack: Vec<Element<'_>> = vec![Element::new(ROOT_TAG)];
    // Whether the innermost open section is a leaf
    let mut in_leaf = false;
    for spanned in body {
        match &spanned.token {
            Token::Literal(s) => push_node(&mut stack, Node::Literal(*s)),
            Token::Text(s) => push_node(&mut stack, Node::Text(*s)),
            Token::Open(_) | Token::Empty(_) if in_leaf => {
                push_node(&mut stack, Node::Text(spanned.raw))
            }
            Token::Open(name) => {
                let parent = stack.last().map(|e| e.name).unwrap_or(ROOT_TAG);
                in_leaf = is_leaf(parent, name);
                stack.push(Element::new(*name));
            }
            Token::Empty(name) => push_node(&mut stack, Node::Element(Element::new(*name))),
            Token::Close(name) => {
                if stack.len() == 1 {
                    if wrapped && *name == ROOT_TAG {
                        break;
                    }
                    // Stray close tag in free text
                    push_node(&mut stack, Node::Text(spanned.raw));
                    continue;
                }
                let top = stack.len() - 1;
                if stack[top].name != *name {
                    if !stack.iter().any(|e| e.name == *name) {
                        // Not closing anything that is open, so it is text
                        push_node(&mut stack, Node::Text(spanned.raw));
                        continue;
                    }
                    return Err(ParseError::MismatchedClose {
                        found: name.to_string(),
                        expected: stack[top].name.to_string(),
                        offset: spanned.offset,
                    });
                }
                if let Some(done) = stack.pop() {
                    push_node(&mut stack, Node::Element(done));
                }
                in_leaf = false;
            }
        }
    }

    if stack.len() > 1 {
        let name = stack[stack.len() - 1].name.to_string();
        return Err(ParseError::UnclosedSection { name });
    }
    Ok(stack.pop().unwrap_or_default())
}

fn push_node<'a>(stack: &mut [Element<'a>], node: Node<'a>) {
    if let Some(top) = stack.last_mut() {
        top.children.push(node);
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1")
}

/// Accepts `0.93`, `93` or `93%`; other out-of-range values are clamped
fn parse_confidence(s: &str) -> Option<f64> {
    let s = s.trim();
    let (number, percent) = match s.strip_suffix('%') {
        Some(n) => (n.trim(), true),
        None => (s, false),
    };
    let value: f64 = number.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    let whole_percent = value > 1.0 && value <= 100.0 && value.fract() == 0.0;
    let value = if percent || whole_percent {
        value / 100.0
    } else {
        value
    };
    Some(value.clamp(0.0, 1.0))
}

/// Accepts `85` or `85/100`, clamped to 0-100
fn parse_score(s: &str) -> Option<u8> {
    let raw = s.trim();
    let raw = raw.strip_suffix("/100").unwrap_or(raw).trim();
    let value: f64 = raw.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(value.round().clamp(0.0, 100.0) as u8)
}

/// Accepts `12`, `12-18` or `12:18`
fn parse_line_range(s: &str) -> Option<LineRange> {
    let s = s.trim();
    let (start, end) = match s.split_once(['-', ':']) {
        Some((a, b)) => (a.trim().parse().ok()?, b.trim().parse().ok()?),
        None => {
            let line = s.parse().ok()?;
            (line, line)
        }
    };
    if start == 0 || end < start {
        return None;
    }
    Some(LineRange { start, end })
}

fn parse_fix_type(s: &str) -> Option<FixType> {
    match s.trim().to_ascii_lowercase().as_str() {
        "simple" => Some(FixType::Simple),
        "complex" => Some(FixType::Complex),
        "error" => Some(FixType::Error),
        _ => None,
    }
}

/// Parse a raw service response into a [`Fix`].
///
/// `received_at` stands in for a missing or unreadable timestamp so that the
/// result depends only on the inputs.
pub fn parse_fix(input: &str, received_at: DateTime<Utc>) -> Result<Fix, ParseError> {
    if input.trim().is_empty() {
        return Err(ParseError::EmptyResponse);
    }
    let root = parse_tree(input)?;
    let primary = root
        .child("primary_change")
        .ok_or(ParseError::MissingPrimaryChange)?;

    let primary_change = PrimaryChange {
        description: primary.child_text("description").unwrap_or_default(),
        code: primary.child("code").map(Element::content).unwrap_or_default(),
        file: primary.child_text("file").unwrap_or_default(),
        lines: primary
            .child_text("lines")
            .and_then(|s| parse_line_range(&s)),
    };

    let additional_files: Vec<AdditionalFile> = root
        .child("additional_files")
        .map(|files| {
            files
                .elements()
                .filter(|e| e.name == "file")
                .filter_map(|e| {
                    let path = e.child_text("path")?;
                    Some(AdditionalFile {
                        path,
                        purpose: e.child_text("purpose").unwrap_or_default(),
                        content: e.child("content").map(Element::content).unwrap_or_default(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let mut risks: Vec<String> = root
        .child("risks")
        .map(|r| {
            r.elements()
                .filter(|e| e.name == "risk")
                .map(Element::text)
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();
    if risks.is_empty() {
        risks.push(DEFAULT_RISK_NOTE.to_string());
    }

    let compliance = root.child("compliance");
    let compliance_checklist: BTreeMap<String, bool> = COMPLIANCE_FLAGS
        .iter()
        .map(|flag| {
            let value = compliance
                .and_then(|c| c.child_text(flag))
                .is_some_and(|s| parse_bool(&s));
            (flag.to_string(), value)
        })
        .collect();

    let self_validation = root.child("self_validation");
    let self_validation = SelfValidation {
        completeness_score: self_validation
            .and_then(|s| s.child_text("completeness_score"))
            .and_then(|s| parse_score(&s))
            .unwrap_or(0),
        reasoning: self_validation
            .and_then(|s| s.child_text("reasoning"))
            .unwrap_or_default(),
    };

    let fix_type = root
        .child_text("fix_type")
        .and_then(|s| parse_fix_type(&s))
        .unwrap_or(if additional_files.is_empty() {
            FixType::Simple
        } else {
            FixType::Complex
        });

    let fix = Fix {
        source_agent_id: root
            .child_text("agent_id")
            .unwrap_or_else(|| UNKNOWN_AGENT_ID.to_string()),
        timestamp: root
            .child_text("timestamp")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(received_at),
        fix_type,
        confidence: root
            .child_text("confidence")
            .and_then(|s| parse_confidence(&s))
            .unwrap_or(DEFAULT_CONFIDENCE),
        attempt_number: root
            .child_text("attempt")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1)
            .max(1),
        primary_change,
        additional_files,
        testing_notes: root.child_text("testing_notes").unwrap_or_default(),
        risks,
        compliance_checklist,
        self_validation,
    };
    trace!(
        "Parsed fix: type={}, confidence={:.2}, {} additional files",
        fix.fix_type,
        fix.confidence,
        fix.additional_files.len()
    );
    Ok(fix)
}
