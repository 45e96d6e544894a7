use super::parse::{ParseError, UNKNOWN_AGENT_ID, parse_fix};
use super::prompt::{SYSTEM_PROMPT, build_prompt};
use super::validate::{ValidationResult, validate};
use crate::config::AgentConfig;
use crate::llm::{GenerationRequest, GenerationService, ServiceError};
use crate::types::{Analysis, Fix, LineRange, Violation};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Hard ceiling on attempts per violation
pub const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("generation service unavailable after {attempts} attempts: {source}")]
    ServiceUnavailable {
        attempts: u32,
        #[source]
        source: ServiceError,
    },
    #[error("response still malformed on final attempt {attempts}: {source}")]
    Parse {
        attempts: u32,
        #[source]
        source: ParseError,
    },
}

/// What happened in one attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Validated {
        score: u8,
        passed: bool,
        issues: Vec<String>,
    },
    ParseFailed {
        error: String,
    },
    ServiceFailed {
        error: String,
    },
}

/// Prompt, raw response and outcome of one attempt, kept for traces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptTrace {
    pub attempt: u32,
    pub prompt: String,
    pub response: Option<String>,
    pub outcome: AttemptOutcome,
}

/// The fix returned by the agent together with its validation
#[derive(Debug, Clone)]
pub struct GeneratedFix {
    pub fix: Fix,
    pub validation: ValidationResult,
}

/// Result of [`FixAgent::generate_fix`] plus every attempt made
#[derive(Debug)]
pub struct GenerationReport {
    pub result: Result<GeneratedFix, AgentError>,
    pub attempts: Vec<AttemptTrace>,
}

/// Generates fixes for confirmed violations, retrying until a fix passes
/// validation or the attempt budget is spent.
///
/// The agent keeps no state between calls; each call depends only on the
/// violation, its analysis and the service responses.
pub struct FixAgent {
    service: Arc<dyn GenerationService>,
    id: String,
    max_attempts: u32,
    backoff: Duration,
    service_backoff: Duration,
    max_tokens: u32,
    temperature: f32,
}

impl FixAgent {
    pub fn new(
        service: Arc<dyn GenerationService>,
        config: &AgentConfig,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        Self {
            service,
            id: config.id.clone(),
            max_attempts: config.max_attempts.clamp(1, MAX_ATTEMPTS),
            backoff: Duration::from_millis(config.backoff_ms),
            service_backoff: Duration::from_millis(config.service_backoff_ms),
            max_tokens,
            temperature,
        }
    }

    /// Generate a fix for one violation.
    ///
    /// A fix that fails validation on the final attempt is still returned;
    /// only service exhaustion or a malformed final response is an error.
    pub async fn generate_fix(&self, violation: &Violation, analysis: &Analysis) -> GenerationReport {
        let location = violation.location();
        let mut attempts = Vec::new();
        let mut prior_issues: Vec<String> = Vec::new();
        let mut attempt = 1;

        loop {
            let last = attempt >= self.max_attempts;
            let request = GenerationRequest {
                system: SYSTEM_PROMPT.to_string(),
                prompt: build_prompt(violation, analysis, &self.id, attempt, &prior_issues),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            };
            debug!(
                "[{}] Attempt {}/{} ({} prior issues)",
                location,
                attempt,
                self.max_attempts,
                prior_issues.len()
            );

            let response = match self.service.generate(&request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("[{}] Attempt {} service error: {}", location, attempt, e);
                    attempts.push(AttemptTrace {
                        attempt,
                        prompt: request.prompt,
                        response: None,
                        outcome: AttemptOutcome::ServiceFailed {
                            error: e.to_string(),
                        },
                    });
                    if last {
                        return GenerationReport {
                            result: Err(AgentError::ServiceUnavailable {
                                attempts: attempt,
                                source: e,
                            }),
                            attempts,
                        };
                    }
                    tokio::time::sleep(self.service_backoff).await;
                    attempt += 1;
                    continue;
                }
            };

            let mut fix = match parse_fix(&response, Utc::now()) {
                Ok(fix) => fix,
                Err(e) => {
                    warn!("[{}] Attempt {} unparseable response: {}", location, attempt, e);
                    attempts.push(AttemptTrace {
                        attempt,
                        prompt: request.prompt,
                        response: Some(response),
                        outcome: AttemptOutcome::ParseFailed {
                            error: e.to_string(),
                        },
                    });
                    if last {
                        return GenerationReport {
                            result: Err(AgentError::Parse {
                                attempts: attempt,
                                source: e,
                            }),
                            attempts,
                        };
                    }
                    prior_issues = vec![format!(
                        "The response could not be parsed ({}). Follow the response format exactly.",
                        e
                    )];
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                    continue;
                }
            };

            self.complete_from_violation(&mut fix, violation, attempt);
            let validation = validate(&fix);
            attempts.push(AttemptTrace {
                attempt,
                prompt: request.prompt,
                response: Some(response),
                outcome: AttemptOutcome::Validated {
                    score: validation.score,
                    passed: validation.passed,
                    issues: validation.issues.clone(),
                },
            });

            if validation.passed || last {
                if validation.passed {
                    info!(
                        "[{}] Fix validated on attempt {} ({}/100)",
                        location, attempt, validation.score
                    );
                } else {
                    warn!(
                        "[{}] Returning unvalidated fix after {} attempts ({}/100)",
                        location, attempt, validation.score
                    );
                }
                return GenerationReport {
                    result: Ok(GeneratedFix { fix, validation }),
                    attempts,
                };
            }

            info!(
                "[{}] Attempt {} scored {}/100, retrying with {} issues",
                location,
                attempt,
                validation.score,
                validation.issues.len()
            );
            prior_issues = validation.issues;
            tokio::time::sleep(self.backoff).await;
            attempt += 1;
        }
    }

    /// Stamp the attempt actually used and fill fields the response left out
    fn complete_from_violation(&self, fix: &mut Fix, violation: &Violation, attempt: u32) {
        fix.attempt_number = attempt;
        if fix.source_agent_id == UNKNOWN_AGENT_ID {
            fix.source_agent_id = self.id.clone();
        }
        if fix.primary_change.file.is_empty() {
            fix.primary_change.file = violation.file.clone();
        }
        if fix.primary_change.lines.is_none() {
            fix.primary_change.lines = Some(LineRange::single(violation.line));
        }
    }
}
