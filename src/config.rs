use crate::fix::agent::MAX_ATTEMPTS;
use anyhow::{Context, bail};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// Default config written by `remedy init`
pub const DEFAULT_CONFIG: &str = r#"# remedy configuration

[llm]
# OpenAI-compatible API base URL
base_url = "https://api.openai.com/v1"
# Model used for fix generation
model = "gpt-4o"
# Upper bound on response size per request
max_tokens = 4096
# Low temperature favors consistent fixes over creative ones
temperature = 0.1
# Per-request timeout in seconds
timeout_secs = 120

[agent]
# Identifier recorded on generated fixes
id = "fix-generator"
# Attempts per violation before giving up (1-3)
max_attempts = 3
# Pause before retrying a fix that failed validation or parsing (milliseconds)
backoff_ms = 2000
# Pause before retrying after a service error (milliseconds)
service_backoff_ms = 5000
# Pause between violations to respect service rate limits (milliseconds)
call_delay_ms = 1000

[pipeline]
# Pause between pipeline steps (milliseconds)
step_delay_ms = 500
# Directory receiving one subdirectory per run
output_dir = "remediation/runs"
# Root that violation paths are relative to
project_root = "."

[scan]
# Violations produced by the scanner (.json, .yaml or .yml)
violations = "remediation/violations.json"
# Optional command that writes the violations file before it is read
# command = "npm run lint:report"
# Glob patterns of files whose violations are ignored
exclude = []

[analyze]
# Analyses produced by the analyzer (.json, .yaml or .yml)
analyses = "remediation/analyses.json"
"#;

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub analyze: AnalyzeConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Extra HTTP headers sent with every request
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            headers: HashMap::new(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.1
}

fn default_timeout_secs() -> u64 {
    120
}

#[derive(Deserialize, Debug, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_agent_id")]
    pub id: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_service_backoff_ms")]
    pub service_backoff_ms: u64,
    #[serde(default = "default_call_delay_ms")]
    pub call_delay_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: default_agent_id(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            service_backoff_ms: default_service_backoff_ms(),
            call_delay_ms: default_call_delay_ms(),
        }
    }
}

fn default_agent_id() -> String {
    "fix-generator".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    2000
}

fn default_service_backoff_ms() -> u64 {
    5000
}

fn default_call_delay_ms() -> u64 {
    1000
}

#[derive(Deserialize, Debug, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            step_delay_ms: default_step_delay_ms(),
            output_dir: default_output_dir(),
            project_root: default_project_root(),
        }
    }
}

fn default_step_delay_ms() -> u64 {
    500
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("remediation/runs")
}

fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Deserialize, Debug, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_violations")]
    pub violations: PathBuf,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            violations: default_violations(),
            command: None,
            exclude: Vec::new(),
        }
    }
}

fn default_violations() -> PathBuf {
    PathBuf::from("remediation/violations.json")
}

#[derive(Deserialize, Debug, Clone)]
pub struct AnalyzeConfig {
    #[serde(default = "default_analyses")]
    pub analyses: PathBuf,
}

impl Default for AnalyzeConfig {
    fn default() -> Self {
        Self {
            analyses: default_analyses(),
        }
    }
}

fn default_analyses() -> PathBuf {
    PathBuf::from("remediation/analyses.json")
}

impl Config {
    /// Load config from a TOML file, applying `key.path=value` overrides.
    /// A missing file yields the defaults.
    pub fn load(path: &str, overrides: &[String]) -> anyhow::Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path)),
        };
        Self::parse(&content, overrides).with_context(|| format!("Invalid config {}", path))
    }

    pub fn parse(content: &str, overrides: &[String]) -> anyhow::Result<Self> {
        let mut table: toml::Table = toml::from_str(content)?;
        for entry in overrides {
            apply_override(&mut table, entry)?;
        }
        let config: Config = toml::Value::Table(table).try_into()?;
        if !(1..=MAX_ATTEMPTS).contains(&config.agent.max_attempts) {
            bail!(
                "agent.max_attempts must be between 1 and {}, got {}",
                MAX_ATTEMPTS,
                config.agent.max_attempts
            );
        }
        Ok(config)
    }
}

/// Apply one `a.b.c=value` override. The value is read as a TOML value when
/// possible (numbers, booleans, arrays) and as a plain string otherwise.
fn apply_override(table: &mut toml::Table, entry: &str) -> anyhow::Result<()> {
    let Some((key, raw)) = entry.split_once('=') else {
        bail!("Override '{}' must look like key.path=value", entry);
    };
    let parts: Vec<&str> = key.trim().split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        bail!("Override '{}' has an empty key segment", entry);
    }

    let value = toml::from_str::<toml::Table>(&format!("v = {}", raw.trim()))
        .ok()
        .and_then(|mut t| t.remove("v"))
        .unwrap_or_else(|| toml::Value::String(raw.trim().to_string()));

    let Some((last, parents)) = parts.split_last() else {
        bail!("Override '{}' has no key", entry);
    };
    let mut current = table;
    for part in parents {
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        current = match entry {
            toml::Value::Table(t) => t,
            _ => bail!("Override '{}': '{}' is not a table", key, part),
        };
    }
    current.insert(last.to_string(), value);
    Ok(())
}
