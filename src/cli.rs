use crate::pipeline::context::{DEFAULT_CONFIDENCE_THRESHOLD, RunOptions};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

// Display order for API key option (placed at top of help text)
const API_KEY_DISPLAY_ORDER: usize = 0;
// Display order for log level option (placed at end of help text)
const LOG_LEVEL_DISPLAY_ORDER: usize = 100;

/// CLI arguments
#[derive(Parser)]
#[command(name = "remedy", version, about = "Automated code remediation pipeline", long_about = None)]
pub struct Cli {
    /// Log level (see https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html)
    /// [env: REMEDY_LOG=] [default: info]
    #[arg(
        long,
        env = "REMEDY_LOG",
        default_value = "info",
        global = true,
        hide_default_value = true,
        hide_env = true,
        display_order = LOG_LEVEL_DISPLAY_ORDER,
        verbatim_doc_comment
    )]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a default remedy.toml config file
    Init(InitArgs),
    /// Run the remediation pipeline
    Run(RunArgs),
    /// Parse and score a saved generation service response
    Validate(ValidateArgs),
}

/// Arguments for the init command
#[derive(Parser)]
pub struct InitArgs {
    /// Path to config file
    #[arg(long, default_value = "remedy.toml")]
    pub config: String,

    /// Override existing config file
    #[arg(long)]
    pub r#override: bool,
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to config file (initialize with `remedy init`)
    #[arg(long, default_value = "remedy.toml")]
    pub config: String,

    /// Override config values using dot notation (e.g. llm.model=gpt-4)
    #[arg(long = "config-override")]
    pub config_overrides: Vec<String>,

    /// LLM API key. Without one the fix step is skipped
    #[arg(long, env = "REMEDY_LLM_API_KEY", hide_env_values = true, display_order = API_KEY_DISPLAY_ORDER)]
    pub api_key: Option<String>,

    /// Ask for approval of each eligible fix before applying
    #[arg(long)]
    pub review: bool,

    /// Apply eligible fixes to the project tree
    #[arg(long)]
    pub auto_apply: bool,

    /// Minimum fix confidence for auto-apply (0.0-1.0)
    #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD, value_parser = parse_threshold)]
    pub confidence_threshold: f64,

    /// Do not copy files aside before applying fixes
    #[arg(long)]
    pub no_backup: bool,

    /// Dry run: only show the step plan without executing it
    #[arg(long)]
    pub dry_run: bool,

    /// Trace file path to record every prompt and response (.md or .json)
    #[arg(long)]
    pub trace: Option<PathBuf>,
}

impl RunArgs {
    pub fn options(&self) -> RunOptions {
        RunOptions {
            interactive: self.review,
            auto_apply: self.auto_apply,
            confidence_threshold: self.confidence_threshold,
            backup: !self.no_backup,
        }
    }
}

/// Arguments for the validate command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// File containing a raw generation service response
    pub file: PathBuf,
}

fn parse_threshold(s: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|e| format!("{}", e))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{} is not between 0.0 and 1.0", value))
    }
}
