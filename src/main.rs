mod cli;
mod config;
mod fix;
mod llm;
mod pipeline;
mod stage;
mod types;

use anyhow::{Context, bail};
use clap::Parser;
use cli::{Cli, Commands, InitArgs, RunArgs, ValidateArgs};
use config::{Config, DEFAULT_CONFIG};
use pipeline::TraceFormat;
use pipeline::context::RunContext;
use pipeline::orchestrator::Orchestrator;
use pipeline::render;
use stage::GenerateStage;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_SUCCESS: i32 = 0;
const EXIT_FAILURE: i32 = 1;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match &cli.command {
        Commands::Init(args) => init(args).map(|()| EXIT_SUCCESS),
        Commands::Run(args) => run(args).await,
        Commands::Validate(args) => validate_response(args),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(EXIT_FAILURE);
        }
    }
}

fn init(args: &InitArgs) -> anyhow::Result<()> {
    if Path::new(&args.config).exists() && !args.r#override {
        bail!(
            "{} already exists, pass --override to replace it",
            args.config
        );
    }
    std::fs::write(&args.config, DEFAULT_CONFIG)
        .with_context(|| format!("Failed to write {}", args.config))?;
    info!("Wrote default config to {}", args.config);
    Ok(())
}

async fn run(args: &RunArgs) -> anyhow::Result<i32> {
    let config = Config::load(&args.config, &args.config_overrides)?;
    let options = args.options();
    if let Some(trace) = &args.trace {
        TraceFormat::from_path(trace)?;
    }

    let registry = pipeline::default_registry(GenerateStage::new())?;
    if args.dry_run {
        info!("Dry run - {} steps:", registry.len());
        for line in render::format_plan(&registry, &options).lines() {
            info!("  {}", line);
        }
        return Ok(EXIT_SUCCESS);
    }

    if args.api_key.is_none() {
        warn!("No API key provided, fixes will not be generated");
    }
    let step_delay = Duration::from_millis(config.pipeline.step_delay_ms);
    let orchestrator = Orchestrator::new(registry, step_delay);
    let mut ctx = RunContext::new(config, options, args.api_key.clone());

    let summary = pipeline::execute(&orchestrator, &mut ctx, args.trace.as_deref()).await?;
    for line in render::format_summary(&summary).lines() {
        info!("{}", line);
    }
    info!("Run artifacts written to {}", ctx.run_dir.display());
    Ok(summary.exit_code())
}

fn validate_response(args: &ValidateArgs) -> anyhow::Result<i32> {
    let content = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let parsed = fix::parse::parse_fix(&content, chrono::Utc::now())
        .with_context(|| format!("Failed to parse {}", args.file.display()))?;
    let validation = fix::validate(&parsed);

    info!(
        "{} fix for {} (confidence {:.2}): {}/100 {}",
        parsed.fix_type,
        parsed.primary_change.file,
        parsed.confidence,
        validation.score,
        if validation.passed { "passed" } else { "failed" }
    );
    for issue in &validation.issues {
        info!("  - {}", issue);
    }
    Ok(if validation.passed {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}
