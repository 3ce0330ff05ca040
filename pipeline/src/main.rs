// Pipeline binary entry point
//
// Executes exactly one run for a push, schedule, or manual trigger.
// Exit codes: 0 success or not triggered, 1 run failed, 2 startup error.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use common::config::Settings;
use common::models::TriggerKind;
use common::pipeline::PipelineEngine;
use common::schedule::CronSchedule;
use common::telemetry;
use common::trigger::{HostEvent, TriggerInput, TriggerResolver};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};

const EXIT_RUN_FAILED: u8 = 1;
const EXIT_STARTUP: u8 = 2;

#[derive(Parser)]
#[command(name = "pipeline")]
#[command(about = "Fetch-and-publish pipeline runner", long_about = None)]
struct Cli {
    /// Directory holding default.toml and local.toml
    #[arg(long, global = true, env = "PIPELINE_CONFIG_DIR", default_value = "config")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one run
    Run(RunArgs),
    /// Print upcoming scheduled fire times
    Next {
        /// Number of fire times to print
        #[arg(long, default_value_t = 5)]
        count: usize,
    },
}

#[derive(Args)]
struct RunArgs {
    /// push, schedule, or manual; inferred from the host event when absent
    #[arg(long)]
    trigger: Option<TriggerKind>,

    /// Ref that was pushed, for push triggers
    #[arg(long)]
    git_ref: Option<String>,

    /// Operator parameter for manual triggers
    #[arg(long)]
    text_to_print: Option<String>,

    /// Repository working tree to run in
    #[arg(long, default_value = ".")]
    repo: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match load_settings(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("pipeline: {:#}", e);
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    let result = match cli.command {
        Commands::Run(args) => execute_run(&settings, args).await,
        Commands::Next { count } => preview_schedule(&settings, count),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Pipeline startup failed");
            ExitCode::from(EXIT_STARTUP)
        }
    }
}

fn load_settings(config_dir: &Path) -> Result<Settings> {
    let settings = Settings::load_from_path(config_dir)
        .with_context(|| format!("Failed to load configuration from {}", config_dir.display()))?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    telemetry::init_logging(
        &settings.observability.log_level,
        &settings.observability.log_format,
    )?;

    Ok(settings)
}

async fn execute_run(settings: &Settings, args: RunArgs) -> Result<ExitCode> {
    let repo = args
        .repo
        .canonicalize()
        .with_context(|| format!("Repository path {} is not accessible", args.repo.display()))?;

    let input = TriggerInput {
        kind: args.trigger,
        git_ref: args.git_ref,
        text_to_print: args.text_to_print,
    };
    let resolver = TriggerResolver::new(&settings.trigger);
    let Some(trigger) = resolver.resolve(input, &HostEvent::from_env())? else {
        info!("Event does not match trigger filters, nothing to run");
        return Ok(ExitCode::SUCCESS);
    };

    let engine = PipelineEngine::from_settings(settings, repo);
    let run = engine.execute(trigger).await;

    match &run.outcome {
        Some(outcome) if outcome.is_success() => Ok(ExitCode::SUCCESS),
        _ => Ok(ExitCode::from(EXIT_RUN_FAILED)),
    }
}

fn preview_schedule(settings: &Settings, count: usize) -> Result<ExitCode> {
    let schedule = CronSchedule::new(&settings.trigger.cron, &settings.trigger.timezone)?;

    for fire in schedule.upcoming(Utc::now(), count) {
        println!(
            "{}  ({})",
            fire.to_rfc3339(),
            fire.with_timezone(&schedule.timezone()).to_rfc3339()
        );
    }

    Ok(ExitCode::SUCCESS)
}
