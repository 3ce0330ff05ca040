// Scheduler binary entry point
//
// Long-running daemon that fires scheduled runs from the configured cron
// expression. Stops on Ctrl+C after any in-flight run completes.

use anyhow::{Context, Result};
use clap::Parser;
use common::config::Settings;
use common::pipeline::PipelineEngine;
use common::schedule::CronSchedule;
use common::scheduler::{Scheduler, SchedulerEngine};
use common::telemetry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "scheduler")]
#[command(about = "Fire scheduled pipeline runs from the cron expression", long_about = None)]
struct Cli {
    /// Directory holding default.toml and local.toml
    #[arg(long, env = "PIPELINE_CONFIG_DIR", default_value = "config")]
    config: PathBuf,

    /// Repository working tree to run in
    #[arg(long, default_value = ".")]
    repo: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_from_path(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    telemetry::init_logging(
        &settings.observability.log_level,
        &settings.observability.log_format,
    )?;

    info!("Starting pipeline scheduler");

    if let Some(port) = settings.observability.metrics_port {
        telemetry::init_metrics(port)?;
    }

    let schedule = CronSchedule::new(&settings.trigger.cron, &settings.trigger.timezone)?;
    info!(
        cron = %schedule.expression(),
        timezone = %schedule.timezone(),
        "Schedule loaded"
    );

    let repo = cli
        .repo
        .canonicalize()
        .with_context(|| format!("Repository path {} is not accessible", cli.repo.display()))?;
    let pipeline = Arc::new(PipelineEngine::from_settings(&settings, repo));

    let scheduler = Arc::new(SchedulerEngine::new(Arc::new(schedule), pipeline));
    let scheduler_for_shutdown = scheduler.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Received Ctrl+C signal, initiating graceful shutdown");
        scheduler_for_shutdown.stop().await;
    });

    if let Err(e) = scheduler.start().await {
        error!(error = %e, "Scheduler error");
        return Err(e.into());
    }

    info!("Scheduler stopped");
    Ok(())
}
