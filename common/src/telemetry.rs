// Telemetry module for structured logging and metrics

use crate::config::LogFormat;
use crate::models::{Stage, TriggerKind};
use anyhow::Result;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize structured logging
///
/// This function sets up the tracing subscriber with:
/// - JSON formatting (or a human-readable format for local runs)
/// - Log level from configuration, overridden by `RUST_LOG`
/// - Current span and span list on every JSON entry
pub fn init_logging(log_level: &str, format: &LogFormat) -> Result<()> {
    install(env_filter(log_level, false)?, log_level, format)
}

/// Initialize structured logging at exactly `log_level`, ignoring `RUST_LOG`
pub fn init_logging_at(log_level: &str, format: &LogFormat) -> Result<()> {
    install(env_filter(log_level, true)?, log_level, format)
}

fn env_filter(log_level: &str, ignore_env: bool) -> Result<EnvFilter> {
    let filter = if ignore_env {
        EnvFilter::try_new(log_level)
    } else {
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(log_level))
    };
    filter.map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))
}

fn install(env_filter: EnvFilter, log_level: &str, format: &LogFormat) -> Result<()> {
    let layer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::debug!(log_level = log_level, "Structured logging initialized");

    Ok(())
}

/// Initialize Prometheus metrics exporter
///
/// Registers:
/// - pipeline_runs_total: Counter of finished runs by trigger and outcome
/// - pipeline_commits_total: Counter of commits pushed
/// - pipeline_run_duration_seconds: Histogram of run wall time
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!("pipeline_runs_total", "Total number of finished pipeline runs");
    describe_counter!("pipeline_commits_total", "Total number of commits pushed");
    describe_histogram!(
        "pipeline_run_duration_seconds",
        "Duration of pipeline runs in seconds"
    );

    tracing::info!(
        metrics_port = metrics_port,
        metrics_endpoint = format!("http://0.0.0.0:{}/metrics", metrics_port),
        "Prometheus metrics exporter initialized"
    );

    Ok(())
}

#[inline]
pub fn record_run_success(trigger: TriggerKind, committed: bool) {
    let outcome = if committed { "published" } else { "no_change" };
    counter!(
        "pipeline_runs_total",
        "trigger" => trigger.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    if committed {
        counter!("pipeline_commits_total").increment(1);
    }
}

#[inline]
pub fn record_run_failure(trigger: TriggerKind, stage: Stage) {
    counter!(
        "pipeline_runs_total",
        "trigger" => trigger.to_string(),
        "outcome" => "failed",
        "stage" => stage.to_string()
    )
    .increment(1);
}

#[inline]
pub fn record_run_duration(trigger: TriggerKind, duration_seconds: f64) {
    histogram!(
        "pipeline_run_duration_seconds",
        "trigger" => trigger.to_string()
    )
    .record(duration_seconds);
}
