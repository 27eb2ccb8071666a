// Scheduler binary entry point
// Runs the engine headless: the polling loop plus the executions it starts.

use anyhow::Context;
use engine::bootstrap;
use engine::config::Settings;
use engine::scheduler::Scheduler;
use engine::telemetry;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;
    telemetry::init_metrics(settings.observability.metrics_port)?;

    info!(
        persistent = settings.database.url.is_some(),
        poll_interval_ms = settings.scheduler.poll_interval_ms,
        max_concurrent_executions = settings.coordinator.max_concurrent_executions,
        "Starting task engine scheduler"
    );

    let engine = bootstrap::init_engine(&settings).await?;
    let scheduler = engine.scheduler.clone();

    let scheduler_for_shutdown = scheduler.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Received Ctrl+C signal, initiating graceful shutdown");
        if let Err(e) = scheduler_for_shutdown.stop().await {
            error!(error = %e, "Error during scheduler shutdown");
        }
    });

    if let Err(e) = scheduler.start().await {
        error!(error = %e, "Scheduler error");
        telemetry::shutdown_tracer();
        return Err(e.into());
    }

    if let Some(pool) = &engine.db_pool {
        pool.close().await;
    }
    telemetry::shutdown_tracer();
    info!("Scheduler stopped");
    Ok(())
}
