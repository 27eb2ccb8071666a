use anyhow::{Context, Result};
use std::net::SocketAddr;

mod handlers;
mod routes;
mod state;

use engine::bootstrap;
use engine::config::Settings;
use engine::scheduler::Scheduler;
use engine::telemetry;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Settings::load().context("Failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    telemetry::init_logging(
        &config.observability.log_level,
        config.observability.tracing_endpoint.as_deref(),
    )?;

    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        embedded_scheduler = config.server.embedded_scheduler,
        "Starting API server"
    );

    let metrics_handle = telemetry::install_metrics_recorder()?;
    let engine = bootstrap::init_engine(&config).await?;

    let scheduler = engine.scheduler.clone();
    let scheduler_task = if config.server.embedded_scheduler {
        let scheduler = scheduler.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = scheduler.start().await {
                tracing::error!(error = %e, "Scheduler error");
            }
        }))
    } else {
        tracing::info!("Embedded scheduler disabled; run the scheduler binary separately");
        None
    };

    let state = AppState::new(
        engine.service.clone(),
        engine.db_pool.clone(),
        Some(metrics_handle),
        config.clone(),
    );
    let app = routes::create_router(state);

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));
    tracing::info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = scheduler_task {
        scheduler.stop().await?;
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Scheduler task panicked");
        }
    }
    if let Some(pool) = &engine.db_pool {
        pool.close().await;
    }
    telemetry::shutdown_tracer();

    tracing::info!("API server stopped");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Initiating graceful shutdown");
}
