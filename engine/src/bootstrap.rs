// Bootstrap utilities shared by the api and scheduler binaries

use crate::config::Settings;
use crate::coordinator::{CoordinatorConfig, ExecutionCoordinator};
use crate::db::{
    DbPool, ExecutionLedger, MemoryExecutionLedger, MemoryTaskStore, PgExecutionLedger,
    PgTaskStore, TaskStore,
};
use crate::runner::RunnerRegistry;
use crate::scheduler::{SchedulerConfig, SchedulerEngine};
use crate::service::TaskService;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Every long-lived engine component, wired together
pub struct EngineComponents {
    /// `None` when running on in-memory storage
    pub db_pool: Option<DbPool>,
    pub coordinator: ExecutionCoordinator,
    pub service: TaskService,
    pub scheduler: Arc<SchedulerEngine>,
}

/// Initialize the database pool and apply migrations when configured to
#[tracing::instrument(skip(settings))]
pub async fn init_database_pool(settings: &Settings) -> Result<DbPool> {
    info!("Initializing database pool");

    let db_pool = DbPool::new(&settings.database)
        .await
        .context("Failed to initialize database pool")?;

    if settings.database.run_migrations {
        db_pool
            .migrate()
            .await
            .context("Failed to apply database migrations")?;
    }

    info!("Database pool initialized");
    Ok(db_pool)
}

/// Task store and execution ledger backed by PostgreSQL, or by memory when
/// no pool is given
pub fn init_storage(db_pool: Option<&DbPool>) -> (Arc<dyn TaskStore>, Arc<dyn ExecutionLedger>) {
    match db_pool {
        Some(pool) => (
            Arc::new(PgTaskStore::new(pool.clone())),
            Arc::new(PgExecutionLedger::new(pool.clone())),
        ),
        None => {
            warn!("No database URL configured; tasks and executions are kept in memory");
            (
                Arc::new(MemoryTaskStore::new()),
                Arc::new(MemoryExecutionLedger::new()),
            )
        }
    }
}

/// Build the engine with the built-in runners
pub async fn init_engine(settings: &Settings) -> Result<EngineComponents> {
    let runners = RunnerRegistry::with_builtin().context("Failed to build runner registry")?;
    init_engine_with_runners(settings, runners).await
}

/// Build the engine with a caller-supplied runner registry.
/// Executions orphaned by a previous process are marked failed before returning.
#[tracing::instrument(skip_all)]
pub async fn init_engine_with_runners(
    settings: &Settings,
    runners: RunnerRegistry,
) -> Result<EngineComponents> {
    let db_pool = match settings.database.url {
        Some(_) => Some(init_database_pool(settings).await?),
        None => None,
    };
    let (tasks, ledger) = init_storage(db_pool.as_ref());

    info!(runners = ?runners.names(), "Runner registry initialized");

    let coordinator = ExecutionCoordinator::new(
        CoordinatorConfig::from_settings(&settings.coordinator, &settings.workflow),
        tasks,
        ledger,
        runners,
    );

    let recovered = coordinator
        .recover_orphans()
        .await
        .context("Failed to recover interrupted executions")?;
    if recovered > 0 {
        warn!(count = recovered, "Marked interrupted executions as failed");
    }

    let service = TaskService::new(coordinator.clone());
    let scheduler = Arc::new(SchedulerEngine::new(
        SchedulerConfig::from(&settings.scheduler),
        coordinator.clone(),
    ));

    info!("Engine components initialized");
    Ok(EngineComponents {
        db_pool,
        coordinator,
        service,
        scheduler,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_engine_without_database_url() {
        let settings = Settings::default();
        let engine = init_engine(&settings).await.unwrap();
        assert!(engine.db_pool.is_none());
        assert_eq!(engine.coordinator.active_count(), 0);
        assert!(engine.coordinator.runners().contains("http"));
    }
}
