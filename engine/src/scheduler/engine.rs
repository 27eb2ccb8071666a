// Scheduler engine implementation

use crate::config::SchedulerSettings;
use crate::coordinator::ExecutionCoordinator;
use crate::db::TaskStore;
use crate::errors::EngineResult;
use crate::models::{Task, TriggerSource};
use crate::schedule::Schedulable;
use crate::telemetry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often to poll for due tasks
    pub poll_interval: Duration,
    /// Maximum number of tasks fired per poll
    pub max_tasks_per_poll: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&SchedulerSettings::default())
    }
}

impl From<&SchedulerSettings> for SchedulerConfig {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            poll_interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
            max_tasks_per_poll: settings.max_tasks_per_poll.max(1),
        }
    }
}

/// Scheduler trait for task scheduling operations
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Run the polling loop until `stop` is called
    async fn start(&self) -> EngineResult<()>;

    /// Signal the polling loop to exit
    async fn stop(&self) -> EngineResult<()>;

    /// Fire every task that is due now. Returns the number of executions started.
    async fn process_due_tasks(&self) -> EngineResult<usize>;
}

/// Periodic scheduler: the only wall-clock poller of the engine
pub struct SchedulerEngine {
    config: SchedulerConfig,
    tasks: Arc<dyn TaskStore>,
    coordinator: ExecutionCoordinator,
    shutdown_tx: broadcast::Sender<()>,
}

impl SchedulerEngine {
    pub fn new(config: SchedulerConfig, coordinator: ExecutionCoordinator) -> Self {
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);
        Self {
            config,
            tasks: coordinator.tasks().clone(),
            coordinator,
            shutdown_tx,
        }
    }

    /// Get a shutdown signal receiver
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Fire the tasks due at `now`
    #[instrument(skip(self))]
    pub async fn process_due_tasks_at(&self, now: DateTime<Utc>) -> EngineResult<usize> {
        let due = self.tasks.list_due(now, self.config.max_tasks_per_poll).await?;
        debug!(task_count = due.len(), "Found due tasks");

        let mut started = 0;
        for task in due {
            match self.fire(task, now).await {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e) => error!(error = %e, "Failed to fire task"),
            }
        }
        Ok(started)
    }

    /// Advance the task's anchor, then start an execution.
    /// A fire that finds the previous execution still in flight is skipped.
    #[instrument(skip(self, task), fields(task_id = %task.id, task_name = %task.name))]
    async fn fire(&self, task: Task, now: DateTime<Utc>) -> EngineResult<bool> {
        let anchor = task.next_fire_time.unwrap_or(now);
        let next_fire_time = match task.next_fire_time_from(anchor, now) {
            Ok(next) => next,
            Err(e) => {
                error!(error = %e, "Schedule can no longer be evaluated; task will not fire again");
                None
            }
        };

        // Persisting the anchor first keeps a slow start from firing the same slot twice
        self.tasks.record_fire(task.id, now, next_fire_time).await?;

        match self.coordinator.start(task, TriggerSource::Scheduled, None).await {
            Ok(handle) => {
                telemetry::record_scheduled_fire(false);
                info!(
                    execution_id = %handle.id(),
                    next_fire_time = ?next_fire_time,
                    "Scheduled fire"
                );
                Ok(true)
            }
            Err(e) if e.is_conflict() => {
                telemetry::record_scheduled_fire(true);
                warn!(next_fire_time = ?next_fire_time, "Previous execution still in flight; fire skipped");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Scheduler for SchedulerEngine {
    #[instrument(skip(self))]
    async fn start(&self) -> EngineResult<()> {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Starting scheduler engine"
        );

        let mut poll_interval = interval(self.config.poll_interval);
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_receiver();

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    match self.process_due_tasks().await {
                        Ok(count) if count > 0 => info!(tasks_fired = count, "Processed due tasks"),
                        Ok(_) => debug!("No tasks due"),
                        Err(e) => error!(error = %e, "Error processing due tasks"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping scheduler");
                    break;
                }
            }
        }

        info!("Scheduler engine stopped");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop(&self) -> EngineResult<()> {
        info!("Stopping scheduler engine");
        let _ = self.shutdown_tx.send(());
        Ok(())
    }

    async fn process_due_tasks(&self) -> EngineResult<usize> {
        self.process_due_tasks_at(Utc::now()).await
    }
}
