// Execution coordinator
// Owns the execution state machine: trigger, attempts and retries,
// pause/resume/terminate, progress flushing and restart recovery.

pub mod body;
pub mod progress;

pub use body::{ExecutionBody, RunnerBody};
pub use progress::ProgressSink;

use crate::config::{CoordinatorSettings, WorkflowSettings};
use crate::db::{ExecutionLedger, TaskStore};
use crate::errors::{EngineError, EngineResult, RunnerError};
use crate::models::{
    AttemptEnd, AttemptOutcome, Execution, ExecutionPatch, ExecutionStatus, Task, TriggerSource,
};
use crate::retry::RetryStrategy;
use crate::runner::{RunContext, RunOutput, RunnerRegistry};
use crate::telemetry;
use crate::workflow::WorkflowBody;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn, Instrument};
use uuid::Uuid;

/// Error recorded on executions found in flight at startup
pub const INTERRUPTED_MESSAGE: &str = "interrupted by engine restart";

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub max_concurrent_executions: usize,
    pub progress_flush_interval: Duration,
    pub termination_grace: Duration,
    pub max_parallel_children: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from_settings(&CoordinatorSettings::default(), &WorkflowSettings::default())
    }
}

impl CoordinatorConfig {
    pub fn from_settings(coordinator: &CoordinatorSettings, workflow: &WorkflowSettings) -> Self {
        Self {
            max_concurrent_executions: coordinator.max_concurrent_executions.max(1),
            progress_flush_interval: Duration::from_millis(
                coordinator.progress_flush_interval_ms.max(1),
            ),
            termination_grace: Duration::from_secs(coordinator.termination_grace_seconds),
            max_parallel_children: workflow.max_parallel_children.max(1),
        }
    }
}

type DoneReceiver = watch::Receiver<Option<ExecutionStatus>>;

/// Control handles of an execution driven by this process
struct LiveExecution {
    run_id: u64,
    cancel: CancellationToken,
    pause: Arc<watch::Sender<bool>>,
    done: DoneReceiver,
}

struct Inner {
    config: CoordinatorConfig,
    tasks: Arc<dyn TaskStore>,
    ledger: Arc<dyn ExecutionLedger>,
    runners: RunnerRegistry,
    permits: Arc<Semaphore>,
    live: DashMap<Uuid, LiveExecution>,
    next_run_id: AtomicU64,
}

/// ExecutionCoordinator drives executions to a terminal state.
/// Cloning is cheap; all clones share the same worker pool and live set.
#[derive(Clone)]
pub struct ExecutionCoordinator {
    inner: Arc<Inner>,
}

/// Returned when an execution is started
pub struct ExecutionHandle {
    pub execution: Execution,
    done: DoneReceiver,
    ledger: Arc<dyn ExecutionLedger>,
}

impl ExecutionHandle {
    pub fn id(&self) -> Uuid {
        self.execution.id
    }

    /// Wait for the execution to settle and return its final row
    pub async fn wait(self) -> EngineResult<Execution> {
        let mut done = self.done;
        wait_done(&mut done).await;
        self.ledger
            .get_execution(self.execution.id)
            .await?
            .ok_or_else(|| EngineError::execution_not_found(self.execution.id))
    }
}

async fn wait_done(done: &mut DoneReceiver) {
    loop {
        let finished = done.borrow_and_update().is_some();
        if finished || done.changed().await.is_err() {
            return;
        }
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// One driven run of an execution row
struct Run {
    run_id: u64,
    execution_id: Uuid,
    task: Arc<Task>,
    body: Arc<dyn ExecutionBody>,
    cancel: CancellationToken,
    pause: Arc<watch::Sender<bool>>,
    done: watch::Sender<Option<ExecutionStatus>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Terminate,
    Timeout,
}

#[derive(Debug)]
enum AttemptResult {
    Success(RunOutput),
    Failed(String),
    TimedOut(u64),
    Terminated,
}

impl ExecutionCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        tasks: Arc<dyn TaskStore>,
        ledger: Arc<dyn ExecutionLedger>,
        runners: RunnerRegistry,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_executions.max(1)));
        Self {
            inner: Arc::new(Inner {
                config,
                tasks,
                ledger,
                runners,
                permits,
                live: DashMap::new(),
                next_run_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub fn tasks(&self) -> &Arc<dyn TaskStore> {
        &self.inner.tasks
    }

    pub fn ledger(&self) -> &Arc<dyn ExecutionLedger> {
        &self.inner.ledger
    }

    pub fn runners(&self) -> &RunnerRegistry {
        &self.inner.runners
    }

    /// Number of executions currently driven by this process
    pub fn active_count(&self) -> usize {
        self.inner.live.len()
    }

    /// Start a new execution of a stored task
    #[instrument(skip(self))]
    pub async fn trigger(
        &self,
        task_id: Uuid,
        trigger_source: TriggerSource,
    ) -> EngineResult<ExecutionHandle> {
        let task = self.load_task(task_id).await?;
        self.start(task, trigger_source, None).await
    }

    /// Create the pending row and spawn its driver.
    /// Fails with a conflict when the task already has an execution in flight.
    #[instrument(skip(self, task), fields(task_id = %task.id, task_name = %task.name))]
    pub async fn start(
        &self,
        task: Task,
        trigger_source: TriggerSource,
        parent_execution_id: Option<Uuid>,
    ) -> EngineResult<ExecutionHandle> {
        let body = self.body_for(&task)?;
        let execution = self
            .inner
            .ledger
            .create_execution(task.id, trigger_source, parent_execution_id)
            .await?;

        info!(
            execution_id = %execution.id,
            trigger_source = %trigger_source,
            "Execution started"
        );

        let done = self.spawn_run(execution.id, Arc::new(task), body);
        Ok(ExecutionHandle {
            execution,
            done,
            ledger: self.inner.ledger.clone(),
        })
    }

    /// Wait until the execution is no longer driven here and return its row
    pub async fn wait_for(&self, execution_id: Uuid) -> EngineResult<Execution> {
        let done = self.inner.live.get(&execution_id).map(|l| l.done.clone());
        if let Some(mut done) = done {
            wait_done(&mut done).await;
        }
        self.load_execution(execution_id).await
    }

    /// Pause a running execution. Pausing a paused execution is a no-op.
    #[instrument(skip(self))]
    pub async fn pause(&self, execution_id: Uuid) -> EngineResult<Execution> {
        let execution = self.load_execution(execution_id).await?;
        match execution.status {
            ExecutionStatus::Paused => return Ok(execution),
            ExecutionStatus::Running => {}
            current => {
                return Err(EngineError::InvalidState {
                    id: execution_id,
                    current,
                    requested: ExecutionStatus::Paused,
                })
            }
        }

        let paused = self
            .inner
            .ledger
            .transition(
                execution_id,
                &[ExecutionStatus::Running],
                ExecutionStatus::Paused,
                ExecutionPatch {
                    is_paused: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        if let Some(live) = self.inner.live.get(&execution_id) {
            live.pause.send_replace(true);
        }
        info!("Execution paused");
        Ok(paused)
    }

    /// Resume a paused execution or restart a failed one.
    /// Any other state is returned unchanged.
    #[instrument(skip(self))]
    pub async fn resume(&self, execution_id: Uuid) -> EngineResult<Execution> {
        let execution = self.load_execution(execution_id).await?;
        match execution.status {
            ExecutionStatus::Paused => {
                let resumed = self
                    .inner
                    .ledger
                    .transition(
                        execution_id,
                        &[ExecutionStatus::Paused],
                        ExecutionStatus::Running,
                        ExecutionPatch {
                            is_paused: Some(false),
                            ..Default::default()
                        },
                    )
                    .await;

                match resumed {
                    Ok(resumed) => {
                        if let Some(live) = self.inner.live.get(&execution_id) {
                            live.pause.send_replace(false);
                        }
                        info!("Execution resumed");
                        Ok(resumed)
                    }
                    // Finished in the meantime
                    Err(EngineError::InvalidState { .. }) => self.load_execution(execution_id).await,
                    Err(e) => Err(e),
                }
            }
            ExecutionStatus::Failed => self.restart_failed(execution).await,
            _ => Ok(execution),
        }
    }

    /// Request termination. Returns as soon as the request is recorded; the
    /// execution reaches `terminated` once the runner exits or the grace
    /// period runs out.
    #[instrument(skip(self))]
    pub async fn terminate(&self, execution_id: Uuid) -> EngineResult<Execution> {
        let execution = self.load_execution(execution_id).await?;
        match execution.status {
            ExecutionStatus::Terminated => return Ok(execution),
            current @ (ExecutionStatus::Success | ExecutionStatus::Failed) => {
                return Err(EngineError::InvalidState {
                    id: execution_id,
                    current,
                    requested: ExecutionStatus::Terminated,
                })
            }
            _ => {}
        }

        let cancel = self.inner.live.get(&execution_id).map(|l| l.cancel.clone());
        match cancel {
            Some(cancel) => {
                let flagged = self
                    .inner
                    .ledger
                    .patch(
                        execution_id,
                        ExecutionPatch {
                            terminate_requested: Some(true),
                            ..Default::default()
                        },
                    )
                    .await?;
                cancel.cancel();
                info!("Termination requested");
                Ok(flagged)
            }
            None => {
                // Nothing drives this row in this process
                let terminated = self
                    .inner
                    .ledger
                    .transition(
                        execution_id,
                        &ExecutionStatus::IN_FLIGHT,
                        ExecutionStatus::Terminated,
                        terminal_patch(AttemptOutcome::Terminated, None),
                    )
                    .await?;
                info!("Execution terminated");
                Ok(terminated)
            }
        }
    }

    /// Mark executions left in flight by a previous process as failed
    #[instrument(skip(self))]
    pub async fn recover_orphans(&self) -> EngineResult<usize> {
        let active = self.inner.ledger.find_active(None).await?;
        let mut recovered = 0;

        for execution in active {
            if self.inner.live.contains_key(&execution.id) {
                continue;
            }
            let result = self
                .inner
                .ledger
                .transition(
                    execution.id,
                    &ExecutionStatus::IN_FLIGHT,
                    ExecutionStatus::Failed,
                    ExecutionPatch {
                        error_message: Some(INTERRUPTED_MESSAGE.to_string()),
                        ..terminal_patch(
                            AttemptOutcome::Interrupted,
                            Some(INTERRUPTED_MESSAGE.to_string()),
                        )
                    },
                )
                .await;

            match result {
                Ok(_) => {
                    warn!(execution_id = %execution.id, task_id = %execution.task_id, "Recovered orphaned execution");
                    recovered += 1;
                }
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e),
            }
        }

        if recovered > 0 {
            info!(recovered, "Orphaned executions marked as failed");
        }
        Ok(recovered)
    }

    async fn load_task(&self, task_id: Uuid) -> EngineResult<Task> {
        self.inner
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| EngineError::task_not_found(task_id))
    }

    async fn load_execution(&self, execution_id: Uuid) -> EngineResult<Execution> {
        self.inner
            .ledger
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| EngineError::execution_not_found(execution_id))
    }

    fn body_for(&self, task: &Task) -> EngineResult<Arc<dyn ExecutionBody>> {
        if task.is_workflow() {
            return Ok(Arc::new(WorkflowBody::new(self.clone())));
        }
        let runner = self.inner.runners.resolve(&task.config)?;
        Ok(Arc::new(RunnerBody::new(runner)))
    }

    /// Restart a failed execution on the same row. The retry budget is not
    /// replenished: a failure of the restarted attempt is final.
    async fn restart_failed(&self, execution: Execution) -> EngineResult<Execution> {
        let task = self.load_task(execution.task_id).await?;
        let body = self.body_for(&task)?;

        let reopened = self
            .inner
            .ledger
            .transition(
                execution.id,
                &[ExecutionStatus::Failed],
                ExecutionStatus::Pending,
                ExecutionPatch {
                    reopen: true,
                    ..Default::default()
                },
            )
            .await?;

        info!(execution_id = %execution.id, "Failed execution restarted");
        self.spawn_run(reopened.id, Arc::new(task), body);
        Ok(reopened)
    }

    fn spawn_run(
        &self,
        execution_id: Uuid,
        task: Arc<Task>,
        body: Arc<dyn ExecutionBody>,
    ) -> DoneReceiver {
        let run_id = self.inner.next_run_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let (pause, _) = watch::channel(false);
        let pause = Arc::new(pause);
        let (done_tx, done_rx) = watch::channel(None);

        self.inner.live.insert(
            execution_id,
            LiveExecution {
                run_id,
                cancel: cancel.clone(),
                pause: pause.clone(),
                done: done_rx.clone(),
            },
        );
        telemetry::update_running_executions(self.inner.live.len());

        let run = Run {
            run_id,
            execution_id,
            task,
            body,
            cancel,
            pause,
            done: done_tx,
        };
        tokio::spawn(self.clone().drive(run));
        done_rx
    }

    #[instrument(skip_all, fields(execution_id = %run.execution_id, task_id = %run.task.id))]
    async fn drive(self, run: Run) {
        let status = match self.drive_attempts(&run).await {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::error!(error = %e, "Execution driver failed");
                self.settle_after_error(&run, &e).await
            }
        };

        self.inner
            .live
            .remove_if(&run.execution_id, |_, live| live.run_id == run.run_id);
        telemetry::update_running_executions(self.inner.live.len());
        run.done.send_replace(status);
    }

    async fn drive_attempts(&self, run: &Run) -> EngineResult<ExecutionStatus> {
        let id = run.execution_id;
        let task = &run.task;

        loop {
            let permit = if run.body.needs_worker_slot() {
                tokio::select! {
                    permit = self.inner.permits.clone().acquire_owned() => permit.ok(),
                    _ = run.cancel.cancelled() => return self.finish_terminated(run).await,
                }
            } else {
                None
            };

            let started = Utc::now();
            let execution = match self
                .inner
                .ledger
                .transition(
                    id,
                    &[ExecutionStatus::Pending],
                    ExecutionStatus::Running,
                    ExecutionPatch {
                        start_time: Some(started),
                        begin_attempt: Some(started),
                        next_attempt_at: Some(None),
                        ..Default::default()
                    },
                )
                .await
            {
                Ok(execution) => execution,
                Err(EngineError::InvalidState { current, .. }) => {
                    warn!(status = %current, "Execution left pending before it could start");
                    return Ok(current);
                }
                Err(e) => return Err(e),
            };

            let attempt = execution.attempt_count();
            info!(attempt, "Attempt started");

            let result = self.run_attempt(run, attempt, permit).await;
            let ended = Utc::now();

            let (message, outcome) = match result {
                AttemptResult::Success(output) => {
                    let finished = self
                        .inner
                        .ledger
                        .transition(
                            id,
                            &[ExecutionStatus::Running, ExecutionStatus::Paused],
                            ExecutionStatus::Success,
                            ExecutionPatch {
                                result: Some(output.into()),
                                ..terminal_patch(AttemptOutcome::Success, None)
                            },
                        )
                        .await?;
                    info!(attempt, "Execution succeeded");
                    telemetry::record_execution_success(&task.id, &task.name);
                    record_duration(task, &finished);
                    return Ok(ExecutionStatus::Success);
                }
                AttemptResult::Terminated => return self.finish_terminated(run).await,
                _ if run.cancel.is_cancelled() => return self.finish_terminated(run).await,
                AttemptResult::Failed(message) => (message, AttemptOutcome::Failed),
                AttemptResult::TimedOut(seconds) => (
                    RunnerError::Timeout(seconds).to_string(),
                    AttemptOutcome::TimedOut,
                ),
            };

            let attempt_end = AttemptEnd {
                outcome,
                error: Some(message.clone()),
                at: ended,
            };

            let Some(delay) = task.retry_policy.next_delay(execution.retry_count) else {
                let finished = self
                    .inner
                    .ledger
                    .transition(
                        id,
                        &[ExecutionStatus::Running, ExecutionStatus::Paused],
                        ExecutionStatus::Failed,
                        ExecutionPatch {
                            error_message: Some(message.clone()),
                            ..terminal_patch(outcome, Some(message.clone()))
                        },
                    )
                    .await?;
                warn!(attempt, error = %message, "Execution failed");
                telemetry::record_execution_failure(&task.id, &task.name, failure_reason(outcome));
                record_duration(task, &finished);
                return Ok(ExecutionStatus::Failed);
            };

            let next_attempt_at = ended
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            self.inner
                .ledger
                .transition(
                    id,
                    &[ExecutionStatus::Running, ExecutionStatus::Paused],
                    ExecutionStatus::Pending,
                    ExecutionPatch {
                        retry_count: Some(execution.retry_count + 1),
                        next_attempt_at: Some(Some(next_attempt_at)),
                        error_message: Some(message.clone()),
                        is_paused: Some(false),
                        end_attempt: Some(attempt_end),
                        ..Default::default()
                    },
                )
                .await?;
            run.pause.send_replace(false);

            warn!(
                attempt,
                retry_count = execution.retry_count + 1,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "Attempt failed; retry scheduled"
            );
            telemetry::record_execution_retry(&task.id, &task.name);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = run.cancel.cancelled() => return self.finish_terminated(run).await,
            }
        }
    }

    /// Run one attempt under the timeout, pause and cancellation rules
    async fn run_attempt(
        &self,
        run: &Run,
        attempt: u32,
        permit: Option<OwnedSemaphorePermit>,
    ) -> AttemptResult {
        let id = run.execution_id;
        let grace = self.inner.config.termination_grace;
        let timeout_seconds = run.task.config.timeout_seconds;

        let sink = ProgressSink::new(Utc::now());
        let attempt_cancel = run.cancel.child_token();
        let ctx = RunContext::new(
            id,
            run.task.id,
            attempt,
            sink.clone(),
            attempt_cancel.clone(),
            run.pause.subscribe(),
        );

        let body = run.body.clone();
        let task = run.task.clone();
        let mut handle = tokio::spawn(
            async move {
                let _permit = permit;
                body.execute(task, ctx).await
            }
            .in_current_span(),
        );

        let mut pause = run.pause.subscribe();
        let mut paused_since = pause.borrow_and_update().then(Instant::now);
        let mut deadline = timeout_seconds.map(|s| Instant::now() + Duration::from_secs(s));
        let mut stop: Option<StopReason> = None;
        let mut grace_deadline: Option<Instant> = None;

        let mut flush = tokio::time::interval(self.inner.config.progress_flush_interval);
        flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        flush.tick().await;

        let joined = loop {
            // The timeout clock does not run while paused
            let timeout_at = match (stop, paused_since) {
                (None, None) => deadline,
                _ => None,
            };

            tokio::select! {
                joined = &mut handle => break Some(joined),
                _ = run.cancel.cancelled(), if stop.is_none() => {
                    info!("Cancelling runner");
                    stop = Some(StopReason::Terminate);
                    grace_deadline = Some(Instant::now() + grace);
                }
                _ = sleep_until_opt(timeout_at) => {
                    warn!(timeout_seconds, "Attempt timed out");
                    stop = Some(StopReason::Timeout);
                    attempt_cancel.cancel();
                    grace_deadline = Some(Instant::now() + grace);
                }
                _ = sleep_until_opt(grace_deadline) => {
                    warn!(grace_ms = grace.as_millis() as u64, "Runner ignored cancellation; aborting");
                    handle.abort();
                    break None;
                }
                changed = pause.changed() => {
                    if changed.is_ok() {
                        let paused = *pause.borrow_and_update();
                        match (paused, paused_since) {
                            (true, None) => paused_since = Some(Instant::now()),
                            (false, Some(since)) => {
                                if let Some(deadline) = deadline.as_mut() {
                                    *deadline += since.elapsed();
                                }
                                paused_since = None;
                            }
                            _ => {}
                        }
                    }
                }
                _ = flush.tick() => self.flush_progress(id, &sink).await,
            }
        };
        self.flush_progress(id, &sink).await;

        match (stop, joined) {
            (Some(StopReason::Terminate), _) => AttemptResult::Terminated,
            (Some(StopReason::Timeout), _) => AttemptResult::TimedOut(timeout_seconds.unwrap_or(0)),
            (None, Some(joined)) => attempt_result(joined),
            (None, None) => AttemptResult::Failed("runner aborted".to_string()),
        }
    }

    async fn flush_progress(&self, execution_id: Uuid, sink: &ProgressSink) {
        if let Some(progress) = sink.take_dirty() {
            if let Err(e) = self.inner.ledger.append_progress(execution_id, &progress).await {
                warn!(error = %e, "Failed to persist progress");
            }
        }
    }

    async fn finish_terminated(&self, run: &Run) -> EngineResult<ExecutionStatus> {
        let finished = self
            .inner
            .ledger
            .transition(
                run.execution_id,
                &ExecutionStatus::IN_FLIGHT,
                ExecutionStatus::Terminated,
                terminal_patch(AttemptOutcome::Terminated, None),
            )
            .await?;
        info!("Execution terminated");
        telemetry::record_execution_terminated(&run.task.id, &run.task.name);
        record_duration(&run.task, &finished);
        Ok(ExecutionStatus::Terminated)
    }

    /// Best effort to leave the row terminal after a storage error
    async fn settle_after_error(&self, run: &Run, error: &EngineError) -> Option<ExecutionStatus> {
        let to = if run.cancel.is_cancelled() {
            ExecutionStatus::Terminated
        } else {
            ExecutionStatus::Failed
        };
        let message = error.to_string();
        let patch = ExecutionPatch {
            error_message: Some(message.clone()),
            ..terminal_patch(AttemptOutcome::Failed, Some(message))
        };

        match self
            .inner
            .ledger
            .transition(run.execution_id, &ExecutionStatus::IN_FLIGHT, to, patch)
            .await
        {
            Ok(execution) => Some(execution.status),
            Err(e) => {
                tracing::error!(error = %e, "Could not settle execution");
                self.inner
                    .ledger
                    .get_execution(run.execution_id)
                    .await
                    .ok()
                    .flatten()
                    .map(|e| e.status)
            }
        }
    }
}

fn terminal_patch(outcome: AttemptOutcome, error: Option<String>) -> ExecutionPatch {
    let now = Utc::now();
    ExecutionPatch {
        end_time: Some(now),
        is_paused: Some(false),
        terminate_requested: (outcome == AttemptOutcome::Terminated).then_some(true),
        end_attempt: Some(AttemptEnd {
            outcome,
            error,
            at: now,
        }),
        ..Default::default()
    }
}

fn attempt_result(joined: Result<Result<RunOutput, RunnerError>, JoinError>) -> AttemptResult {
    match joined {
        Ok(Ok(output)) => AttemptResult::Success(output),
        Ok(Err(e)) if !e.is_retryable() => AttemptResult::Terminated,
        Ok(Err(RunnerError::Timeout(seconds))) => AttemptResult::TimedOut(seconds),
        Ok(Err(e)) => AttemptResult::Failed(e.to_string()),
        Err(e) if e.is_panic() => AttemptResult::Failed("runner panicked".to_string()),
        Err(e) => AttemptResult::Failed(e.to_string()),
    }
}

fn failure_reason(outcome: AttemptOutcome) -> &'static str {
    match outcome {
        AttemptOutcome::TimedOut => "timeout",
        _ => "error",
    }
}

fn record_duration(task: &Task, execution: &Execution) {
    if let Some(duration) = execution.duration_seconds {
        telemetry::record_execution_duration(&task.id, &task.name, duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_settings_clamps_zero_values() {
        let coordinator = CoordinatorSettings {
            max_concurrent_executions: 0,
            progress_flush_interval_ms: 0,
            termination_grace_seconds: 3,
        };
        let workflow = WorkflowSettings {
            max_parallel_children: 0,
        };
        let config = CoordinatorConfig::from_settings(&coordinator, &workflow);
        assert_eq!(config.max_concurrent_executions, 1);
        assert_eq!(config.max_parallel_children, 1);
        assert_eq!(config.termination_grace, Duration::from_secs(3));
        assert!(config.progress_flush_interval > Duration::ZERO);
    }

    #[test]
    fn test_terminal_patch_closes_attempt() {
        let patch = terminal_patch(AttemptOutcome::Terminated, None);
        assert!(patch.end_time.is_some());
        assert_eq!(patch.terminate_requested, Some(true));
        assert_eq!(
            patch.end_attempt.map(|end| end.outcome),
            Some(AttemptOutcome::Terminated)
        );

        let failed = terminal_patch(AttemptOutcome::Failed, Some("boom".into()));
        assert_eq!(failed.terminate_requested, None);
    }

    #[test]
    fn test_attempt_result_mapping() {
        assert!(matches!(
            attempt_result(Ok(Err(RunnerError::Terminated))),
            AttemptResult::Terminated
        ));
        assert!(matches!(
            attempt_result(Ok(Err(RunnerError::Timeout(5)))),
            AttemptResult::TimedOut(5)
        ));
        assert!(matches!(
            attempt_result(Ok(Err(RunnerError::failed("boom")))),
            AttemptResult::Failed(message) if message == "boom"
        ));
    }
}
