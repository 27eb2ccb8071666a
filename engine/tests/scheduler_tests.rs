// Scheduler loop tests against the in-memory backend

use chrono::{Duration as ChronoDuration, Utc};
use engine::coordinator::{CoordinatorConfig, ExecutionCoordinator};
use engine::db::{MemoryExecutionLedger, MemoryTaskStore};
use engine::errors::RunnerError;
use engine::models::{ExecutionStatus, Schedule, Task, TaskType, TriggerSource};
use engine::runner::{runner_fn, RunOutput, RunnerRegistry};
use engine::scheduler::{Scheduler, SchedulerConfig, SchedulerEngine};
use std::sync::Arc;
use std::time::Duration;

fn coordinator() -> ExecutionCoordinator {
    let runners = RunnerRegistry::new()
        .with_runner("ok", runner_fn(|_, _| async { Ok(RunOutput::new("done")) }))
        .with_runner(
            "block",
            runner_fn(|_, ctx| async move {
                ctx.cancelled().await;
                Err(RunnerError::Terminated)
            }),
        )
        .with_default("ok");
    let config = CoordinatorConfig {
        termination_grace: Duration::from_millis(200),
        ..CoordinatorConfig::default()
    };
    ExecutionCoordinator::new(
        config,
        Arc::new(MemoryTaskStore::new()),
        Arc::new(MemoryExecutionLedger::new()),
        runners,
    )
}

fn scheduler(coordinator: &ExecutionCoordinator) -> SchedulerEngine {
    SchedulerEngine::new(
        SchedulerConfig {
            poll_interval: Duration::from_millis(20),
            max_tasks_per_poll: 10,
        },
        coordinator.clone(),
    )
}

async fn due_interval_task(
    coordinator: &ExecutionCoordinator,
    name: &str,
    runner: &str,
    overdue_seconds: i64,
) -> Task {
    let mut task = Task::new(name, TaskType::Common);
    task.schedule = Some(Schedule::interval(60));
    task.config.runner = Some(runner.to_string());
    task.next_fire_time = Some(Utc::now() - ChronoDuration::seconds(overdue_seconds));
    coordinator.tasks().create(&task).await.unwrap();
    task
}

#[tokio::test]
async fn test_due_task_fires_and_anchor_advances() {
    let coordinator = coordinator();
    let scheduler = scheduler(&coordinator);
    let task = due_interval_task(&coordinator, "tick", "ok", 1).await;
    let anchor = task.next_fire_time.unwrap();

    let now = Utc::now();
    assert_eq!(scheduler.process_due_tasks_at(now).await.unwrap(), 1);

    let stored = coordinator.tasks().get(task.id).await.unwrap().unwrap();
    assert_eq!(stored.last_fire_time, Some(now));
    assert_eq!(stored.next_fire_time, Some(anchor + ChronoDuration::seconds(60)));

    let executions = coordinator.ledger().list_executions(task.id, 10).await.unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].trigger_source, TriggerSource::Scheduled);
    let finished = coordinator.wait_for(executions[0].id).await.unwrap();
    assert_eq!(finished.status, ExecutionStatus::Success);

    // Nothing is due until the next slot
    assert_eq!(scheduler.process_due_tasks_at(now).await.unwrap(), 0);
}

#[tokio::test]
async fn test_missed_slots_collapse_into_one_fire() {
    let coordinator = coordinator();
    let scheduler = scheduler(&coordinator);
    // Ten slots overdue
    let task = due_interval_task(&coordinator, "late", "ok", 600).await;

    let now = Utc::now();
    assert_eq!(scheduler.process_due_tasks_at(now).await.unwrap(), 1);

    let stored = coordinator.tasks().get(task.id).await.unwrap().unwrap();
    let next = stored.next_fire_time.unwrap();
    assert!(next > now);
    assert!(next <= now + ChronoDuration::seconds(60));
    assert_eq!(
        coordinator.ledger().list_executions(task.id, 10).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_fire_skipped_while_previous_execution_in_flight() {
    let coordinator = coordinator();
    let scheduler = scheduler(&coordinator);
    let task = due_interval_task(&coordinator, "slow", "block", 1).await;

    let first = Utc::now();
    assert_eq!(scheduler.process_due_tasks_at(first).await.unwrap(), 1);

    // The next slot comes due while the first execution still runs
    let later = first + ChronoDuration::seconds(61);
    assert_eq!(scheduler.process_due_tasks_at(later).await.unwrap(), 0);

    let stored = coordinator.tasks().get(task.id).await.unwrap().unwrap();
    assert!(stored.next_fire_time.unwrap() > later);

    let executions = coordinator.ledger().list_executions(task.id, 10).await.unwrap();
    assert_eq!(executions.len(), 1);
    coordinator.terminate(executions[0].id).await.unwrap();
    coordinator.wait_for(executions[0].id).await.unwrap();
}

#[tokio::test]
async fn test_disabled_and_paused_tasks_do_not_fire() {
    let coordinator = coordinator();
    let scheduler = scheduler(&coordinator);
    let disabled = due_interval_task(&coordinator, "disabled", "ok", 1).await;
    let paused = due_interval_task(&coordinator, "paused", "ok", 1).await;

    let anchor = disabled.next_fire_time;
    coordinator
        .tasks()
        .set_enabled(disabled.id, false, anchor)
        .await
        .unwrap();
    coordinator
        .tasks()
        .set_paused(paused.id, true, paused.next_fire_time)
        .await
        .unwrap();

    assert_eq!(scheduler.process_due_tasks_at(Utc::now()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_polling_loop_starts_and_stops() {
    let coordinator = coordinator();
    let scheduler = Arc::new(scheduler(&coordinator));
    let task = due_interval_task(&coordinator, "looped", "ok", 1).await;

    let running = scheduler.clone();
    let handle = tokio::spawn(async move { running.start().await });

    let mut fired = false;
    for _ in 0..100 {
        if !coordinator
            .ledger()
            .list_executions(task.id, 1)
            .await
            .unwrap()
            .is_empty()
        {
            fired = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(fired, "scheduler never fired the due task");

    scheduler.stop().await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap()
        .unwrap();
}
