// In-memory task store and execution ledger
// Rows live in sharded maps; no lock spans unrelated tasks. Where two maps are
// touched together the lock order is always index map first, rows second.

use super::{ExecutionLedger, SortOrder, TaskFilter, TaskPage, TaskSortField, TaskStore};
use crate::errors::{EngineError, EngineResult};
use crate::models::{
    Execution, ExecutionPatch, ExecutionStats, ExecutionStatus, Progress, Task, TriggerSource,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::cmp::Ordering;
use tracing::instrument;
use uuid::Uuid;

/// Task store backed by concurrent maps
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: DashMap<Uuid, Task>,
    names: DashMap<String, Uuid>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn replace_definition(
        &self,
        task: &Task,
        expected_updated_at: DateTime<Utc>,
        reschedule: bool,
    ) -> EngineResult<Task> {
        let mut stored = self
            .tasks
            .get_mut(&task.id)
            .ok_or_else(|| EngineError::task_not_found(task.id))?;
        if stored.updated_at != expected_updated_at {
            return Err(EngineError::task_modified(task.id));
        }

        stored.name = task.name.clone();
        stored.description = task.description.clone();
        stored.schedule = task.schedule.clone();
        stored.retry_policy = task.retry_policy.clone();
        stored.config = task.config.clone();
        stored.workflow = task.workflow.clone();
        stored.updated_at = task.updated_at;
        if reschedule {
            stored.next_fire_time = task.next_fire_time;
        }
        Ok(stored.clone())
    }

    fn modify<F>(&self, id: Uuid, f: F) -> EngineResult<Task>
    where
        F: FnOnce(&mut Task),
    {
        let mut task = self
            .tasks
            .get_mut(&id)
            .ok_or_else(|| EngineError::task_not_found(id))?;
        f(&mut task);
        Ok(task.clone())
    }
}

fn compare_tasks(a: &Task, b: &Task, sort_by: TaskSortField) -> Ordering {
    let primary = match sort_by {
        TaskSortField::Name => a.name.cmp(&b.name),
        TaskSortField::CreatedAt => a.created_at.cmp(&b.created_at),
        TaskSortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        TaskSortField::NextFireTime => a.next_fire_time.cmp(&b.next_fire_time),
    };
    primary.then_with(|| a.id.cmp(&b.id))
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    #[instrument(skip(self, task), fields(task_id = %task.id, task_name = %task.name))]
    async fn create(&self, task: &Task) -> EngineResult<()> {
        match self.names.entry(task.name.clone()) {
            Entry::Occupied(_) => Err(EngineError::Conflict(format!(
                "task name '{}' already exists",
                task.name
            ))),
            Entry::Vacant(slot) => {
                self.tasks.insert(task.id, task.clone());
                slot.insert(task.id);
                tracing::debug!("Task stored");
                Ok(())
            }
        }
    }

    async fn get(&self, id: Uuid) -> EngineResult<Option<Task>> {
        Ok(self.tasks.get(&id).map(|t| t.clone()))
    }

    async fn get_by_name(&self, name: &str) -> EngineResult<Option<Task>> {
        let id = match self.names.get(name) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.tasks.get(&id).map(|t| t.clone()))
    }

    async fn list(&self, filter: &TaskFilter) -> EngineResult<TaskPage> {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| filter.task_type.map_or(true, |ty| t.task_type == ty))
            .filter(|t| filter.enabled.map_or(true, |e| t.enabled == e))
            .map(|t| t.clone())
            .collect();

        tasks.sort_by(|a, b| {
            let ord = compare_tasks(a, b, filter.sort_by);
            match filter.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });

        let total = tasks.len() as u64;
        let items = tasks
            .into_iter()
            .skip(filter.offset())
            .take(filter.limit())
            .collect();

        Ok(TaskPage {
            items,
            total,
            page: filter.page.max(1),
            page_size: filter.limit() as u32,
        })
    }

    #[instrument(skip(self, task), fields(task_id = %task.id))]
    async fn update(
        &self,
        task: &Task,
        expected_updated_at: DateTime<Utc>,
        reschedule: bool,
    ) -> EngineResult<Task> {
        let old_name = self
            .tasks
            .get(&task.id)
            .map(|t| t.name.clone())
            .ok_or_else(|| EngineError::task_not_found(task.id))?;

        // A rename made after `old_name` was read also moves updated_at,
        // so the stamp check under the row lock catches it
        if old_name == task.name {
            return self.replace_definition(task, expected_updated_at, reschedule);
        }

        let updated = match self.names.entry(task.name.clone()) {
            Entry::Occupied(_) => {
                return Err(EngineError::Conflict(format!(
                    "task name '{}' already exists",
                    task.name
                )))
            }
            Entry::Vacant(slot) => {
                let updated = self.replace_definition(task, expected_updated_at, reschedule)?;
                slot.insert(task.id);
                updated
            }
        };
        self.names.remove_if(&old_name, |_, id| *id == task.id);
        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: Uuid) -> EngineResult<()> {
        let (_, task) = self
            .tasks
            .remove(&id)
            .ok_or_else(|| EngineError::task_not_found(id))?;
        self.names.remove_if(&task.name, |_, owner| *owner == id);
        Ok(())
    }

    async fn set_enabled(
        &self,
        id: Uuid,
        enabled: bool,
        next_fire_time: Option<DateTime<Utc>>,
    ) -> EngineResult<Task> {
        self.modify(id, |task| {
            task.enabled = enabled;
            task.next_fire_time = next_fire_time;
            task.updated_at = Utc::now();
        })
    }

    async fn set_paused(
        &self,
        id: Uuid,
        paused: bool,
        next_fire_time: Option<DateTime<Utc>>,
    ) -> EngineResult<Task> {
        self.modify(id, |task| {
            task.paused = paused;
            task.next_fire_time = next_fire_time;
            task.updated_at = Utc::now();
        })
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: usize) -> EngineResult<Vec<Task>> {
        let mut due: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| t.enabled && !t.paused && t.task_type.is_schedulable())
            .filter(|t| t.next_fire_time.map_or(false, |next| next <= now))
            .map(|t| t.clone())
            .collect();
        due.sort_by_key(|t| t.next_fire_time);
        due.truncate(limit);
        Ok(due)
    }

    async fn record_fire(
        &self,
        id: Uuid,
        fired_at: DateTime<Utc>,
        next_fire_time: Option<DateTime<Utc>>,
    ) -> EngineResult<()> {
        self.modify(id, |task| {
            task.last_fire_time = Some(fired_at);
            task.next_fire_time = next_fire_time;
        })
        .map(|_| ())
    }

    async fn find_parents(&self, child_id: Uuid) -> EngineResult<Vec<Task>> {
        Ok(self
            .tasks
            .iter()
            .filter(|t| {
                t.workflow
                    .as_ref()
                    .map_or(false, |w| w.children.iter().any(|c| c.task_id == child_id))
            })
            .map(|t| t.clone())
            .collect())
    }
}

/// Execution ledger backed by concurrent maps.
/// `active` maps a task id to its single in-flight execution.
#[derive(Debug, Default)]
pub struct MemoryExecutionLedger {
    executions: DashMap<Uuid, Execution>,
    active: DashMap<Uuid, Uuid>,
}

impl MemoryExecutionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect<P>(&self, predicate: P) -> Vec<Execution>
    where
        P: Fn(&Execution) -> bool,
    {
        self.executions
            .iter()
            .filter(|e| predicate(e.value()))
            .map(|e| e.value().clone())
            .collect()
    }
}

#[async_trait]
impl ExecutionLedger for MemoryExecutionLedger {
    #[instrument(skip(self))]
    async fn create_execution(
        &self,
        task_id: Uuid,
        trigger_source: TriggerSource,
        parent_execution_id: Option<Uuid>,
    ) -> EngineResult<Execution> {
        match self.active.entry(task_id) {
            Entry::Occupied(_) => Err(EngineError::task_already_running(task_id)),
            Entry::Vacant(slot) => {
                let execution = Execution::new(task_id, trigger_source, parent_execution_id);
                self.executions.insert(execution.id, execution.clone());
                slot.insert(execution.id);
                Ok(execution)
            }
        }
    }

    async fn get_execution(&self, id: Uuid) -> EngineResult<Option<Execution>> {
        Ok(self.executions.get(&id).map(|e| e.clone()))
    }

    async fn append_progress(&self, id: Uuid, progress: &Progress) -> EngineResult<()> {
        let mut execution = self
            .executions
            .get_mut(&id)
            .ok_or_else(|| EngineError::execution_not_found(id))?;
        if !execution.is_terminal() {
            execution.progress = progress.clone();
        }
        Ok(())
    }

    #[instrument(skip(self, patch))]
    async fn transition(
        &self,
        id: Uuid,
        expected: &[ExecutionStatus],
        to: ExecutionStatus,
        patch: ExecutionPatch,
    ) -> EngineResult<Execution> {
        let task_id = self
            .executions
            .get(&id)
            .map(|e| e.task_id)
            .ok_or_else(|| EngineError::execution_not_found(id))?;

        let slot = self.active.entry(task_id);
        let mut execution = self
            .executions
            .get_mut(&id)
            .ok_or_else(|| EngineError::execution_not_found(id))?;

        let current = execution.status;
        if !expected.contains(&current) || !current.can_transition_to(to) {
            return Err(EngineError::InvalidState {
                id,
                current,
                requested: to,
            });
        }

        let entering = current.is_terminal() && !to.is_terminal();
        let leaving = !current.is_terminal() && to.is_terminal();

        if entering {
            if let Entry::Occupied(owner) = &slot {
                if *owner.get() != id {
                    return Err(EngineError::task_already_running(task_id));
                }
            }
        }

        patch.apply(&mut execution);
        execution.status = to;
        let updated = execution.clone();
        drop(execution);

        match slot {
            Entry::Vacant(vacant) if entering => {
                vacant.insert(id);
            }
            Entry::Occupied(owner) if leaving && *owner.get() == id => {
                owner.remove();
            }
            _ => {}
        }

        tracing::debug!(from = %current, to = %to, "Execution transitioned");
        Ok(updated)
    }

    async fn patch(&self, id: Uuid, patch: ExecutionPatch) -> EngineResult<Execution> {
        let mut execution = self
            .executions
            .get_mut(&id)
            .ok_or_else(|| EngineError::execution_not_found(id))?;
        patch.apply(&mut execution);
        Ok(execution.clone())
    }

    async fn list_executions(&self, task_id: Uuid, limit: usize) -> EngineResult<Vec<Execution>> {
        let mut rows = self.collect(|e| e.task_id == task_id);
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn list_children(&self, parent_execution_id: Uuid) -> EngineResult<Vec<Execution>> {
        let mut rows = self.collect(|e| e.parent_execution_id == Some(parent_execution_id));
        rows.sort_by_key(|e| e.created_at);
        Ok(rows)
    }

    async fn find_active(&self, task_id: Option<Uuid>) -> EngineResult<Vec<Execution>> {
        Ok(self.collect(|e| !e.is_terminal() && task_id.map_or(true, |t| e.task_id == t)))
    }

    async fn get_stats(&self, task_id: Option<Uuid>) -> EngineResult<ExecutionStats> {
        let rows = self.collect(|e| task_id.map_or(true, |t| e.task_id == t));
        Ok(ExecutionStats::from_executions(&rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Schedule, TaskType, WorkflowChildLink, WorkflowSpec};
    use chrono::Duration;
    use std::sync::Arc;

    fn common_task(name: &str) -> Task {
        let mut task = Task::new(name, TaskType::Common);
        task.schedule = Some(Schedule::interval(60));
        task
    }

    #[tokio::test]
    async fn test_task_name_is_unique() {
        let store = MemoryTaskStore::new();
        store.create(&common_task("report")).await.unwrap();
        let err = store.create(&common_task("report")).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_rename_frees_old_name() {
        let store = MemoryTaskStore::new();
        let mut task = common_task("old");
        store.create(&task).await.unwrap();
        task.name = "new".to_string();
        store.update(&task, task.updated_at, false).await.unwrap();

        assert!(store.get_by_name("old").await.unwrap().is_none());
        assert_eq!(store.get_by_name("new").await.unwrap().unwrap().id, task.id);
        store.create(&common_task("old")).await.unwrap();
    }

    #[tokio::test]
    async fn test_rename_onto_taken_name_conflicts() {
        let store = MemoryTaskStore::new();
        store.create(&common_task("a")).await.unwrap();
        let mut b = common_task("b");
        store.create(&b).await.unwrap();
        b.name = "a".to_string();
        assert!(store
            .update(&b, b.updated_at, false)
            .await
            .unwrap_err()
            .is_conflict());
        assert_eq!(store.get(b.id).await.unwrap().unwrap().name, "b");
    }

    #[tokio::test]
    async fn test_edit_keeps_anchor_advanced_by_fire() {
        let store = MemoryTaskStore::new();
        let mut task = common_task("tick");
        let slot = Utc::now();
        task.next_fire_time = Some(slot);
        store.create(&task).await.unwrap();

        // The scheduler fires between the edit's read and its write
        let read = store.get(task.id).await.unwrap().unwrap();
        let advanced = Some(slot + Duration::seconds(60));
        store.record_fire(task.id, slot, advanced).await.unwrap();

        let mut edit = read.clone();
        edit.description = Some("edited".to_string());
        edit.updated_at = Utc::now();
        let stored = store.update(&edit, read.updated_at, false).await.unwrap();

        assert_eq!(stored.next_fire_time, advanced);
        assert_eq!(stored.last_fire_time, Some(slot));
        assert_eq!(stored.description.as_deref(), Some("edited"));
        assert_eq!(store.get(task.id).await.unwrap().unwrap(), stored);
    }

    #[tokio::test]
    async fn test_edit_from_stale_read_conflicts() {
        let store = MemoryTaskStore::new();
        let mut task = common_task("toggle");
        task.next_fire_time = Some(Utc::now());
        store.create(&task).await.unwrap();

        let read = store.get(task.id).await.unwrap().unwrap();
        store.set_enabled(task.id, false, None).await.unwrap();

        let mut edit = read.clone();
        edit.name = "renamed".to_string();
        edit.updated_at = Utc::now();
        let err = store.update(&edit, read.updated_at, false).await.unwrap_err();
        assert!(err.is_conflict());

        let stored = store.get(task.id).await.unwrap().unwrap();
        assert!(!stored.enabled);
        assert_eq!(stored.name, "toggle");
        assert!(store.get_by_name("renamed").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_filters_sorts_and_pages() {
        let store = MemoryTaskStore::new();
        for name in ["charlie", "alpha", "bravo"] {
            store.create(&common_task(name)).await.unwrap();
        }
        let mut manual = Task::new("delta", TaskType::Manual);
        manual.enabled = false;
        store.create(&manual).await.unwrap();

        let page = store
            .list(&TaskFilter {
                task_type: Some(TaskType::Common),
                sort_by: TaskSortField::Name,
                order: SortOrder::Asc,
                page: 1,
                page_size: 2,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        let names: Vec<_> = page.items.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "bravo"]);

        let disabled = store
            .list(&TaskFilter {
                enabled: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(disabled.total, 1);
        assert_eq!(disabled.items[0].name, "delta");
    }

    #[tokio::test]
    async fn test_list_due_skips_disabled_and_paused() {
        let store = MemoryTaskStore::new();
        let now = Utc::now();
        let mut due = common_task("due");
        due.next_fire_time = Some(now - Duration::seconds(1));
        let mut later = common_task("later");
        later.next_fire_time = Some(now + Duration::seconds(60));
        let mut paused = common_task("paused");
        paused.paused = true;
        paused.next_fire_time = Some(now - Duration::seconds(1));
        let mut disabled = common_task("disabled");
        disabled.enabled = false;
        disabled.next_fire_time = Some(now - Duration::seconds(1));

        for task in [&due, &later, &paused, &disabled] {
            store.create(task).await.unwrap();
        }

        let found = store.list_due(now, 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due.id);
    }

    #[tokio::test]
    async fn test_find_parents() {
        let store = MemoryTaskStore::new();
        let child = Task::new("child", TaskType::Manual);
        store.create(&child).await.unwrap();
        let mut parent = common_task("parent");
        parent.task_type = TaskType::Workflow;
        parent.workflow = Some(WorkflowSpec {
            workflow_type: Default::default(),
            on_failure: Default::default(),
            children: vec![WorkflowChildLink::new(child.id)],
        });
        store.create(&parent).await.unwrap();

        let parents = store.find_parents(child.id).await.unwrap();
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].id, parent.id);
        assert!(store.find_parents(parent.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_single_in_flight_per_task() {
        let ledger = MemoryExecutionLedger::new();
        let task_id = Uuid::new_v4();
        let first = ledger
            .create_execution(task_id, TriggerSource::Manual, None)
            .await
            .unwrap();
        let err = ledger
            .create_execution(task_id, TriggerSource::Scheduled, None)
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        // Another task is unaffected
        ledger
            .create_execution(Uuid::new_v4(), TriggerSource::Manual, None)
            .await
            .unwrap();

        ledger
            .transition(
                first.id,
                &[ExecutionStatus::Pending],
                ExecutionStatus::Terminated,
                ExecutionPatch::default(),
            )
            .await
            .unwrap();
        ledger
            .create_execution(task_id, TriggerSource::Manual, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_creates_admit_exactly_one() {
        let ledger = Arc::new(MemoryExecutionLedger::new());
        let task_id = Uuid::new_v4();
        let mut handles = Vec::new();
        for _ in 0..32 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .create_execution(task_id, TriggerSource::Manual, None)
                    .await
            }));
        }
        let mut ok = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) => assert!(e.is_conflict()),
            }
        }
        assert_eq!(ok, 1);
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let ledger = MemoryExecutionLedger::new();
        let execution = ledger
            .create_execution(Uuid::new_v4(), TriggerSource::Manual, None)
            .await
            .unwrap();

        let err = ledger
            .transition(
                execution.id,
                &[ExecutionStatus::Running],
                ExecutionStatus::Success,
                ExecutionPatch::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidState {
                current: ExecutionStatus::Pending,
                ..
            }
        ));

        let running = ledger
            .transition(
                execution.id,
                &[ExecutionStatus::Pending],
                ExecutionStatus::Running,
                ExecutionPatch {
                    start_time: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(running.status, ExecutionStatus::Running);
        assert!(running.start_time.is_some());
    }

    #[tokio::test]
    async fn test_restart_from_failed_respects_single_in_flight() {
        let ledger = MemoryExecutionLedger::new();
        let task_id = Uuid::new_v4();
        let failed = ledger
            .create_execution(task_id, TriggerSource::Manual, None)
            .await
            .unwrap();
        ledger
            .transition(
                failed.id,
                &[ExecutionStatus::Pending],
                ExecutionStatus::Failed,
                ExecutionPatch::default(),
            )
            .await
            .unwrap();
        let other = ledger
            .create_execution(task_id, TriggerSource::Scheduled, None)
            .await
            .unwrap();

        let err = ledger
            .transition(
                failed.id,
                &[ExecutionStatus::Failed],
                ExecutionStatus::Pending,
                ExecutionPatch::default(),
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        ledger
            .transition(
                other.id,
                &[ExecutionStatus::Pending],
                ExecutionStatus::Terminated,
                ExecutionPatch::default(),
            )
            .await
            .unwrap();
        let reopened = ledger
            .transition(
                failed.id,
                &[ExecutionStatus::Failed],
                ExecutionStatus::Pending,
                ExecutionPatch {
                    reopen: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(reopened.status, ExecutionStatus::Pending);
        assert_eq!(ledger.find_active(Some(task_id)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_progress_ignored_after_terminal() {
        let ledger = MemoryExecutionLedger::new();
        let execution = ledger
            .create_execution(Uuid::new_v4(), TriggerSource::Manual, None)
            .await
            .unwrap();
        let progress = Progress {
            processed_items: 5,
            ..Default::default()
        };
        ledger.append_progress(execution.id, &progress).await.unwrap();
        ledger
            .transition(
                execution.id,
                &[ExecutionStatus::Pending],
                ExecutionStatus::Terminated,
                ExecutionPatch::default(),
            )
            .await
            .unwrap();
        let late = Progress {
            processed_items: 9,
            ..Default::default()
        };
        ledger.append_progress(execution.id, &late).await.unwrap();

        let stored = ledger.get_execution(execution.id).await.unwrap().unwrap();
        assert_eq!(stored.progress.processed_items, 5);
    }

    #[tokio::test]
    async fn test_list_executions_newest_first_with_limit() {
        let ledger = MemoryExecutionLedger::new();
        let task_id = Uuid::new_v4();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let e = ledger
                .create_execution(task_id, TriggerSource::Manual, None)
                .await
                .unwrap();
            ledger
                .transition(
                    e.id,
                    &[ExecutionStatus::Pending],
                    ExecutionStatus::Failed,
                    ExecutionPatch::default(),
                )
                .await
                .unwrap();
            ids.push(e.id);
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        let rows = ledger.list_executions(task_id, 2).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, ids[2]);
        assert_eq!(rows[1].id, ids[1]);
    }
}
