// Storage layer: task store and execution ledger traits with in-memory and
// PostgreSQL backends

pub mod memory;
pub mod pool;
pub mod repositories;

pub use memory::{MemoryExecutionLedger, MemoryTaskStore};
pub use pool::DbPool;
pub use repositories::{PgExecutionLedger, PgTaskStore};

use crate::errors::EngineResult;
use crate::models::{
    Execution, ExecutionPatch, ExecutionStats, ExecutionStatus, Progress, Task, TaskType,
    TriggerSource,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable CRUD for task definitions
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task. Fails with a conflict when the name is taken.
    async fn create(&self, task: &Task) -> EngineResult<()>;

    async fn get(&self, id: Uuid) -> EngineResult<Option<Task>>;

    async fn get_by_name(&self, name: &str) -> EngineResult<Option<Task>>;

    async fn list(&self, filter: &TaskFilter) -> EngineResult<TaskPage>;

    /// Replace the definition fields of a task (name, description, schedule,
    /// retry policy, config, workflow) and stamp `updated_at`. The flags and
    /// fire times stay as stored, except that `reschedule` also takes
    /// `next_fire_time` from `task`.
    ///
    /// Fails with a conflict when the stored `updated_at` is no longer
    /// `expected_updated_at` or when renaming onto a taken name. Returns the
    /// stored task.
    async fn update(
        &self,
        task: &Task,
        expected_updated_at: DateTime<Utc>,
        reschedule: bool,
    ) -> EngineResult<Task>;

    async fn delete(&self, id: Uuid) -> EngineResult<()>;

    async fn set_enabled(
        &self,
        id: Uuid,
        enabled: bool,
        next_fire_time: Option<DateTime<Utc>>,
    ) -> EngineResult<Task>;

    async fn set_paused(
        &self,
        id: Uuid,
        paused: bool,
        next_fire_time: Option<DateTime<Utc>>,
    ) -> EngineResult<Task>;

    /// Enabled, non-paused tasks whose next fire time is at or before `now`
    async fn list_due(&self, now: DateTime<Utc>, limit: usize) -> EngineResult<Vec<Task>>;

    /// Persist the fire that just happened together with the advanced anchor
    async fn record_fire(
        &self,
        id: Uuid,
        fired_at: DateTime<Utc>,
        next_fire_time: Option<DateTime<Utc>>,
    ) -> EngineResult<()>;

    /// Workflow tasks that reference `child_id`
    async fn find_parents(&self, child_id: Uuid) -> EngineResult<Vec<Task>>;
}

/// Durable record of executions
#[async_trait]
pub trait ExecutionLedger: Send + Sync {
    /// Create a pending execution. This conditional insert is the
    /// single-in-flight guard: a conflict is returned when the task already
    /// has a pending, running or paused execution.
    async fn create_execution(
        &self,
        task_id: Uuid,
        trigger_source: TriggerSource,
        parent_execution_id: Option<Uuid>,
    ) -> EngineResult<Execution>;

    async fn get_execution(&self, id: Uuid) -> EngineResult<Option<Execution>>;

    /// Overwrite the progress snapshot of an in-flight execution
    async fn append_progress(&self, id: Uuid, progress: &Progress) -> EngineResult<()>;

    /// Compare-and-set transition: succeeds only when the current state is one of `expected`
    async fn transition(
        &self,
        id: Uuid,
        expected: &[ExecutionStatus],
        to: ExecutionStatus,
        patch: ExecutionPatch,
    ) -> EngineResult<Execution>;

    /// Apply field changes without a state change (control flags)
    async fn patch(&self, id: Uuid, patch: ExecutionPatch) -> EngineResult<Execution>;

    /// Executions of a task, newest first
    async fn list_executions(&self, task_id: Uuid, limit: usize) -> EngineResult<Vec<Execution>>;

    /// Child executions started by a workflow execution, oldest first
    async fn list_children(&self, parent_execution_id: Uuid) -> EngineResult<Vec<Execution>>;

    /// Pending, running or paused executions, optionally for one task
    async fn find_active(&self, task_id: Option<Uuid>) -> EngineResult<Vec<Execution>>;

    async fn get_stats(&self, task_id: Option<Uuid>) -> EngineResult<ExecutionStats>;
}

/// Filter, sort and page for task listings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskFilter {
    pub task_type: Option<TaskType>,
    pub enabled: Option<bool>,
    /// 1-based page number
    pub page: u32,
    pub page_size: u32,
    pub sort_by: TaskSortField,
    pub order: SortOrder,
}

impl Default for TaskFilter {
    fn default() -> Self {
        Self {
            task_type: None,
            enabled: None,
            page: 1,
            page_size: 20,
            sort_by: TaskSortField::CreatedAt,
            order: SortOrder::Desc,
        }
    }
}

impl TaskFilter {
    pub const MAX_PAGE_SIZE: u32 = 200;

    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1) * self.limit()
    }

    pub fn limit(&self) -> usize {
        self.page_size.clamp(1, Self::MAX_PAGE_SIZE) as usize
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskSortField {
    Name,
    #[default]
    CreatedAt,
    UpdatedAt,
    NextFireTime,
}

impl TaskSortField {
    pub fn column(&self) -> &'static str {
        match self {
            TaskSortField::Name => "name",
            TaskSortField::CreatedAt => "created_at",
            TaskSortField::UpdatedAt => "updated_at",
            TaskSortField::NextFireTime => "next_fire_time",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// One page of tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPage {
    pub items: Vec<Task>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}
