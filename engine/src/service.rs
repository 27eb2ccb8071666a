// Task service: the operations exposed to the API boundary
// Validates definitions, keeps the scheduling anchor in step with task
// changes and delegates execution control to the coordinator.

use crate::coordinator::ExecutionCoordinator;
use crate::db::{ExecutionLedger, TaskFilter, TaskPage, TaskStore};
use crate::errors::{EngineError, EngineResult, ScheduleError, ValidationError};
use crate::models::{
    Execution, ExecutionStats, RetryPolicy, Schedule, Task, TaskConfig, TaskType, TriggerSource,
    WorkflowSpec,
};
use crate::schedule::{Schedulable, ScheduleTrigger};
use crate::workflow::WorkflowGraph;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub const MAX_NAME_LENGTH: usize = 255;
pub const DEFAULT_EXECUTION_LIMIT: usize = 50;
pub const MAX_EXECUTION_LIMIT: usize = 1000;

fn default_enabled() -> bool {
    true
}

/// Request to create a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub task_type: TaskType,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub interval_seconds: Option<u64>,
    /// IANA timezone for cron evaluation, UTC when absent
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default)]
    pub config: TaskConfig,
    #[serde(default)]
    pub workflow: Option<WorkflowSpec>,
}

impl CreateTaskRequest {
    pub fn new(name: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            name: name.into(),
            description: None,
            task_type,
            cron_expression: None,
            interval_seconds: None,
            timezone: None,
            enabled: true,
            retry_policy: None,
            config: TaskConfig::default(),
            workflow: None,
        }
    }

    pub fn with_cron(mut self, expression: impl Into<String>) -> Self {
        self.cron_expression = Some(expression.into());
        self
    }

    pub fn with_interval(mut self, interval_seconds: u64) -> Self {
        self.interval_seconds = Some(interval_seconds);
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = Some(retry_policy);
        self
    }

    pub fn with_config(mut self, config: TaskConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_workflow(mut self, workflow: WorkflowSpec) -> Self {
        self.workflow = Some(workflow);
        self
    }
}

/// Partial update; absent fields are left unchanged.
/// Setting either `cron_expression` or `interval_seconds` replaces the schedule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTaskRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Only accepted when equal to the stored type
    #[serde(default)]
    pub task_type: Option<TaskType>,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub interval_seconds: Option<u64>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default)]
    pub config: Option<TaskConfig>,
    #[serde(default)]
    pub workflow: Option<WorkflowSpec>,
}

/// A workflow child as seen from its parent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowChildView {
    pub position: usize,
    pub depends_on: Vec<Uuid>,
    pub task: Task,
}

#[derive(Clone)]
pub struct TaskService {
    tasks: Arc<dyn TaskStore>,
    ledger: Arc<dyn ExecutionLedger>,
    coordinator: ExecutionCoordinator,
}

impl TaskService {
    pub fn new(coordinator: ExecutionCoordinator) -> Self {
        Self {
            tasks: coordinator.tasks().clone(),
            ledger: coordinator.ledger().clone(),
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &ExecutionCoordinator {
        &self.coordinator
    }

    // ------------------------------------------------------------------
    // Task definitions
    // ------------------------------------------------------------------

    #[instrument(skip(self, request), fields(task_name = %request.name, task_type = %request.task_type))]
    pub async fn create_task(&self, request: CreateTaskRequest) -> EngineResult<Task> {
        let now = Utc::now();
        let mut task = Task::new(request.name.trim(), request.task_type);
        task.description = request.description.filter(|d| !d.trim().is_empty());
        task.schedule = build_schedule(
            request.cron_expression,
            request.interval_seconds,
            request.timezone.as_deref(),
        )?;
        task.enabled = request.enabled;
        task.retry_policy = request.retry_policy.unwrap_or_default();
        task.config = request.config;
        task.workflow = request.workflow;
        task.created_at = now;
        task.updated_at = now;

        self.validate(&task).await?;
        if task.enabled {
            task.next_fire_time = first_fire_time(&task, now)?;
        }

        self.tasks.create(&task).await?;
        info!(task_id = %task.id, next_fire_time = ?task.next_fire_time, "Task created");
        Ok(task)
    }

    pub async fn get_task(&self, id: Uuid) -> EngineResult<Task> {
        self.tasks
            .get(id)
            .await?
            .ok_or_else(|| EngineError::task_not_found(id))
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> EngineResult<TaskPage> {
        self.tasks.list(filter).await
    }

    #[instrument(skip(self, request))]
    pub async fn update_task(&self, id: Uuid, request: UpdateTaskRequest) -> EngineResult<Task> {
        let now = Utc::now();
        let mut task = self.get_task(id).await?;

        if let Some(task_type) = request.task_type {
            if task_type != task.task_type {
                return Err(ValidationError::ImmutableField("task_type".to_string()).into());
            }
        }
        if let Some(name) = request.name {
            task.name = name.trim().to_string();
        }
        if let Some(description) = request.description {
            task.description = Some(description).filter(|d| !d.trim().is_empty());
        }

        let schedule_changed = match (request.cron_expression, request.interval_seconds) {
            (None, None) => match (request.timezone.as_deref(), task.schedule.as_mut()) {
                (Some(tz), Some(Schedule::Cron { timezone, .. })) => {
                    *timezone = parse_timezone(tz)?;
                    true
                }
                _ => false,
            },
            (cron, interval) => {
                let timezone = request.timezone.or_else(|| match &task.schedule {
                    Some(Schedule::Cron { timezone, .. }) => Some(timezone.name().to_string()),
                    _ => None,
                });
                task.schedule = build_schedule(cron, interval, timezone.as_deref())?;
                true
            }
        };

        if let Some(retry_policy) = request.retry_policy {
            task.retry_policy = retry_policy;
        }
        if let Some(config) = request.config {
            task.config = config;
        }
        if let Some(workflow) = request.workflow {
            task.workflow = Some(workflow);
        }

        self.validate(&task).await?;
        if schedule_changed {
            task.next_fire_time = if task.enabled {
                first_fire_time(&task, now)?
            } else {
                None
            };
        }
        let read_at = task.updated_at;
        task.updated_at = now;

        // Conflicts when an enable, pause or another edit landed since the read
        let updated = self.tasks.update(&task, read_at, schedule_changed).await?;
        info!(schedule_changed, "Task updated");
        Ok(updated)
    }

    /// Delete a task definition. Refused while the task has an execution in
    /// flight or is referenced by a workflow. Execution history is kept.
    #[instrument(skip(self))]
    pub async fn delete_task(&self, id: Uuid) -> EngineResult<()> {
        let task = self.get_task(id).await?;

        if !self.ledger.find_active(Some(id)).await?.is_empty() {
            return Err(EngineError::Conflict(format!(
                "task '{}' has an execution in flight",
                task.name
            )));
        }

        let parents = self.tasks.find_parents(id).await?;
        if let Some(parent) = parents.first() {
            return Err(EngineError::Conflict(format!(
                "task '{}' is a child of workflow '{}'",
                task.name, parent.name
            )));
        }

        self.tasks.delete(id).await
    }

    /// Enabling a task that was disabled re-anchors its schedule at now
    #[instrument(skip(self))]
    pub async fn enable_task(&self, id: Uuid) -> EngineResult<Task> {
        let task = self.get_task(id).await?;
        let next_fire_time = match (task.enabled, task.next_fire_time) {
            (true, Some(next)) => Some(next),
            _ => first_fire_time(&task, Utc::now())?,
        };
        self.tasks.set_enabled(id, true, next_fire_time).await
    }

    #[instrument(skip(self))]
    pub async fn disable_task(&self, id: Uuid) -> EngineResult<Task> {
        self.get_task(id).await?;
        self.tasks.set_enabled(id, false, None).await
    }

    /// Pausing keeps the anchor; slots missed while paused collapse into a
    /// single fire after resume.
    #[instrument(skip(self))]
    pub async fn pause_task(&self, id: Uuid) -> EngineResult<Task> {
        let task = self.get_task(id).await?;
        self.tasks.set_paused(id, true, task.next_fire_time).await
    }

    #[instrument(skip(self))]
    pub async fn resume_task(&self, id: Uuid) -> EngineResult<Task> {
        let task = self.get_task(id).await?;
        let next_fire_time = match task.next_fire_time {
            Some(next) => Some(next),
            None if task.enabled => first_fire_time(&task, Utc::now())?,
            None => None,
        };
        self.tasks.set_paused(id, false, next_fire_time).await
    }

    /// Start a manual execution. Allowed for disabled and paused tasks;
    /// rejected with a conflict while another execution is in flight.
    #[instrument(skip(self))]
    pub async fn trigger_task(&self, id: Uuid) -> EngineResult<Execution> {
        let handle = self.coordinator.trigger(id, TriggerSource::Manual).await?;
        Ok(handle.execution)
    }

    /// Stats for one task, or across all tasks
    pub async fn get_task_stats(&self, task_id: Option<Uuid>) -> EngineResult<ExecutionStats> {
        if let Some(id) = task_id {
            self.get_task(id).await?;
        }
        self.ledger.get_stats(task_id).await
    }

    /// Children of a workflow in execution order. Non-workflow tasks have none.
    pub async fn get_workflow_children(
        &self,
        parent_task_id: Uuid,
    ) -> EngineResult<Vec<WorkflowChildView>> {
        let parent = self.get_task(parent_task_id).await?;
        let Some(spec) = parent.workflow.as_ref() else {
            return Ok(Vec::new());
        };
        let graph = WorkflowGraph::build(spec)?;

        let mut children = Vec::with_capacity(graph.len());
        for (position, child_id) in graph.order().into_iter().enumerate() {
            match self.tasks.get(child_id).await? {
                Some(task) => children.push(WorkflowChildView {
                    position,
                    depends_on: graph.dependencies(child_id),
                    task,
                }),
                None => warn!(child_task_id = %child_id, "Workflow references a missing task"),
            }
        }
        Ok(children)
    }

    // ------------------------------------------------------------------
    // Executions
    // ------------------------------------------------------------------

    /// Newest first; `limit` defaults to 50 and is capped at 1000
    pub async fn list_executions(
        &self,
        task_id: Uuid,
        limit: Option<usize>,
    ) -> EngineResult<Vec<Execution>> {
        self.get_task(task_id).await?;
        let limit = limit
            .unwrap_or(DEFAULT_EXECUTION_LIMIT)
            .clamp(1, MAX_EXECUTION_LIMIT);
        self.ledger.list_executions(task_id, limit).await
    }

    pub async fn get_execution(&self, id: Uuid) -> EngineResult<Execution> {
        self.ledger
            .get_execution(id)
            .await?
            .ok_or_else(|| EngineError::execution_not_found(id))
    }

    /// Child executions of a workflow execution, oldest first
    pub async fn list_child_executions(&self, id: Uuid) -> EngineResult<Vec<Execution>> {
        self.get_execution(id).await?;
        self.ledger.list_children(id).await
    }

    pub async fn pause_execution(&self, id: Uuid) -> EngineResult<Execution> {
        self.coordinator.pause(id).await
    }

    pub async fn resume_execution(&self, id: Uuid) -> EngineResult<Execution> {
        self.coordinator.resume(id).await
    }

    pub async fn terminate_execution(&self, id: Uuid) -> EngineResult<Execution> {
        self.coordinator.terminate(id).await
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    async fn validate(&self, task: &Task) -> EngineResult<()> {
        if task.name.is_empty() {
            return Err(ValidationError::MissingField("name".to_string()).into());
        }
        if task.name.chars().count() > MAX_NAME_LENGTH {
            return Err(ValidationError::invalid(
                "name",
                format!("must be at most {} characters", MAX_NAME_LENGTH),
            )
            .into());
        }

        match (task.task_type, &task.schedule, &task.workflow) {
            (TaskType::Manual, Some(_), _) => {
                return Err(ValidationError::invalid("schedule", "manual tasks have no schedule").into())
            }
            (TaskType::Manual | TaskType::Common, _, Some(_)) => {
                return Err(ValidationError::invalid(
                    "workflow",
                    "only workflow tasks have children",
                )
                .into())
            }
            (TaskType::Common | TaskType::Workflow, None, _) => {
                return Err(ValidationError::MissingField(
                    "cron_expression or interval_seconds".to_string(),
                )
                .into())
            }
            (TaskType::Workflow, _, None) => {
                return Err(ValidationError::MissingField("workflow".to_string()).into())
            }
            _ => {}
        }

        if let Some(schedule) = &task.schedule {
            schedule.validate().map_err(ValidationError::from)?;
        }

        if task.retry_policy.retry_interval_seconds < 1 {
            return Err(ValidationError::invalid(
                "retry_policy.retry_interval_seconds",
                "must be at least 1",
            )
            .into());
        }
        if task.config.timeout_seconds == Some(0) {
            return Err(ValidationError::invalid("config.timeout_seconds", "must be at least 1").into());
        }

        match &task.workflow {
            Some(spec) => self.validate_workflow(task, spec).await,
            None => {
                self.coordinator
                    .runners()
                    .resolve(&task.config)
                    .map_err(|e| ValidationError::invalid("config.runner", e.to_string()))?;
                Ok(())
            }
        }
    }

    /// Children must exist, form a DAG, and never lead back to the workflow itself
    async fn validate_workflow(&self, task: &Task, spec: &WorkflowSpec) -> EngineResult<()> {
        if spec.children.is_empty() {
            return Err(ValidationError::invalid("workflow.children", "must not be empty").into());
        }
        WorkflowGraph::build(spec)?;

        let mut pending: Vec<Uuid> = spec.children.iter().map(|c| c.task_id).collect();
        let mut seen = HashSet::new();
        while let Some(child_id) = pending.pop() {
            if child_id == task.id {
                return Err(ValidationError::CyclicWorkflow(format!(
                    "workflow '{}' contains itself",
                    task.name
                ))
                .into());
            }
            if !seen.insert(child_id) {
                continue;
            }
            let child = self.tasks.get(child_id).await?.ok_or_else(|| {
                ValidationError::invalid(
                    "workflow.children",
                    format!("task {} does not exist", child_id),
                )
            })?;
            if let Some(nested) = &child.workflow {
                pending.extend(nested.children.iter().map(|c| c.task_id));
            }
        }
        Ok(())
    }
}

fn parse_timezone(name: &str) -> Result<Tz, ValidationError> {
    name.parse::<Tz>()
        .map_err(|_| ScheduleError::InvalidTimezone(name.to_string()).into())
}

fn build_schedule(
    cron_expression: Option<String>,
    interval_seconds: Option<u64>,
    timezone: Option<&str>,
) -> Result<Option<Schedule>, ValidationError> {
    match (cron_expression, interval_seconds) {
        (Some(_), Some(_)) => Err(ValidationError::invalid(
            "schedule",
            "cron_expression and interval_seconds are mutually exclusive",
        )),
        (Some(expression), None) => Ok(Some(Schedule::Cron {
            expression: expression.trim().to_string(),
            timezone: timezone.map(parse_timezone).transpose()?.unwrap_or(Tz::UTC),
        })),
        (None, Some(interval_seconds)) => Ok(Some(Schedule::Interval { interval_seconds })),
        (None, None) => Ok(None),
    }
}

fn first_fire_time(task: &Task, now: DateTime<Utc>) -> EngineResult<Option<DateTime<Utc>>> {
    task.next_fire_time(now)
        .map_err(|e| EngineError::from(ValidationError::from(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::CoordinatorConfig;
    use crate::db::{MemoryExecutionLedger, MemoryTaskStore};
    use crate::errors::ErrorKind;
    use crate::models::{ExecutionStatus, WorkflowChildLink};
    use crate::runner::{runner_fn, RunOutput, RunnerRegistry};
    use chrono::Duration;

    fn service() -> TaskService {
        let runners = RunnerRegistry::new()
            .with_runner("noop", runner_fn(|_, _| async { Ok(RunOutput::new("ok")) }))
            .with_default("noop");
        let coordinator = ExecutionCoordinator::new(
            CoordinatorConfig::default(),
            Arc::new(MemoryTaskStore::new()),
            Arc::new(MemoryExecutionLedger::new()),
            runners,
        );
        TaskService::new(coordinator)
    }

    async fn leaf(service: &TaskService, name: &str) -> Task {
        service
            .create_task(CreateTaskRequest::new(name, TaskType::Manual))
            .await
            .unwrap()
    }

    fn workflow_of(children: &[Uuid]) -> WorkflowSpec {
        WorkflowSpec {
            children: children.iter().map(|id| WorkflowChildLink::new(*id)).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_interval_task_anchored_at_creation() {
        let service = service();
        let task = service
            .create_task(CreateTaskRequest::new("every-minute", TaskType::Common).with_interval(60))
            .await
            .unwrap();
        assert_eq!(task.next_fire_time, Some(task.created_at + Duration::seconds(60)));
    }

    #[tokio::test]
    async fn test_schedule_rules_per_task_type() {
        let service = service();

        let both = CreateTaskRequest::new("both", TaskType::Common)
            .with_cron("0 18 * * *")
            .with_interval(60);
        assert_eq!(
            service.create_task(both).await.unwrap_err().kind(),
            ErrorKind::Validation
        );

        let manual = CreateTaskRequest::new("manual", TaskType::Manual).with_interval(60);
        assert!(service.create_task(manual).await.is_err());

        let unscheduled = CreateTaskRequest::new("common", TaskType::Common);
        assert!(service.create_task(unscheduled).await.is_err());

        let bad_cron = CreateTaskRequest::new("bad", TaskType::Common).with_cron("61 * * * *");
        let err = service.create_task(bad_cron).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::InvalidSchedule(_))
        ));

        // Each slot is a valid duration but the first one is past the calendar
        let far = CreateTaskRequest::new("far", TaskType::Common).with_interval(10_000_000_000_000);
        let err = service.create_task(far).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::InvalidSchedule(_))
        ));
        assert!(service.tasks.get_by_name("far").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_keeps_flags_set_since_creation() {
        let service = service();
        let task = service
            .create_task(CreateTaskRequest::new("flags", TaskType::Common).with_interval(60))
            .await
            .unwrap();
        service.disable_task(task.id).await.unwrap();

        let updated = service
            .update_task(
                task.id,
                UpdateTaskRequest {
                    description: Some("edited".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!updated.enabled);
        assert_eq!(updated.next_fire_time, None);
        assert_eq!(updated.description.as_deref(), Some("edited"));
    }

    #[tokio::test]
    async fn test_unknown_runner_rejected() {
        let service = service();
        let config = TaskConfig {
            runner: Some("missing".to_string()),
            ..Default::default()
        };
        let err = service
            .create_task(CreateTaskRequest::new("x", TaskType::Manual).with_config(config))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let service = service();
        leaf(&service, "dup").await;
        let err = service
            .create_task(CreateTaskRequest::new("dup", TaskType::Manual))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_task_type_is_immutable() {
        let service = service();
        let task = leaf(&service, "fixed").await;
        let err = service
            .update_task(
                task.id,
                UpdateTaskRequest {
                    task_type: Some(TaskType::Common),
                    interval_seconds: Some(10),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::ImmutableField(_))
        ));
    }

    #[tokio::test]
    async fn test_update_replaces_schedule_and_reanchors() {
        let service = service();
        let task = service
            .create_task(CreateTaskRequest::new("nightly", TaskType::Common).with_cron("0 18 * * *"))
            .await
            .unwrap();

        let updated = service
            .update_task(
                task.id,
                UpdateTaskRequest {
                    interval_seconds: Some(30),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.schedule, Some(Schedule::interval(30)));
        let next = updated.next_fire_time.unwrap();
        assert!(next <= Utc::now() + Duration::seconds(30));
    }

    #[tokio::test]
    async fn test_workflow_children_must_exist() {
        let service = service();
        let err = service
            .create_task(
                CreateTaskRequest::new("wf", TaskType::Workflow)
                    .with_interval(60)
                    .with_workflow(workflow_of(&[Uuid::new_v4()])),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_nested_workflow_cycle_rejected() {
        let service = service();
        let a = leaf(&service, "a").await;
        let inner = service
            .create_task(
                CreateTaskRequest::new("inner", TaskType::Workflow)
                    .with_interval(60)
                    .with_workflow(workflow_of(&[a.id])),
            )
            .await
            .unwrap();
        let outer = service
            .create_task(
                CreateTaskRequest::new("outer", TaskType::Workflow)
                    .with_interval(60)
                    .with_workflow(workflow_of(&[inner.id])),
            )
            .await
            .unwrap();

        let err = service
            .update_task(
                inner.id,
                UpdateTaskRequest {
                    workflow: Some(workflow_of(&[a.id, outer.id])),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::CyclicWorkflow(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_refused_while_referenced() {
        let service = service();
        let a = leaf(&service, "a").await;
        let wf = service
            .create_task(
                CreateTaskRequest::new("wf", TaskType::Workflow)
                    .with_interval(60)
                    .with_workflow(workflow_of(&[a.id])),
            )
            .await
            .unwrap();

        let err = service.delete_task(a.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        service.delete_task(wf.id).await.unwrap();
        service.delete_task(a.id).await.unwrap();
        assert_eq!(
            service.get_task(a.id).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_disable_clears_anchor_and_enable_restores_it() {
        let service = service();
        let task = service
            .create_task(CreateTaskRequest::new("tick", TaskType::Common).with_interval(60))
            .await
            .unwrap();

        let disabled = service.disable_task(task.id).await.unwrap();
        assert!(!disabled.enabled);
        assert_eq!(disabled.next_fire_time, None);

        let enabled = service.enable_task(task.id).await.unwrap();
        assert!(enabled.enabled);
        assert!(enabled.next_fire_time.is_some());

        let paused = service.pause_task(task.id).await.unwrap();
        assert!(paused.paused);
        assert_eq!(paused.next_fire_time, enabled.next_fire_time);

        let resumed = service.resume_task(task.id).await.unwrap();
        assert!(!resumed.paused);
        assert_eq!(resumed.next_fire_time, enabled.next_fire_time);
    }

    #[tokio::test]
    async fn test_triggered_execution_listed_for_task() {
        let service = service();
        let task = leaf(&service, "on-demand").await;

        let execution = service.trigger_task(task.id).await.unwrap();
        service.coordinator.wait_for(execution.id).await.unwrap();

        let listed = service.list_executions(task.id, Some(0)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, execution.id);
        assert_eq!(
            service.get_execution(execution.id).await.unwrap().status,
            ExecutionStatus::Success
        );

        let missing = service.list_executions(Uuid::new_v4(), None).await.unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_workflow_children_in_execution_order() {
        let service = service();
        let a = leaf(&service, "a").await;
        let b = leaf(&service, "b").await;
        let spec = WorkflowSpec {
            children: vec![
                WorkflowChildLink::after(b.id, vec![a.id]),
                WorkflowChildLink::new(a.id),
            ],
            ..Default::default()
        };
        let wf = service
            .create_task(
                CreateTaskRequest::new("wf", TaskType::Workflow)
                    .with_cron("0 18 * * *")
                    .with_workflow(spec),
            )
            .await
            .unwrap();

        let children = service.get_workflow_children(wf.id).await.unwrap();
        let order: Vec<Uuid> = children.iter().map(|c| c.task.id).collect();
        assert_eq!(order, vec![a.id, b.id]);
        assert_eq!(children[1].depends_on, vec![a.id]);
    }
}
