use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;
use uuid::Uuid;

pub use crate::retry::{RetryBackoff, RetryPolicy};

// Helper functions for Tz serialization
fn serialize_tz<S>(tz: &Tz, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(tz.name())
}

fn deserialize_tz<'de, D>(deserializer: D) -> Result<Tz, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Tz::from_str(&s).map_err(serde::de::Error::custom)
}

fn default_timezone() -> Tz {
    Tz::UTC
}

// ============================================================================
// Task Models
// ============================================================================

/// Task is a named, persistent definition of work
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub task_type: TaskType,
    #[serde(default)]
    pub schedule: Option<Schedule>,
    pub enabled: bool,
    pub paused: bool,
    pub retry_policy: RetryPolicy,
    #[serde(default)]
    pub config: TaskConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowSpec>,
    pub last_fire_time: Option<DateTime<Utc>>,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Build a new, enabled task with default retry policy and empty config
    pub fn new(name: impl Into<String>, task_type: TaskType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            task_type,
            schedule: None,
            enabled: true,
            paused: false,
            retry_policy: RetryPolicy::default(),
            config: TaskConfig::default(),
            workflow: None,
            last_fire_time: None,
            next_fire_time: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_workflow(&self) -> bool {
        self.task_type == TaskType::Workflow
    }

    /// Ids of the tasks this workflow references, in declared order
    pub fn child_ids(&self) -> Vec<Uuid> {
        self.workflow
            .as_ref()
            .map(|w| w.children.iter().map(|c| c.task_id).collect())
            .unwrap_or_default()
    }
}

/// TaskType is fixed at creation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Runs only on explicit trigger
    Manual,
    /// Scheduled leaf task executed by a job runner
    Common,
    /// Scheduled composite task driving child tasks
    Workflow,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Manual => "manual",
            TaskType::Common => "common",
            TaskType::Workflow => "workflow",
        }
    }

    pub fn is_schedulable(&self) -> bool {
        !matches!(self, TaskType::Manual)
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(TaskType::Manual),
            "common" => Ok(TaskType::Common),
            "workflow" => Ok(TaskType::Workflow),
            _ => Err(format!("Invalid task type: {}", s)),
        }
    }
}

impl TryFrom<String> for TaskType {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_str(&s)
    }
}

/// Schedule defines when a task should fire
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    Cron {
        expression: String,
        #[serde(
            default = "default_timezone",
            serialize_with = "serialize_tz",
            deserialize_with = "deserialize_tz"
        )]
        timezone: Tz,
    },
    Interval {
        interval_seconds: u64,
    },
}

impl Schedule {
    pub fn cron(expression: impl Into<String>) -> Self {
        Schedule::Cron {
            expression: expression.into(),
            timezone: Tz::UTC,
        }
    }

    pub fn interval(interval_seconds: u64) -> Self {
        Schedule::Interval { interval_seconds }
    }
}

/// TaskConfig is handed to the job runner verbatim.
/// Only `timeout_seconds` and `runner` are read by the engine itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner: Option<String>,
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl TaskConfig {
    pub fn param(&self, key: &str) -> Option<&serde_json::Value> {
        self.params.get(key)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }
}

// ============================================================================
// Workflow Models
// ============================================================================

/// WorkflowSpec is the composite definition owned by a workflow task
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowSpec {
    #[serde(default)]
    pub workflow_type: WorkflowType,
    #[serde(default)]
    pub on_failure: OnFailure,
    pub children: Vec<WorkflowChildLink>,
}

impl WorkflowSpec {
    pub fn link(&self, task_id: Uuid) -> Option<&WorkflowChildLink> {
        self.children.iter().find(|c| c.task_id == task_id)
    }
}

/// Reference from a workflow to one child task and the siblings it waits on
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowChildLink {
    pub task_id: Uuid,
    #[serde(default)]
    pub depends_on: Vec<Uuid>,
}

impl WorkflowChildLink {
    pub fn new(task_id: Uuid) -> Self {
        Self {
            task_id,
            depends_on: Vec::new(),
        }
    }

    pub fn after(task_id: Uuid, depends_on: Vec<Uuid>) -> Self {
        Self {
            task_id,
            depends_on,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    #[default]
    Serial,
    Parallel,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    #[default]
    Stop,
    Continue,
}

// ============================================================================
// Execution Models
// ============================================================================

/// Execution is one run of a task, including every retry attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    pub id: Uuid,
    pub task_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_execution_id: Option<Uuid>,
    pub trigger_source: TriggerSource,
    pub status: ExecutionStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub retry_count: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub progress: Progress,
    pub is_paused: bool,
    pub terminate_requested: bool,
    pub result: Option<ExecutionResult>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
    pub created_at: DateTime<Utc>,
}

impl Execution {
    /// Create a new pending execution
    pub fn new(task_id: Uuid, trigger_source: TriggerSource, parent: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            parent_execution_id: parent,
            trigger_source,
            status: ExecutionStatus::Pending,
            start_time: None,
            end_time: None,
            duration_seconds: None,
            retry_count: 0,
            next_attempt_at: None,
            progress: Progress::default(),
            is_paused: false,
            terminate_requested: false,
            result: None,
            error_message: None,
            attempts: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Number of attempts started so far on this row
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }
}

/// ExecutionStatus represents the lifecycle state of an execution
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Success,
    Failed,
    Terminated,
}

impl ExecutionStatus {
    /// States that hold the task's single in-flight slot
    pub const IN_FLIGHT: [ExecutionStatus; 3] = [
        ExecutionStatus::Pending,
        ExecutionStatus::Running,
        ExecutionStatus::Paused,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Terminated => "terminated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success | ExecutionStatus::Failed | ExecutionStatus::Terminated
        )
    }

    /// Legal edges of the execution state machine.
    /// A runner that completes while paused finishes normally, so paused may
    /// move straight to a terminal state or back to pending for a retry.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Pending, Terminated)
                | (Running, Paused)
                | (Running, Success)
                | (Running, Failed)
                | (Running, Terminated)
                | (Running, Pending)
                | (Paused, Running)
                | (Paused, Success)
                | (Paused, Failed)
                | (Paused, Terminated)
                | (Paused, Pending)
                | (Failed, Pending)
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "paused" => Ok(ExecutionStatus::Paused),
            "success" => Ok(ExecutionStatus::Success),
            "failed" => Ok(ExecutionStatus::Failed),
            "terminated" => Ok(ExecutionStatus::Terminated),
            _ => Err(format!("Invalid execution status: {}", s)),
        }
    }
}

impl TryFrom<String> for ExecutionStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_str(&s)
    }
}

/// TriggerSource represents how an execution was created
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Scheduled,
    Manual,
    Workflow,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Scheduled => "scheduled",
            TriggerSource::Manual => "manual",
            TriggerSource::Workflow => "workflow",
        }
    }
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(TriggerSource::Scheduled),
            "manual" => Ok(TriggerSource::Manual),
            "workflow" => Ok(TriggerSource::Workflow),
            _ => Err(format!("Invalid trigger source: {}", s)),
        }
    }
}

impl TryFrom<String> for TriggerSource {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_str(&s)
    }
}

/// Progress snapshot of a running execution
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Progress {
    pub progress_percent: Option<f64>,
    pub current_item: Option<String>,
    pub processed_items: u64,
    pub total_items: Option<u64>,
    pub estimated_end_time: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Payload recorded on success
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

/// One attempt on an execution row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub outcome: AttemptOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Running,
    Success,
    Failed,
    TimedOut,
    Terminated,
    Interrupted,
}

/// Closes the currently open attempt
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptEnd {
    pub outcome: AttemptOutcome,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

/// Field changes applied together with a state transition
#[derive(Debug, Clone, Default)]
pub struct ExecutionPatch {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub retry_count: Option<u32>,
    pub next_attempt_at: Option<Option<DateTime<Utc>>>,
    pub is_paused: Option<bool>,
    pub terminate_requested: Option<bool>,
    pub result: Option<ExecutionResult>,
    pub error_message: Option<String>,
    pub begin_attempt: Option<DateTime<Utc>>,
    pub end_attempt: Option<AttemptEnd>,
    /// Clears end-of-run fields when a failed execution is restarted
    pub reopen: bool,
}

impl ExecutionPatch {
    pub fn apply(self, execution: &mut Execution) {
        if self.reopen {
            execution.end_time = None;
            execution.duration_seconds = None;
            execution.result = None;
            execution.error_message = None;
            execution.next_attempt_at = None;
            execution.terminate_requested = false;
            execution.is_paused = false;
        }
        if let Some(start) = self.start_time {
            execution.start_time.get_or_insert(start);
        }
        if let Some(end) = self.end_time {
            execution.end_time = Some(end);
            execution.duration_seconds = execution
                .start_time
                .map(|start| (end - start).num_milliseconds().max(0) as f64 / 1000.0);
        }
        if let Some(retry_count) = self.retry_count {
            execution.retry_count = retry_count;
        }
        if let Some(next) = self.next_attempt_at {
            execution.next_attempt_at = next;
        }
        if let Some(paused) = self.is_paused {
            execution.is_paused = paused;
        }
        if let Some(requested) = self.terminate_requested {
            execution.terminate_requested = requested;
        }
        if let Some(result) = self.result {
            execution.result = Some(result);
        }
        if let Some(message) = self.error_message {
            execution.error_message = Some(message);
        }
        if let Some(end) = self.end_attempt {
            if let Some(open) = execution
                .attempts
                .iter_mut()
                .rev()
                .find(|a| a.ended_at.is_none())
            {
                open.ended_at = Some(end.at);
                open.outcome = end.outcome;
                open.error = end.error;
            }
        }
        if let Some(started_at) = self.begin_attempt {
            let attempt = execution.attempts.len() as u32 + 1;
            execution.attempts.push(AttemptRecord {
                attempt,
                started_at,
                ended_at: None,
                outcome: AttemptOutcome::Running,
                error: None,
            });
        }
    }
}

/// Aggregate execution statistics for one task or globally
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionStats {
    pub total: u64,
    pub success_count: u64,
    pub failed_count: u64,
    pub running_count: u64,
    pub success_rate: f64,
    pub avg_duration_seconds: Option<f64>,
}

impl ExecutionStats {
    /// Build stats from raw counts.
    /// The success rate excludes executions that have not finished yet.
    pub fn from_counts(
        total: u64,
        success_count: u64,
        failed_count: u64,
        running_count: u64,
        in_flight: u64,
        avg_duration_seconds: Option<f64>,
    ) -> Self {
        let finished = total.saturating_sub(in_flight);
        let success_rate = if finished == 0 {
            0.0
        } else {
            success_count as f64 / finished as f64
        };
        Self {
            total,
            success_count,
            failed_count,
            running_count,
            success_rate,
            avg_duration_seconds,
        }
    }

    pub fn from_executions<'a>(executions: impl IntoIterator<Item = &'a Execution>) -> Self {
        let (mut total, mut success, mut failed, mut running, mut in_flight) = (0, 0, 0, 0, 0);
        let mut durations = Vec::new();
        for execution in executions {
            total += 1;
            match execution.status {
                ExecutionStatus::Success => success += 1,
                ExecutionStatus::Failed => failed += 1,
                ExecutionStatus::Running | ExecutionStatus::Paused => running += 1,
                _ => {}
            }
            if !execution.is_terminal() {
                in_flight += 1;
            }
            if execution.end_time.is_some() {
                if let Some(d) = execution.duration_seconds {
                    durations.push(d);
                }
            }
        }
        let avg = if durations.is_empty() {
            None
        } else {
            Some(durations.iter().sum::<f64>() / durations.len() as f64)
        };
        Self::from_counts(total, success, failed, running, in_flight, avg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Paused,
            ExecutionStatus::Success,
            ExecutionStatus::Failed,
            ExecutionStatus::Terminated,
        ] {
            assert_eq!(status.as_str().parse::<ExecutionStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn test_terminal_states_have_no_exit_except_failed_restart() {
        use ExecutionStatus::*;
        for next in [Pending, Running, Paused, Success, Failed, Terminated] {
            assert!(!Success.can_transition_to(next));
            assert!(!Terminated.can_transition_to(next));
        }
        assert!(Failed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Running));
    }

    #[test]
    fn test_pause_only_from_running() {
        use ExecutionStatus::*;
        assert!(Running.can_transition_to(Paused));
        assert!(!Pending.can_transition_to(Paused));
        assert!(!Paused.can_transition_to(Paused));
    }

    #[test]
    fn test_task_config_flattens_params() {
        let json = serde_json::json!({
            "timeout_seconds": 30,
            "runner": "http",
            "url": "http://localhost/hook"
        });
        let config: TaskConfig = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(config.timeout_seconds, Some(30));
        assert_eq!(config.runner.as_deref(), Some("http"));
        assert_eq!(config.param_str("url"), Some("http://localhost/hook"));
        assert_eq!(serde_json::to_value(&config).unwrap(), json);
    }

    #[test]
    fn test_cron_schedule_defaults_to_utc() {
        let schedule: Schedule =
            serde_json::from_value(serde_json::json!({"type": "cron", "expression": "0 18 * * *"}))
                .unwrap();
        assert_eq!(schedule, Schedule::cron("0 18 * * *"));
    }

    #[test]
    fn test_patch_records_attempts_and_duration() {
        let mut execution = Execution::new(Uuid::new_v4(), TriggerSource::Manual, None);
        let start = Utc::now();

        ExecutionPatch {
            start_time: Some(start),
            begin_attempt: Some(start),
            ..Default::default()
        }
        .apply(&mut execution);
        assert_eq!(execution.attempt_count(), 1);
        assert_eq!(execution.attempts[0].outcome, AttemptOutcome::Running);

        let end = start + Duration::seconds(3);
        ExecutionPatch {
            end_time: Some(end),
            end_attempt: Some(AttemptEnd {
                outcome: AttemptOutcome::Failed,
                error: Some("boom".into()),
                at: end,
            }),
            ..Default::default()
        }
        .apply(&mut execution);

        assert_eq!(execution.duration_seconds, Some(3.0));
        assert_eq!(execution.attempts[0].outcome, AttemptOutcome::Failed);
        assert_eq!(execution.attempts[0].ended_at, Some(end));
    }

    #[test]
    fn test_stats_exclude_in_flight_from_success_rate() {
        let task_id = Uuid::new_v4();
        let mut rows = Vec::new();
        for status in [
            ExecutionStatus::Success,
            ExecutionStatus::Success,
            ExecutionStatus::Failed,
            ExecutionStatus::Running,
        ] {
            let mut e = Execution::new(task_id, TriggerSource::Scheduled, None);
            e.status = status;
            rows.push(e);
        }
        let stats = ExecutionStats::from_executions(&rows);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.running_count, 1);
        assert!((stats.success_rate - 2.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(stats.avg_duration_seconds, None);
    }

    #[test]
    fn test_empty_stats() {
        let stats = ExecutionStats::from_executions(std::iter::empty());
        assert_eq!(stats.success_rate, 0.0);
    }
}
