// Runs the children of a workflow execution

use super::graph::WorkflowGraph;
use crate::coordinator::{ExecutionBody, ExecutionCoordinator, ExecutionHandle};
use crate::errors::{EngineResult, RunnerError};
use crate::models::{Execution, ExecutionStatus, OnFailure, Task, TriggerSource, WorkflowType};
use crate::runner::{RunContext, RunOutput};
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of every child of one workflow execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub succeeded: Vec<Uuid>,
    pub failed: Vec<ChildFailure>,
    pub skipped: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildFailure {
    pub task_id: Uuid,
    pub error: String,
}

#[derive(Debug, Clone)]
enum ChildState {
    Waiting,
    Running(Uuid),
    Succeeded,
    Failed(String),
    /// Not run because a dependency failed or was itself skipped
    Skipped,
}

/// Body of workflow executions. Holds no worker slot; its children do.
pub struct WorkflowBody {
    coordinator: ExecutionCoordinator,
}

impl WorkflowBody {
    pub fn new(coordinator: ExecutionCoordinator) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl ExecutionBody for WorkflowBody {
    fn needs_worker_slot(&self) -> bool {
        false
    }

    async fn execute(&self, task: Arc<Task>, ctx: RunContext) -> Result<RunOutput, RunnerError> {
        let spec = task
            .workflow
            .as_ref()
            .ok_or_else(|| RunnerError::failed("workflow task has no children"))?;
        let graph = WorkflowGraph::build(spec).map_err(|e| RunnerError::failed(e.to_string()))?;

        let limit = match spec.workflow_type {
            WorkflowType::Serial => 1,
            WorkflowType::Parallel => self.coordinator.config().max_parallel_children,
        };

        WorkflowRun {
            coordinator: &self.coordinator,
            graph,
            workflow_type: spec.workflow_type,
            on_failure: spec.on_failure,
            limit,
            ctx,
        }
        .run()
        .await
    }
}

struct WorkflowRun<'a> {
    coordinator: &'a ExecutionCoordinator,
    graph: WorkflowGraph,
    workflow_type: WorkflowType,
    on_failure: OnFailure,
    limit: usize,
    ctx: RunContext,
}

async fn await_child(task_id: Uuid, handle: ExecutionHandle) -> (Uuid, EngineResult<Execution>) {
    (task_id, handle.wait().await)
}

impl WorkflowRun<'_> {
    async fn run(self) -> Result<RunOutput, RunnerError> {
        let order = self.graph.order();
        let total = order.len() as u64;
        let mut states: HashMap<Uuid, ChildState> =
            order.iter().map(|id| (*id, ChildState::Waiting)).collect();
        let mut names: HashMap<Uuid, String> = HashMap::new();
        let mut in_flight = FuturesUnordered::new();
        let mut finished = 0u64;
        let mut halted = false;

        info!(
            execution_id = %self.ctx.execution_id,
            children = total,
            limit = self.limit,
            "Workflow started"
        );

        loop {
            if let Err(e) = self.ctx.checkpoint().await {
                self.abort(&states).await;
                return Err(e);
            }

            if !halted {
                for child_id in &order {
                    if in_flight.len() >= self.limit {
                        break;
                    }
                    if !matches!(states[child_id], ChildState::Waiting) {
                        continue;
                    }
                    if self.blocked_by_failure(*child_id, &states) {
                        info!(child_task_id = %child_id, "Child skipped after a dependency failed");
                        states.insert(*child_id, ChildState::Skipped);
                        finished += 1;
                        self.ctx.report(None, finished, Some(total));
                        continue;
                    }
                    if !self.is_ready(*child_id, &states) {
                        continue;
                    }

                    match self.dispatch(*child_id).await {
                        Ok((name, handle)) => {
                            names.insert(*child_id, name);
                            states.insert(*child_id, ChildState::Running(handle.id()));
                            in_flight.push(await_child(*child_id, handle));
                        }
                        Err(error) => {
                            warn!(child_task_id = %child_id, error = %error, "Child could not be started");
                            states.insert(*child_id, ChildState::Failed(error));
                            finished += 1;
                            if self.on_failure == OnFailure::Stop {
                                halted = true;
                                break;
                            }
                        }
                    }
                }
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                _ = self.ctx.cancelled() => {
                    self.abort(&states).await;
                    return Err(RunnerError::Terminated);
                }
                Some((child_id, result)) = in_flight.next() => {
                    let state = child_outcome(result);
                    if let ChildState::Failed(error) = &state {
                        warn!(child_task_id = %child_id, error = %error, "Child failed");
                        if self.on_failure == OnFailure::Stop {
                            halted = true;
                        }
                    }
                    states.insert(child_id, state);
                    finished += 1;
                    self.ctx.report(names.get(&child_id).map(String::as_str), finished, Some(total));
                }
            }
        }

        let unexecuted = states
            .values()
            .any(|state| matches!(state, ChildState::Waiting | ChildState::Running(_)));
        let summary = summarize(&order, &states);
        info!(
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped.len(),
            "Workflow finished"
        );
        self.conclude(summary, unexecuted)
    }

    /// A child needs every dependency to succeed, except under parallel
    /// `continue` where any terminal dependency will do.
    fn is_ready(&self, child_id: Uuid, states: &HashMap<Uuid, ChildState>) -> bool {
        let relaxed =
            self.workflow_type == WorkflowType::Parallel && self.on_failure == OnFailure::Continue;
        self.graph
            .dependencies(child_id)
            .iter()
            .all(|dep| match &states[dep] {
                ChildState::Succeeded => true,
                ChildState::Failed(_) => relaxed,
                _ => false,
            })
    }

    /// Serial `continue` moves on to the next independent child; anything
    /// downstream of a failure is skipped.
    fn blocked_by_failure(&self, child_id: Uuid, states: &HashMap<Uuid, ChildState>) -> bool {
        self.workflow_type == WorkflowType::Serial
            && self.on_failure == OnFailure::Continue
            && self
                .graph
                .dependencies(child_id)
                .iter()
                .any(|dep| matches!(states[dep], ChildState::Failed(_) | ChildState::Skipped))
    }

    async fn dispatch(&self, child_id: Uuid) -> Result<(String, ExecutionHandle), String> {
        let child = match self.coordinator.tasks().get(child_id).await {
            Ok(Some(child)) => child,
            Ok(None) => return Err(format!("child task {} not found", child_id)),
            Err(e) => return Err(e.to_string()),
        };
        let name = child.name.clone();

        match self
            .coordinator
            .start(child, TriggerSource::Workflow, Some(self.ctx.execution_id))
            .await
        {
            Ok(handle) => {
                info!(child_task_id = %child_id, child_execution_id = %handle.id(), "Child dispatched");
                Ok((name, handle))
            }
            Err(e) if e.is_conflict() => Err(format!("task {} already running", name)),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Terminate running children; waiting ones are left unexecuted
    async fn abort(&self, states: &HashMap<Uuid, ChildState>) {
        for state in states.values() {
            if let ChildState::Running(execution_id) = state {
                if let Err(e) = self.coordinator.terminate(*execution_id).await {
                    warn!(child_execution_id = %execution_id, error = %e, "Failed to terminate child");
                }
            }
        }
        info!("Workflow terminated");
    }

    fn conclude(
        &self,
        summary: WorkflowSummary,
        unexecuted: bool,
    ) -> Result<RunOutput, RunnerError> {
        let stop_failed = self.on_failure == OnFailure::Stop && !summary.failed.is_empty();
        if stop_failed || unexecuted {
            let first = summary
                .failed
                .first()
                .map(|f| format!("child task {} failed: {}", f.task_id, f.error))
                .unwrap_or_else(|| "workflow did not run every child".to_string());
            return Err(RunnerError::failed(format!(
                "{} ({} skipped)",
                first,
                summary.skipped.len()
            )));
        }

        let mut message = format!(
            "{} succeeded, {} failed",
            summary.succeeded.len(),
            summary.failed.len()
        );
        if !summary.skipped.is_empty() {
            message.push_str(&format!(", {} skipped", summary.skipped.len()));
        }
        let data = serde_json::to_value(&summary)
            .map_err(|e| RunnerError::failed(format!("Failed to encode workflow summary: {}", e)))?;
        Ok(RunOutput::new(message).with_data(data))
    }
}

fn child_outcome(result: EngineResult<Execution>) -> ChildState {
    match result {
        Ok(execution) => match execution.status {
            ExecutionStatus::Success => ChildState::Succeeded,
            ExecutionStatus::Terminated => ChildState::Failed("terminated".to_string()),
            ExecutionStatus::Failed => ChildState::Failed(
                execution
                    .error_message
                    .unwrap_or_else(|| "failed".to_string()),
            ),
            other => ChildState::Failed(format!("ended in state {}", other)),
        },
        Err(e) => ChildState::Failed(e.to_string()),
    }
}

fn summarize(order: &[Uuid], states: &HashMap<Uuid, ChildState>) -> WorkflowSummary {
    let mut summary = WorkflowSummary::default();
    for child_id in order {
        match &states[child_id] {
            ChildState::Succeeded => summary.succeeded.push(*child_id),
            ChildState::Failed(error) => summary.failed.push(ChildFailure {
                task_id: *child_id,
                error: error.clone(),
            }),
            ChildState::Waiting | ChildState::Running(_) | ChildState::Skipped => {
                summary.skipped.push(*child_id)
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_keeps_declared_order() {
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let mut states = HashMap::new();
        states.insert(ids[0], ChildState::Succeeded);
        states.insert(ids[1], ChildState::Failed("boom".into()));
        states.insert(ids[2], ChildState::Skipped);

        let summary = summarize(&ids, &states);
        assert_eq!(summary.succeeded, vec![ids[0]]);
        assert_eq!(summary.failed[0].error, "boom");
        assert_eq!(summary.skipped, vec![ids[2]]);
    }

    #[test]
    fn test_terminated_child_counts_as_failed() {
        let mut execution = Execution::new(Uuid::new_v4(), TriggerSource::Workflow, None);
        execution.status = ExecutionStatus::Terminated;
        assert!(matches!(child_outcome(Ok(execution)), ChildState::Failed(_)));
    }
}
