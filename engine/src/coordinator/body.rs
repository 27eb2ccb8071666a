// What an execution actually runs: a job runner for leaf tasks, the
// workflow orchestrator for workflow tasks

use crate::errors::RunnerError;
use crate::models::Task;
use crate::runner::{JobRunner, RunContext, RunOutput};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait ExecutionBody: Send + Sync {
    /// Leaf work occupies a worker slot while it runs
    fn needs_worker_slot(&self) -> bool {
        true
    }

    async fn execute(&self, task: Arc<Task>, ctx: RunContext) -> Result<RunOutput, RunnerError>;
}

/// Leaf task body
pub struct RunnerBody {
    runner: Arc<dyn JobRunner>,
}

impl RunnerBody {
    pub fn new(runner: Arc<dyn JobRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl ExecutionBody for RunnerBody {
    async fn execute(&self, task: Arc<Task>, ctx: RunContext) -> Result<RunOutput, RunnerError> {
        self.runner.run(&task.config, ctx).await
    }
}
