// Job runner contract and registry
// A runner executes the configured work of one leaf task attempt.

pub mod http;

pub use self::http::HttpRunner;

use crate::coordinator::progress::ProgressSink;
use crate::errors::RunnerError;
use crate::models::{ExecutionResult, TaskConfig};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// JobRunner executes one attempt of a leaf task
///
/// Implementations should call [`RunContext::checkpoint`] between units of
/// work so pause and terminate requests take effect, and return
/// [`RunnerError::Terminated`] once cancelled.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, config: &TaskConfig, ctx: RunContext) -> Result<RunOutput, RunnerError>;
}

/// Successful outcome of a runner
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutput {
    pub message: String,
    pub data: Value,
}

impl RunOutput {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

impl From<RunOutput> for ExecutionResult {
    fn from(output: RunOutput) -> Self {
        ExecutionResult {
            message: output.message,
            data: output.data,
        }
    }
}

/// Handle given to a runner for one attempt
#[derive(Debug, Clone)]
pub struct RunContext {
    pub execution_id: Uuid,
    pub task_id: Uuid,
    /// 1-based attempt number
    pub attempt: u32,
    progress: ProgressSink,
    cancel: CancellationToken,
    pause: watch::Receiver<bool>,
}

impl RunContext {
    pub fn new(
        execution_id: Uuid,
        task_id: Uuid,
        attempt: u32,
        progress: ProgressSink,
        cancel: CancellationToken,
        pause: watch::Receiver<bool>,
    ) -> Self {
        Self {
            execution_id,
            task_id,
            attempt,
            progress,
            cancel,
            pause,
        }
    }

    /// Report progress; `processed` and `total` are item counts
    pub fn report(&self, current_item: Option<&str>, processed: u64, total: Option<u64>) {
        self.progress.report(current_item, processed, total);
    }

    pub fn progress(&self) -> &ProgressSink {
        &self.progress
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the attempt has been cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn is_paused(&self) -> bool {
        *self.pause.borrow()
    }

    /// Cooperative pause point.
    /// Returns `Terminated` when cancelled, otherwise waits while paused.
    pub async fn checkpoint(&self) -> Result<(), RunnerError> {
        let mut pause = self.pause.clone();
        loop {
            if self.cancel.is_cancelled() {
                return Err(RunnerError::Terminated);
            }
            if !*pause.borrow_and_update() {
                return Ok(());
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(RunnerError::Terminated),
                changed = pause.changed() => {
                    // Sender gone means the execution is finishing; stop waiting
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Adapts an async closure into a [`JobRunner`]
pub struct FnRunner<F> {
    func: F,
}

impl<F> FnRunner<F> {
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> JobRunner for FnRunner<F>
where
    F: Fn(TaskConfig, RunContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<RunOutput, RunnerError>> + Send,
{
    async fn run(&self, config: &TaskConfig, ctx: RunContext) -> Result<RunOutput, RunnerError> {
        (self.func)(config.clone(), ctx).await
    }
}

/// Shorthand for `Arc::new(FnRunner::new(func))`
pub fn runner_fn<F, Fut>(func: F) -> Arc<dyn JobRunner>
where
    F: Fn(TaskConfig, RunContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<RunOutput, RunnerError>> + Send + 'static,
{
    Arc::new(FnRunner::new(func))
}

/// Named runners. A task picks one through `config.runner`; tasks without
/// it use the default runner.
#[derive(Clone, Default)]
pub struct RunnerRegistry {
    runners: HashMap<String, Arc<dyn JobRunner>>,
    default_runner: Option<String>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `http` runner as default
    pub fn with_builtin() -> Result<Self, RunnerError> {
        Ok(Self::new()
            .with_runner(HttpRunner::NAME, Arc::new(HttpRunner::new()?))
            .with_default(HttpRunner::NAME))
    }

    pub fn with_runner(mut self, name: impl Into<String>, runner: Arc<dyn JobRunner>) -> Self {
        self.runners.insert(name.into(), runner);
        self
    }

    pub fn with_default(mut self, name: impl Into<String>) -> Self {
        self.default_runner = Some(name.into());
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.runners.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.runners.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Pick the runner for a task's config
    pub fn resolve(&self, config: &TaskConfig) -> Result<Arc<dyn JobRunner>, RunnerError> {
        let name = match config.runner.as_deref().or(self.default_runner.as_deref()) {
            Some(name) => name,
            None if self.runners.len() == 1 => {
                return self
                    .runners
                    .values()
                    .next()
                    .cloned()
                    .ok_or_else(|| RunnerError::UnknownRunner("<default>".to_string()));
            }
            None => return Err(RunnerError::UnknownRunner("<default>".to_string())),
        };

        self.runners
            .get(name)
            .cloned()
            .ok_or_else(|| RunnerError::UnknownRunner(name.to_string()))
    }
}

impl std::fmt::Debug for RunnerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerRegistry")
            .field("runners", &self.names())
            .field("default_runner", &self.default_runner)
            .finish()
    }
}
