use axum::extract::State;

use crate::handlers::{ok, ApiResult, IdPath};
use crate::state::AppState;
use engine::models::Execution;

/// Get execution details by ID
#[tracing::instrument(skip(state))]
pub async fn get_execution(
    State(state): State<AppState>,
    IdPath(id): IdPath,
) -> ApiResult<Execution> {
    ok(state.service.get_execution(id).await?)
}

/// Child executions started by a workflow execution
#[tracing::instrument(skip(state))]
pub async fn list_children(
    State(state): State<AppState>,
    IdPath(id): IdPath,
) -> ApiResult<Vec<Execution>> {
    ok(state.service.list_child_executions(id).await?)
}

/// Request a pause. The runner stops at its next checkpoint.
#[tracing::instrument(skip(state))]
pub async fn pause_execution(
    State(state): State<AppState>,
    IdPath(id): IdPath,
) -> ApiResult<Execution> {
    ok(state.service.pause_execution(id).await?)
}

/// Resume a paused execution, or restart a failed one
#[tracing::instrument(skip(state))]
pub async fn resume_execution(
    State(state): State<AppState>,
    IdPath(id): IdPath,
) -> ApiResult<Execution> {
    ok(state.service.resume_execution(id).await?)
}

#[tracing::instrument(skip(state))]
pub async fn terminate_execution(
    State(state): State<AppState>,
    IdPath(id): IdPath,
) -> ApiResult<Execution> {
    let execution = state.service.terminate_execution(id).await?;
    tracing::info!(execution_id = %id, status = %execution.status, "Termination requested via API");
    ok(execution)
}
