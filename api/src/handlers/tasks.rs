use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::handlers::{ok, ApiResult, ErrorResponse, IdPath, SuccessResponse};
use crate::state::AppState;
use engine::db::{TaskFilter, TaskPage};
use engine::models::{Execution, ExecutionStats, Task};
use engine::service::{CreateTaskRequest, UpdateTaskRequest, WorkflowChildView};

/// Query parameters for listing a task's executions
#[derive(Debug, Deserialize)]
pub struct ListExecutionsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct DeletedTask {
    pub id: Uuid,
    pub deleted: bool,
}

#[tracing::instrument(skip(state, payload))]
pub async fn create_task(
    State(state): State<AppState>,
    payload: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SuccessResponse<Task>>), ErrorResponse> {
    let Json(request) = payload?;
    let task = state.service.create_task(request).await?;
    tracing::info!(task_id = %task.id, "Task created via API");
    Ok((StatusCode::CREATED, Json(SuccessResponse::new(task))))
}

#[tracing::instrument(skip(state, query))]
pub async fn list_tasks(
    State(state): State<AppState>,
    query: Result<Query<TaskFilter>, QueryRejection>,
) -> ApiResult<TaskPage> {
    let Query(filter) = query?;
    ok(state.service.list_tasks(&filter).await?)
}

#[tracing::instrument(skip(state))]
pub async fn get_task(State(state): State<AppState>, IdPath(id): IdPath) -> ApiResult<Task> {
    ok(state.service.get_task(id).await?)
}

#[tracing::instrument(skip(state, payload))]
pub async fn update_task(
    State(state): State<AppState>,
    IdPath(id): IdPath,
    payload: Result<Json<UpdateTaskRequest>, JsonRejection>,
) -> ApiResult<Task> {
    let Json(request) = payload?;
    ok(state.service.update_task(id, request).await?)
}

#[tracing::instrument(skip(state))]
pub async fn delete_task(
    State(state): State<AppState>,
    IdPath(id): IdPath,
) -> ApiResult<DeletedTask> {
    state.service.delete_task(id).await?;
    tracing::info!(task_id = %id, "Task deleted via API");
    ok(DeletedTask { id, deleted: true })
}

#[tracing::instrument(skip(state))]
pub async fn enable_task(State(state): State<AppState>, IdPath(id): IdPath) -> ApiResult<Task> {
    ok(state.service.enable_task(id).await?)
}

#[tracing::instrument(skip(state))]
pub async fn disable_task(State(state): State<AppState>, IdPath(id): IdPath) -> ApiResult<Task> {
    ok(state.service.disable_task(id).await?)
}

#[tracing::instrument(skip(state))]
pub async fn pause_task(State(state): State<AppState>, IdPath(id): IdPath) -> ApiResult<Task> {
    ok(state.service.pause_task(id).await?)
}

#[tracing::instrument(skip(state))]
pub async fn resume_task(State(state): State<AppState>, IdPath(id): IdPath) -> ApiResult<Task> {
    ok(state.service.resume_task(id).await?)
}

/// Start a manual execution; the response carries the pending execution row
#[tracing::instrument(skip(state))]
pub async fn trigger_task(
    State(state): State<AppState>,
    IdPath(id): IdPath,
) -> Result<(StatusCode, Json<SuccessResponse<Execution>>), ErrorResponse> {
    let execution = state.service.trigger_task(id).await?;
    tracing::info!(task_id = %id, execution_id = %execution.id, "Task triggered via API");
    Ok((StatusCode::ACCEPTED, Json(SuccessResponse::new(execution))))
}

#[tracing::instrument(skip(state))]
pub async fn task_stats(
    State(state): State<AppState>,
    IdPath(id): IdPath,
) -> ApiResult<ExecutionStats> {
    ok(state.service.get_task_stats(Some(id)).await?)
}

#[tracing::instrument(skip(state))]
pub async fn global_stats(State(state): State<AppState>) -> ApiResult<ExecutionStats> {
    ok(state.service.get_task_stats(None).await?)
}

#[tracing::instrument(skip(state))]
pub async fn workflow_children(
    State(state): State<AppState>,
    IdPath(id): IdPath,
) -> ApiResult<Vec<WorkflowChildView>> {
    ok(state.service.get_workflow_children(id).await?)
}

#[tracing::instrument(skip(state, query))]
pub async fn list_executions(
    State(state): State<AppState>,
    IdPath(id): IdPath,
    query: Result<Query<ListExecutionsQuery>, QueryRejection>,
) -> ApiResult<Vec<Execution>> {
    let Query(query) = query?;
    let executions = state.service.list_executions(id, query.limit).await?;
    tracing::debug!(count = executions.len(), "Listed executions");
    ok(executions)
}
