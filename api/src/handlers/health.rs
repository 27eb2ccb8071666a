use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub storage: &'static str,
    pub active_executions: usize,
}

/// Health check endpoint. Reports 503 when the database is unreachable.
#[tracing::instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let active_executions = state.service.coordinator().active_count();

    let (code, status, storage) = match &state.db_pool {
        Some(pool) => match pool.health_check().await {
            Ok(()) => (StatusCode::OK, "ok", "postgres"),
            Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "degraded", "postgres"),
        },
        None => (StatusCode::OK, "ok", "memory"),
    };

    (
        code,
        Json(HealthStatus {
            status,
            storage,
            active_executions,
        }),
    )
}
