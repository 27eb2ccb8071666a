use axum::{
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Create the main application router with all routes and middleware
#[tracing::instrument(skip(state))]
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let task_routes = Router::new()
        .route(
            "/api/tasks",
            post(handlers::tasks::create_task).get(handlers::tasks::list_tasks),
        )
        .route(
            "/api/tasks/:id",
            get(handlers::tasks::get_task)
                .put(handlers::tasks::update_task)
                .delete(handlers::tasks::delete_task),
        )
        .route("/api/tasks/:id/enable", put(handlers::tasks::enable_task))
        .route("/api/tasks/:id/disable", put(handlers::tasks::disable_task))
        .route("/api/tasks/:id/pause", put(handlers::tasks::pause_task))
        .route("/api/tasks/:id/resume", put(handlers::tasks::resume_task))
        .route("/api/tasks/:id/trigger", post(handlers::tasks::trigger_task))
        .route("/api/tasks/:id/stats", get(handlers::tasks::task_stats))
        .route("/api/tasks/:id/children", get(handlers::tasks::workflow_children))
        .route(
            "/api/tasks/:id/executions",
            get(handlers::tasks::list_executions),
        )
        .route("/api/stats", get(handlers::tasks::global_stats));

    let execution_routes = Router::new()
        .route(
            "/api/executions/:id",
            get(handlers::executions::get_execution),
        )
        .route(
            "/api/executions/:id/children",
            get(handlers::executions::list_children),
        )
        .route(
            "/api/executions/:id/pause",
            post(handlers::executions::pause_execution),
        )
        .route(
            "/api/executions/:id/resume",
            post(handlers::executions::resume_execution),
        )
        .route(
            "/api/executions/:id/terminate",
            post(handlers::executions::terminate_execution),
        );

    let ops_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::metrics_handler));

    Router::new()
        .merge(task_routes)
        .merge(execution_routes)
        .merge(ops_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use engine::bootstrap::init_engine_with_runners;
    use engine::config::Settings;
    use engine::errors::RunnerError;
    use engine::runner::{runner_fn, RunOutput, RunnerRegistry};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn app() -> Router {
        let runners = RunnerRegistry::new()
            .with_runner("noop", runner_fn(|_, _| async { Ok(RunOutput::new("done")) }))
            .with_runner(
                "block",
                runner_fn(|_, ctx| async move {
                    ctx.cancelled().await;
                    Err(RunnerError::Terminated)
                }),
            )
            .with_default("noop");
        let settings = Settings::default();
        let engine = init_engine_with_runners(&settings, runners).await.unwrap();
        create_router(AppState::new(engine.service, None, None, settings))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_create_and_get_task() {
        let app = app().await;
        let (status, body) = send(
            &app,
            "POST",
            "/api/tasks",
            Some(json!({
                "name": "nightly-report",
                "task_type": "common",
                "cron_expression": "0 18 * * *",
                "timezone": "Asia/Ho_Chi_Minh"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["data"]["id"].as_str().unwrap().to_string();
        assert!(body["data"]["next_fire_time"].is_string());

        let (status, body) = send(&app, "GET", &format!("/api/tasks/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "nightly-report");

        let (status, body) = send(&app, "GET", "/api/tasks?task_type=common", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["total"], 1);
    }

    #[tokio::test]
    async fn test_validation_error_shape() {
        let app = app().await;
        let (status, body) = send(
            &app,
            "POST",
            "/api/tasks",
            Some(json!({
                "name": "both",
                "task_type": "common",
                "cron_expression": "0 18 * * *",
                "interval_seconds": 60
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");
        assert!(body["trace_id"].is_string());

        let (status, body) = send(&app, "POST", "/api/tasks", Some(json!({"name": 1}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");

        let (status, body) = send(
            &app,
            "POST",
            "/api/tasks",
            Some(json!({
                "name": "far-future",
                "task_type": "common",
                "interval_seconds": 10_000_000_000_000u64
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");
    }

    #[tokio::test]
    async fn test_malformed_id_uses_error_body() {
        let app = app().await;
        for (method, uri) in [
            ("GET", "/api/tasks/not-a-uuid"),
            ("PUT", "/api/tasks/not-a-uuid/enable"),
            ("POST", "/api/executions/not-a-uuid/terminate"),
        ] {
            let (status, body) = send(&app, method, uri, None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{} {}", method, uri);
            assert_eq!(body["error"], "validation_error");
            assert!(body["message"].is_string());
            assert!(body["trace_id"].is_string());
        }
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let app = app().await;
        let uri = format!("/api/tasks/{}", uuid::Uuid::new_v4());
        let (status, body) = send(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_second_trigger_conflicts_until_terminated() {
        let app = app().await;
        let (_, body) = send(
            &app,
            "POST",
            "/api/tasks",
            Some(json!({
                "name": "long-running",
                "task_type": "manual",
                "config": { "runner": "block" }
            })),
        )
        .await;
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = send(&app, "POST", &format!("/api/tasks/{}/trigger", id), None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let execution_id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = send(&app, "POST", &format!("/api/tasks/{}/trigger", id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "conflict");

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/executions/{}/terminate", execution_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_reports_memory_storage() {
        let app = app().await;
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["storage"], "memory");
    }
}
