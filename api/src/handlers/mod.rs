pub mod executions;
pub mod health;
pub mod metrics;
pub mod tasks;

// Common response types
use axum::{
    async_trait,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    extract::{FromRequestParts, Path},
    http::request::Parts,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use engine::{EngineError, ErrorKind};
use serde::Serialize;
use uuid::Uuid;

/// Standard API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub trace_id: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: None,
            trace_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    fn status(&self) -> StatusCode {
        match self.error.as_str() {
            "not_found" => StatusCode::NOT_FOUND,
            "validation_error" => StatusCode::BAD_REQUEST,
            "conflict" => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<EngineError> for ErrorResponse {
    fn from(err: EngineError) -> Self {
        let kind = err.kind();
        let response = match kind {
            ErrorKind::Storage => {
                tracing::error!(error = %err, "Storage error");
                ErrorResponse::new(kind.as_str(), "Storage backend unavailable")
            }
            _ => ErrorResponse::new(kind.as_str(), err.to_string()),
        };

        match err {
            EngineError::InvalidState {
                current, requested, ..
            } => response.with_details(serde_json::json!({
                "current": current,
                "requested": requested,
            })),
            _ => response,
        }
    }
}

impl From<JsonRejection> for ErrorResponse {
    fn from(rejection: JsonRejection) -> Self {
        ErrorResponse::new(ErrorKind::Validation.as_str(), rejection.body_text())
    }
}

impl From<QueryRejection> for ErrorResponse {
    fn from(rejection: QueryRejection) -> Self {
        ErrorResponse::new(ErrorKind::Validation.as_str(), rejection.body_text())
    }
}

impl From<PathRejection> for ErrorResponse {
    fn from(rejection: PathRejection) -> Self {
        ErrorResponse::new(ErrorKind::Validation.as_str(), rejection.body_text())
    }
}

/// `:id` path segment; a malformed id is rejected with the standard error body
#[derive(Debug, Clone, Copy)]
pub struct IdPath(pub Uuid);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for IdPath {
    type Rejection = ErrorResponse;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<Uuid>::from_request_parts(parts, state).await?;
        Ok(IdPath(id))
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

/// Standard API success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub data: T,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

impl<T: Serialize> IntoResponse for SuccessResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

pub type ApiResult<T> = Result<Json<SuccessResponse<T>>, ErrorResponse>;

pub fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(Json(SuccessResponse::new(data)))
}
