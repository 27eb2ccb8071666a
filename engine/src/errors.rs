// Error handling framework
// Every layer has its own thiserror enum; EngineError is what callers of the
// engine see and carries the machine-readable error kind.

use thiserror::Error;
use uuid::Uuid;

use crate::models::ExecutionStatus;

/// Schedule-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid schedule configuration: {0}")]
    InvalidConfiguration(String),
}

/// Validation errors, raised synchronously at create/update time
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error(transparent)]
    InvalidSchedule(#[from] ScheduleError),

    #[error("Workflow dependency graph is not acyclic: {0}")]
    CyclicWorkflow(String),

    #[error("Field '{0}' cannot be changed after creation")]
    ImmutableField(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
}

impl ValidationError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFieldValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors returned by a job runner
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    #[error("{0}")]
    Failed(String),

    #[error("Execution timeout after {0} seconds")]
    Timeout(u64),

    #[error("Execution terminated")]
    Terminated,

    #[error("No job runner registered for '{0}'")]
    UnknownRunner(String),
}

impl RunnerError {
    pub fn failed(message: impl Into<String>) -> Self {
        RunnerError::Failed(message.into())
    }

    /// Terminated outcomes are final and never retried
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RunnerError::Terminated)
    }
}

/// Database-specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate key violation: {0}")]
    DuplicateKey(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Row decoding failed: {0}")]
    Decode(String),
}

/// Machine-readable error kind surfaced at the engine boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Runner,
    Timeout,
    Cancelled,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Runner => "runner_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Storage => "storage_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level engine error
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Execution {id} is {current}; cannot move to {requested}")]
    InvalidState {
        id: Uuid,
        current: ExecutionStatus,
        requested: ExecutionStatus,
    },

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl EngineError {
    pub fn task_not_found(id: Uuid) -> Self {
        EngineError::NotFound { entity: "Task", id }
    }

    pub fn execution_not_found(id: Uuid) -> Self {
        EngineError::NotFound {
            entity: "Execution",
            id,
        }
    }

    pub fn task_already_running(task_id: Uuid) -> Self {
        EngineError::Conflict(format!("task {} already running", task_id))
    }

    pub fn task_modified(id: Uuid) -> Self {
        EngineError::Conflict(format!("task {} was modified concurrently", id))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::Conflict(_) | EngineError::InvalidState { .. } => ErrorKind::Conflict,
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::Runner(RunnerError::Timeout(_)) => ErrorKind::Timeout,
            EngineError::Runner(RunnerError::Terminated) => ErrorKind::Cancelled,
            EngineError::Runner(_) => ErrorKind::Runner,
            EngineError::Database(_) => ErrorKind::Storage,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

// Implement From for common external errors
impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => match db_err.code() {
                Some(code) if code.as_ref() == "23505" => {
                    DatabaseError::DuplicateKey(db_err.message().to_string())
                }
                _ => DatabaseError::QueryFailed(db_err.message().to_string()),
            },
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DatabaseError::Decode(err.to_string())
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Database(err.into())
    }
}

impl From<serde_json::Error> for ValidationError {
    fn from(err: serde_json::Error) -> Self {
        ValidationError::InvalidJson(err.to_string())
    }
}
