// PostgreSQL implementations of the task store and execution ledger

pub mod execution;
pub mod queries;
pub mod task;

pub use execution::PgExecutionLedger;
pub use task::PgTaskStore;

use crate::errors::{DatabaseError, EngineError};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, DatabaseError> {
    serde_json::to_value(value).map_err(|e| DatabaseError::QueryFailed(e.to_string()))
}

pub(crate) fn from_json<T: DeserializeOwned>(
    column: &str,
    value: serde_json::Value,
) -> Result<T, DatabaseError> {
    serde_json::from_value(value)
        .map_err(|e| DatabaseError::Decode(format!("column {}: {}", column, e)))
}

/// Map a unique violation to a conflict with the given message
pub(crate) fn conflict_on_duplicate(err: sqlx::Error, message: impl FnOnce() -> String) -> EngineError {
    match DatabaseError::from(err) {
        DatabaseError::DuplicateKey(_) => EngineError::Conflict(message()),
        other => other.into(),
    }
}
