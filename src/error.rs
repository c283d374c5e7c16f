//! Error taxonomy shared by the engine, the stores and the API layer.

use thiserror::Error;

/// Errors surfaced by detection runs, the finding store and lifecycle
/// transitions.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("finding is {current}, cannot {attempted}")]
    Conflict {
        current: String,
        attempted: &'static str,
    },

    #[error("not allowed to access this resource")]
    Unauthorized,

    #[error("store unavailable: {0}")]
    TransientIo(String),

    /// The call outlived its deadline. The blocking work may still have
    /// committed, so this is never retried.
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether the operation that produced this error may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo(_))
    }
}

impl From<r2d2::Error> for EngineError {
    fn from(e: r2d2::Error) -> Self {
        Self::TransientIo(e.to_string())
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                Self::TransientIo(e.to_string())
            }
            _ => Self::Internal(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("json: {e}"))
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(format!("blocking task failed: {e}"))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_database_is_transient() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(EngineError::from(err).is_transient());
    }

    #[test]
    fn test_timeout_is_not_transient() {
        assert!(!EngineError::Timeout("insert_findings".into()).is_transient());
    }

    #[test]
    fn test_constraint_violation_is_internal() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            None,
        );
        assert!(matches!(EngineError::from(err), EngineError::Internal(_)));
    }

    #[test]
    fn test_conflict_message_names_current_status() {
        let err = EngineError::Conflict {
            current: "RESOLVED".into(),
            attempted: "acknowledge",
        };
        assert_eq!(err.to_string(), "finding is RESOLVED, cannot acknowledge");
    }
}
