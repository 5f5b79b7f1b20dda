use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigError;
use crate::domain::transaction::FrameState;

/// Boxed error kept alongside a failed rollback.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type SessionResult<T> = Result<T, SessionError>;

/// Failures of the underlying session primitives.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("no transaction is active on this session")]
    NotActive,

    #[error("a transaction is already active on this session")]
    AlreadyActive,

    #[error("session provider is closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

/// Failures raised by the nested transaction manager itself.
///
/// A failing unit of work is never represented here: its own error value is
/// handed back to the caller unchanged.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("could not open session: {0}")]
    SessionUnavailable(#[source] SessionError),

    #[error("begin failed: {0}")]
    BeginFailed(#[source] SessionError),

    #[error("commit failed: {0}")]
    CommitFailed(#[source] SessionError),

    /// The terminal rollback failed. The session may be left in an
    /// indeterminate state. `original` holds the failure that triggered it.
    #[error("rollback failed: {source}")]
    RollbackFailed {
        #[source]
        source: SessionError,
        original: Option<BoxError>,
    },

    #[error("transaction frame {frame} is already {state}")]
    FrameClosed { frame: Uuid, state: FrameState },

    /// The outermost call finished while nested calls of its chain were
    /// still open. The transaction was rolled back.
    #[error("outermost call of frame {frame} finished with {pending} nested call(s) still open; rolled back")]
    PendingNested { frame: Uuid, pending: usize },

    #[error("{deferred} nested failure(s) were swallowed before the outermost commit of frame {frame}; rolled back")]
    SwallowedFailure { frame: Uuid, deferred: usize },
}

impl TransactionError {
    /// Whether the session may have been left half-finished.
    pub fn is_indeterminate(&self) -> bool {
        matches!(
            self,
            TransactionError::RollbackFailed { .. } | TransactionError::CommitFailed(_)
        )
    }

    /// Error that caused a failed rollback, if one was recorded.
    pub fn original(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            TransactionError::RollbackFailed {
                original: Some(original),
                ..
            } => Some(&**original),
            _ => None,
        }
    }
}

/// Application-level error usable as a unit-of-work error type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Validation: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl AppError {
    pub fn transaction(&self) -> Option<&TransactionError> {
        match self {
            AppError::Transaction(err) => Some(err),
            _ => None,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_failure_keeps_original() {
        let err = TransactionError::RollbackFailed {
            source: SessionError::Other("connection reset".to_string()),
            original: Some(Box::new(AppError::Validation("negative balance".into()))),
        };

        assert!(err.is_indeterminate());
        assert_eq!(err.to_string(), "rollback failed: connection reset");
        assert_eq!(
            err.original().map(|e| e.to_string()),
            Some("Validation: negative balance".to_string())
        );
    }

    #[test]
    fn test_app_error_is_transparent_for_transactions() {
        let err: AppError = TransactionError::CommitFailed(SessionError::NotActive).into();
        assert_eq!(
            err.to_string(),
            "commit failed: no transaction is active on this session"
        );
        assert!(err.transaction().is_some());
        assert!(!TransactionError::BeginFailed(SessionError::Closed).is_indeterminate());
    }
}
