//! Database error types.
//!
//! Driver and pool errors are folded into [`DbError`] at the boundary so the
//! transaction executor can classify them with [`DbError::is_retryable`].

use crate::isolation::IsolationLevel;
use thiserror::Error;
use tokio_postgres::error::SqlState;

// ============================================================================
// ERROR TYPE
// ============================================================================

#[derive(Debug, Clone, Error)]
pub enum DbError {
    /// The server rejected a statement.
    #[error("database error {}: {}", .state.code(), .message)]
    Database { state: SqlState, message: String },

    /// The connection broke mid-conversation.
    #[error("database connection lost: {0}")]
    ConnectionLost(String),

    #[error("timed out waiting for a pooled connection")]
    PoolTimeout,

    #[error("connection pool is closed")]
    PoolClosed,

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("record not found")]
    NotFound,

    #[error("operation cancelled")]
    Cancelled,

    /// Every attempt failed with a retryable error.
    #[error("transaction failed after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<DbError>,
    },

    /// The connection broke while COMMIT was in flight. The server may or
    /// may not have committed, so the transaction is not rerun.
    #[error("commit outcome unknown: {0}")]
    CommitOutcomeUnknown(String),

    #[error("isolation level {0} is not supported by PostgreSQL")]
    UnsupportedIsolation(IsolationLevel),

    #[error("unknown sort field: {0:?}")]
    UnknownSortField(String),

    #[error("search term longer than {max} characters")]
    SearchTermTooLong { max: usize },

    /// DELETE or UPDATE without a filter and without `query::all_rows()`.
    #[error("{0} without a WHERE clause; add a filter or query::all_rows()")]
    MissingWhereClause(&'static str),

    #[error("{0} needs at least one column")]
    NoColumns(&'static str),

    #[error("failed to decode row: {0}")]
    Decode(String),

    #[error("{0}")]
    Other(String),
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

impl DbError {
    /// Build a server error from a SQLSTATE code.
    pub fn from_sql_state(code: &str, message: impl Into<String>) -> Self {
        DbError::Database {
            state: SqlState::from_code(code),
            message: message.into(),
        }
    }

    /// The SQLSTATE of a server error.
    pub fn sql_state(&self) -> Option<&SqlState> {
        match self {
            DbError::Database { state, .. } => Some(state),
            _ => None,
        }
    }

    /// Whether a transaction that failed with this error is worth rerunning.
    ///
    /// Serialization failures, deadlocks, lock-acquisition failures and
    /// connection loss qualify. Everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        if self.is_connection_loss() {
            return true;
        }
        match self.sql_state() {
            Some(state) => {
                *state == SqlState::T_R_SERIALIZATION_FAILURE
                    || *state == SqlState::T_R_DEADLOCK_DETECTED
                    || *state == SqlState::LOCK_NOT_AVAILABLE
            }
            None => false,
        }
    }

    /// A dropped connection or a SQLSTATE class 08 error.
    pub fn is_connection_loss(&self) -> bool {
        match self {
            DbError::ConnectionLost(_) => true,
            DbError::Database { state, .. } => state.code().starts_with("08"),
            _ => false,
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        self.sql_state() == Some(&SqlState::UNIQUE_VIOLATION)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::NotFound)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DbError::Cancelled) || self.sql_state() == Some(&SqlState::QUERY_CANCELED)
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<tokio_postgres::Error> for DbError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db) = err.as_db_error() {
            tracing::debug!(code = db.code().code(), message = db.message(), "Database error");
            return DbError::Database {
                state: db.code().clone(),
                message: db.message().to_string(),
            };
        }

        let io_failure = std::error::Error::source(&err)
            .is_some_and(|source| source.is::<std::io::Error>());
        if err.is_closed() || io_failure {
            tracing::warn!(error = %err, "Database connection lost");
            return DbError::ConnectionLost(err.to_string());
        }

        tracing::error!("Database error: {:?}", err);
        DbError::Other(err.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for DbError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        match err {
            deadpool_postgres::PoolError::Timeout(kind) => {
                tracing::warn!(?kind, "Timed out waiting for a pooled connection");
                DbError::PoolTimeout
            }
            deadpool_postgres::PoolError::Closed => DbError::PoolClosed,
            deadpool_postgres::PoolError::Backend(e) => DbError::from(e),
            other => {
                tracing::error!("Connection pool error: {:?}", other);
                DbError::Pool(other.to_string())
            }
        }
    }
}

impl From<deadpool_postgres::CreatePoolError> for DbError {
    fn from(err: deadpool_postgres::CreatePoolError) -> Self {
        tracing::error!("Failed to create pool: {:?}", err);
        DbError::Pool(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_retryable_codes() {
        for code in ["40001", "40P01", "55P03", "08006", "08003"] {
            assert!(DbError::from_sql_state(code, "x").is_retryable(), "{code}");
        }
        assert!(DbError::ConnectionLost("eof".into()).is_retryable());
    }

    #[test]
    fn test_terminal_codes() {
        for code in ["23505", "23503", "57014", "42P01"] {
            assert!(!DbError::from_sql_state(code, "x").is_retryable(), "{code}");
        }
        assert!(!DbError::Cancelled.is_retryable());
        assert!(!DbError::PoolTimeout.is_retryable());
        assert!(!DbError::NotFound.is_retryable());
        assert!(!DbError::CommitOutcomeUnknown("eof".into()).is_retryable());
        assert!(!DbError::MissingWhereClause("DELETE").is_retryable());
    }

    #[test]
    fn test_connection_loss() {
        assert!(DbError::ConnectionLost("eof".into()).is_connection_loss());
        assert!(DbError::from_sql_state("08006", "connection failure").is_connection_loss());
        assert!(!DbError::from_sql_state("40001", "x").is_connection_loss());
        assert!(!DbError::CommitOutcomeUnknown("eof".into()).is_connection_loss());
    }

    #[test]
    fn test_predicates() {
        assert!(DbError::from_sql_state("23505", "dup").is_unique_violation());
        assert!(DbError::NotFound.is_not_found());
        assert!(DbError::from_sql_state("57014", "canceled").is_cancelled());
        assert_eq!(
            DbError::from_sql_state("40001", "x").sql_state(),
            Some(&SqlState::T_R_SERIALIZATION_FAILURE)
        );
    }

    #[test]
    fn test_exhausted_exposes_last_cause() {
        let err = DbError::RetriesExhausted {
            attempts: 3,
            last: Box::new(DbError::from_sql_state("40P01", "deadlock detected")),
        };
        assert_eq!(err.to_string(), "transaction failed after 3 attempts");
        let source = err.source().unwrap().to_string();
        assert_eq!(source, "database error 40P01: deadlock detected");
    }
}
