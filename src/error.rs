//! Error types for directory operations

use thiserror::Error;

/// Result type for store, selector and reconciler operations.
pub type Result<T> = std::result::Result<T, DirectoryError>;

/// Errors returned by the proxy directory and the frontier tracker
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    /// Point lookup or update missed.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Insert collided with an existing primary key.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Reconciliation was asked to check an empty candidate set.
    #[error("empty input: no candidate hostnames to check")]
    EmptyInput,

    /// Transport, pool or locking failure; safe for the caller to retry.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Malformed hostname or configuration value.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Any other backend failure (decode errors, malformed SQL).
    #[error("store error: {0}")]
    Store(String),
}

impl DirectoryError {
    /// Whether retrying the same call later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<sqlx::Error> for DirectoryError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_) => Self::StoreUnavailable(err.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code();
                // 1555 / 2067: SQLITE_CONSTRAINT_PRIMARYKEY / SQLITE_CONSTRAINT_UNIQUE
                if db_err.is_unique_violation()
                    || matches!(code.as_deref(), Some("1555" | "2067"))
                {
                    return Self::ConstraintViolation(db_err.message().to_string());
                }
                let message = db_err.message().to_ascii_lowercase();
                if matches!(code.as_deref(), Some("5" | "6" | "SQLITE_BUSY" | "SQLITE_LOCKED"))
                    || message.contains("database is locked")
                    || message.contains("database is busy")
                {
                    Self::StoreUnavailable(db_err.message().to_string())
                } else {
                    Self::Store(db_err.message().to_string())
                }
            }
            _ => Self::Store(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DirectoryError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Store(format!("migration failed: {err}"))
    }
}

/// Logs a failed result when error logging is enabled, then hands it back.
///
/// Replaces a process-wide "log errors" switch: each component receives the
/// flag from [`crate::Config`] at construction.
pub(crate) fn log_failure<T>(
    log_errors: bool,
    operation: &'static str,
    result: Result<T>,
) -> Result<T> {
    if log_errors {
        if let Err(ref err) = result {
            tracing::warn!(operation, error = %err, "directory operation failed");
        }
    }
    result
}
