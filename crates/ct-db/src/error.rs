//! Error types for ct-db

use std::time::Duration;
use thiserror::Error;

/// Database operation errors
#[derive(Error, Debug)]
pub enum DbError {
    /// Connection error (D001)
    #[error("[D001] Database connection failed: {0}")]
    ConnectionError(String),

    /// Statement execution error (D002)
    #[error("[D002] SQL execution failed: {0}")]
    ExecutionError(String),

    /// Statement deadline elapsed (D003)
    #[error("[D003] Statement timed out after {0:?}")]
    Timeout(Duration),

    /// Caller cancelled the operation (D004)
    #[error("[D004] Operation cancelled")]
    Cancelled,

    /// Result could not be decoded (D005)
    #[error("[D005] Failed to decode result: {0}")]
    Decode(String),

    /// Pool already closed (D006)
    #[error("[D006] Connection pool is closed")]
    Closed,

    /// Destructive operations refused for this host (D007)
    #[error("[D007] Refusing to operate on non-whitelisted host '{hostname}' (allowed: {allowed:?})")]
    UnsafeHost {
        hostname: String,
        allowed: Vec<String>,
    },

    /// Connection string could not be parsed (D008)
    #[error("[D008] Invalid connection string: {0}")]
    InvalidDsn(String),
}

/// Result type alias for DbError
pub type DbResult<T> = Result<T, DbError>;

impl DbError {
    /// Whether the error came from a deadline rather than the server
    pub fn is_timeout(&self) -> bool {
        matches!(self, DbError::Timeout(_))
    }
}
