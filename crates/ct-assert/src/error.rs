//! Error types for assertion execution

use ct_db::DbError;
use std::time::Duration;
use thiserror::Error;

/// Errors that abort a whole assertion run
#[derive(Error, Debug)]
pub enum AssertError {
    /// Pool could not be opened, pinged or verified (A001)
    #[error("[A001] Failed to connect to derived cluster: {0}")]
    Connect(#[source] DbError),

    /// Replication queue did not drain in time (A002)
    #[error("[A002] Replication queue for '{database}' still has {pending} pending entries after {waited:?}")]
    SyncTimeout {
        database: String,
        pending: u64,
        waited: Duration,
    },

    /// Replication queue could not be read (A003)
    #[error("[A003] Failed to read replication queue for '{database}': {source}")]
    SyncQuery {
        database: String,
        #[source]
        source: DbError,
    },

    /// The caller cancelled the run (A004)
    #[error("[A004] Assertion run cancelled")]
    Cancelled,

    /// `run` called before `start` or after `stop` (A005)
    #[error("[A005] Assertion runner is not started")]
    NotStarted,
}

/// Result type alias for AssertError
pub type AssertResult<T> = Result<T, AssertError>;

/// Why a single assertion did not pass. Recorded in its result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssertionError {
    /// Session checkout, `USE` or the query itself failed (A010)
    #[error("[A010] query failed: {0}")]
    Query(String),

    /// The query returned zero rows (A011)
    #[error("[A011] no rows returned")]
    NoRows,

    /// A result cell could not be normalized (A012)
    #[error("[A012] scan failed: {0}")]
    Scan(String),

    /// The per-assertion deadline elapsed (A013)
    #[error("[A013] timed out after {0:?}")]
    Timeout(Duration),

    /// The query ran but the row did not match (A014)
    #[error("[A014] assertion failed: {0}")]
    Mismatch(String),

    /// The run was cancelled while this assertion was pending or running (A015)
    #[error("[A015] cancelled")]
    Cancelled,
}
