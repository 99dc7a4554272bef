//! Error types for the harness

use ct_assert::AssertError;
use ct_db::DbError;
use ct_migrate::MigrateError;
use thiserror::Error;

/// Harness errors
#[derive(Error, Debug)]
pub enum HarnessError {
    /// A cluster pool could not be opened, pinged or verified (H001)
    #[error("[H001] Failed to connect to {cluster} cluster: {source}")]
    Connect {
        cluster: &'static str,
        #[source]
        source: DbError,
    },

    /// The migration runner failed (H002)
    #[error("[H002] Migrations failed for '{database}': {source}")]
    Migration {
        database: String,
        #[source]
        source: MigrateError,
    },

    /// A create, drop or truncate statement failed (H003)
    #[error("[H003] DDL failed: {statement}: {source}")]
    Ddl {
        statement: String,
        #[source]
        source: DbError,
    },

    /// A parquet insert failed (H004)
    #[error("[H004] Failed to load fixture table '{table}': {source}")]
    Ingest {
        table: String,
        #[source]
        source: DbError,
    },

    /// Operation attempted before `start` (H005)
    #[error("[H005] Database manager is not started")]
    NotStarted,

    /// One or both pools failed to close (H006)
    #[error("[H006] Errors closing connections: {}", join_errors(.errors))]
    Shutdown { errors: Vec<DbError> },

    /// Migration files could not be loaded (H007)
    #[error("[H007] Failed to load migrations: {0}")]
    MigrationSource(#[source] MigrateError),

    /// Assertion run error surfaced through the harness (H008)
    #[error("[H008] {0}")]
    Assert(#[from] AssertError),
}

/// Result type alias for HarnessError
pub type HarnessResult<T> = Result<T, HarnessError>;

fn join_errors(errors: &[DbError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
