//! Error types for the migration runner.

use ct_db::DbError;
use thiserror::Error;

/// Migration errors.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Migration directory or file could not be read (M001).
    #[error("[M001] Failed to read migrations from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A file name does not follow `<version>_<name>.up.sql` (M002).
    #[error("[M002] Invalid migration file name '{0}'")]
    InvalidFileName(String),

    /// Two files claim the same version (M003).
    #[error("[M003] Duplicate migration version {version}: {first} and {second}")]
    DuplicateVersion {
        version: u64,
        first: String,
        second: String,
    },

    /// State table could not be created or read (M004).
    #[error("[M004] Migration state for '{database}' unavailable: {source}")]
    State {
        database: String,
        #[source]
        source: DbError,
    },

    /// A previous run failed part-way through this version (M005).
    #[error("[M005] Database '{database}' is dirty at version {version}; clean it up manually")]
    Dirty { database: String, version: u64 },

    /// A statement of a migration failed (M006).
    #[error("[M006] Migration {version} ({name}) failed on '{database}': {source}")]
    Statement {
        database: String,
        version: u64,
        name: String,
        #[source]
        source: DbError,
    },

    /// The caller cancelled the run (M007).
    #[error("[M007] Migration of '{0}' cancelled")]
    Cancelled(String),
}

/// Result type alias for [`MigrateError`].
pub type MigrateResult<T> = Result<T, MigrateError>;
