//! Error types for ct-core

use thiserror::Error;

/// Core error type for clustertest
#[derive(Error, Debug)]
pub enum CoreError {
    /// C001: Configuration file not found
    #[error("[C001] Config file not found: {path}")]
    ConfigNotFound { path: String },

    /// C002: Failed to parse a YAML document
    #[error("[C002] Failed to parse YAML: {message}")]
    YamlParseError { message: String },

    /// C003: Invalid configuration value
    #[error("[C003] Invalid config: {message}")]
    ConfigInvalid { message: String },

    /// C004: Invalid duration string
    #[error("[C004] Invalid duration '{value}': {reason}")]
    InvalidDuration { value: String, reason: String },

    /// C005: Invalid assertion definition
    #[error("[C005] Invalid assertion '{name}': {reason}")]
    InvalidAssertion { name: String, reason: String },

    /// C006: Fixture directory or file problem
    #[error("[C006] Invalid fixture {path}: {reason}")]
    InvalidFixture { path: String, reason: String },

    /// C007: IO error with path context
    #[error("[C007] IO error at {path}: {source}")]
    IoWithPath {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for CoreError
pub type CoreResult<T> = Result<T, CoreError>;

impl From<serde_yaml::Error> for CoreError {
    fn from(err: serde_yaml::Error) -> Self {
        CoreError::YamlParseError {
            message: err.to_string(),
        }
    }
}
