//! Error types for configuration and target loading.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading configuration, credentials or targets.
///
/// All of these are process-level: at startup they are fatal, during a
/// reload they fail the current cycle only.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("target #{index} is missing required field `{field}`")]
    MissingField { index: usize, field: &'static str },

    #[error("duplicate target: {address} ({display_name})")]
    DuplicateTarget {
        address: String,
        display_name: String,
    },

    #[error("invalid value for `{key}`: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("credentials not configured: {0}")]
    Credentials(String),
}
