//! Scheduler error types.

use std::time::Duration;

use thiserror::Error;

use posproctor_core::ConfigError;

/// Errors that stop the polling loop from starting.
///
/// Per-target failures never surface here; they become classified
/// results. A reload failure after startup only skips one cycle.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("target registry could not be loaded at startup: {0}")]
    Registry(#[from] ConfigError),

    #[error("invalid poller setting {key}: {value:?}")]
    InvalidSetting { key: &'static str, value: Duration },
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
