//! CLI error types.

use crmsync_core::TracingError;
use crmsync_engine::{StoreError, SyncError};
use crmsync_remote::RemoteError;
use thiserror::Error;

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

/// Errors surfaced by `crmsync` commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Missing or invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A notification could not be assembled from the arguments.
    #[error("invalid notification: {0}")]
    Notification(String),

    /// Some channels failed during a multi-channel run.
    #[error("{failed} of {total} channels failed to sync")]
    PartialSync { failed: usize, total: usize },

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Tracing(#[from] TracingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
