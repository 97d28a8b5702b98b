//! Engine error types.

use crmsync_remote::RemoteError;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised by a [`SyncStore`](crate::store::SyncStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored JSON column could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No channel with this id.
    #[error("Channel not found: {channel_id}")]
    ChannelNotFound { channel_id: String },

    /// The channel exists but was stopped or superseded.
    #[error("Channel is inactive: {channel_id}")]
    ChannelInactive { channel_id: String },

    /// A channel with this id already exists.
    #[error("Channel already exists: {channel_id}")]
    DuplicateChannel { channel_id: String },

    /// A stored value could not be interpreted.
    #[error("Corrupt record: {message}")]
    Corrupt { message: String },

    /// A writer panicked while holding the store lock.
    #[error("Store lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Creates a channel-not-found error.
    pub fn channel_not_found(channel_id: impl Into<String>) -> Self {
        Self::ChannelNotFound {
            channel_id: channel_id.into(),
        }
    }

    /// Creates a channel-inactive error.
    pub fn channel_inactive(channel_id: impl Into<String>) -> Self {
        Self::ChannelInactive {
            channel_id: channel_id.into(),
        }
    }

    /// Creates a corrupt-record error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }
}

/// Errors surfaced by the channel manager and the sync engine.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote call failed (after retries, where applicable).
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Local persistence failed; the page and its checkpoint were rolled back.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// No channel with this id.
    #[error("Unknown channel: {channel_id}")]
    UnknownChannel { channel_id: String },

    /// The channel was stopped or superseded.
    #[error("Channel is inactive: {channel_id}")]
    InactiveChannel { channel_id: String },

    /// A notification carried a resource state this engine does not know.
    #[error("Invalid resource state: {state:?}")]
    InvalidResourceState { state: String },

    /// A required notification header was absent.
    #[error("Missing notification header: {name}")]
    MissingHeader { name: &'static str },

    /// Invalid engine settings.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl SyncError {
    /// Creates an unknown-channel error.
    pub fn unknown_channel(channel_id: impl Into<String>) -> Self {
        Self::UnknownChannel {
            channel_id: channel_id.into(),
        }
    }

    /// Creates an inactive-channel error.
    pub fn inactive_channel(channel_id: impl Into<String>) -> Self {
        Self::InactiveChannel {
            channel_id: channel_id.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns the remote error, if this is one.
    pub fn as_remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(e) => Some(e),
            _ => None,
        }
    }

    /// Returns true if a later notification might succeed where this failed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Remote(e) => e.is_retryable() || e.is_token_expired(),
            Self::Store(StoreError::Sqlite(_)) => true,
            _ => false,
        }
    }
}
