//! Error types for remote calendar operations.
//!
//! Every failure the sync engine can see from the remote side is a
//! [`RemoteError`]. The engine only branches on the [`RemoteErrorCode`]:
//! `TokenExpired` triggers a full resync, retryable codes go through the
//! backoff policy, everything else is surfaced.

use std::fmt;
use thiserror::Error;

/// The category of a remote error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteErrorCode {
    /// Authentication failed or the access token is invalid/expired.
    AuthenticationFailed,
    /// The caller lacks permission on the collection.
    AuthorizationFailed,
    /// Connection failed, timed out, DNS resolution failed, etc.
    NetworkError,
    /// Too many requests.
    RateLimited,
    /// The remote returned a 5xx status.
    ServerError,
    /// The response could not be parsed.
    InvalidResponse,
    /// Collection or channel not found (404).
    NotFound,
    /// The request was rejected as malformed (400).
    BadRequest,
    /// Missing or invalid local configuration.
    ConfigurationError,
    /// The sync or page token is no longer valid (410 Gone).
    TokenExpired,
    /// Unexpected internal state.
    InternalError,
}

impl RemoteErrorCode {
    /// Returns true if retrying the same request may succeed.
    ///
    /// Authentication hiccups count as transient: the access token is
    /// refreshed out of band and the next attempt may carry a fresh one.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::TokenExpired | Self::ConfigurationError | Self::BadRequest
        )
    }

    /// Returns a stable snake_case name for this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed => "authentication_failed",
            Self::AuthorizationFailed => "authorization_failed",
            Self::NetworkError => "network_error",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::InvalidResponse => "invalid_response",
            Self::NotFound => "not_found",
            Self::BadRequest => "bad_request",
            Self::ConfigurationError => "configuration_error",
            Self::TokenExpired => "token_expired",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for RemoteErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error returned by a [`RemoteClient`](crate::RemoteClient).
#[derive(Debug, Error)]
pub struct RemoteError {
    code: RemoteErrorCode,
    message: String,
    /// The remote that produced the error (e.g. "google").
    remote: Option<String>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl RemoteError {
    /// Creates a new error with the given code and message.
    pub fn new(code: RemoteErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            remote: None,
            source: None,
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorCode::AuthenticationFailed, message)
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorCode::AuthorizationFailed, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorCode::NetworkError, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorCode::RateLimited, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorCode::ServerError, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorCode::InvalidResponse, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorCode::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorCode::BadRequest, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorCode::ConfigurationError, message)
    }

    /// Creates the "token no longer valid" error that forces a full resync.
    pub fn token_expired(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorCode::TokenExpired, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorCode::InternalError, message)
    }

    /// Sets the remote name for this error.
    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = Some(remote.into());
        self
    }

    /// Sets the underlying cause.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn code(&self) -> RemoteErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn remote(&self) -> Option<&str> {
        self.remote.as_deref()
    }

    /// Returns true if this error may go away on retry.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Returns true if the presented sync/page token was rejected.
    pub fn is_token_expired(&self) -> bool {
        self.code == RemoteErrorCode::TokenExpired
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref remote) = self.remote {
            write!(f, "[{}] ", remote)?;
        }
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// A specialized Result type for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_expired_is_not_retryable() {
        let err = RemoteError::token_expired("sync token is no longer valid");
        assert!(err.is_token_expired());
        assert!(!err.is_retryable());
    }

    #[test]
    fn transient_codes_are_retryable() {
        assert!(RemoteErrorCode::NetworkError.is_retryable());
        assert!(RemoteErrorCode::RateLimited.is_retryable());
        assert!(RemoteErrorCode::ServerError.is_retryable());
        assert!(RemoteErrorCode::AuthenticationFailed.is_retryable());
        assert!(!RemoteErrorCode::BadRequest.is_retryable());
        assert!(!RemoteErrorCode::ConfigurationError.is_retryable());
    }

    #[test]
    fn display_includes_remote_and_code() {
        let err = RemoteError::rate_limited("quota exceeded").with_remote("google");
        assert_eq!(err.to_string(), "[google] rate_limited: quota exceeded");
        assert_eq!(err.remote(), Some("google"));
    }

    #[test]
    fn source_is_preserved() {
        use std::error::Error;
        let err = RemoteError::network("connect failed")
            .with_source(std::io::Error::other("connection refused"));
        assert!(err.source().is_some());
        assert_eq!(err.code(), RemoteErrorCode::NetworkError);
        assert_eq!(err.message(), "connect failed");
    }
}
