//! Engine configuration.

use std::time::Duration;

use crate::error::{SyncError, SyncResult};
use crate::retry::RetryPolicy;

/// Settings shared by the channel manager and the sync engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// HTTPS endpoint the remote posts notifications to.
    pub webhook_address: String,

    /// Token the remote echoes on every notification. When set, notifications
    /// that carry a different token are discarded.
    pub webhook_token: Option<String>,

    /// Requested channel lifetime; `None` leaves it to the remote.
    pub channel_ttl: Option<Duration>,

    /// Upper bound for each remote call.
    pub request_timeout: Duration,

    /// Retry policy applied to every remote call.
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            webhook_address: String::new(),
            webhook_token: None,
            channel_ttl: None,
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration delivering notifications to `webhook_address`.
    pub fn new(webhook_address: impl Into<String>) -> Self {
        Self {
            webhook_address: webhook_address.into(),
            ..Default::default()
        }
    }

    /// Builder: set the webhook verification token.
    pub fn with_webhook_token(mut self, token: impl Into<String>) -> Self {
        self.webhook_token = Some(token.into());
        self
    }

    /// Builder: set the requested channel lifetime.
    pub fn with_channel_ttl(mut self, ttl: Duration) -> Self {
        self.channel_ttl = Some(ttl);
        self
    }

    /// Builder: set the per-call timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Builder: set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Rejects settings the remote would refuse or the engine cannot honour.
    pub fn validate(&self) -> SyncResult<()> {
        if !self.webhook_address.starts_with("https://") {
            return Err(SyncError::config(format!(
                "webhook address must be an https URL, got {:?}",
                self.webhook_address
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(SyncError::config("request timeout must be non-zero"));
        }
        if self.channel_ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(SyncError::config("channel ttl must be non-zero"));
        }
        Ok(())
    }
}
