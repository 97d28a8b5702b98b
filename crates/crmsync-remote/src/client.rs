//! RemoteClient trait definition.
//!
//! [`RemoteClient`] is the narrow seam between the sync engine and the remote
//! calendar API. It only knows how to register and tear down watch channels
//! and how to page through changes; retry, checkpointing and persistence all
//! live in the engine.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::RemoteResult;
use crate::remote_event::RemoteEvent;

/// A boxed future for async trait methods.
///
/// Keeps the trait object-safe so the engine can hold `Arc<dyn RemoteClient>`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Parameters for registering a push-notification channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRequest {
    /// Channel id chosen by this system.
    pub channel_id: String,
    /// Collection (calendar) to watch.
    pub collection_id: String,
    /// HTTPS address that receives notifications.
    pub address: String,
    /// Opaque token echoed back on every notification.
    pub token: Option<String>,
    /// Requested channel lifetime; the remote may shorten it.
    pub ttl: Option<Duration>,
}

impl WatchRequest {
    pub fn new(
        channel_id: impl Into<String>,
        collection_id: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            collection_id: collection_id.into(),
            address: address.into(),
            token: None,
            ttl: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// What the remote assigned to a new channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchResponse {
    /// Remote id of the watched resource; required to stop the channel.
    pub resource_id: String,
    /// When the remote stops delivering notifications.
    pub expiration: DateTime<Utc>,
}

/// One page of a change or full listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangePage {
    /// Changed (or, for a full listing, all) items on this page.
    pub items: Vec<RemoteEvent>,
    /// Present when more pages follow.
    pub next_page_token: Option<String>,
    /// Present on the final page only.
    pub next_sync_token: Option<String>,
}

impl ChangePage {
    /// Creates a non-final page.
    pub fn partial(items: Vec<RemoteEvent>, next_page_token: impl Into<String>) -> Self {
        Self {
            items,
            next_page_token: Some(next_page_token.into()),
            next_sync_token: None,
        }
    }

    /// Creates the final page of a stream.
    pub fn last(items: Vec<RemoteEvent>, next_sync_token: impl Into<String>) -> Self {
        Self {
            items,
            next_page_token: None,
            next_sync_token: Some(next_sync_token.into()),
        }
    }

    /// Returns true if no further page follows.
    pub fn is_last(&self) -> bool {
        self.next_page_token.is_none()
    }
}

/// Access to the remote system of record.
///
/// Implementations must be `Send + Sync`; the engine shares one client across
/// all channels. They must map an invalidated sync or page token to
/// [`RemoteErrorCode::TokenExpired`](crate::RemoteErrorCode::TokenExpired)
/// and must not retry internally.
pub trait RemoteClient: Send + Sync {
    /// Returns the name of this remote (e.g. "google").
    fn name(&self) -> &str;

    /// Registers a push-notification channel.
    fn watch(&self, request: WatchRequest) -> BoxFuture<'_, RemoteResult<WatchResponse>>;

    /// Tears down a channel. Callers treat failures as best-effort.
    fn stop_channel<'a>(
        &'a self,
        resource_id: &'a str,
        channel_id: &'a str,
    ) -> BoxFuture<'a, RemoteResult<()>>;

    /// Lists changes since `sync_token`, resuming at `page_token` if given.
    fn list_changes<'a>(
        &'a self,
        collection_id: &'a str,
        sync_token: &'a str,
        page_token: Option<&'a str>,
    ) -> BoxFuture<'a, RemoteResult<ChangePage>>;

    /// Lists the whole collection, resuming at `page_token` if given.
    fn list_all<'a>(
        &'a self,
        collection_id: &'a str,
        page_token: Option<&'a str>,
    ) -> BoxFuture<'a, RemoteResult<ChangePage>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_request_builder() {
        let request = WatchRequest::new("chan-1", "primary", "https://crm.example.com/hooks/calendar")
            .with_token("secret")
            .with_ttl(Duration::from_secs(3600));

        assert_eq!(request.channel_id, "chan-1");
        assert_eq!(request.collection_id, "primary");
        assert_eq!(request.token.as_deref(), Some("secret"));
        assert_eq!(request.ttl, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn page_constructors() {
        let partial = ChangePage::partial(vec![RemoteEvent::new("a")], "p2");
        assert!(!partial.is_last());
        assert!(partial.next_sync_token.is_none());

        let last = ChangePage::last(vec![], "T1");
        assert!(last.is_last());
        assert_eq!(last.next_sync_token.as_deref(), Some("T1"));
    }
}
