//! Delta application.
//!
//! The [`SyncEngine`] turns webhook notifications into mirror updates. For
//! each channel it either walks the change stream from the stored sync token
//! or, when there is no usable token, lists the whole collection. Every page
//! is committed together with the cursor that points past it, so an
//! interrupted run resumes exactly where it stopped.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use crmsync_remote::{BoxFuture, ChangePage, RemoteClient, RemoteError, RemoteResult};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::channel::{SyncChannel, SyncPhase};
use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::locks::ChannelLocks;
use crate::retry::with_timeout;
use crate::error::StoreError;
use crate::store::{Cursor, PageCommit, PageReport, SyncStore};

/// `X-Goog-Resource-State` of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Handshake sent right after a channel is created.
    Sync,
    /// The resource changed.
    Exists,
    /// The resource was deleted.
    NotExists,
}

impl ResourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Exists => "exists",
            Self::NotExists => "not_exists",
        }
    }

    /// Returns true if this state means the collection may have changed.
    pub fn is_data_change(&self) -> bool {
        !matches!(self, Self::Sync)
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceState {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(Self::Sync),
            "exists" => Ok(Self::Exists),
            "not_exists" => Ok(Self::NotExists),
            other => Err(SyncError::InvalidResourceState {
                state: other.to_string(),
            }),
        }
    }
}

/// An inbound push notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel_id: String,
    pub resource_id: String,
    pub resource_state: ResourceState,
    /// Monotonic per channel; informational only.
    pub message_number: Option<u64>,
    /// The token given at registration, echoed back by the remote.
    pub channel_token: Option<String>,
}

impl Notification {
    pub fn new(
        channel_id: impl Into<String>,
        resource_state: ResourceState,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            resource_id: resource_id.into(),
            resource_state,
            message_number: None,
            channel_token: None,
        }
    }

    /// Parses the three required values, rejecting unknown resource states.
    pub fn parse(channel_id: &str, resource_state: &str, resource_id: &str) -> SyncResult<Self> {
        Ok(Self::new(channel_id, resource_state.parse()?, resource_id))
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.channel_token = Some(token.into());
        self
    }

    /// Builds a notification from webhook request headers (names are matched
    /// case-insensitively).
    pub fn from_headers<'a, I>(headers: I) -> SyncResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut channel_id = None;
        let mut resource_id = None;
        let mut state = None;
        let mut message_number = None;
        let mut token = None;

        for (name, value) in headers {
            match name.to_ascii_lowercase().as_str() {
                "x-goog-channel-id" => channel_id = Some(value),
                "x-goog-resource-id" => resource_id = Some(value),
                "x-goog-resource-state" => state = Some(value),
                "x-goog-message-number" => message_number = value.trim().parse().ok(),
                "x-goog-channel-token" => token = Some(value.to_string()),
                _ => {}
            }
        }

        let channel_id = channel_id.ok_or(SyncError::MissingHeader {
            name: "X-Goog-Channel-ID",
        })?;
        let resource_id = resource_id.ok_or(SyncError::MissingHeader {
            name: "X-Goog-Resource-ID",
        })?;
        let state = state.ok_or(SyncError::MissingHeader {
            name: "X-Goog-Resource-State",
        })?;

        let mut notification = Self::parse(channel_id, state, resource_id)?;
        notification.message_number = message_number;
        notification.channel_token = token;
        Ok(notification)
    }
}

/// Why a notification was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    UnknownChannel,
    InactiveChannel,
    /// The resource id does not match the one the channel was registered for.
    ResourceMismatch,
    /// The echoed channel token does not match the configured one.
    TokenMismatch,
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownChannel => "unknown_channel",
            Self::InactiveChannel => "inactive_channel",
            Self::ResourceMismatch => "resource_mismatch",
            Self::TokenMismatch => "token_mismatch",
        }
    }
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What handling a notification did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// Stale or foreign notification; nothing changed.
    Discarded(DiscardReason),
    /// Handshake; nothing to fetch.
    Acknowledged,
    /// A delta run completed.
    Applied(DeltaReport),
}

/// Summary of one delta run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeltaReport {
    pub channel_id: String,
    /// Pages committed.
    pub pages: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub tombstoned: usize,
    pub skipped: usize,
    pub swept: usize,
    /// True if the whole collection was listed.
    pub full_resync: bool,
    /// Sync token stored at the end of the run.
    pub sync_token: Option<String>,
}

impl DeltaReport {
    fn new(channel_id: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            ..Default::default()
        }
    }

    fn absorb(&mut self, page: &PageReport) {
        self.pages += 1;
        self.inserted += page.inserted;
        self.updated += page.updated;
        self.unchanged += page.unchanged;
        self.tombstoned += page.tombstoned;
        self.skipped += page.skipped;
        self.swept += page.swept;
    }

    /// Returns true if the run changed any mirrored row.
    pub fn changed(&self) -> bool {
        self.inserted + self.updated + self.tombstoned + self.swept > 0
    }
}

/// Applies remote changes to the mirror, one channel at a time.
pub struct SyncEngine {
    remote: Arc<dyn RemoteClient>,
    store: Arc<dyn SyncStore>,
    locks: Arc<ChannelLocks>,
    config: EngineConfig,
}

impl SyncEngine {
    /// Creates an engine sharing `locks` with the channel manager.
    pub fn new(
        remote: Arc<dyn RemoteClient>,
        store: Arc<dyn SyncStore>,
        locks: Arc<ChannelLocks>,
        config: EngineConfig,
    ) -> Self {
        Self {
            remote,
            store,
            locks,
            config,
        }
    }

    /// Handles one push notification.
    ///
    /// Notifications for unknown, inactive or mismatched channels are
    /// discarded rather than treated as errors; the remote keeps delivering
    /// to stopped channels for a while.
    pub async fn handle_notification(
        &self,
        notification: &Notification,
    ) -> SyncResult<NotificationOutcome> {
        let channel_id = notification.channel_id.as_str();
        let Some(channel) = self.store.get_channel(channel_id)? else {
            debug!(channel_id, "discarding notification for unknown channel");
            return Ok(NotificationOutcome::Discarded(DiscardReason::UnknownChannel));
        };
        if !channel.active {
            debug!(channel_id, "discarding notification for inactive channel");
            return Ok(NotificationOutcome::Discarded(DiscardReason::InactiveChannel));
        }
        if channel.resource_id != notification.resource_id {
            debug!(
                channel_id,
                expected = %channel.resource_id,
                received = %notification.resource_id,
                "discarding notification with foreign resource id"
            );
            return Ok(NotificationOutcome::Discarded(DiscardReason::ResourceMismatch));
        }
        if let Some(expected) = &self.config.webhook_token
            && notification.channel_token.as_deref() != Some(expected.as_str())
        {
            warn!(channel_id, "discarding notification with wrong channel token");
            return Ok(NotificationOutcome::Discarded(DiscardReason::TokenMismatch));
        }

        if !notification.resource_state.is_data_change() {
            debug!(channel_id, "channel handshake acknowledged");
            return Ok(NotificationOutcome::Acknowledged);
        }

        debug!(
            channel_id,
            state = %notification.resource_state,
            message_number = ?notification.message_number,
            "change notification"
        );
        match self.apply_delta(channel_id).await {
            Ok(report) => Ok(NotificationOutcome::Applied(report)),
            // Stopped or superseded while we waited for the lock.
            Err(
                SyncError::UnknownChannel { .. }
                | SyncError::Store(StoreError::ChannelNotFound { .. }),
            ) => Ok(NotificationOutcome::Discarded(DiscardReason::UnknownChannel)),
            // Superseded mid-run: the store refused the next page.
            Err(
                SyncError::InactiveChannel { .. }
                | SyncError::Store(StoreError::ChannelInactive { .. }),
            ) => Ok(NotificationOutcome::Discarded(DiscardReason::InactiveChannel)),
            Err(e) => Err(e),
        }
    }

    /// Runs a delta for `channel_id` without waiting for a notification.
    pub async fn sync_now(&self, channel_id: &str) -> SyncResult<DeltaReport> {
        info!(channel_id, "manual sync requested");
        self.apply_delta(channel_id).await
    }

    /// Brings the mirror up to date for one channel.
    ///
    /// Holds the channel's lock for the whole run and works on a record read
    /// after the lock was taken, so concurrent triggers never share a token.
    pub async fn apply_delta(&self, channel_id: &str) -> SyncResult<DeltaReport> {
        let guard = self.locks.lock(channel_id).await;
        let result = self.apply_delta_locked(channel_id).await;
        drop(guard);
        self.locks.prune();
        result
    }

    async fn apply_delta_locked(&self, channel_id: &str) -> SyncResult<DeltaReport> {
        let mut channel = self
            .store
            .get_channel(channel_id)?
            .ok_or_else(|| SyncError::unknown_channel(channel_id))?;
        if !channel.active {
            return Err(SyncError::inactive_channel(channel_id));
        }

        let mut report = DeltaReport::new(channel_id);
        let mut token_expired = false;
        loop {
            let result = if channel.needs_full_resync() {
                self.full_resync(&mut channel, &mut report).await
            } else {
                self.incremental(&mut channel, &mut report).await
            };

            match result {
                Ok(()) => break,
                Err(SyncError::Remote(e)) if e.is_token_expired() && !token_expired => {
                    warn!(
                        channel_id,
                        collection_id = %channel.collection_id,
                        "sync token rejected, falling back to full resync"
                    );
                    token_expired = true;
                    channel.reset_cursor();
                    self.store.update_channel(&channel)?;
                }
                Err(e) => {
                    channel.record_failure(e.to_string());
                    match self.store.update_channel(&channel) {
                        Ok(()) => {}
                        Err(StoreError::ChannelInactive { .. }) => {
                            debug!(channel_id, "channel superseded, failure not recorded");
                        }
                        Err(store_err) => {
                            warn!(channel_id, error = %store_err, "failed to record sync failure");
                        }
                    }
                    warn!(
                        channel_id,
                        failures = channel.consecutive_failures,
                        error = %e,
                        "delta application stalled"
                    );
                    return Err(e);
                }
            }
        }

        report.sync_token = channel.sync_token.clone();
        info!(
            channel_id,
            pages = report.pages,
            inserted = report.inserted,
            updated = report.updated,
            tombstoned = report.tombstoned,
            swept = report.swept,
            full_resync = report.full_resync,
            "delta applied"
        );
        Ok(report)
    }

    async fn full_resync(
        &self,
        channel: &mut SyncChannel,
        report: &mut DeltaReport,
    ) -> SyncResult<()> {
        report.full_resync = true;
        if channel.page_token.is_none() {
            // Epochs are per collection: start above every stamped row.
            let floor = self.store.max_resync_epoch(&channel.collection_id)?;
            channel.resync_epoch = channel.resync_epoch.max(floor) + 1;
            info!(
                channel_id = %channel.channel_id,
                epoch = channel.resync_epoch,
                "starting full resync"
            );
        } else {
            info!(channel_id = %channel.channel_id, "resuming full resync");
        }
        channel.phase = SyncPhase::Resyncing;

        let collection_id = channel.collection_id.clone();
        loop {
            let page_token = channel.page_token.clone();
            let page = self
                .call("list_all", || {
                    self.remote.list_all(&collection_id, page_token.as_deref())
                })
                .await?;
            if self.commit(channel, page, true, report)? {
                return Ok(());
            }
        }
    }

    async fn incremental(
        &self,
        channel: &mut SyncChannel,
        report: &mut DeltaReport,
    ) -> SyncResult<()> {
        let collection_id = channel.collection_id.clone();
        loop {
            let Some(sync_token) = channel.sync_token.clone() else {
                return Err(RemoteError::internal("incremental sync without a sync token").into());
            };
            let page_token = channel.page_token.clone();
            let page = self
                .call("list_changes", || {
                    self.remote
                        .list_changes(&collection_id, &sync_token, page_token.as_deref())
                })
                .await?;
            if self.commit(channel, page, false, report)? {
                return Ok(());
            }
        }
    }

    /// Persists one page and its cursor. Returns true on the final page.
    fn commit(
        &self,
        channel: &mut SyncChannel,
        page: ChangePage,
        full_listing: bool,
        report: &mut DeltaReport,
    ) -> SyncResult<bool> {
        let cursor = match (page.next_page_token, page.next_sync_token) {
            (Some(next), _) if channel.page_token.as_deref() == Some(next.as_str()) => {
                return Err(RemoteError::invalid_response(format!(
                    "page token {next:?} did not advance"
                ))
                .into());
            }
            (Some(next), _) => Cursor::Page(next),
            (None, Some(token)) => Cursor::Sync(token),
            (None, None) => {
                return Err(RemoteError::invalid_response(
                    "last page carried no next sync token",
                )
                .into());
            }
        };

        let commit = PageCommit {
            channel_id: channel.channel_id.clone(),
            collection_id: channel.collection_id.clone(),
            items: page.items,
            epoch: channel.resync_epoch,
            cursor,
            full_listing,
            committed_at: Utc::now(),
        };
        let page_report = self.store.commit_page(&commit)?;
        channel.apply_commit(&commit);
        report.absorb(&page_report);

        debug!(
            channel_id = %channel.channel_id,
            items = commit.items.len(),
            inserted = page_report.inserted,
            updated = page_report.updated,
            tombstoned = page_report.tombstoned,
            final_page = commit.cursor.is_final(),
            "page committed"
        );
        Ok(commit.cursor.is_final())
    }

    /// One remote call under the shared timeout and retry policy.
    async fn call<'a, T>(
        &self,
        operation: &str,
        op: impl Fn() -> BoxFuture<'a, RemoteResult<T>>,
    ) -> RemoteResult<T> {
        self.config
            .retry
            .run(operation, || with_timeout(self.config.request_timeout, op()))
            .await
    }
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("remote", &self.remote.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_state_parsing() {
        assert_eq!("sync".parse::<ResourceState>().unwrap(), ResourceState::Sync);
        assert_eq!("exists".parse::<ResourceState>().unwrap(), ResourceState::Exists);
        assert_eq!(
            "not_exists".parse::<ResourceState>().unwrap(),
            ResourceState::NotExists
        );
        assert!(matches!(
            "updated".parse::<ResourceState>(),
            Err(SyncError::InvalidResourceState { .. })
        ));
        assert!(!ResourceState::Sync.is_data_change());
        assert!(ResourceState::NotExists.is_data_change());
    }

    #[test]
    fn notification_from_headers() {
        let headers = [
            ("X-Goog-Channel-ID", "chan-1"),
            ("x-goog-resource-id", "res-1"),
            ("X-Goog-Resource-State", "exists"),
            ("X-Goog-Message-Number", "42"),
            ("X-Goog-Channel-Token", "s3cret"),
            ("Content-Length", "0"),
        ];
        let notification = Notification::from_headers(headers).unwrap();
        assert_eq!(notification.channel_id, "chan-1");
        assert_eq!(notification.resource_id, "res-1");
        assert_eq!(notification.resource_state, ResourceState::Exists);
        assert_eq!(notification.message_number, Some(42));
        assert_eq!(notification.channel_token.as_deref(), Some("s3cret"));
    }

    #[test]
    fn notification_missing_header() {
        let headers = [("X-Goog-Channel-ID", "chan-1"), ("X-Goog-Resource-State", "sync")];
        assert!(matches!(
            Notification::from_headers(headers),
            Err(SyncError::MissingHeader {
                name: "X-Goog-Resource-ID"
            })
        ));
    }

    #[test]
    fn delta_report_accumulates_pages() {
        let mut report = DeltaReport::new("chan-1");
        report.absorb(&PageReport {
            inserted: 2,
            ..Default::default()
        });
        report.absorb(&PageReport {
            unchanged: 1,
            tombstoned: 1,
            ..Default::default()
        });
        assert_eq!(report.pages, 2);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.tombstoned, 1);
        assert!(report.changed());
        assert!(!DeltaReport::new("x").changed());
    }
}
