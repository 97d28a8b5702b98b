//! Sync channel records.
//!
//! A [`SyncChannel`] is the durable state of one webhook subscription: which
//! collection it watches, what the remote called it, and how far the mirror
//! has caught up with the collection's change stream.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{Cursor, PageCommit};

/// Collection watched when none is given.
pub const DEFAULT_COLLECTION: &str = "primary";

/// Where a channel stands in its sync lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// Registered, no completed sync yet.
    #[default]
    Uninitialized,
    /// Holding a valid sync token.
    Synced,
    /// A full listing is in progress (first sync or token expiry).
    Resyncing,
    /// Retries were exhausted; the next trigger resumes from the checkpoint.
    Stalled,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Synced => "synced",
            Self::Resyncing => "resyncing",
            Self::Stalled => "stalled",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uninitialized" => Ok(Self::Uninitialized),
            "synced" => Ok(Self::Synced),
            "resyncing" => Ok(Self::Resyncing),
            "stalled" => Ok(Self::Stalled),
            other => Err(format!("unknown sync phase: {other}")),
        }
    }
}

/// Durable state of one watch channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncChannel {
    /// Id chosen by us when registering; notifications carry it back.
    pub channel_id: String,
    /// Id the remote assigned to the watched resource.
    pub resource_id: String,
    /// Watched collection.
    pub collection_id: String,
    /// Position after the last completed page stream. `None` forces a full resync.
    pub sync_token: Option<String>,
    /// Continuation inside an unfinished page stream.
    pub page_token: Option<String>,
    /// When the remote stops delivering notifications.
    pub expiration: DateTime<Utc>,
    /// False once stopped or superseded.
    pub active: bool,
    pub phase: SyncPhase,
    /// Bumped at the start of every fresh full resync.
    pub resync_epoch: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SyncChannel {
    /// Creates a freshly registered, active channel with no sync position.
    pub fn new(
        channel_id: impl Into<String>,
        resource_id: impl Into<String>,
        collection_id: impl Into<String>,
        expiration: DateTime<Utc>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            resource_id: resource_id.into(),
            collection_id: collection_id.into(),
            sync_token: None,
            page_token: None,
            expiration,
            active: true,
            phase: SyncPhase::Uninitialized,
            resync_epoch: 0,
            consecutive_failures: 0,
            last_error: None,
            last_synced_at: None,
            created_at: Utc::now(),
        }
    }

    /// Takes over the sync position of `previous` so a renewed channel
    /// continues where the old one stopped.
    pub fn continuing(mut self, previous: &SyncChannel) -> Self {
        self.sync_token = previous.sync_token.clone();
        self.page_token = previous.page_token.clone();
        self.resync_epoch = previous.resync_epoch;
        self.last_synced_at = previous.last_synced_at;
        self.phase = match previous.phase {
            SyncPhase::Stalled if previous.sync_token.is_some() => SyncPhase::Synced,
            SyncPhase::Stalled => SyncPhase::Resyncing,
            phase => phase,
        };
        self
    }

    /// Returns true if the next delta must list the whole collection.
    pub fn needs_full_resync(&self) -> bool {
        self.sync_token.is_none()
    }

    /// Returns true if the channel expires before `deadline`.
    pub fn expires_before(&self, deadline: DateTime<Utc>) -> bool {
        self.expiration < deadline
    }

    /// Drops the sync position after the remote rejected it.
    pub fn reset_cursor(&mut self) {
        self.sync_token = None;
        self.page_token = None;
        self.phase = SyncPhase::Resyncing;
    }

    /// Advances the channel past a committed page.
    ///
    /// Both store implementations call this inside the page's transaction, and
    /// the engine calls it on its own copy afterwards, so the two never drift.
    pub fn apply_commit(&mut self, commit: &PageCommit) {
        self.resync_epoch = commit.epoch;
        match &commit.cursor {
            Cursor::Page(token) => {
                self.page_token = Some(token.clone());
                if commit.full_listing {
                    self.phase = SyncPhase::Resyncing;
                }
            }
            Cursor::Sync(token) => {
                self.sync_token = Some(token.clone());
                self.page_token = None;
                self.phase = SyncPhase::Synced;
                self.consecutive_failures = 0;
                self.last_error = None;
                self.last_synced_at = Some(commit.committed_at);
            }
        }
    }

    /// Records a failed delta run; the checkpoint is left untouched.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.phase = SyncPhase::Stalled;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error.into());
    }
}
