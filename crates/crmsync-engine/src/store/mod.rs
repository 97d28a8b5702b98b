//! Persistence for channel state and the event mirror.
//!
//! The engine only needs [`SyncStore::commit_page`] to be atomic: a page's
//! row writes and the cursor that points past it land together or not at
//! all. Everything else is plain reads and single-row updates.
//!
//! - [`MemoryStore`] keeps everything behind one `RwLock`
//! - [`SqliteStore`] uses one SQL transaction per page

mod memory;
mod sqlite;

use chrono::{DateTime, Utc};
use crmsync_remote::RemoteEvent;

use crate::channel::SyncChannel;
use crate::error::StoreResult;
use crate::mirror::{MergeOutcome, MirrorEvent};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Position a committed page moves the channel to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    /// More pages follow; resume here.
    Page(String),
    /// Stream complete; the next delta starts here.
    Sync(String),
}

impl Cursor {
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Sync(_))
    }
}

/// One page to apply atomically.
#[derive(Debug, Clone)]
pub struct PageCommit {
    pub channel_id: String,
    pub collection_id: String,
    pub items: Vec<RemoteEvent>,
    /// Epoch stamped on every row this page touches.
    pub epoch: u64,
    pub cursor: Cursor,
    /// True while walking a full listing rather than a change stream. The
    /// final page of a full listing also sweeps rows the listing never saw.
    pub full_listing: bool,
    pub committed_at: DateTime<Utc>,
}

impl PageCommit {
    /// Returns true if this commit should tombstone rows missing from the listing.
    pub fn sweeps(&self) -> bool {
        self.full_listing && self.cursor.is_final()
    }
}

/// Counts from applying one page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub tombstoned: usize,
    pub skipped: usize,
    /// Live rows tombstoned because a full listing no longer contained them.
    pub swept: usize,
}

impl PageReport {
    pub(crate) fn record(&mut self, outcome: MergeOutcome) {
        match outcome {
            MergeOutcome::Inserted => self.inserted += 1,
            MergeOutcome::Updated => self.updated += 1,
            MergeOutcome::Unchanged => self.unchanged += 1,
            MergeOutcome::Tombstoned => self.tombstoned += 1,
            MergeOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Channel records.
pub trait SyncStateStore: Send + Sync {
    /// Inserts a new channel; fails if the id is taken.
    fn insert_channel(&self, channel: &SyncChannel) -> StoreResult<()>;

    /// Deactivates the active channel for `channel.collection_id` (if any)
    /// and inserts `channel`, atomically. Returns the superseded record.
    fn replace_active(&self, channel: &SyncChannel) -> StoreResult<Option<SyncChannel>>;

    fn get_channel(&self, channel_id: &str) -> StoreResult<Option<SyncChannel>>;

    /// The single active channel for a collection.
    fn active_channel_for(&self, collection_id: &str) -> StoreResult<Option<SyncChannel>>;

    /// All channels, oldest first.
    fn list_channels(&self) -> StoreResult<Vec<SyncChannel>>;

    /// Marks a channel inactive. Returns false if it already was.
    fn deactivate(&self, channel_id: &str) -> StoreResult<bool>;

    /// Overwrites the cursor, phase and failure fields of an active channel.
    /// Never changes `active`; fails with `ChannelInactive` once the channel
    /// was stopped or superseded.
    fn update_channel(&self, channel: &SyncChannel) -> StoreResult<()>;

    /// Active channels whose expiration falls before `deadline`.
    fn channels_expiring_before(&self, deadline: DateTime<Utc>) -> StoreResult<Vec<SyncChannel>>;
}

/// Read access to mirrored events.
pub trait MirrorStore: Send + Sync {
    fn get_event(&self, collection_id: &str, remote_id: &str) -> StoreResult<Option<MirrorEvent>>;

    /// Events of a collection ordered by remote id, tombstones optional.
    fn list_events(&self, collection_id: &str, include_cancelled: bool)
    -> StoreResult<Vec<MirrorEvent>>;

    /// Highest resync epoch stamped on any row of the collection, 0 if empty.
    fn max_resync_epoch(&self, collection_id: &str) -> StoreResult<u64>;
}

/// Everything the engine persists.
pub trait SyncStore: SyncStateStore + MirrorStore {
    /// Applies a page's items, the optional sweep and the cursor advance in
    /// one transaction. Fails without side effects if the channel is missing
    /// or inactive.
    fn commit_page(&self, commit: &PageCommit) -> StoreResult<PageReport>;
}
