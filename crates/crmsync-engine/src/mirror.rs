//! Mirrored event rows and the merge rules applied to them.
//!
//! [`merge`] is the single place that decides what a remote item does to the
//! local row. Both stores call it, so the in-memory and SQLite backends
//! cannot disagree about idempotency, replays or tombstones.

use chrono::{DateTime, Utc};
use crmsync_core::{Attendee, EventStatus, EventTime};
use crmsync_remote::RemoteEvent;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Local copy of one remote event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorEvent {
    pub remote_id: String,
    pub collection_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: Option<EventTime>,
    pub end: Option<EventTime>,
    pub attendees: Vec<Attendee>,
    pub html_link: Option<String>,
    pub conference_uri: Option<String>,
    pub recurring_event_id: Option<String>,
    pub etag: Option<String>,
    pub remote_updated: Option<DateTime<Utc>>,
    /// `Cancelled` is a tombstone; rows are never physically deleted.
    pub status: EventStatus,
    /// When a change was last applied to this row.
    pub updated_at: DateTime<Utc>,
    /// Last full-resync epoch that listed this row.
    pub resync_epoch: u64,
}

impl MirrorEvent {
    /// Builds a row carrying every mirrored field of `event`.
    pub fn from_remote(
        event: &RemoteEvent,
        collection_id: &str,
        epoch: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            remote_id: event.id.clone(),
            collection_id: collection_id.to_string(),
            title: event.summary.clone(),
            description: event.description.clone(),
            location: event.location.clone(),
            start: event.start.clone(),
            end: event.end.clone(),
            attendees: event.attendees.clone(),
            html_link: event.html_link.clone(),
            conference_uri: event.conference_uri.clone(),
            recurring_event_id: event.recurring_event_id.clone(),
            etag: event.etag.clone(),
            remote_updated: event.updated,
            status: event.status,
            updated_at: now,
            resync_epoch: epoch,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.status.is_tombstone()
    }

    /// Marks the row removed, keeping its last known content.
    pub fn tombstone(&mut self, now: DateTime<Utc>) {
        self.status = EventStatus::Cancelled;
        self.updated_at = now;
    }
}

/// What applying one remote item did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A new live row.
    Inserted,
    /// An existing row took new content.
    Updated,
    /// Same payload as stored.
    Unchanged,
    /// The row is now (or was first seen as) cancelled.
    Tombstoned,
    /// Older than the stored row, or a revival of a tombstone.
    Skipped,
}

/// Result of [`merge`]: the outcome and the row to write, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merge {
    pub outcome: MergeOutcome,
    pub row: Option<MirrorEvent>,
}

impl Merge {
    fn write(outcome: MergeOutcome, row: MirrorEvent) -> Self {
        Self {
            outcome,
            row: Some(row),
        }
    }

    fn keep(outcome: MergeOutcome, existing: &MirrorEvent, epoch: u64) -> Self {
        // Still stamp the epoch so a full-resync sweep does not catch the row.
        let row = (existing.resync_epoch != epoch).then(|| MirrorEvent {
            resync_epoch: epoch,
            ..existing.clone()
        });
        Self { outcome, row }
    }
}

/// Decides how `incoming` changes `existing`.
///
/// The remote is authoritative: a newer representation replaces every
/// mirrored field. `updated_at` only moves when the stored payload changes,
/// which makes re-applying a page a no-op.
pub fn merge(
    existing: Option<&MirrorEvent>,
    incoming: &RemoteEvent,
    collection_id: &str,
    epoch: u64,
    now: DateTime<Utc>,
) -> Merge {
    let Some(current) = existing else {
        let row = MirrorEvent::from_remote(incoming, collection_id, epoch, now);
        let outcome = if incoming.is_cancelled() {
            MergeOutcome::Tombstoned
        } else {
            MergeOutcome::Inserted
        };
        return Merge::write(outcome, row);
    };

    if let (Some(seen), Some(offered)) = (current.remote_updated, incoming.updated)
        && offered < seen
    {
        debug!(
            remote_id = %incoming.id,
            stored = %seen,
            offered = %offered,
            "skipping stale replay"
        );
        return Merge::keep(MergeOutcome::Skipped, current, epoch);
    }

    if current.is_tombstone() {
        if !incoming.is_cancelled() {
            debug!(remote_id = %incoming.id, "ignoring change to tombstoned row");
            return Merge::keep(MergeOutcome::Skipped, current, epoch);
        }
        return Merge::keep(MergeOutcome::Unchanged, current, epoch);
    }

    if incoming.is_cancelled() {
        // Removal markers usually carry no content; keep what we had.
        let mut row = MirrorEvent {
            resync_epoch: epoch,
            ..current.clone()
        };
        row.tombstone(now);
        row.etag = incoming.etag.clone().or(row.etag);
        row.remote_updated = incoming.updated.or(row.remote_updated);
        return Merge::write(MergeOutcome::Tombstoned, row);
    }

    let mut candidate = MirrorEvent::from_remote(incoming, collection_id, current.resync_epoch, current.updated_at);
    if candidate == *current {
        return Merge::keep(MergeOutcome::Unchanged, current, epoch);
    }
    candidate.updated_at = now;
    candidate.resync_epoch = epoch;
    Merge::write(MergeOutcome::Updated, candidate)
}
