//! Remote event representation.
//!
//! A [`RemoteEvent`] is one item of a change page: the remote's view of an
//! event at the time the page was produced. Cancelled items in an
//! incremental listing often carry nothing but the id and the status, so
//! every mirrored field is optional.

use chrono::{DateTime, Utc};
use crmsync_core::{Attendee, EventStatus, EventTime};
use serde::{Deserialize, Serialize};

/// One event as reported by the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEvent {
    /// Stable remote identifier (natural key in the mirror).
    pub id: String,
    /// Remote lifecycle state.
    pub status: EventStatus,
    /// Event title.
    pub summary: Option<String>,
    /// Event description/body.
    pub description: Option<String>,
    /// Event location.
    pub location: Option<String>,
    /// Start bound.
    pub start: Option<EventTime>,
    /// End bound.
    pub end: Option<EventTime>,
    /// Participants.
    pub attendees: Vec<Attendee>,
    /// Link to the event in the remote web UI.
    pub html_link: Option<String>,
    /// Video conference entry point, if any.
    pub conference_uri: Option<String>,
    /// Parent recurring event, for expanded instances.
    pub recurring_event_id: Option<String>,
    /// Remote entity tag.
    pub etag: Option<String>,
    /// Last modification time on the remote side.
    pub updated: Option<DateTime<Utc>>,
}

impl RemoteEvent {
    /// Creates a confirmed event with only an id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: EventStatus::Confirmed,
            summary: None,
            description: None,
            location: None,
            start: None,
            end: None,
            attendees: Vec::new(),
            html_link: None,
            conference_uri: None,
            recurring_event_id: None,
            etag: None,
            updated: None,
        }
    }

    /// Creates the minimal removal marker an incremental listing returns.
    pub fn cancelled(id: impl Into<String>) -> Self {
        Self::new(id).with_status(EventStatus::Cancelled)
    }

    pub fn with_status(mut self, status: EventStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Builder method to set both time bounds.
    pub fn with_times(mut self, start: EventTime, end: EventTime) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn with_attendee(mut self, attendee: Attendee) -> Self {
        self.attendees.push(attendee);
        self
    }

    pub fn with_updated(mut self, updated: DateTime<Utc>) -> Self {
        self.updated = Some(updated);
        self
    }

    /// Returns true if the remote reports this event as removed.
    pub fn is_cancelled(&self) -> bool {
        self.status.is_tombstone()
    }
}
