//! Event types shared by the remote client and the mirror.
//!
//! - [`EventStatus`]: the remote lifecycle state, where `Cancelled` is a tombstone
//! - [`Attendee`]: a participant on an event
//! - [`ResponseStatus`]: an attendee's reply to the invitation

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Remote lifecycle state of an event.
///
/// Kept as a tagged status rather than a deleted flag so downstream readers
/// can tell tentative events apart from confirmed ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// The event is confirmed.
    #[default]
    Confirmed,
    /// The event is tentatively confirmed.
    Tentative,
    /// The event was cancelled or removed remotely.
    Cancelled,
}

impl EventStatus {
    /// Maps the Calendar API `status` field.
    ///
    /// A missing status means confirmed; unknown values are treated the same way.
    pub fn from_remote(status: Option<&str>) -> Self {
        match status {
            Some("cancelled") => Self::Cancelled,
            Some("tentative") => Self::Tentative,
            _ => Self::Confirmed,
        }
    }

    /// Returns the stable storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Tentative => "tentative",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true if this status marks a removed event.
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(Self::Confirmed),
            "tentative" => Ok(Self::Tentative),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown event status: {other}")),
        }
    }
}

/// The response status for an event attendee.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// The attendee has accepted the invitation.
    Accepted,
    /// The attendee has declined the invitation.
    Declined,
    /// The attendee has tentatively accepted.
    Tentative,
    /// The attendee has not responded.
    NeedsAction,
    /// Unknown response status.
    #[default]
    Unknown,
}

impl ResponseStatus {
    /// Maps the Calendar API `responseStatus` field.
    pub fn from_remote(status: Option<&str>) -> Self {
        match status {
            Some("accepted") => Self::Accepted,
            Some("declined") => Self::Declined,
            Some("tentative") => Self::Tentative,
            Some("needsAction") => Self::NeedsAction,
            _ => Self::Unknown,
        }
    }
}

/// A participant on a mirrored event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attendee {
    /// The attendee's email address.
    pub email: String,
    /// The attendee's display name, if available.
    pub display_name: Option<String>,
    /// Whether this attendee is the organizer.
    pub organizer: bool,
    /// Whether this attendee is optional.
    pub optional: bool,
    /// The attendee's response status.
    pub response_status: ResponseStatus,
}

impl Attendee {
    /// Creates a new attendee with the given email.
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            display_name: None,
            organizer: false,
            optional: false,
            response_status: ResponseStatus::Unknown,
        }
    }

    /// Builder method to set the response status.
    pub fn with_response(mut self, status: ResponseStatus) -> Self {
        self.response_status = status;
        self
    }
}
