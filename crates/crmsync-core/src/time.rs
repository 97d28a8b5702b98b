//! Time types for mirrored events.
//!
//! [`EventTime`] represents an event bound that is either a specific instant
//! or an all-day date, exactly as the remote calendar reports it.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// The start or end of a calendar event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EventTime {
    /// A specific datetime, stored in UTC.
    DateTime(DateTime<Utc>),
    /// An all-day event date (no specific time).
    AllDay(NaiveDate),
}

impl EventTime {
    /// Creates a new `EventTime::DateTime` from a UTC datetime.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self::DateTime(dt)
    }

    /// Creates a new `EventTime::AllDay` from a date.
    pub fn from_date(date: NaiveDate) -> Self {
        Self::AllDay(date)
    }

    /// Parses the two shapes the Calendar API uses: an RFC 3339 `dateTime`
    /// or a `YYYY-MM-DD` `date`. `dateTime` wins when both are present.
    pub fn parse(date_time: Option<&str>, date: Option<&str>) -> Result<Self, String> {
        match (date_time, date) {
            (Some(dt), _) => DateTime::parse_from_rfc3339(dt)
                .map(|parsed| Self::DateTime(parsed.with_timezone(&Utc)))
                .map_err(|e| format!("invalid dateTime {dt:?}: {e}")),
            (None, Some(d)) => NaiveDate::parse_from_str(d, "%Y-%m-%d")
                .map(Self::AllDay)
                .map_err(|e| format!("invalid date {d:?}: {e}")),
            (None, None) => Err("neither dateTime nor date present".to_string()),
        }
    }

    /// Returns `true` if this is an all-day event time.
    pub fn is_all_day(&self) -> bool {
        matches!(self, Self::AllDay(_))
    }

    /// Converts to a UTC datetime for ordering.
    ///
    /// All-day dates map to midnight UTC.
    pub fn to_utc_datetime(&self) -> DateTime<Utc> {
        match self {
            Self::DateTime(dt) => *dt,
            Self::AllDay(date) => date.and_time(NaiveTime::MIN).and_utc(),
        }
    }
}

impl PartialOrd for EventTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_utc_datetime().cmp(&other.to_utc_datetime())
    }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DateTime(dt) => write!(f, "{}", dt.to_rfc3339_opts(SecondsFormat::Secs, true)),
            Self::AllDay(date) => write!(f, "{}", date.format("%Y-%m-%d")),
        }
    }
}
