//! Shared types for the crmsync workspace: event bounds, event status,
//! attendees, and logging setup.

pub mod event;
pub mod time;
pub mod tracing;

pub use event::{Attendee, EventStatus, ResponseStatus};
pub use time::EventTime;
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
