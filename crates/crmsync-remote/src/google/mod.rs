//! Google Calendar implementation of [`RemoteClient`](crate::RemoteClient).
//!
//! Push notifications are registered with `events.watch`, torn down with
//! `channels.stop`, and changes are read with `events.list` using
//! `syncToken`/`pageToken`. A `410 Gone` is reported as
//! [`RemoteErrorCode::TokenExpired`](crate::RemoteErrorCode::TokenExpired).
//!
//! ```ignore
//! use crmsync_remote::google::{GoogleCalendarClient, GoogleConfig};
//!
//! let client = GoogleCalendarClient::new(GoogleConfig::new(token).with_page_size(250))?;
//! let page = client.list_all("primary", None).await?;
//! ```

mod client;
mod config;

pub use client::GoogleCalendarClient;
pub use config::GoogleConfig;
