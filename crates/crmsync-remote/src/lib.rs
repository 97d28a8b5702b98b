//! Remote calendar access for crmsync.
//!
//! - [`RemoteClient`] - The seam the sync engine talks to
//! - [`RemoteEvent`] - One item of a change page
//! - [`ChangePage`] - A page of changes plus its continuation tokens
//! - [`RemoteError`] - Error type, with [`RemoteErrorCode::TokenExpired`]
//!   marking a rejected sync token
//!
//! With the `google` feature (default), [`google::GoogleCalendarClient`]
//! implements the trait against Google Calendar API v3.

pub mod client;
pub mod error;
#[cfg(feature = "google")]
pub mod google;
pub mod remote_event;

pub use client::{BoxFuture, ChangePage, RemoteClient, WatchRequest, WatchResponse};
pub use error::{RemoteError, RemoteErrorCode, RemoteResult};
pub use remote_event::RemoteEvent;
