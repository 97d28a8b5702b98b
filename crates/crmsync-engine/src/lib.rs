//! Incremental calendar sync engine.
//!
//! This crate keeps a local mirror of remote calendar collections current
//! from webhook notifications:
//! - [`ChannelManager`] registers, stops and renews watch channels
//! - [`SyncEngine`] applies change pages with per-page checkpoints, falls back
//!   to a full resync when the remote rejects a sync token, and serializes
//!   work per channel
//! - [`SyncStore`] persists channel state and mirrored events, in memory or
//!   in SQLite
//! - [`RenewalTask`] re-registers channels before they expire
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use crmsync_engine::{ChannelLocks, ChannelManager, EngineConfig, Notification, SqliteStore, SyncEngine};
//!
//! let store = Arc::new(SqliteStore::open("sync.db")?);
//! let locks = Arc::new(ChannelLocks::new());
//! let config = EngineConfig::new("https://crm.example.com/hooks/calendar");
//! let manager = ChannelManager::new(remote.clone(), store.clone(), locks.clone(), config.clone());
//! let engine = SyncEngine::new(remote, store, locks, config);
//!
//! let channel = manager.register("primary").await?;
//! let outcome = engine.handle_notification(&Notification::from_headers(headers)?).await?;
//! ```

mod channel;
mod config;
mod engine;
mod error;
mod locks;
mod manager;
mod mirror;
mod renewal;
mod retry;
mod shutdown;
pub mod store;

pub use channel::{DEFAULT_COLLECTION, SyncChannel, SyncPhase};
pub use config::EngineConfig;
pub use engine::{
    DeltaReport, DiscardReason, Notification, NotificationOutcome, ResourceState, SyncEngine,
};
pub use error::{StoreError, StoreResult, SyncError, SyncResult};
pub use locks::ChannelLocks;
pub use manager::ChannelManager;
pub use mirror::{Merge, MergeOutcome, MirrorEvent, merge};
pub use renewal::{RenewalConfig, RenewalReport, RenewalTask};
pub use retry::{RetryPolicy, with_timeout};
pub use shutdown::{Shutdown, ShutdownSignal};
pub use store::{
    Cursor, MemoryStore, MirrorStore, PageCommit, PageReport, SqliteStore, SyncStateStore,
    SyncStore,
};
