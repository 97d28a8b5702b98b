//! Command implementations and the wiring they share.

pub mod channel;
pub mod config;
pub mod events;
pub mod notify;
pub mod renew;
pub mod sync;

use std::path::Path;
use std::sync::Arc;

use crmsync_engine::{ChannelLocks, ChannelManager, SqliteStore, SyncEngine, SyncStore};
use crmsync_remote::RemoteClient;
use tracing::debug;

use crate::config::CrmsyncConfig;
use crate::error::CliResult;

/// Opens (creating if needed) the SQLite database at `path`.
pub fn open_store(path: &Path) -> CliResult<Arc<dyn SyncStore>> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    debug!(path = %path.display(), "opening store");
    Ok(Arc::new(SqliteStore::open(path)?))
}

/// Store, remote, channel manager and engine for one invocation.
pub struct App {
    pub store: Arc<dyn SyncStore>,
    pub manager: Arc<ChannelManager>,
    pub engine: SyncEngine,
}

impl App {
    /// Wires the engine against the configured remote.
    pub fn connect(config: &CrmsyncConfig, store: Arc<dyn SyncStore>) -> CliResult<Self> {
        let engine_config = config.engine_config()?;
        let remote = remote_client(config)?;
        let locks = Arc::new(ChannelLocks::new());

        let manager = Arc::new(ChannelManager::new(
            remote.clone(),
            store.clone(),
            locks.clone(),
            engine_config.clone(),
        ));
        let engine = SyncEngine::new(remote, store.clone(), locks, engine_config);
        Ok(Self {
            store,
            manager,
            engine,
        })
    }
}

#[cfg(feature = "google")]
fn remote_client(config: &CrmsyncConfig) -> CliResult<Arc<dyn RemoteClient>> {
    let client = crmsync_remote::google::GoogleCalendarClient::new(config.google_config()?)?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "google"))]
fn remote_client(_config: &CrmsyncConfig) -> CliResult<Arc<dyn RemoteClient>> {
    Err(crate::error::CliError::config(
        "crmsync was built without the `google` feature; no remote is available",
    ))
}

/// Prints `value` as pretty JSON.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
