//! Channel lifecycle: registration, teardown and renewal.

use std::sync::Arc;

use crmsync_remote::{RemoteClient, WatchRequest};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::SyncChannel;
use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::locks::ChannelLocks;
use crate::retry::with_timeout;
use crate::store::SyncStore;

/// Creates, stops and renews watch channels.
pub struct ChannelManager {
    remote: Arc<dyn RemoteClient>,
    store: Arc<dyn SyncStore>,
    locks: Arc<ChannelLocks>,
    config: EngineConfig,
}

impl ChannelManager {
    /// Creates a manager sharing `locks` with the engine that applies deltas.
    pub fn new(
        remote: Arc<dyn RemoteClient>,
        store: Arc<dyn SyncStore>,
        locks: Arc<ChannelLocks>,
        config: EngineConfig,
    ) -> Self {
        Self {
            remote,
            store,
            locks,
            config,
        }
    }

    /// Registers a new channel for `collection_id`, superseding any active one.
    ///
    /// Nothing is persisted if the remote refuses the watch.
    pub async fn register(&self, collection_id: &str) -> SyncResult<SyncChannel> {
        let channel = self.watch(collection_id).await?;

        let previous = self.store.active_channel_for(collection_id)?;
        let superseded = {
            let _guard = match &previous {
                Some(p) => Some(self.locks.lock(&p.channel_id).await),
                None => None,
            };
            self.persist(&channel).await?
        };

        if let Some(old) = superseded {
            self.stop_remote(&old).await;
        }
        self.locks.prune();

        info!(
            channel_id = %channel.channel_id,
            collection_id,
            expiration = %channel.expiration,
            "registered channel"
        );
        Ok(channel)
    }

    /// Stops a channel. The remote teardown is best-effort; the local record
    /// is deactivated regardless.
    pub async fn stop(&self, channel_id: &str) -> SyncResult<()> {
        {
            let _guard = self.locks.lock(channel_id).await;
            let channel = self
                .store
                .get_channel(channel_id)?
                .ok_or_else(|| SyncError::unknown_channel(channel_id))?;

            if channel.active {
                self.stop_remote(&channel).await;
                self.store.deactivate(channel_id)?;
                info!(channel_id, collection_id = %channel.collection_id, "stopped channel");
            } else {
                debug!(channel_id, "channel already inactive");
            }
        }
        self.locks.prune();
        Ok(())
    }

    /// Replaces a channel with a fresh registration that continues from the
    /// old one's checkpoint.
    pub async fn renew(&self, channel_id: &str) -> SyncResult<SyncChannel> {
        let renewed = {
            let _guard = self.locks.lock(channel_id).await;
            let old = self
                .store
                .get_channel(channel_id)?
                .ok_or_else(|| SyncError::unknown_channel(channel_id))?;
            if !old.active {
                return Err(SyncError::inactive_channel(channel_id));
            }

            let renewed = self.watch(&old.collection_id).await?.continuing(&old);
            if let Some(superseded) = self.persist(&renewed).await? {
                self.stop_remote(&superseded).await;
            }
            renewed
        };
        self.locks.prune();

        info!(
            old_channel_id = channel_id,
            channel_id = %renewed.channel_id,
            expiration = %renewed.expiration,
            "renewed channel"
        );
        Ok(renewed)
    }

    /// Asks the remote for a new channel; the record is not yet stored.
    async fn watch(&self, collection_id: &str) -> SyncResult<SyncChannel> {
        let channel_id = Uuid::new_v4().to_string();
        let mut request = WatchRequest::new(&channel_id, collection_id, &self.config.webhook_address);
        if let Some(token) = &self.config.webhook_token {
            request = request.with_token(token);
        }
        if let Some(ttl) = self.config.channel_ttl {
            request = request.with_ttl(ttl);
        }

        let response = self
            .config
            .retry
            .run("watch", || {
                with_timeout(self.config.request_timeout, self.remote.watch(request.clone()))
            })
            .await?;

        Ok(SyncChannel::new(
            channel_id,
            response.resource_id,
            collection_id,
            response.expiration,
        ))
    }

    /// Stores `channel` as the active one for its collection. If that fails
    /// the just-created remote channel is torn down again.
    async fn persist(&self, channel: &SyncChannel) -> SyncResult<Option<SyncChannel>> {
        match self.store.replace_active(channel) {
            Ok(superseded) => Ok(superseded),
            Err(e) => {
                self.stop_remote(channel).await;
                Err(e.into())
            }
        }
    }

    async fn stop_remote(&self, channel: &SyncChannel) {
        let result = with_timeout(
            self.config.request_timeout,
            self.remote
                .stop_channel(&channel.resource_id, &channel.channel_id),
        )
        .await;
        if let Err(e) = result {
            warn!(
                channel_id = %channel.channel_id,
                error = %e,
                "failed to stop channel remotely"
            );
        }
    }
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManager")
            .field("remote", &self.remote.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
