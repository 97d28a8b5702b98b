//! In-memory store.
//!
//! Used by tests and single-process setups that can afford to resync from
//! scratch after a restart.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{MirrorStore, PageCommit, PageReport, SyncStateStore, SyncStore};
use crate::channel::SyncChannel;
use crate::error::{StoreError, StoreResult};
use crate::mirror::{MirrorEvent, merge};

#[derive(Debug, Default)]
struct Inner {
    channels: HashMap<String, SyncChannel>,
    /// Keyed by (collection_id, remote_id).
    events: BTreeMap<(String, String), MirrorEvent>,
}

/// A [`SyncStore`] held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| StoreError::Poisoned)
    }
}

fn oldest_first(mut channels: Vec<SyncChannel>) -> Vec<SyncChannel> {
    channels.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.channel_id.cmp(&b.channel_id))
    });
    channels
}

impl SyncStateStore for MemoryStore {
    fn insert_channel(&self, channel: &SyncChannel) -> StoreResult<()> {
        let mut inner = self.write()?;
        if inner.channels.contains_key(&channel.channel_id) {
            return Err(StoreError::DuplicateChannel {
                channel_id: channel.channel_id.clone(),
            });
        }
        inner
            .channels
            .insert(channel.channel_id.clone(), channel.clone());
        Ok(())
    }

    fn replace_active(&self, channel: &SyncChannel) -> StoreResult<Option<SyncChannel>> {
        let mut inner = self.write()?;
        if inner.channels.contains_key(&channel.channel_id) {
            return Err(StoreError::DuplicateChannel {
                channel_id: channel.channel_id.clone(),
            });
        }

        let mut superseded = None;
        for existing in inner.channels.values_mut() {
            if existing.active && existing.collection_id == channel.collection_id {
                existing.active = false;
                superseded = Some(existing.clone());
            }
        }
        inner
            .channels
            .insert(channel.channel_id.clone(), channel.clone());
        Ok(superseded)
    }

    fn get_channel(&self, channel_id: &str) -> StoreResult<Option<SyncChannel>> {
        Ok(self.read()?.channels.get(channel_id).cloned())
    }

    fn active_channel_for(&self, collection_id: &str) -> StoreResult<Option<SyncChannel>> {
        Ok(self
            .read()?
            .channels
            .values()
            .find(|c| c.active && c.collection_id == collection_id)
            .cloned())
    }

    fn list_channels(&self) -> StoreResult<Vec<SyncChannel>> {
        Ok(oldest_first(self.read()?.channels.values().cloned().collect()))
    }

    fn deactivate(&self, channel_id: &str) -> StoreResult<bool> {
        let mut inner = self.write()?;
        let channel = inner
            .channels
            .get_mut(channel_id)
            .ok_or_else(|| StoreError::channel_not_found(channel_id))?;
        let was_active = channel.active;
        channel.active = false;
        Ok(was_active)
    }

    fn update_channel(&self, channel: &SyncChannel) -> StoreResult<()> {
        let mut inner = self.write()?;
        let slot = inner
            .channels
            .get_mut(&channel.channel_id)
            .ok_or_else(|| StoreError::channel_not_found(&channel.channel_id))?;
        if !slot.active {
            return Err(StoreError::channel_inactive(&channel.channel_id));
        }
        *slot = SyncChannel {
            active: true,
            ..channel.clone()
        };
        Ok(())
    }

    fn channels_expiring_before(&self, deadline: DateTime<Utc>) -> StoreResult<Vec<SyncChannel>> {
        Ok(oldest_first(
            self.read()?
                .channels
                .values()
                .filter(|c| c.active && c.expires_before(deadline))
                .cloned()
                .collect(),
        ))
    }
}

impl MirrorStore for MemoryStore {
    fn get_event(&self, collection_id: &str, remote_id: &str) -> StoreResult<Option<MirrorEvent>> {
        Ok(self
            .read()?
            .events
            .get(&(collection_id.to_string(), remote_id.to_string()))
            .cloned())
    }

    fn list_events(
        &self,
        collection_id: &str,
        include_cancelled: bool,
    ) -> StoreResult<Vec<MirrorEvent>> {
        Ok(self
            .read()?
            .events
            .values()
            .filter(|e| e.collection_id == collection_id)
            .filter(|e| include_cancelled || !e.is_tombstone())
            .cloned()
            .collect())
    }

    fn max_resync_epoch(&self, collection_id: &str) -> StoreResult<u64> {
        Ok(self
            .read()?
            .events
            .values()
            .filter(|e| e.collection_id == collection_id)
            .map(|e| e.resync_epoch)
            .max()
            .unwrap_or(0))
    }
}

impl SyncStore for MemoryStore {
    fn commit_page(&self, commit: &PageCommit) -> StoreResult<PageReport> {
        // The write guard is held for the whole commit; nothing below can
        // fail once the channel check passes.
        let mut inner = self.write()?;
        match inner.channels.get(&commit.channel_id) {
            None => return Err(StoreError::channel_not_found(&commit.channel_id)),
            Some(c) if !c.active => return Err(StoreError::channel_inactive(&commit.channel_id)),
            Some(_) => {}
        }

        let mut report = PageReport::default();
        for item in &commit.items {
            let key = (commit.collection_id.clone(), item.id.clone());
            let result = merge(
                inner.events.get(&key),
                item,
                &commit.collection_id,
                commit.epoch,
                commit.committed_at,
            );
            report.record(result.outcome);
            if let Some(row) = result.row {
                inner.events.insert(key, row);
            }
        }

        if commit.sweeps() {
            for event in inner.events.values_mut() {
                if event.collection_id == commit.collection_id
                    && !event.is_tombstone()
                    && event.resync_epoch != commit.epoch
                {
                    event.tombstone(commit.committed_at);
                    report.swept += 1;
                }
            }
        }

        if let Some(channel) = inner.channels.get_mut(&commit.channel_id) {
            channel.apply_commit(commit);
        }

        debug!(
            channel_id = %commit.channel_id,
            items = commit.items.len(),
            final_page = commit.cursor.is_final(),
            "committed page"
        );
        Ok(report)
    }
}
