//! Per-channel mutual exclusion.
//!
//! Delta application, registration and teardown of one channel never
//! overlap; different channels proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Hands out one async mutex per channel id.
#[derive(Debug, Default)]
pub struct ChannelLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ChannelLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `channel_id`.
    pub async fn lock(&self, channel_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(channel_id.to_string())
                .or_default()
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drops entries nobody holds or waits on.
    pub fn prune(&self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Number of tracked channels.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
