//! Scripted remote and wiring shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use crmsync_engine::{
    ChannelLocks, ChannelManager, EngineConfig, MemoryStore, Notification, ResourceState,
    RetryPolicy, SyncChannel, SyncEngine, SyncStateStore, SyncStore,
};
use crmsync_remote::{
    BoxFuture, ChangePage, RemoteClient, RemoteError, RemoteErrorCode, RemoteEvent,
    RemoteResult, WatchRequest, WatchResponse,
};

pub const WEBHOOK: &str = "https://crm.example.com/hooks/calendar";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Watch,
    Stop,
    ListAll,
    ListChanges,
}

impl Op {
    fn prefix(self) -> &'static str {
        match self {
            Self::Watch => "watch",
            Self::Stop => "stop",
            Self::ListAll => "list_all",
            Self::ListChanges => "list_changes",
        }
    }
}

struct Script {
    full: HashMap<Option<String>, ChangePage>,
    changes: HashMap<(String, Option<String>), ChangePage>,
    expired: HashSet<String>,
    /// (call prefix, code) pairs, consumed in order.
    failures: VecDeque<(String, RemoteErrorCode)>,
    calls: Vec<String>,
    stopped: Vec<String>,
    watch_ttl: chrono::Duration,
    delay: Duration,
}

/// A [`RemoteClient`] that replays scripted pages and records every call.
pub struct ScriptedRemote {
    script: Mutex<Script>,
}

impl ScriptedRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Script {
                full: HashMap::new(),
                changes: HashMap::new(),
                expired: HashSet::new(),
                failures: VecDeque::new(),
                calls: Vec::new(),
                stopped: Vec::new(),
                watch_ttl: chrono::Duration::days(7),
                delay: Duration::ZERO,
            }),
        })
    }

    fn with<R>(&self, f: impl FnOnce(&mut Script) -> R) -> R {
        f(&mut self.script.lock().unwrap())
    }

    /// Scripts the full-listing page served for `page_token`.
    pub fn full_page(&self, page_token: Option<&str>, page: ChangePage) {
        self.with(|s| s.full.insert(page_token.map(str::to_string), page));
    }

    /// Scripts the change page served for `(sync_token, page_token)`.
    pub fn change_page(&self, sync_token: &str, page_token: Option<&str>, page: ChangePage) {
        self.with(|s| {
            s.changes
                .insert((sync_token.to_string(), page_token.map(str::to_string)), page)
        });
    }

    /// Makes the remote answer 410 for `sync_token` from now on.
    pub fn expire_token(&self, sync_token: &str) {
        self.with(|s| s.expired.insert(sync_token.to_string()));
    }

    /// Fails the next call of `op` with `code`.
    pub fn fail_next(&self, op: Op, code: RemoteErrorCode) {
        self.fail_call(op.prefix(), code, 1);
    }

    /// Fails the next `times` calls whose description starts with `call`
    /// (e.g. `"list_changes:T1:p2"`).
    pub fn fail_call(&self, call: &str, code: RemoteErrorCode, times: usize) {
        self.with(|s| {
            for _ in 0..times {
                s.failures.push_back((call.to_string(), code));
            }
        });
    }

    pub fn set_delay(&self, delay: Duration) {
        self.with(|s| s.delay = delay);
    }

    pub fn set_watch_ttl(&self, ttl: chrono::Duration) {
        self.with(|s| s.watch_ttl = ttl);
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    /// Calls whose description starts with `prefix`.
    pub fn calls_to(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.with(|s| s.stopped.clone())
    }

    /// Records the call and pops the first scripted failure matching it.
    fn enter(&self, call: String) -> (Option<RemoteError>, Duration) {
        self.with(|s| {
            let failure = s
                .failures
                .iter()
                .position(|(prefix, _)| call.starts_with(prefix.as_str()))
                .and_then(|i| s.failures.remove(i))
                .map(|(_, code)| RemoteError::new(code, "scripted failure").with_remote("scripted"));
            s.calls.push(call);
            (failure, s.delay)
        })
    }
}

fn describe(token: Option<&str>) -> &str {
    token.unwrap_or("-")
}

impl RemoteClient for ScriptedRemote {
    fn name(&self) -> &str {
        "scripted"
    }

    fn watch(&self, request: WatchRequest) -> BoxFuture<'_, RemoteResult<WatchResponse>> {
        Box::pin(async move {
            let (failure, _) = self.enter(format!("watch:{}", request.collection_id));
            if let Some(e) = failure {
                return Err(e);
            }
            let ttl = self.with(|s| s.watch_ttl);
            Ok(WatchResponse {
                resource_id: format!("res-{}", request.collection_id),
                expiration: Utc::now() + ttl,
            })
        })
    }

    fn stop_channel<'a>(
        &'a self,
        _resource_id: &'a str,
        channel_id: &'a str,
    ) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move {
            let (failure, _) = self.enter(format!("stop:{channel_id}"));
            if let Some(e) = failure {
                return Err(e);
            }
            self.with(|s| s.stopped.push(channel_id.to_string()));
            Ok(())
        })
    }

    fn list_changes<'a>(
        &'a self,
        _collection_id: &'a str,
        sync_token: &'a str,
        page_token: Option<&'a str>,
    ) -> BoxFuture<'a, RemoteResult<ChangePage>> {
        Box::pin(async move {
            let call = format!("list_changes:{sync_token}:{}", describe(page_token));
            let (failure, delay) = self.enter(call);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(e) = failure {
                return Err(e);
            }
            self.with(|s| {
                if s.expired.contains(sync_token) {
                    return Err(RemoteError::token_expired("410 Gone"));
                }
                s.changes
                    .get(&(sync_token.to_string(), page_token.map(str::to_string)))
                    .cloned()
                    .ok_or_else(|| RemoteError::bad_request(format!("unscripted changes {sync_token}")))
            })
        })
    }

    fn list_all<'a>(
        &'a self,
        _collection_id: &'a str,
        page_token: Option<&'a str>,
    ) -> BoxFuture<'a, RemoteResult<ChangePage>> {
        Box::pin(async move {
            let call = format!("list_all:{}", describe(page_token));
            let (failure, delay) = self.enter(call);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(e) = failure {
                return Err(e);
            }
            self.with(|s| {
                s.full
                    .get(&page_token.map(str::to_string))
                    .cloned()
                    .ok_or_else(|| RemoteError::bad_request("unscripted listing"))
            })
        })
    }
}

/// Engine, manager and store wired to one scripted remote.
pub struct Harness {
    pub remote: Arc<ScriptedRemote>,
    pub store: Arc<dyn SyncStore>,
    pub locks: Arc<ChannelLocks>,
    pub manager: Arc<ChannelManager>,
    pub engine: Arc<SyncEngine>,
}

pub fn config() -> EngineConfig {
    EngineConfig::new(WEBHOOK)
        .with_request_timeout(Duration::from_secs(5))
        .with_retry(RetryPolicy::default().with_backoff(
            Duration::from_millis(1),
            Duration::from_millis(5),
            2.0,
        ))
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), config())
    }

    pub fn with_store(store: Arc<dyn SyncStore>, config: EngineConfig) -> Self {
        Self::with_remote(ScriptedRemote::new(), store, config)
    }

    pub fn with_remote(
        remote: Arc<ScriptedRemote>,
        store: Arc<dyn SyncStore>,
        config: EngineConfig,
    ) -> Self {
        let locks = Arc::new(ChannelLocks::new());
        let client: Arc<dyn RemoteClient> = remote.clone();
        let manager = Arc::new(ChannelManager::new(
            client.clone(),
            store.clone(),
            locks.clone(),
            config.clone(),
        ));
        let engine = Arc::new(SyncEngine::new(client, store.clone(), locks.clone(), config));
        Self {
            remote,
            store,
            locks,
            manager,
            engine,
        }
    }

    pub async fn register(&self, collection_id: &str) -> SyncChannel {
        self.manager.register(collection_id).await.unwrap()
    }

    pub fn channel(&self, channel_id: &str) -> SyncChannel {
        self.store.get_channel(channel_id).unwrap().unwrap()
    }
}

/// A change notification for `channel` as the remote would send it.
pub fn changed(channel: &SyncChannel) -> Notification {
    Notification::new(&channel.channel_id, ResourceState::Exists, &channel.resource_id)
}

/// A live event with a fixed modification time.
pub fn event(id: &str, title: &str) -> RemoteEvent {
    RemoteEvent::new(id)
        .with_summary(title)
        .with_updated(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap())
}

/// A cancelled item modified after [`event`].
pub fn cancelled(id: &str) -> RemoteEvent {
    RemoteEvent::cancelled(id).with_updated(Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap())
}
