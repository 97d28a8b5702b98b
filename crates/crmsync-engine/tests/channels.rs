//! Channel registration, teardown and renewal.

mod common;

use std::time::Duration;

use common::{Harness, Op, changed, event};
use crmsync_engine::{
    NotificationOutcome, RenewalConfig, RenewalTask, Shutdown, SyncError, SyncPhase,
    SyncStateStore,
};
use crmsync_remote::{ChangePage, RemoteErrorCode};

#[tokio::test]
async fn register_persists_active_channel() {
    let h = Harness::new();
    let channel = h.register("primary").await;

    assert!(channel.active);
    assert_eq!(channel.collection_id, "primary");
    assert_eq!(channel.resource_id, "res-primary");
    assert_eq!(channel.phase, SyncPhase::Uninitialized);
    assert!(channel.sync_token.is_none());

    assert_eq!(h.channel(&channel.channel_id), channel);
    assert_eq!(
        h.store.active_channel_for("primary").unwrap().unwrap().channel_id,
        channel.channel_id
    );
    assert_eq!(h.remote.calls(), ["watch:primary"]);
}

#[tokio::test]
async fn register_supersedes_previous_channel() {
    let h = Harness::new();
    let first = h.register("primary").await;
    let second = h.register("primary").await;
    assert_ne!(first.channel_id, second.channel_id);

    assert!(!h.channel(&first.channel_id).active);
    assert!(h.channel(&second.channel_id).active);
    assert_eq!(h.remote.stopped(), [first.channel_id.clone()]);

    let active: Vec<_> = h
        .store
        .list_channels()
        .unwrap()
        .into_iter()
        .filter(|c| c.active)
        .collect();
    assert_eq!(active.len(), 1);

    // Late notifications for the old channel are dropped.
    assert!(matches!(
        h.engine.handle_notification(&changed(&first)).await.unwrap(),
        NotificationOutcome::Discarded(_)
    ));
}

#[tokio::test]
async fn refused_watch_persists_nothing() {
    let h = Harness::new();
    h.remote.fail_next(Op::Watch, RemoteErrorCode::AuthorizationFailed);
    h.remote.fail_next(Op::Watch, RemoteErrorCode::AuthorizationFailed);
    h.remote.fail_next(Op::Watch, RemoteErrorCode::AuthorizationFailed);

    let err = h.manager.register("primary").await.unwrap_err();
    assert_eq!(
        err.as_remote().unwrap().code(),
        RemoteErrorCode::AuthorizationFailed
    );
    assert!(h.store.list_channels().unwrap().is_empty());
    assert!(h.store.active_channel_for("primary").unwrap().is_none());
}

#[tokio::test]
async fn bad_watch_request_is_not_retried() {
    let h = Harness::new();
    h.remote.fail_next(Op::Watch, RemoteErrorCode::BadRequest);

    assert!(h.manager.register("primary").await.is_err());
    assert_eq!(h.remote.calls_to("watch").len(), 1);
    assert!(h.store.list_channels().unwrap().is_empty());
}

#[tokio::test]
async fn transient_watch_failure_is_retried() {
    let h = Harness::new();
    h.remote.fail_next(Op::Watch, RemoteErrorCode::ServerError);

    let channel = h.register("primary").await;
    assert_eq!(h.remote.calls_to("watch").len(), 2);
    assert!(h.channel(&channel.channel_id).active);
}

#[tokio::test]
async fn stop_deactivates_channel() {
    let h = Harness::new();
    let channel = h.register("primary").await;

    h.manager.stop(&channel.channel_id).await.unwrap();
    assert!(!h.channel(&channel.channel_id).active);
    assert_eq!(h.remote.stopped(), [channel.channel_id.clone()]);
    assert!(h.store.active_channel_for("primary").unwrap().is_none());

    // Stopping again is a no-op.
    h.manager.stop(&channel.channel_id).await.unwrap();
    assert_eq!(h.remote.calls_to("stop").len(), 1);
}

#[tokio::test]
async fn stop_unknown_channel_fails() {
    let h = Harness::new();
    assert!(matches!(
        h.manager.stop("missing").await,
        Err(SyncError::UnknownChannel { .. })
    ));
}

#[tokio::test]
async fn remote_stop_failure_still_deactivates() {
    let h = Harness::new();
    let channel = h.register("primary").await;
    h.remote.fail_next(Op::Stop, RemoteErrorCode::NotFound);

    h.manager.stop(&channel.channel_id).await.unwrap();
    assert!(!h.channel(&channel.channel_id).active);
    assert!(h.remote.stopped().is_empty());
}

#[tokio::test]
async fn renew_carries_sync_position() {
    let h = Harness::new();
    h.remote
        .full_page(None, ChangePage::last(vec![event("a", "Alpha")], "T1"));
    let old = h.register("primary").await;
    h.engine.apply_delta(&old.channel_id).await.unwrap();

    let renewed = h.manager.renew(&old.channel_id).await.unwrap();
    assert_ne!(renewed.channel_id, old.channel_id);
    assert_eq!(renewed.sync_token.as_deref(), Some("T1"));
    assert_eq!(renewed.resync_epoch, 1);
    assert_eq!(renewed.phase, SyncPhase::Synced);
    assert!(renewed.last_synced_at.is_some());

    assert!(!h.channel(&old.channel_id).active);
    assert_eq!(h.channel(&renewed.channel_id), renewed);
    assert_eq!(h.remote.stopped(), [old.channel_id.clone()]);

    // The renewed channel continues incrementally.
    h.remote
        .change_page("T1", None, ChangePage::last(vec![event("b", "Beta")], "T2"));
    let report = h.engine.apply_delta(&renewed.channel_id).await.unwrap();
    assert!(!report.full_resync);
    assert_eq!(report.inserted, 1);
}

#[tokio::test]
async fn renew_rejects_inactive_channel() {
    let h = Harness::new();
    let channel = h.register("primary").await;
    h.manager.stop(&channel.channel_id).await.unwrap();

    assert!(matches!(
        h.manager.renew(&channel.channel_id).await,
        Err(SyncError::InactiveChannel { .. })
    ));
    assert!(matches!(
        h.manager.renew("missing").await,
        Err(SyncError::UnknownChannel { .. })
    ));
}

#[tokio::test]
async fn renewal_pass_renews_expiring_channels() {
    let h = Harness::new();
    h.remote.set_watch_ttl(chrono::Duration::minutes(10));
    let expiring = h.register("primary").await;
    h.remote.set_watch_ttl(chrono::Duration::days(7));
    let fresh = h.register("team").await;

    let task = RenewalTask::new(
        h.manager.clone(),
        h.store.clone(),
        RenewalConfig::default().with_margin(Duration::from_secs(3600)),
    );
    let report = task.renew_due().await.unwrap();

    assert_eq!(report.renewed.len(), 1);
    assert_eq!(report.renewed[0].0, expiring.channel_id);
    assert!(report.failed.is_empty());
    assert!(h.channel(&fresh.channel_id).active);
    assert!(!h.channel(&expiring.channel_id).active);

    // Nothing left to do on the next pass.
    let report = task.renew_due().await.unwrap();
    assert!(report.renewed.is_empty());
}

#[tokio::test]
async fn failed_renewal_is_reported() {
    let h = Harness::new();
    h.remote.set_watch_ttl(chrono::Duration::minutes(10));
    let channel = h.register("primary").await;
    h.remote
        .fail_call("watch", RemoteErrorCode::ServerError, 3);

    let task = RenewalTask::new(h.manager.clone(), h.store.clone(), RenewalConfig::default());
    let report = task.renew_due().await.unwrap();

    assert!(report.renewed.is_empty());
    assert_eq!(report.failed, [channel.channel_id.clone()]);
    assert!(h.channel(&channel.channel_id).active);
}

#[tokio::test]
async fn renewal_task_stops_on_shutdown() {
    let h = Harness::new();
    let task = RenewalTask::new(
        h.manager.clone(),
        h.store.clone(),
        RenewalConfig::default().with_check_interval(Duration::from_secs(3600)),
    );
    let shutdown = Shutdown::new();
    let handle = tokio::spawn(task.run(shutdown.signal()));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!handle.is_finished());

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("renewal task should stop")
        .unwrap();
}
