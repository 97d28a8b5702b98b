//! Channel commands.

use crmsync_engine::{SyncChannel, SyncStateStore, SyncStore};

use super::{App, print_json};
use crate::error::{CliError, CliResult};

pub async fn register(app: &App, collection_id: &str) -> CliResult<()> {
    let channel = app.manager.register(collection_id).await?;
    println!("registered {}", channel.channel_id);
    println!("  collection: {}", channel.collection_id);
    println!("  resource:   {}", channel.resource_id);
    println!("  expires:    {}", channel.expiration.to_rfc3339());
    Ok(())
}

pub async fn stop(app: &App, channel_id: &str) -> CliResult<()> {
    app.manager.stop(channel_id).await?;
    println!("stopped {}", channel_id);
    Ok(())
}

pub async fn renew(app: &App, channel_id: &str) -> CliResult<()> {
    let channel = app.manager.renew(channel_id).await?;
    println!("renewed {} as {}", channel_id, channel.channel_id);
    println!("  expires: {}", channel.expiration.to_rfc3339());
    Ok(())
}

pub fn list(store: &dyn SyncStore, all: bool, json: bool) -> CliResult<()> {
    let channels: Vec<SyncChannel> = store
        .list_channels()?
        .into_iter()
        .filter(|c| all || c.active)
        .collect();

    if json {
        return print_json(&channels);
    }
    if channels.is_empty() {
        println!("No channels.");
        return Ok(());
    }
    for channel in &channels {
        println!("{}", describe(channel));
    }
    Ok(())
}

fn describe(channel: &SyncChannel) -> String {
    let mut line = format!(
        "{}  {:<12} {:<10} expires {}",
        channel.channel_id,
        channel.collection_id,
        channel.phase.as_str(),
        channel.expiration.format("%Y-%m-%d %H:%M UTC"),
    );
    if !channel.active {
        line.push_str("  (inactive)");
    }
    if channel.consecutive_failures > 0 {
        line.push_str(&format!("  failures={}", channel.consecutive_failures));
    }
    if let Some(error) = &channel.last_error {
        line.push_str(&format!("  last_error={:?}", error));
    }
    line
}

/// Resolves the channels a `sync` run targets.
pub(crate) fn targets(
    store: &dyn SyncStore,
    channel_id: Option<&str>,
    collection_id: Option<&str>,
) -> CliResult<Vec<String>> {
    if let Some(id) = channel_id {
        return Ok(vec![id.to_string()]);
    }
    if let Some(collection) = collection_id {
        let channel = store.active_channel_for(collection)?.ok_or_else(|| {
            CliError::config(format!("no active channel for collection {:?}", collection))
        })?;
        return Ok(vec![channel.channel_id]);
    }
    Ok(store
        .list_channels()?
        .into_iter()
        .filter(|c| c.active)
        .map(|c| c.channel_id)
        .collect())
}
