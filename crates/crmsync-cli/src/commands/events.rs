//! Mirrored event listing.

use crmsync_engine::{MirrorEvent, MirrorStore, SyncStore};

use super::print_json;
use crate::error::CliResult;

pub fn list(
    store: &dyn SyncStore,
    collection_id: &str,
    include_cancelled: bool,
    json: bool,
) -> CliResult<()> {
    let events = store.list_events(collection_id, include_cancelled)?;
    if json {
        return print_json(&events);
    }
    if events.is_empty() {
        println!("No events in {}.", collection_id);
        return Ok(());
    }
    for event in &events {
        println!("{}", describe(event));
    }
    Ok(())
}

fn describe(event: &MirrorEvent) -> String {
    let start = event
        .start
        .as_ref()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:<9} {:<25} {}  [{}]",
        event.status.as_str(),
        start,
        event.title.as_deref().unwrap_or("(no title)"),
        event.remote_id,
    )
}
