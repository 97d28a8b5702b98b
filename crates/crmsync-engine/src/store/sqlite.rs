//! SQLite store.
//!
//! One connection behind a mutex; every page commit is a single
//! transaction, so a crash between pages leaves the last committed cursor
//! and exactly the rows it covers.

#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)] // SQLite integers are i64

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use crmsync_core::{Attendee, EventStatus, EventTime};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use tracing::{debug, info};

use super::{MirrorStore, PageCommit, PageReport, SyncStateStore, SyncStore};
use crate::channel::{SyncChannel, SyncPhase};
use crate::error::{StoreError, StoreResult};
use crate::mirror::{MirrorEvent, merge};

/// Current schema version
const CURRENT_VERSION: i32 = 1;

const CHANNEL_COLUMNS: &str = "channel_id, resource_id, collection_id, sync_token, page_token, \
     expiration, active, phase, resync_epoch, consecutive_failures, last_error, \
     last_synced_at, created_at";

const EVENT_COLUMNS: &str = "collection_id, remote_id, title, description, location, \
     start_time, end_time, attendees, html_link, conference_uri, recurring_event_id, \
     etag, remote_updated, status, updated_at, resync_epoch";

/// A [`SyncStore`] backed by a SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path` and migrates it.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        info!(path = %path.display(), "opened sync store");
        Self::with_connection(conn)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(mut conn: Connection) -> StoreResult<Self> {
        migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

/// Runs all pending migrations.
fn migrate(conn: &mut Connection) -> StoreResult<()> {
    let version = schema_version(conn)?;
    if version < 1 {
        let tx = conn.transaction()?;
        tx.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );
            CREATE TABLE IF NOT EXISTS channels (
                channel_id TEXT PRIMARY KEY,
                resource_id TEXT NOT NULL,
                collection_id TEXT NOT NULL,
                sync_token TEXT,
                page_token TEXT,
                expiration TEXT NOT NULL,
                active INTEGER NOT NULL,
                phase TEXT NOT NULL,
                resync_epoch INTEGER NOT NULL DEFAULT 0,
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                last_synced_at TEXT,
                created_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_channels_one_active
                ON channels(collection_id) WHERE active = 1;
            CREATE TABLE IF NOT EXISTS events (
                collection_id TEXT NOT NULL,
                remote_id TEXT NOT NULL,
                title TEXT,
                description TEXT,
                location TEXT,
                start_time TEXT,
                end_time TEXT,
                attendees TEXT NOT NULL,
                html_link TEXT,
                conference_uri TEXT,
                recurring_event_id TEXT,
                etag TEXT,
                remote_updated TEXT,
                status TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                resync_epoch INTEGER NOT NULL,
                PRIMARY KEY (collection_id, remote_id)
            );
            CREATE INDEX IF NOT EXISTS idx_events_status ON events(collection_id, status);",
        )?;
        tx.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            params![CURRENT_VERSION],
        )?;
        tx.commit()?;
        debug!(version = CURRENT_VERSION, "applied schema migration");
    }
    Ok(())
}

fn schema_version(conn: &Connection) -> StoreResult<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;
    if !exists {
        return Ok(0);
    }
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?)
}

fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_timestamp(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::corrupt(format!("invalid timestamp {raw:?}: {e}")))
}

fn parse_optional_timestamp(raw: Option<String>) -> StoreResult<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_timestamp).transpose()
}

/// Raw column values of a `channels` row.
struct ChannelRow {
    channel_id: String,
    resource_id: String,
    collection_id: String,
    sync_token: Option<String>,
    page_token: Option<String>,
    expiration: String,
    active: bool,
    phase: String,
    resync_epoch: i64,
    consecutive_failures: i64,
    last_error: Option<String>,
    last_synced_at: Option<String>,
    created_at: String,
}

impl ChannelRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            channel_id: row.get(0)?,
            resource_id: row.get(1)?,
            collection_id: row.get(2)?,
            sync_token: row.get(3)?,
            page_token: row.get(4)?,
            expiration: row.get(5)?,
            active: row.get::<_, i64>(6)? != 0,
            phase: row.get(7)?,
            resync_epoch: row.get(8)?,
            consecutive_failures: row.get(9)?,
            last_error: row.get(10)?,
            last_synced_at: row.get(11)?,
            created_at: row.get(12)?,
        })
    }

    fn into_channel(self) -> StoreResult<SyncChannel> {
        Ok(SyncChannel {
            phase: self.phase.parse::<SyncPhase>().map_err(StoreError::corrupt)?,
            expiration: parse_timestamp(&self.expiration)?,
            last_synced_at: parse_optional_timestamp(self.last_synced_at)?,
            created_at: parse_timestamp(&self.created_at)?,
            channel_id: self.channel_id,
            resource_id: self.resource_id,
            collection_id: self.collection_id,
            sync_token: self.sync_token,
            page_token: self.page_token,
            active: self.active,
            resync_epoch: self.resync_epoch as u64,
            consecutive_failures: u32::try_from(self.consecutive_failures).unwrap_or(u32::MAX),
            last_error: self.last_error,
        })
    }
}

/// Raw column values of an `events` row.
struct EventRow {
    collection_id: String,
    remote_id: String,
    title: Option<String>,
    description: Option<String>,
    location: Option<String>,
    start: Option<String>,
    end: Option<String>,
    attendees: String,
    html_link: Option<String>,
    conference_uri: Option<String>,
    recurring_event_id: Option<String>,
    etag: Option<String>,
    remote_updated: Option<String>,
    status: String,
    updated_at: String,
    resync_epoch: i64,
}

impl EventRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            collection_id: row.get(0)?,
            remote_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            location: row.get(4)?,
            start: row.get(5)?,
            end: row.get(6)?,
            attendees: row.get(7)?,
            html_link: row.get(8)?,
            conference_uri: row.get(9)?,
            recurring_event_id: row.get(10)?,
            etag: row.get(11)?,
            remote_updated: row.get(12)?,
            status: row.get(13)?,
            updated_at: row.get(14)?,
            resync_epoch: row.get(15)?,
        })
    }

    fn into_event(self) -> StoreResult<MirrorEvent> {
        let start: Option<EventTime> = self.start.as_deref().map(serde_json::from_str).transpose()?;
        let end: Option<EventTime> = self.end.as_deref().map(serde_json::from_str).transpose()?;
        let attendees: Vec<Attendee> = serde_json::from_str(&self.attendees)?;
        Ok(MirrorEvent {
            status: self.status.parse::<EventStatus>().map_err(StoreError::corrupt)?,
            remote_updated: parse_optional_timestamp(self.remote_updated)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            collection_id: self.collection_id,
            remote_id: self.remote_id,
            title: self.title,
            description: self.description,
            location: self.location,
            start,
            end,
            attendees,
            html_link: self.html_link,
            conference_uri: self.conference_uri,
            recurring_event_id: self.recurring_event_id,
            etag: self.etag,
            resync_epoch: self.resync_epoch as u64,
        })
    }
}

fn load_channel(conn: &Connection, channel_id: &str) -> StoreResult<Option<SyncChannel>> {
    conn.query_row(
        &format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE channel_id = ?1"),
        params![channel_id],
        ChannelRow::read,
    )
    .optional()?
    .map(ChannelRow::into_channel)
    .transpose()
}

fn query_channels(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> StoreResult<Vec<SyncChannel>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CHANNEL_COLUMNS} FROM channels {filter} ORDER BY created_at, channel_id"
    ))?;
    let rows = stmt
        .query_map(params, ChannelRow::read)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(ChannelRow::into_channel).collect()
}

fn write_channel(conn: &Connection, channel: &SyncChannel, insert: bool) -> StoreResult<usize> {
    let sql = if insert {
        format!(
            "INSERT INTO channels ({CHANNEL_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
        )
    } else {
        "UPDATE channels SET resource_id = ?2, collection_id = ?3, sync_token = ?4, \
         page_token = ?5, expiration = ?6, active = ?7, phase = ?8, resync_epoch = ?9, \
         consecutive_failures = ?10, last_error = ?11, last_synced_at = ?12, created_at = ?13 \
         WHERE channel_id = ?1"
            .to_string()
    };
    Ok(conn.execute(
        &sql,
        params![
            channel.channel_id,
            channel.resource_id,
            channel.collection_id,
            channel.sync_token,
            channel.page_token,
            timestamp(&channel.expiration),
            channel.active as i64,
            channel.phase.as_str(),
            channel.resync_epoch as i64,
            i64::from(channel.consecutive_failures),
            channel.last_error,
            channel.last_synced_at.as_ref().map(timestamp),
            timestamp(&channel.created_at),
        ],
    )?)
}

fn insert_new_channel(conn: &Connection, channel: &SyncChannel) -> StoreResult<()> {
    if load_channel(conn, &channel.channel_id)?.is_some() {
        return Err(StoreError::DuplicateChannel {
            channel_id: channel.channel_id.clone(),
        });
    }
    write_channel(conn, channel, true)?;
    Ok(())
}

fn load_event(conn: &Connection, collection_id: &str, remote_id: &str) -> StoreResult<Option<MirrorEvent>> {
    conn.query_row(
        &format!("SELECT {EVENT_COLUMNS} FROM events WHERE collection_id = ?1 AND remote_id = ?2"),
        params![collection_id, remote_id],
        EventRow::read,
    )
    .optional()?
    .map(EventRow::into_event)
    .transpose()
}

fn upsert_event(tx: &Transaction<'_>, event: &MirrorEvent) -> StoreResult<()> {
    let start = event.start.as_ref().map(serde_json::to_string).transpose()?;
    let end = event.end.as_ref().map(serde_json::to_string).transpose()?;
    let attendees = serde_json::to_string(&event.attendees)?;
    tx.execute(
        &format!(
            "INSERT OR REPLACE INTO events ({EVENT_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
        ),
        params![
            event.collection_id,
            event.remote_id,
            event.title,
            event.description,
            event.location,
            start,
            end,
            attendees,
            event.html_link,
            event.conference_uri,
            event.recurring_event_id,
            event.etag,
            event.remote_updated.as_ref().map(timestamp),
            event.status.as_str(),
            timestamp(&event.updated_at),
            event.resync_epoch as i64,
        ],
    )?;
    Ok(())
}

impl SyncStateStore for SqliteStore {
    fn insert_channel(&self, channel: &SyncChannel) -> StoreResult<()> {
        let conn = self.lock()?;
        insert_new_channel(&conn, channel)
    }

    fn replace_active(&self, channel: &SyncChannel) -> StoreResult<Option<SyncChannel>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let previous = query_channels(
            &tx,
            "WHERE collection_id = ?1 AND active = 1",
            params![channel.collection_id],
        )?
        .into_iter()
        .next();
        tx.execute(
            "UPDATE channels SET active = 0 WHERE collection_id = ?1 AND active = 1",
            params![channel.collection_id],
        )?;
        insert_new_channel(&tx, channel)?;
        tx.commit()?;

        Ok(previous.map(|mut c| {
            c.active = false;
            c
        }))
    }

    fn get_channel(&self, channel_id: &str) -> StoreResult<Option<SyncChannel>> {
        let conn = self.lock()?;
        load_channel(&conn, channel_id)
    }

    fn active_channel_for(&self, collection_id: &str) -> StoreResult<Option<SyncChannel>> {
        let conn = self.lock()?;
        Ok(query_channels(
            &conn,
            "WHERE collection_id = ?1 AND active = 1",
            params![collection_id],
        )?
        .into_iter()
        .next())
    }

    fn list_channels(&self) -> StoreResult<Vec<SyncChannel>> {
        let conn = self.lock()?;
        query_channels(&conn, "", params![])
    }

    fn deactivate(&self, channel_id: &str) -> StoreResult<bool> {
        let conn = self.lock()?;
        let channel =
            load_channel(&conn, channel_id)?.ok_or_else(|| StoreError::channel_not_found(channel_id))?;
        if !channel.active {
            return Ok(false);
        }
        conn.execute(
            "UPDATE channels SET active = 0 WHERE channel_id = ?1",
            params![channel_id],
        )?;
        Ok(true)
    }

    fn update_channel(&self, channel: &SyncChannel) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let stored = load_channel(&tx, &channel.channel_id)?
            .ok_or_else(|| StoreError::channel_not_found(&channel.channel_id))?;
        if !stored.active {
            return Err(StoreError::channel_inactive(&channel.channel_id));
        }
        let record = SyncChannel {
            active: true,
            ..channel.clone()
        };
        write_channel(&tx, &record, false)?;
        tx.commit()?;
        Ok(())
    }

    fn channels_expiring_before(&self, deadline: DateTime<Utc>) -> StoreResult<Vec<SyncChannel>> {
        let conn = self.lock()?;
        // RFC 3339 strings in UTC do not sort reliably with varying fractions.
        Ok(query_channels(&conn, "WHERE active = 1", params![])?
            .into_iter()
            .filter(|c| c.expires_before(deadline))
            .collect())
    }
}

impl MirrorStore for SqliteStore {
    fn get_event(&self, collection_id: &str, remote_id: &str) -> StoreResult<Option<MirrorEvent>> {
        let conn = self.lock()?;
        load_event(&conn, collection_id, remote_id)
    }

    fn list_events(
        &self,
        collection_id: &str,
        include_cancelled: bool,
    ) -> StoreResult<Vec<MirrorEvent>> {
        let conn = self.lock()?;
        let filter = if include_cancelled {
            ""
        } else {
            "AND status != 'cancelled'"
        };
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE collection_id = ?1 {filter} ORDER BY remote_id"
        ))?;
        let rows = stmt
            .query_map(params![collection_id], EventRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(EventRow::into_event).collect()
    }

    fn max_resync_epoch(&self, collection_id: &str) -> StoreResult<u64> {
        let conn = self.lock()?;
        let epoch: i64 = conn.query_row(
            "SELECT COALESCE(MAX(resync_epoch), 0) FROM events WHERE collection_id = ?1",
            params![collection_id],
            |row| row.get(0),
        )?;
        Ok(epoch as u64)
    }
}

impl SyncStore for SqliteStore {
    fn commit_page(&self, commit: &PageCommit) -> StoreResult<PageReport> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let mut channel = load_channel(&tx, &commit.channel_id)?
            .ok_or_else(|| StoreError::channel_not_found(&commit.channel_id))?;
        if !channel.active {
            return Err(StoreError::channel_inactive(&commit.channel_id));
        }

        let mut report = PageReport::default();
        for item in &commit.items {
            let existing = load_event(&tx, &commit.collection_id, &item.id)?;
            let result = merge(
                existing.as_ref(),
                item,
                &commit.collection_id,
                commit.epoch,
                commit.committed_at,
            );
            report.record(result.outcome);
            if let Some(row) = result.row {
                upsert_event(&tx, &row)?;
            }
        }

        if commit.sweeps() {
            report.swept = tx.execute(
                "UPDATE events SET status = ?1, updated_at = ?2 \
                 WHERE collection_id = ?3 AND status != ?1 AND resync_epoch != ?4",
                params![
                    EventStatus::Cancelled.as_str(),
                    timestamp(&commit.committed_at),
                    commit.collection_id,
                    commit.epoch as i64,
                ],
            )?;
        }

        channel.apply_commit(commit);
        write_channel(&tx, &channel, false)?;
        tx.commit()?;

        debug!(
            channel_id = %commit.channel_id,
            items = commit.items.len(),
            final_page = commit.cursor.is_final(),
            "committed page"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Cursor, contract};
    use chrono::Duration;
    use crmsync_remote::RemoteEvent;

    #[test]
    fn sqlite_store_contract() {
        contract::run_all(|| SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn migration_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_channel(&contract::channel("a", "primary")).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let conn = store.lock().unwrap();
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_VERSION);
        drop(conn);
        assert!(store.get_channel("a").unwrap().is_some());
    }

    #[test]
    fn channel_round_trip_preserves_fields() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut channel = contract::channel("a", "team@example.com");
        channel.sync_token = Some("T9".to_string());
        channel.page_token = Some("p3".to_string());
        channel.resync_epoch = 4;
        channel.last_synced_at = Some(Utc::now() - Duration::minutes(2));
        channel.record_failure("rate_limited: quota exceeded");
        store.insert_channel(&channel).unwrap();

        assert_eq!(store.get_channel("a").unwrap().unwrap(), channel);
    }

    #[test]
    fn event_round_trip_preserves_fields() {
        let store = SqliteStore::open_in_memory().unwrap();
        let channel = contract::channel("a", "primary");
        store.insert_channel(&channel).unwrap();

        let start = EventTime::from_utc(Utc::now());
        let end = EventTime::from_date(chrono::NaiveDate::from_ymd_opt(2024, 3, 16).unwrap());
        let item = RemoteEvent::new("e1")
            .with_summary("Renewal call")
            .with_description("Discuss contract")
            .with_times(start.clone(), end.clone())
            .with_attendee(Attendee::new("ana@example.com"))
            .with_updated(Utc::now());
        store
            .commit_page(&contract::commit(&channel, vec![item.clone()], Cursor::Sync("T1".into())))
            .unwrap();

        let row = store.get_event("primary", "e1").unwrap().unwrap();
        assert_eq!(row.title.as_deref(), Some("Renewal call"));
        assert_eq!(row.start, Some(start));
        assert_eq!(row.end, Some(end));
        assert_eq!(row.attendees, item.attendees);
        assert_eq!(row.remote_updated, item.updated);
        assert_eq!(row.status, EventStatus::Confirmed);
    }

    #[test]
    fn second_active_channel_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_channel(&contract::channel("a", "primary")).unwrap();
        assert!(matches!(
            store.insert_channel(&contract::channel("b", "primary")),
            Err(StoreError::Sqlite(_))
        ));
    }
}
