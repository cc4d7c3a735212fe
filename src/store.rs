//! Record store for the visitor log.
//!
//! Entries are keyed by slot id. Two backends share the `RecordStore` trait:
//! a SQLite table (the default, survives restarts) and a `DashMap` that lives
//! only as long as the process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::models::{VisitorEntry, iso_timestamp, parse_timestamp};

/// Table name kept from the first deployment's document collection.
pub const TABLE: &str = "ip-adresses";

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Write `entry` into its slot, replacing whatever was there.
    async fn upsert(&self, entry: VisitorEntry) -> Result<()>;

    /// Entry owned by `session_id`, preferring one that is still open.
    async fn find_by_session(&self, session_id: &str) -> Result<Option<VisitorEntry>>;

    /// Every stored entry in slot order.
    async fn list_all(&self) -> Result<Vec<VisitorEntry>>;

    /// Stamp the departure time on the open entry of `session_id`.
    ///
    /// Returns `false` when no open entry belongs to the session, e.g. because
    /// its slot was already handed to a newer visitor.
    async fn mark_departed(&self, session_id: &str, when: DateTime<Utc>) -> Result<bool>;

    async fn count(&self) -> Result<u64>;

    /// Drop every entry in a slot at or above `capacity`. Returns how many went.
    async fn truncate(&self, capacity: u64) -> Result<u64>;
}

// In-memory backend

#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<u64, VisitorEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert(&self, entry: VisitorEntry) -> Result<()> {
        self.entries.insert(entry.slot_id, entry);
        Ok(())
    }

    async fn find_by_session(&self, session_id: &str) -> Result<Option<VisitorEntry>> {
        let mut found: Option<VisitorEntry> = None;
        for item in self.entries.iter() {
            let entry = item.value();
            if entry.session_id != session_id {
                continue;
            }
            if entry.departed_at.is_none() {
                return Ok(Some(entry.clone()));
            }
            if found.is_none() {
                found = Some(entry.clone());
            }
        }
        Ok(found)
    }

    async fn list_all(&self) -> Result<Vec<VisitorEntry>> {
        let mut all: Vec<VisitorEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|e| e.slot_id);
        Ok(all)
    }

    async fn mark_departed(&self, session_id: &str, when: DateTime<Utc>) -> Result<bool> {
        for mut item in self.entries.iter_mut() {
            let entry = item.value_mut();
            if entry.session_id == session_id && entry.departed_at.is_none() {
                entry.departed_at = Some(when);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.entries.len() as u64)
    }

    async fn truncate(&self, capacity: u64) -> Result<u64> {
        let before = self.entries.len();
        self.entries.retain(|slot, _| *slot < capacity);
        Ok((before - self.entries.len()) as u64)
    }
}

// SQLite backend - one connection, all calls on the blocking pool

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(&format!(
            r#"CREATE TABLE IF NOT EXISTS "{TABLE}" (
                ipId     INTEGER PRIMARY KEY,
                socketId TEXT NOT NULL,
                ip       TEXT NOT NULL,
                start    TEXT NOT NULL,
                "end"    TEXT
            );
            CREATE INDEX IF NOT EXISTS "{TABLE}-socketId" ON "{TABLE}" (socketId);"#
        ))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await?
    }
}

struct RawRow {
    slot: i64,
    session_id: String,
    ip: String,
    start: String,
    end: Option<String>,
}

impl RawRow {
    const COLUMNS: &'static str = r#"ipId, socketId, ip, start, "end""#;

    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            slot: row.get(0)?,
            session_id: row.get(1)?,
            ip: row.get(2)?,
            start: row.get(3)?,
            end: row.get(4)?,
        })
    }

    fn into_entry(self) -> Result<VisitorEntry> {
        let slot = u64::try_from(self.slot).map_err(|_| StoreError::CorruptRow {
            slot: 0,
            reason: format!("negative ipId {}", self.slot),
        })?;
        let corrupt = |e: chrono::ParseError| StoreError::CorruptRow {
            slot,
            reason: e.to_string(),
        };
        Ok(VisitorEntry {
            slot_id: slot,
            session_id: self.session_id,
            masked_address: self.ip,
            arrived_at: parse_timestamp(&self.start).map_err(corrupt)?,
            departed_at: self
                .end
                .as_deref()
                .map(parse_timestamp)
                .transpose()
                .map_err(corrupt)?,
        })
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn upsert(&self, entry: VisitorEntry) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    r#"INSERT INTO "{TABLE}" (ipId, socketId, ip, start, "end")
                       VALUES (?1, ?2, ?3, ?4, ?5)
                       ON CONFLICT(ipId) DO UPDATE SET
                         socketId = excluded.socketId,
                         ip = excluded.ip,
                         start = excluded.start,
                         "end" = excluded."end""#
                ),
                params![
                    entry.slot_id as i64,
                    entry.session_id,
                    entry.masked_address,
                    iso_timestamp(&entry.arrived_at),
                    entry.departed_at.as_ref().map(iso_timestamp),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn find_by_session(&self, session_id: &str) -> Result<Option<VisitorEntry>> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let raw = conn
                .query_row(
                    &format!(
                        r#"SELECT {} FROM "{TABLE}" WHERE socketId = ?1
                           ORDER BY ("end" IS NULL) DESC, ipId LIMIT 1"#,
                        RawRow::COLUMNS
                    ),
                    params![session_id],
                    RawRow::read,
                )
                .optional()?;
            raw.map(RawRow::into_entry).transpose()
        })
        .await
    }

    async fn list_all(&self) -> Result<Vec<VisitorEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                r#"SELECT {} FROM "{TABLE}" ORDER BY ipId"#,
                RawRow::COLUMNS
            ))?;
            let rows = stmt.query_map([], RawRow::read)?;
            let mut entries = Vec::new();
            for raw in rows {
                entries.push(raw?.into_entry()?);
            }
            Ok(entries)
        })
        .await
    }

    async fn mark_departed(&self, session_id: &str, when: DateTime<Utc>) -> Result<bool> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                &format!(
                    r#"UPDATE "{TABLE}" SET "end" = ?2 WHERE socketId = ?1 AND "end" IS NULL"#
                ),
                params![session_id, iso_timestamp(&when)],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 =
                conn.query_row(&format!(r#"SELECT COUNT(*) FROM "{TABLE}""#), [], |row| row.get(0))?;
            Ok(n.max(0) as u64)
        })
        .await
    }

    async fn truncate(&self, capacity: u64) -> Result<u64> {
        let capacity = i64::try_from(capacity).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let removed = conn.execute(
                &format!(r#"DELETE FROM "{TABLE}" WHERE ipId >= ?1"#),
                params![capacity],
            )?;
            Ok(removed as u64)
        })
        .await
    }
}
