//! SQLite-backed append-only event journal sink.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    core::store::{OperationStore, StoreSnapshotV1},
    event::{EVENT_FORMAT_VERSION, StoredEvent, StoredEventEnvelope},
    types::{EventSeq, OperationId},
};

use super::{EventSink, PersistError, PersistResult};

const SNAPSHOT_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotEnvelope {
    format_version: u16,
    snapshot: StoreSnapshotV1,
}

/// SQLite implementation of [`crate::persist::EventSink`].
pub struct SqliteEventSink {
    conn: Connection,
}

impl SqliteEventSink {
    /// Opens or creates a SQLite-backed sink at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory SQLite sink.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Rebuilds the store from the latest snapshot plus tail events.
    pub fn load_store(&self) -> PersistResult<OperationStore> {
        let mut store = if let Some(snapshot) = self.load_latest_snapshot()? {
            OperationStore::from_snapshot(snapshot)?
        } else {
            OperationStore::new()
        };

        let start_seq = store.latest_event_seq();
        let events = self.load_events_after(start_seq)?;
        debug!(start_seq, events = events.len(), "replaying journal");
        for event in events {
            store.apply_replayed_event(event)?;
        }
        Ok(store)
    }

    /// Loads events strictly after `seq`, oldest first.
    pub fn load_events_after(&self, seq: EventSeq) -> PersistResult<Vec<StoredEvent>> {
        self.query_events(
            "SELECT seq, ts_ms, payload FROM events WHERE seq > ?1 ORDER BY seq ASC",
            seq as i64,
        )
    }

    /// Every journaled event about one operation, oldest first. Compacted
    /// events are gone; the latest snapshot holds their outcome.
    pub fn history(&self, operation_id: OperationId) -> PersistResult<Vec<StoredEvent>> {
        self.query_events(
            "SELECT seq, ts_ms, payload FROM events WHERE operation_id = ?1 ORDER BY seq ASC",
            operation_id as i64,
        )
    }

    fn query_events(&self, sql: &str, key: i64) -> PersistResult<Vec<StoredEvent>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![key], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (seq, ts_ms, payload) = row?;
            let seq = seq as EventSeq;
            let mut stored = decode_stored_event_payload(&payload)
                .map_err(|reason| PersistError::Decode { seq, reason })?;
            // row columns are authoritative over the envelope copy
            stored.seq = seq;
            stored.ts_ms = ts_ms as u64;
            out.push(stored);
        }
        Ok(out)
    }

    /// Writes a snapshot covering `last_seq`.
    pub fn write_snapshot(
        &mut self,
        snapshot: &StoreSnapshotV1,
        last_seq: EventSeq,
    ) -> PersistResult<()> {
        let env = SnapshotEnvelope {
            format_version: SNAPSHOT_FORMAT_VERSION,
            snapshot: snapshot.clone(),
        };
        let payload = serde_json::to_vec(&env)?;
        let ts_ms = now_ms();
        self.conn.execute(
            "INSERT INTO snapshots(last_seq, ts_ms, payload) VALUES (?1, ?2, ?3)",
            params![last_seq as i64, ts_ms as i64, payload],
        )?;
        Ok(())
    }

    /// Deletes events up to and including `seq`.
    pub fn compact_through(&mut self, seq: EventSeq) -> PersistResult<usize> {
        let count = self
            .conn
            .execute("DELETE FROM events WHERE seq <= ?1", params![seq as i64])?;
        Ok(count)
    }

    /// Returns the latest sequence persisted in the events table.
    pub fn latest_seq(&self) -> PersistResult<EventSeq> {
        let seq: Option<i64> = self
            .conn
            .query_row("SELECT MAX(seq) FROM events", [], |row| {
                row.get::<_, Option<i64>>(0)
            })
            .optional()?
            .flatten();
        Ok(seq.unwrap_or(0) as EventSeq)
    }

    fn load_latest_snapshot(&self) -> PersistResult<Option<StoreSnapshotV1>> {
        let payload: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT payload FROM snapshots ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        let env: SnapshotEnvelope = serde_json::from_slice(&payload)?;
        if env.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(PersistError::Message(format!(
                "unsupported snapshot format version: {}",
                env.format_version
            )));
        }
        Ok(Some(env.snapshot))
    }
}

impl EventSink for SqliteEventSink {
    fn append_events(&mut self, events: &[StoredEvent]) -> PersistResult<EventSeq> {
        if events.is_empty() {
            return self.latest_seq();
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO events(seq, ts_ms, kind, operation_id, payload) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for stored in events {
                let payload = serde_json::to_vec(&StoredEventEnvelope::new(stored.clone()))?;
                stmt.execute(params![
                    stored.seq as i64,
                    stored.ts_ms as i64,
                    stored.event.kind(),
                    stored.event.operation_id().map(|v| v as i64),
                    payload,
                ])?;
            }
        }
        tx.commit()?;

        Ok(events.last().map(|e| e.seq).unwrap_or(0))
    }

    fn flush(&mut self) -> PersistResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }

    fn write_snapshot(&mut self, snapshot: &StoreSnapshotV1, last_seq: EventSeq) -> PersistResult<()> {
        SqliteEventSink::write_snapshot(self, snapshot, last_seq)
    }

    fn compact_through(&mut self, seq: EventSeq) -> PersistResult<usize> {
        SqliteEventSink::compact_through(self, seq)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn decode_stored_event_payload(payload: &[u8]) -> Result<StoredEvent, String> {
    let envelope = serde_json::from_slice::<StoredEventEnvelope>(payload)
        .map_err(|e| format!("event payload decode failed: {e}"))?;
    if envelope.format_version != EVENT_FORMAT_VERSION {
        return Err(format!(
            "unsupported event format version: {}",
            envelope.format_version
        ));
    }
    Ok(envelope.stored)
}
