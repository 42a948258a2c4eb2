pub mod sqlite;

use thiserror::Error;

use crate::{
    core::store::{StoreError, StoreSnapshotV1},
    event::StoredEvent,
    types::EventSeq,
};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("journal event {seq} cannot be decoded: {reason}")]
    Decode { seq: EventSeq, reason: String },
    #[error("{0}")]
    Message(String),
}

pub type PersistResult<T> = Result<T, PersistError>;

/// Destination for journal events drained from the store.
pub trait EventSink: Send {
    fn append_events(&mut self, events: &[StoredEvent]) -> PersistResult<EventSeq>;
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }
    fn write_snapshot(&mut self, _snapshot: &StoreSnapshotV1, _last_seq: EventSeq) -> PersistResult<()> {
        Ok(())
    }
    fn compact_through(&mut self, _seq: EventSeq) -> PersistResult<usize> {
        Ok(0)
    }
}
