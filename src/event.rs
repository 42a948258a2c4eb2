//! Journal events recorded for every store mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    batch::BatchCollection,
    operation::Operation,
    types::{EventSeq, OperationId, OperationSet, OperationSetId, OperationType, User},
};

/// Version number for serialized [`StoredEventEnvelope`] payloads.
pub const EVENT_FORMAT_VERSION: u16 = 1;

/// Immutable fact appended to the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationEvent {
    /// A pending operation was persisted.
    Requested {
        /// Operation as persisted, id included.
        operation: Operation,
    },
    /// An operation was executed.
    Executed {
        id: OperationId,
        done_by: User,
        done_at: DateTime<Utc>,
        /// Batches substituted at execution time.
        override_batches: Option<BatchCollection>,
    },
    /// An operation was cancelled.
    Cancelled {
        id: OperationId,
        cancelled_by: User,
        cancelled_at: DateTime<Utc>,
    },
    /// `rollback` became the newest link undoing `id`.
    RollbackLinked {
        id: OperationId,
        rollback: OperationId,
    },
    Typed {
        id: OperationId,
        operation_type: OperationType,
    },
    SetJoined {
        id: OperationId,
        set: OperationSet,
    },
    SetLeft {
        id: OperationId,
        set_id: OperationSetId,
    },
}

impl OperationEvent {
    /// Operation the event is about.
    pub fn operation_id(&self) -> Option<OperationId> {
        match self {
            Self::Requested { operation } => operation.id(),
            Self::Executed { id, .. }
            | Self::Cancelled { id, .. }
            | Self::RollbackLinked { id, .. }
            | Self::Typed { id, .. }
            | Self::SetJoined { id, .. }
            | Self::SetLeft { id, .. } => Some(*id),
        }
    }

    /// Stable numeric kind stored next to the payload.
    pub fn kind(&self) -> i64 {
        match self {
            Self::Requested { .. } => 1,
            Self::Executed { .. } => 2,
            Self::Cancelled { .. } => 3,
            Self::RollbackLinked { .. } => 4,
            Self::Typed { .. } => 5,
            Self::SetJoined { .. } => 6,
            Self::SetLeft { .. } => 7,
        }
    }
}

/// Journal row metadata plus event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Monotonic event sequence.
    pub seq: EventSeq,
    /// Event timestamp in milliseconds.
    pub ts_ms: u64,
    /// Event body.
    pub event: OperationEvent,
}

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEventEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped event.
    pub stored: StoredEvent,
}

impl StoredEventEnvelope {
    /// Constructs an envelope using [`EVENT_FORMAT_VERSION`].
    pub fn new(stored: StoredEvent) -> Self {
        Self {
            format_version: EVENT_FORMAT_VERSION,
            stored,
        }
    }
}
