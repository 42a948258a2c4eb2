//! Runtime event stream payloads.

use crate::types::{EventSeq, OperationId};

/// Events emitted from the single-writer runtime loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiloEvent {
    /// A pending operation was persisted.
    Requested {
        /// New operation id.
        id: OperationId,
    },
    /// An operation was executed and applied to its locations.
    Executed {
        /// Executed operation id.
        id: OperationId,
    },
    /// An operation was cancelled.
    Cancelled {
        /// Cancelled operation id.
        id: OperationId,
    },
    /// A pending rollback was created and linked.
    RollbackCreated {
        /// Rolled back operation id.
        id: OperationId,
        /// New pending rollback id.
        rollback: OperationId,
    },
    /// A pending operation was cancelled in favour of a replacement.
    Replaced {
        /// Cancelled operation id.
        id: OperationId,
        /// New pending replacement id.
        replacement: OperationId,
    },
    /// Type or grouping contexts of an operation changed.
    Updated {
        /// Updated operation id.
        id: OperationId,
    },
    /// Persistence has reached at least this event sequence.
    DurableUpTo {
        /// Highest sequence known durable.
        event_seq: EventSeq,
    },
}
