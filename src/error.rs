//! Domain error taxonomy for operation construction and lifecycle calls.

use std::fmt;

use thiserror::Error;

use crate::types::{LocationCode, OperationId};

/// Result alias for operation-level calls.
pub type OperationResult<T> = Result<T, OperationError>;

/// Every way an operation-level call can be refused.
///
/// All variants are contract violations detected before any state is
/// mutated; none of them is transient.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    /// Bad source/target/content combination.
    #[error("invalid operation shape: {0}")]
    InvalidOperationShape(ShapeViolation),
    /// Lifecycle call on an operation that already left the pending state.
    #[error("cannot {action} {operation}: {violation}")]
    InvalidStateTransition {
        /// Rendered operation, see `Display for Operation`.
        operation: String,
        /// Attempted call.
        action: Transition,
        /// Current terminal state.
        violation: TransitionViolation,
    },
    /// Rollback requested on an operation that cannot be rolled back.
    #[error("cannot rollback {operation}: {violation}")]
    RollbackPrecondition {
        /// Rendered operation, see `Display for Operation`.
        operation: String,
        /// Failed precondition.
        violation: RollbackViolation,
    },
    /// The location ledger refused the operation.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl OperationError {
    /// True for [`OperationError::InvalidOperationShape`].
    pub fn is_shape(&self) -> bool {
        matches!(self, Self::InvalidOperationShape(_))
    }

    /// True for [`OperationError::InvalidStateTransition`].
    pub fn is_transition(&self) -> bool {
        matches!(self, Self::InvalidStateTransition { .. })
    }

    /// True for [`OperationError::RollbackPrecondition`].
    pub fn is_rollback_precondition(&self) -> bool {
        matches!(self, Self::RollbackPrecondition { .. })
    }
}

impl From<ShapeViolation> for OperationError {
    fn from(value: ShapeViolation) -> Self {
        Self::InvalidOperationShape(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeViolation {
    #[error("a source or a target should at least be specified")]
    MissingEndpoints,
    #[error("source and target should be different, both are `{0}`")]
    SameEndpoints(LocationCode),
    #[error("content should be either a location or a batch collection, got both")]
    AmbiguousContent,
    #[error("content should be either a location or a batch collection, got neither")]
    MissingContent,
    #[error("batch is already owned by operation {0}")]
    BatchAlreadyOwned(OperationId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Execute,
    Cancel,
    Replace,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Execute => "execute",
            Self::Cancel => "cancel",
            Self::Replace => "replace",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionViolation {
    #[error("it has already been executed")]
    AlreadyExecuted,
    #[error("it has already been cancelled")]
    AlreadyCancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RollbackViolation {
    #[error("it has already been rolled back")]
    AlreadyRolledBack,
    #[error("it is still pending")]
    NotYetExecuted,
    #[error("it is empty")]
    EmptyOperation,
}

/// Refusal from a [`crate::ledger::LocationLedger`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("location `{0}` cannot be found")]
    UnknownLocation(LocationCode),
    #[error("{0}")]
    Message(String),
}
