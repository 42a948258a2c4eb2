//! Operation lifecycle state machine and rollback-chain bookkeeping.
//!
//! ```text
//! Pending ──execute()──> Executed ──create_rollback()──> (new Pending, source/target swapped)
//!    │
//!    ├──cancel()──> Cancelled
//!    └──create_replace()──> Cancelled + (new Pending, source/target swapped)
//! ```
//!
//! Every guard runs before the first mutation, so a refused call leaves the
//! operation exactly as it was.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    batch::BatchCollection,
    error::{
        OperationError, OperationResult, RollbackViolation, ShapeViolation, Transition,
        TransitionViolation,
    },
    ledger::LocationLedger,
    types::{LocationCode, OperationId, OperationSet, OperationSetId, OperationType, User},
};

/// What an operation moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Content {
    /// Location-move: the location itself is re-parented.
    Location(LocationCode),
    /// Product-move: stock units travel from source to target.
    Batches(BatchCollection),
}

impl Content {
    /// Builds content from the two nullable transport fields.
    pub fn from_parts(
        location: Option<LocationCode>,
        batches: Option<BatchCollection>,
    ) -> OperationResult<Self> {
        match (location, batches) {
            (Some(location), None) => Ok(Self::Location(location)),
            (None, Some(batches)) => Ok(Self::Batches(batches)),
            (Some(_), Some(_)) => Err(ShapeViolation::AmbiguousContent.into()),
            (None, None) => Err(ShapeViolation::MissingContent.into()),
        }
    }

    fn rollback_copy(&self) -> Self {
        match self {
            Self::Location(location) => Self::Location(location.clone()),
            Self::Batches(batches) => Self::Batches(batches.copy()),
        }
    }
}

impl From<LocationCode> for Content {
    fn from(value: LocationCode) -> Self {
        Self::Location(value)
    }
}

impl From<BatchCollection> for Content {
    fn from(value: BatchCollection) -> Self {
        Self::Batches(value)
    }
}

/// Lifecycle projection derived from an operation's timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationStatus {
    Pending,
    Executed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum Lifecycle {
    Pending,
    Executed { by: User, at: DateTime<Utc> },
    Cancelled { by: User, at: DateTime<Utc> },
}

/// Read access to persisted operations, used to inspect rollback links.
pub trait OperationLookup {
    fn operation(&self, id: OperationId) -> Option<&Operation>;
}

impl OperationLookup for hashbrown::HashMap<OperationId, Operation> {
    fn operation(&self, id: OperationId) -> Option<&Operation> {
        self.get(&id)
    }
}

impl OperationLookup for [Operation] {
    fn operation(&self, id: OperationId) -> Option<&Operation> {
        self.iter().find(|op| op.id == Some(id))
    }
}

/// Auditable movement of a location or of batches between two locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    id: Option<OperationId>,
    requested_by: User,
    requested_at: DateTime<Utc>,
    lifecycle: Lifecycle,
    source: Option<LocationCode>,
    target: Option<LocationCode>,
    content: Content,
    operation_type: Option<OperationType>,
    rollback_operation: Option<OperationId>,
    rollback_of: Option<OperationId>,
    rollback_count: u32,
    operation_sets: Vec<OperationSet>,
}

impl Operation {
    /// Creates a pending operation.
    ///
    /// A missing source means something is created at `target`, a missing
    /// target means something is removed from `source`. Batches handed in
    /// must not belong to another operation yet.
    pub fn new(
        requested_by: User,
        source: Option<LocationCode>,
        target: Option<LocationCode>,
        content: impl Into<Content>,
    ) -> OperationResult<Self> {
        match (&source, &target) {
            (None, None) => return Err(ShapeViolation::MissingEndpoints.into()),
            (Some(s), Some(t)) if s == t => {
                return Err(ShapeViolation::SameEndpoints(s.clone()).into());
            }
            _ => {}
        }

        let content = content.into();
        if let Content::Batches(batches) = &content {
            batches.check_owner(None)?;
        }

        Ok(Self {
            id: None,
            requested_by,
            requested_at: Utc::now(),
            lifecycle: Lifecycle::Pending,
            source,
            target,
            content,
            operation_type: None,
            rollback_operation: None,
            rollback_of: None,
            rollback_count: 0,
            operation_sets: Vec::new(),
        })
    }

    /// Applies this operation to its locations and marks it executed.
    ///
    /// `override_batches` replaces the current batches before anything is
    /// applied, e.g. with the concrete units picked at execution time.
    pub fn execute<L>(
        &mut self,
        done_by: User,
        override_batches: Option<BatchCollection>,
        ledger: &mut L,
    ) -> OperationResult<()>
    where
        L: LocationLedger + ?Sized,
    {
        self.guard_pending(Transition::Execute)?;

        if let Some(batches) = &override_batches {
            if self.is_location_operation() {
                return Err(ShapeViolation::AmbiguousContent.into());
            }
            batches.check_owner(self.id)?;
        }

        // the ledger checks the batches it is about to receive
        let replaced = override_batches.map(|batches| self.swap_batches(batches));
        let checked = self
            .applied_locations()
            .into_iter()
            .try_for_each(|code| ledger.check(code, self));
        if let Err(err) = checked {
            if let Some(previous) = replaced {
                self.swap_batches(previous);
            }
            return Err(err.into());
        }
        if let Some(mut previous) = replaced {
            previous.release();
        }

        if let Content::Location(location) = &self.content {
            ledger.apply(location, self);
        } else {
            if let Some(source) = &self.source {
                ledger.apply(source, self);
            }
            if let Some(target) = &self.target {
                ledger.apply(target, self);
            }
        }

        self.lifecycle = Lifecycle::Executed {
            by: done_by,
            at: Utc::now(),
        };
        Ok(())
    }

    /// Marks a pending operation cancelled. Locations are never touched.
    pub fn cancel(&mut self, cancelled_by: User) -> OperationResult<()> {
        self.guard_pending(Transition::Cancel)?;
        self.lifecycle = Lifecycle::Cancelled {
            by: cancelled_by,
            at: Utc::now(),
        };
        Ok(())
    }

    /// Builds the pending inverse of this executed operation.
    ///
    /// `self.rollback_operation` is left untouched: the inverse has no id
    /// yet. [`crate::core::store::OperationStore::create_rollback`] persists
    /// it and sets the link.
    pub(crate) fn create_rollback<L>(&self, rollback_user: User, lookup: &L) -> OperationResult<Operation>
    where
        L: OperationLookup + ?Sized,
    {
        if let Some(rollback) = self.rollback_operation {
            if lookup.operation(rollback).is_some_and(Operation::is_executed) {
                return Err(self.rollback_error(RollbackViolation::AlreadyRolledBack));
            }
        }
        if !self.is_executed() {
            return Err(self.rollback_error(RollbackViolation::NotYetExecuted));
        }
        if let Content::Batches(batches) = &self.content {
            if batches.is_empty() {
                return Err(self.rollback_error(RollbackViolation::EmptyOperation));
            }
        }

        let mut rollback = Operation::new(
            rollback_user,
            self.target.clone(),
            self.source.clone(),
            self.content.rollback_copy(),
        )?;
        rollback.rollback_count = self.rollback_count + 1;
        rollback.rollback_of = self.id;
        Ok(rollback)
    }

    /// Records `rollback` as the newest link undoing this operation.
    pub(crate) fn link_rollback(&mut self, rollback: OperationId) {
        self.rollback_operation = Some(rollback);
    }

    /// Cancels this pending operation and returns its pending replacement.
    ///
    /// The replacement swaps source and target and keeps the operation type.
    pub fn create_replace(
        &mut self,
        replace_user: User,
        replace_content: impl Into<Content>,
    ) -> OperationResult<Operation> {
        self.guard_pending(Transition::Replace)?;

        let mut replacement = Operation::new(
            replace_user.clone(),
            self.target.clone(),
            self.source.clone(),
            replace_content,
        )?;
        replacement.operation_type = self.operation_type.clone();

        self.cancel(replace_user)?;
        Ok(replacement)
    }

    /// Whether this operation's effect is cancelled out within its rollback
    /// chain.
    ///
    /// A further link always makes this true; otherwise an odd
    /// `rollback_count` undoes the original and an even one re-establishes
    /// it.
    pub fn is_rollback_part(&self) -> bool {
        self.rollback_operation.is_some() || self.rollback_count % 2 == 1
    }

    pub fn id(&self) -> Option<OperationId> {
        self.id
    }

    pub fn requested_by(&self) -> &User {
        &self.requested_by
    }

    pub fn requested_at(&self) -> DateTime<Utc> {
        self.requested_at
    }

    pub fn done_by(&self) -> Option<&User> {
        match &self.lifecycle {
            Lifecycle::Executed { by, .. } => Some(by),
            _ => None,
        }
    }

    pub fn done_at(&self) -> Option<DateTime<Utc>> {
        match &self.lifecycle {
            Lifecycle::Executed { at, .. } => Some(*at),
            _ => None,
        }
    }

    pub fn cancelled_by(&self) -> Option<&User> {
        match &self.lifecycle {
            Lifecycle::Cancelled { by, .. } => Some(by),
            _ => None,
        }
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        match &self.lifecycle {
            Lifecycle::Cancelled { at, .. } => Some(*at),
            _ => None,
        }
    }

    pub fn status(&self) -> OperationStatus {
        match self.lifecycle {
            Lifecycle::Pending => OperationStatus::Pending,
            Lifecycle::Executed { .. } => OperationStatus::Executed,
            Lifecycle::Cancelled { .. } => OperationStatus::Cancelled,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status() == OperationStatus::Pending
    }

    pub fn is_executed(&self) -> bool {
        self.status() == OperationStatus::Executed
    }

    pub fn is_cancelled(&self) -> bool {
        self.status() == OperationStatus::Cancelled
    }

    pub fn source(&self) -> Option<&LocationCode> {
        self.source.as_ref()
    }

    pub fn target(&self) -> Option<&LocationCode> {
        self.target.as_ref()
    }

    /// Moved location for a location-move.
    pub fn location(&self) -> Option<&LocationCode> {
        match &self.content {
            Content::Location(location) => Some(location),
            Content::Batches(_) => None,
        }
    }

    pub fn is_location_operation(&self) -> bool {
        matches!(self.content, Content::Location(_))
    }

    /// Read-only view of the live content.
    pub fn content(&self) -> &Content {
        &self.content
    }

    /// Copy of the contained batches; empty for a location-move.
    pub fn batches(&self) -> BatchCollection {
        match &self.content {
            Content::Batches(batches) => batches.copy(),
            Content::Location(_) => BatchCollection::new(),
        }
    }

    pub fn operation_type(&self) -> Option<&OperationType> {
        self.operation_type.as_ref()
    }

    pub fn type_name(&self) -> Option<&str> {
        self.operation_type.as_ref().map(OperationType::name)
    }

    pub fn set_type(&mut self, operation_type: OperationType) -> &mut Self {
        self.operation_type = Some(operation_type);
        self
    }

    pub fn rollback_operation(&self) -> Option<OperationId> {
        self.rollback_operation
    }

    /// Operation this one was created to undo.
    pub fn rollback_of(&self) -> Option<OperationId> {
        self.rollback_of
    }

    pub fn rollback_count(&self) -> u32 {
        self.rollback_count
    }

    /// Joins a grouping context. Returns false when already a member.
    pub fn add_operation_set(&mut self, set: OperationSet) -> bool {
        if self.operation_sets.iter().any(|s| s.id == set.id) {
            return false;
        }
        self.operation_sets.push(set);
        true
    }

    /// Leaves a grouping context. Returns false when not a member.
    pub fn remove_operation_set(&mut self, set_id: OperationSetId) -> bool {
        let before = self.operation_sets.len();
        self.operation_sets.retain(|s| s.id != set_id);
        self.operation_sets.len() != before
    }

    pub fn operation_sets(&self) -> &[OperationSet] {
        &self.operation_sets
    }

    /// Gives this operation its persistent identity and takes ownership of
    /// its batches.
    pub(crate) fn assign_id(&mut self, id: OperationId) {
        self.id = Some(id);
        if let Content::Batches(batches) = &mut self.content {
            batches.adopt(id);
        }
    }

    /// Marks executed from a journal entry, without touching any ledger.
    pub(crate) fn restore_executed(
        &mut self,
        by: User,
        at: DateTime<Utc>,
        override_batches: Option<BatchCollection>,
    ) {
        if let Some(batches) = override_batches {
            self.replace_batches(batches);
        }
        self.lifecycle = Lifecycle::Executed { by, at };
    }

    pub(crate) fn restore_cancelled(&mut self, by: User, at: DateTime<Utc>) {
        self.lifecycle = Lifecycle::Cancelled { by, at };
    }

    fn replace_batches(&mut self, batches: BatchCollection) {
        self.swap_batches(batches).release();
    }

    /// Installs `batches` as the live collection and hands back the previous
    /// one, still owned.
    fn swap_batches(&mut self, mut batches: BatchCollection) -> BatchCollection {
        if let Some(id) = self.id {
            batches.adopt(id);
        }
        match &mut self.content {
            Content::Batches(current) => std::mem::replace(current, batches),
            Content::Location(_) => BatchCollection::new(),
        }
    }

    fn applied_locations(&self) -> Vec<&LocationCode> {
        match &self.content {
            Content::Location(location) => vec![location],
            Content::Batches(_) => self.source.iter().chain(self.target.iter()).collect(),
        }
    }

    fn guard_pending(&self, action: Transition) -> OperationResult<()> {
        let violation = match self.lifecycle {
            Lifecycle::Pending => return Ok(()),
            Lifecycle::Executed { .. } => TransitionViolation::AlreadyExecuted,
            Lifecycle::Cancelled { .. } => TransitionViolation::AlreadyCancelled,
        };
        Err(OperationError::InvalidStateTransition {
            operation: self.to_string(),
            action,
            violation,
        })
    }

    fn rollback_error(&self, violation: RollbackViolation) -> OperationError {
        OperationError::RollbackPrecondition {
            operation: self.to_string(),
            violation,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Operation:")?;
        if let Some(id) = self.id {
            write!(f, "{id}")?;
        }
        write!(f, ":")?;
        if let Some(source) = &self.source {
            write!(f, "{source}")?;
        }
        write!(f, ":")?;
        if let Some(target) = &self.target {
            write!(f, "{target}")?;
        }
        Ok(())
    }
}
