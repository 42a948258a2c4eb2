use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    batch::BatchCollection,
    collection::OperationCollection,
    error::OperationError,
    event::{OperationEvent, StoredEvent},
    ledger::LocationLedger,
    operation::{Content, Operation, OperationLookup},
    types::{EventSeq, LocationCode, OperationId, OperationSet, OperationSetId, OperationType, User},
    view::OperationView,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("operation {0} cannot be found")]
    MissingOperation(OperationId),
    #[error("operation {0} already exists")]
    AlreadyExists(OperationId),
    #[error("replayed operation has no id")]
    MissingId,
    #[error(transparent)]
    Operation(#[from] OperationError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshotV1 {
    pub next_operation_id: OperationId,
    pub next_event_seq: EventSeq,
    pub order: Vec<OperationId>,
    pub operations: Vec<Operation>,
}

/// Persisted operations keyed by id.
///
/// Ids are handed out on insertion; every mutation is recorded as a
/// [`StoredEvent`] waiting in [`OperationStore::drain_pending_events`].
#[derive(Debug, Default)]
pub struct OperationStore {
    operations: HashMap<OperationId, Operation>,
    order: Vec<OperationId>,
    by_target: HashMap<LocationCode, Vec<OperationId>>,
    pending_events: Vec<StoredEvent>,
    next_event_seq: EventSeq,
    next_operation_id: OperationId,
}

impl OperationStore {
    pub fn new() -> Self {
        Self {
            next_event_seq: 1,
            next_operation_id: 1,
            ..Self::default()
        }
    }

    pub fn from_snapshot(snapshot: StoreSnapshotV1) -> Result<Self, StoreError> {
        let mut store = Self {
            next_operation_id: snapshot.next_operation_id,
            next_event_seq: snapshot.next_event_seq,
            order: snapshot.order,
            ..Self::default()
        };

        for op in snapshot.operations {
            let id = op.id().ok_or(StoreError::MissingId)?;
            if store.operations.contains_key(&id) {
                return Err(StoreError::AlreadyExists(id));
            }
            store.insert_indices(id, &op);
            store.operations.insert(id, op);
        }

        Ok(store)
    }

    pub fn export_snapshot(&self) -> StoreSnapshotV1 {
        let operations = self
            .order
            .iter()
            .filter_map(|id| self.operations.get(id).cloned())
            .collect();

        StoreSnapshotV1 {
            next_operation_id: self.next_operation_id,
            next_event_seq: self.next_event_seq,
            order: self.order.clone(),
            operations,
        }
    }

    /// Persists a pending operation and returns its new id.
    pub fn insert(&mut self, operation: Operation) -> Result<OperationId, StoreError> {
        if let Some(id) = operation.id() {
            return Err(StoreError::AlreadyExists(id));
        }

        let id = self.next_operation_id;
        self.next_operation_id += 1;

        let mut operation = operation;
        operation.assign_id(id);
        debug!(operation = %operation, "operation requested");

        self.insert_indices(id, &operation);
        self.order.push(id);
        self.operations.insert(id, operation.clone());
        self.record(OperationEvent::Requested { operation });
        Ok(id)
    }

    pub fn execute<L>(
        &mut self,
        id: OperationId,
        done_by: User,
        override_batches: Option<BatchCollection>,
        ledger: &mut L,
    ) -> Result<(), StoreError>
    where
        L: LocationLedger + ?Sized,
    {
        let op = self.get_mut(id)?;
        let overridden = override_batches.is_some();
        op.execute(done_by.clone(), override_batches, ledger)?;
        debug!(operation = %op, overridden, "operation executed");

        let event = OperationEvent::Executed {
            id,
            done_by,
            done_at: op.done_at().unwrap_or_else(Utc::now),
            override_batches: overridden.then(|| op.batches()),
        };
        self.record(event);
        Ok(())
    }

    pub fn cancel(&mut self, id: OperationId, cancelled_by: User) -> Result<(), StoreError> {
        let op = self.get_mut(id)?;
        op.cancel(cancelled_by.clone())?;
        debug!(operation = %op, "operation cancelled");

        let event = cancelled_event(id, cancelled_by, op);
        self.record(event);
        Ok(())
    }

    /// Persists the pending inverse of `id` and links it as its newest
    /// rollback. Execute the returned id to undo the effect.
    pub fn create_rollback(
        &mut self,
        id: OperationId,
        rollback_user: User,
    ) -> Result<OperationId, StoreError> {
        let op = self.get(id).ok_or(StoreError::MissingOperation(id))?;
        let rollback = op.create_rollback(rollback_user, self)?;
        if let Some(previous) = op.rollback_operation() {
            warn!(operation = %op, previous, "superseding pending rollback link");
        }

        let rollback_id = self.insert(rollback)?;
        self.get_mut(id)?.link_rollback(rollback_id);
        info!(operation = id, rollback = rollback_id, "rollback created");
        self.record(OperationEvent::RollbackLinked {
            id,
            rollback: rollback_id,
        });
        Ok(rollback_id)
    }

    /// Cancels pending `id` and persists its replacement.
    pub fn create_replace(
        &mut self,
        id: OperationId,
        replace_user: User,
        replace_content: impl Into<Content>,
    ) -> Result<OperationId, StoreError> {
        let op = self.get_mut(id)?;
        let replacement = op.create_replace(replace_user.clone(), replace_content)?;
        let event = cancelled_event(id, replace_user, op);
        self.record(event);

        let replacement_id = self.insert(replacement)?;
        info!(operation = id, replacement = replacement_id, "operation replaced");
        Ok(replacement_id)
    }

    pub fn set_type(
        &mut self,
        id: OperationId,
        operation_type: OperationType,
    ) -> Result<(), StoreError> {
        self.get_mut(id)?.set_type(operation_type.clone());
        self.record(OperationEvent::Typed { id, operation_type });
        Ok(())
    }

    /// Adds `id` to a grouping context. Returns false when already a member.
    pub fn add_to_set(&mut self, id: OperationId, set: OperationSet) -> Result<bool, StoreError> {
        let added = self.get_mut(id)?.add_operation_set(set.clone());
        if added {
            self.record(OperationEvent::SetJoined { id, set });
        }
        Ok(added)
    }

    pub fn remove_from_set(
        &mut self,
        id: OperationId,
        set_id: OperationSetId,
    ) -> Result<bool, StoreError> {
        let removed = self.get_mut(id)?.remove_operation_set(set_id);
        if removed {
            self.record(OperationEvent::SetLeft { id, set_id });
        }
        Ok(removed)
    }

    pub fn apply_replayed_event(&mut self, stored: StoredEvent) -> Result<(), StoreError> {
        let seq = stored.seq;
        match stored.event {
            OperationEvent::Requested { operation } => {
                let id = operation.id().ok_or(StoreError::MissingId)?;
                if self.operations.contains_key(&id) {
                    return Err(StoreError::AlreadyExists(id));
                }
                self.next_operation_id = self.next_operation_id.max(id.saturating_add(1));
                self.insert_indices(id, &operation);
                self.order.push(id);
                self.operations.insert(id, operation);
            }
            OperationEvent::Executed {
                id,
                done_by,
                done_at,
                override_batches,
            } => {
                self.get_mut(id)?
                    .restore_executed(done_by, done_at, override_batches);
            }
            OperationEvent::Cancelled {
                id,
                cancelled_by,
                cancelled_at,
            } => {
                self.get_mut(id)?.restore_cancelled(cancelled_by, cancelled_at);
            }
            OperationEvent::RollbackLinked { id, rollback } => {
                self.get_mut(id)?.link_rollback(rollback);
            }
            OperationEvent::Typed { id, operation_type } => {
                self.get_mut(id)?.set_type(operation_type);
            }
            OperationEvent::SetJoined { id, set } => {
                self.get_mut(id)?.add_operation_set(set);
            }
            OperationEvent::SetLeft { id, set_id } => {
                self.get_mut(id)?.remove_operation_set(set_id);
            }
        }
        self.next_event_seq = self.next_event_seq.max(seq.saturating_add(1));
        Ok(())
    }

    pub fn get(&self, id: OperationId) -> Option<&Operation> {
        self.operations.get(&id)
    }

    pub fn view(&self, id: OperationId) -> Option<OperationView> {
        self.get(id).map(Operation::view)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn ordered_ids(&self) -> &[OperationId] {
        &self.order
    }

    /// Every operation in insertion order.
    pub fn all(&self) -> OperationCollection<'_> {
        self.order.iter().filter_map(|id| self.operations.get(id)).collect()
    }

    /// Operations for `ids`, in the given order.
    pub fn collect(&self, ids: &[OperationId]) -> Result<OperationCollection<'_>, StoreError> {
        ids.iter()
            .map(|id| self.get(*id).ok_or(StoreError::MissingOperation(*id)))
            .collect::<Result<Vec<_>, _>>()
            .map(OperationCollection::new)
    }

    pub fn pending(&self) -> Vec<&Operation> {
        self.order
            .iter()
            .filter_map(|id| self.operations.get(id))
            .filter(|op| op.is_pending())
            .collect()
    }

    pub fn by_target(&self, code: &LocationCode) -> Vec<&Operation> {
        self.by_target
            .get(code)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.operations.get(id))
            .collect()
    }

    /// `id` followed by each newer rollback link.
    pub fn rollback_chain(&self, id: OperationId) -> Vec<OperationId> {
        let mut chain = Vec::new();
        let mut cursor = self.get(id).map(|_| id);
        while let Some(current) = cursor {
            if chain.contains(&current) {
                break;
            }
            chain.push(current);
            cursor = self.get(current).and_then(Operation::rollback_operation);
        }
        chain
    }

    pub fn drain_pending_events(&mut self) -> Vec<StoredEvent> {
        std::mem::take(&mut self.pending_events)
    }

    pub fn latest_event_seq(&self) -> EventSeq {
        self.next_event_seq.saturating_sub(1)
    }

    fn get_mut(&mut self, id: OperationId) -> Result<&mut Operation, StoreError> {
        self.operations
            .get_mut(&id)
            .ok_or(StoreError::MissingOperation(id))
    }

    fn record(&mut self, event: OperationEvent) {
        let seq = self.next_event_seq;
        self.next_event_seq += 1;
        self.pending_events.push(StoredEvent {
            seq,
            ts_ms: now_ms(),
            event,
        });
    }

    fn insert_indices(&mut self, id: OperationId, op: &Operation) {
        if let Some(target) = op.target() {
            self.by_target.entry(target.clone()).or_default().push(id);
        }
    }
}

impl OperationLookup for OperationStore {
    fn operation(&self, id: OperationId) -> Option<&Operation> {
        self.get(id)
    }
}

fn cancelled_event(id: OperationId, cancelled_by: User, op: &Operation) -> OperationEvent {
    OperationEvent::Cancelled {
        id,
        cancelled_by,
        cancelled_at: op.cancelled_at().unwrap_or_else(Utc::now),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
