//! Transport shape handed to presentation and API layers.
//!
//! Field names and nesting are a compatibility contract:
//!
//! ```json
//! {
//!   "id": 1, "source": "A", "target": "B", "type": "receive",
//!   "status": { "requestedBy": "u1", "requestedAt": "...", "doneBy": null,
//!               "doneAt": null, "cancelledBy": null, "cancelledAt": null,
//!               "isPending": true, "isDone": false, "isCancelled": false },
//!   "location": null,
//!   "contexts": [{ "id": 3, "name": "wave-3" }],
//!   "batches": [{ "product": "SKU-1", "quantity": 2 }],
//!   "isRollbackPart": false
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    batch::Batch,
    operation::{Operation, OperationStatus},
    types::{OperationId, OperationSet, OperationSetId},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
    pub done_by: Option<String>,
    pub done_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub is_pending: bool,
    pub is_done: bool,
    pub is_cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchView {
    pub product: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSetView {
    pub id: OperationSetId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationView {
    pub id: Option<OperationId>,
    pub source: Option<String>,
    pub target: Option<String>,
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    pub status: StatusView,
    pub location: Option<String>,
    pub contexts: Vec<OperationSetView>,
    pub batches: Vec<BatchView>,
    pub is_rollback_part: bool,
}

impl From<&Operation> for StatusView {
    fn from(op: &Operation) -> Self {
        let status = op.status();
        Self {
            requested_by: op.requested_by().name().to_string(),
            requested_at: op.requested_at(),
            done_by: op.done_by().map(|u| u.name().to_string()),
            done_at: op.done_at(),
            cancelled_by: op.cancelled_by().map(|u| u.name().to_string()),
            cancelled_at: op.cancelled_at(),
            is_pending: status == OperationStatus::Pending,
            is_done: status == OperationStatus::Executed,
            is_cancelled: status == OperationStatus::Cancelled,
        }
    }
}

impl From<&Batch> for BatchView {
    fn from(batch: &Batch) -> Self {
        Self {
            product: batch.product().to_string(),
            quantity: batch.quantity(),
        }
    }
}

impl From<&OperationSet> for OperationSetView {
    fn from(set: &OperationSet) -> Self {
        Self {
            id: set.id,
            name: set.name.clone(),
        }
    }
}

impl From<&Operation> for OperationView {
    fn from(op: &Operation) -> Self {
        Self {
            id: op.id(),
            source: op.source().map(|c| c.as_str().to_string()),
            target: op.target().map(|c| c.as_str().to_string()),
            type_name: op.type_name().map(str::to_string),
            status: StatusView::from(op),
            location: op.location().map(|c| c.as_str().to_string()),
            contexts: op.operation_sets().iter().map(OperationSetView::from).collect(),
            batches: op.batches().iter().map(BatchView::from).collect(),
            is_rollback_part: op.is_rollback_part(),
        }
    }
}

impl Operation {
    /// Transport view of this operation.
    pub fn view(&self) -> OperationView {
        OperationView::from(self)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::{
        batch::BatchCollection,
        types::{LocationCode, OperationType, User},
    };

    #[test]
    fn view_serializes_contract_field_names() {
        let mut op = Operation::new(
            User::new("u1"),
            Some("A".into()),
            Some("B".into()),
            BatchCollection::from(vec![Batch::new("SKU-1", 2)]),
        )
        .unwrap();
        op.set_type(OperationType::new("receive"));
        op.add_operation_set(OperationSet::new(3, "wave-3"));

        let value: Value = serde_json::to_value(op.view()).unwrap();
        let keys: Vec<&str> = value
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        for key in [
            "id",
            "source",
            "target",
            "type",
            "status",
            "location",
            "contexts",
            "batches",
            "isRollbackPart",
        ] {
            assert!(keys.contains(&key), "missing {key}");
        }
        assert_eq!(keys.len(), 9);

        assert_eq!(value["id"], Value::Null);
        assert_eq!(value["source"], json!("A"));
        assert_eq!(value["type"], json!("receive"));
        assert_eq!(value["location"], Value::Null);
        assert_eq!(value["contexts"], json!([{ "id": 3, "name": "wave-3" }]));
        assert_eq!(value["batches"], json!([{ "product": "SKU-1", "quantity": 2 }]));
        assert_eq!(value["isRollbackPart"], json!(false));
        assert_eq!(value["status"]["requestedBy"], json!("u1"));
        assert_eq!(value["status"]["isPending"], json!(true));
        assert_eq!(value["status"]["doneAt"], Value::Null);
    }

    #[test]
    fn location_move_view_has_no_batches() {
        let op = Operation::new(
            User::new("u1"),
            None,
            Some("ROOT".into()),
            LocationCode::new("SHELF-1"),
        )
        .unwrap();
        let view = op.view();
        assert_eq!(view.location.as_deref(), Some("SHELF-1"));
        assert!(view.batches.is_empty());
        assert_eq!(view.source, None);
    }
}
