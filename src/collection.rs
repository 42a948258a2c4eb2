//! Side-effect-free queries over a set of operations.

use crate::{batch::BatchCollection, operation::Operation, types::LocationCode};

/// Borrowed, ordered set of operations.
#[derive(Debug, Clone, Default)]
pub struct OperationCollection<'a> {
    operations: Vec<&'a Operation>,
}

impl<'a> OperationCollection<'a> {
    pub fn new(operations: Vec<&'a Operation>) -> Self {
        Self { operations }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Operation> + '_ {
        self.operations.iter().copied()
    }

    /// Distinct type names in first-seen order. Untyped operations are
    /// reported once as `None`.
    pub fn types(&self) -> Vec<Option<&'a str>> {
        let mut out = Vec::new();
        for op in self.operations.iter().copied() {
            let name = op.type_name();
            if !out.contains(&name) {
                out.push(name);
            }
        }
        out
    }

    /// Distinct target codes in first-seen order. Removals have no target
    /// and are skipped.
    pub fn targets(&self) -> Vec<&'a LocationCode> {
        let mut out: Vec<&'a LocationCode> = Vec::new();
        for target in self.operations.iter().copied().filter_map(Operation::target) {
            if !out.contains(&target) {
                out.push(target);
            }
        }
        out
    }

    /// Copies of every contained batch, appended in operation order.
    pub fn batches(&self) -> BatchCollection {
        let mut out = BatchCollection::new();
        for op in &self.operations {
            out.merge(op.batches());
        }
        out
    }
}

impl<'a> FromIterator<&'a Operation> for OperationCollection<'a> {
    fn from_iter<I: IntoIterator<Item = &'a Operation>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        batch::Batch,
        types::{OperationType, User},
    };

    fn op(target: &str, type_name: Option<&str>, qty: i64) -> Operation {
        let mut op = Operation::new(
            User::new("u1"),
            Some("SRC".into()),
            Some(target.into()),
            BatchCollection::from(vec![Batch::new("SKU-1", qty)]),
        )
        .unwrap();
        if let Some(name) = type_name {
            op.set_type(OperationType::new(name));
        }
        op
    }

    #[test]
    fn types_are_distinct_in_first_seen_order() {
        let ops = [
            op("A", Some("T1"), 1),
            op("B", Some("T2"), 1),
            op("C", Some("T1"), 1),
        ];
        let collection: OperationCollection<'_> = ops.iter().collect();
        assert_eq!(collection.types(), vec![Some("T1"), Some("T2")]);
    }

    #[test]
    fn untyped_operations_are_tracked_once() {
        let ops = [op("A", None, 1), op("B", Some("T1"), 1), op("C", None, 1)];
        let collection: OperationCollection<'_> = ops.iter().collect();
        assert_eq!(collection.types(), vec![None, Some("T1")]);
    }

    #[test]
    fn targets_are_distinct() {
        let ops = [op("A", None, 1), op("B", None, 1), op("A", None, 1)];
        let collection: OperationCollection<'_> = ops.iter().collect();
        let targets: Vec<&str> = collection.targets().into_iter().map(LocationCode::as_str).collect();
        assert_eq!(targets, ["A", "B"]);
    }

    #[test]
    fn batches_merge_copies_in_order() {
        let ops = [op("A", None, 1), op("B", None, 2)];
        let collection: OperationCollection<'_> = ops.iter().collect();
        let mut merged = collection.batches();
        let quantities: Vec<i64> = merged.iter().map(Batch::quantity).collect();
        assert_eq!(quantities, [1, 2]);

        merged.iter_mut().for_each(|b| b.set_quantity(0));
        assert_eq!(ops[0].batches().quantity_of("SKU-1"), 1);
    }
}
