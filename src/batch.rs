//! Stock units and the value-semantics collection operations carry.

use serde::{Deserialize, Serialize};

use crate::{error::ShapeViolation, types::OperationId};

/// A quantity of one product, owned by at most one operation at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    product: String,
    quantity: i64,
    operation: Option<OperationId>,
}

impl Batch {
    /// Creates an unowned batch.
    pub fn new(product: impl Into<String>, quantity: i64) -> Self {
        Self {
            product: product.into(),
            quantity,
            operation: None,
        }
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn set_quantity(&mut self, quantity: i64) {
        self.quantity = quantity;
    }

    /// Operation currently owning this batch.
    pub fn operation(&self) -> Option<OperationId> {
        self.operation
    }

    /// Assigns the owning operation.
    pub fn set_operation(&mut self, operation: OperationId) {
        self.operation = Some(operation);
    }

    /// Clears the owning operation.
    pub fn detach(&mut self) {
        self.operation = None;
    }

    /// Independent unowned copy carrying the same product and quantity.
    pub fn copy(&self) -> Self {
        Self::new(self.product.clone(), self.quantity)
    }
}

/// Ordered batches with copy/merge semantics.
///
/// An operation never hands out its live collection: readers get a
/// [`BatchCollection::copy`], so nothing outside the operation can alias the
/// batches it owns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchCollection {
    batches: Vec<Batch>,
}

impl BatchCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, batch: Batch) {
        self.batches.push(batch);
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Batch> {
        self.batches.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Batch> {
        self.batches.iter_mut()
    }

    /// Fresh collection of unowned batch copies.
    pub fn copy(&self) -> Self {
        self.batches.iter().map(Batch::copy).collect()
    }

    /// Appends every batch of `other`, keeping order. Duplicates are kept.
    pub fn merge(&mut self, other: BatchCollection) -> &mut Self {
        self.batches.extend(other.batches);
        self
    }

    /// Sum of the quantities held for `product`.
    pub fn quantity_of(&self, product: &str) -> i64 {
        self.batches
            .iter()
            .filter(|b| b.product == product)
            .map(|b| b.quantity)
            .sum()
    }

    /// Fails when a batch is owned by an operation other than `owner`.
    pub(crate) fn check_owner(&self, owner: Option<OperationId>) -> Result<(), ShapeViolation> {
        match self
            .batches
            .iter()
            .filter_map(|b| b.operation)
            .find(|current| Some(*current) != owner)
        {
            Some(other) => Err(ShapeViolation::BatchAlreadyOwned(other)),
            None => Ok(()),
        }
    }

    /// Hands every batch over to `owner`.
    pub(crate) fn adopt(&mut self, owner: OperationId) {
        for batch in &mut self.batches {
            batch.set_operation(owner);
        }
    }

    /// Detaches every batch and empties the collection.
    pub(crate) fn release(&mut self) -> Vec<Batch> {
        let mut out = std::mem::take(&mut self.batches);
        for batch in &mut out {
            batch.detach();
        }
        out
    }
}

impl FromIterator<Batch> for BatchCollection {
    fn from_iter<I: IntoIterator<Item = Batch>>(iter: I) -> Self {
        Self {
            batches: iter.into_iter().collect(),
        }
    }
}

impl From<Vec<Batch>> for BatchCollection {
    fn from(batches: Vec<Batch>) -> Self {
        Self { batches }
    }
}

impl IntoIterator for BatchCollection {
    type Item = Batch;
    type IntoIter = std::vec::IntoIter<Batch>;

    fn into_iter(self) -> Self::IntoIter {
        self.batches.into_iter()
    }
}

impl<'a> IntoIterator for &'a BatchCollection {
    type Item = &'a Batch;
    type IntoIter = std::slice::Iter<'a, Batch>;

    fn into_iter(self) -> Self::IntoIter {
        self.batches.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_drops_ownership_and_breaks_aliasing() {
        let mut live: BatchCollection = vec![Batch::new("SKU-1", 3), Batch::new("SKU-2", 5)].into();
        live.adopt(7);

        let mut copy = live.copy();
        assert!(copy.iter().all(|b| b.operation().is_none()));

        copy.iter_mut().for_each(|b| b.set_quantity(0));
        assert_eq!(live.quantity_of("SKU-1"), 3);
        assert!(live.iter().all(|b| b.operation() == Some(7)));
    }

    #[test]
    fn merge_appends_without_dedup() {
        let mut a: BatchCollection = vec![Batch::new("SKU-1", 1)].into();
        let b: BatchCollection = vec![Batch::new("SKU-1", 1), Batch::new("SKU-2", 2)].into();
        a.merge(b);

        assert_eq!(a.len(), 3);
        assert_eq!(a.quantity_of("SKU-1"), 2);
        let products: Vec<&str> = a.iter().map(Batch::product).collect();
        assert_eq!(products, ["SKU-1", "SKU-1", "SKU-2"]);
    }

    #[test]
    fn check_owner_rejects_foreign_batches_only() {
        let mut owned: BatchCollection = vec![Batch::new("SKU-1", 1)].into();
        owned.adopt(3);

        assert_eq!(owned.check_owner(Some(3)), Ok(()));
        assert_eq!(owned.check_owner(None), Err(ShapeViolation::BatchAlreadyOwned(3)));
        assert_eq!(owned.check_owner(Some(4)), Err(ShapeViolation::BatchAlreadyOwned(3)));

        let released = owned.release();
        assert!(owned.is_empty());
        assert!(released.iter().all(|b| b.operation().is_none()));
    }
}
