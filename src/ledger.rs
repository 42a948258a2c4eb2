//! Location side of an executed operation.

use hashbrown::HashMap;

use crate::{
    error::LedgerError,
    operation::{Content, Operation},
    types::LocationCode,
};

/// Receives executed operations and mutates the stock of its locations.
///
/// [`Operation::execute`] calls [`LocationLedger::check`] for every location
/// involved before calling [`LocationLedger::apply`] once per location, so a
/// refusal never leaves half an operation applied.
pub trait LocationLedger {
    /// Refuses `operation` for `location` before anything is applied.
    fn check(&self, _location: &LocationCode, _operation: &Operation) -> Result<(), LedgerError> {
        Ok(())
    }

    /// Applies `operation` to `location`, which is its source, its target or
    /// the moved location itself.
    fn apply(&mut self, location: &LocationCode, operation: &Operation);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationState {
    pub parent: Option<LocationCode>,
    pub stock: HashMap<String, i64>,
}

/// Ledger keeping per-location parents and per-product quantities in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    locations: HashMap<LocationCode, LocationState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a location, replacing any previous state.
    pub fn add_location(&mut self, code: impl Into<LocationCode>, parent: Option<LocationCode>) {
        self.locations.insert(
            code.into(),
            LocationState {
                parent,
                stock: HashMap::new(),
            },
        );
    }

    pub fn contains(&self, code: &LocationCode) -> bool {
        self.locations.contains_key(code)
    }

    pub fn location(&self, code: &LocationCode) -> Option<&LocationState> {
        self.locations.get(code)
    }

    pub fn parent(&self, code: &LocationCode) -> Option<&LocationCode> {
        self.locations.get(code).and_then(|l| l.parent.as_ref())
    }

    /// Quantity of `product` at `code`; zero for unknown locations.
    pub fn quantity(&self, code: &LocationCode, product: &str) -> i64 {
        self.locations
            .get(code)
            .and_then(|l| l.stock.get(product))
            .copied()
            .unwrap_or(0)
    }
}

impl LocationLedger for InMemoryLedger {
    fn check(&self, location: &LocationCode, operation: &Operation) -> Result<(), LedgerError> {
        // a location-move without source creates the moved location
        let creates = operation.location() == Some(location) && operation.source().is_none();
        if creates || self.locations.contains_key(location) {
            return Ok(());
        }
        Err(LedgerError::UnknownLocation(location.clone()))
    }

    fn apply(&mut self, location: &LocationCode, operation: &Operation) {
        match operation.content() {
            Content::Location(moved) => {
                if moved == location {
                    self.locations.entry(location.clone()).or_default().parent =
                        operation.target().cloned();
                }
            }
            Content::Batches(batches) => {
                let sign = if operation.source() == Some(location) {
                    -1
                } else if operation.target() == Some(location) {
                    1
                } else {
                    return;
                };
                let state = self.locations.entry(location.clone()).or_default();
                for batch in batches {
                    *state.stock.entry(batch.product().to_string()).or_insert(0) +=
                        sign * batch.quantity();
                }
            }
        }
    }
}
