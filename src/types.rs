//! Shared primitive IDs and small value types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Persistence-assigned operation identifier.
pub type OperationId = u64;
/// Monotonic journal event sequence number.
pub type EventSeq = u64;
/// Operation set (grouping context) identifier.
pub type OperationSetId = u64;

/// Unique code of a storage location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationCode(String);

impl LocationCode {
    /// Wraps a location code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Borrows the raw code.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LocationCode {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Actor requesting, executing or cancelling operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct User(String);

impl User {
    /// Creates a user from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// User name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for User {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Named operation category, compared by name only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationType(String);

impl OperationType {
    /// Creates a category from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Category name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

/// Grouping context an operation can belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSet {
    /// Set identifier.
    pub id: OperationSetId,
    /// Human readable label.
    pub name: String,
}

impl OperationSet {
    /// Creates a grouping context.
    pub fn new(id: OperationSetId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}
