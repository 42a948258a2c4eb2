//! In-memory authoritative operation store.

/// Authoritative operation arena, lifecycle calls and journal recording.
pub mod store;
