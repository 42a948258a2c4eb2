//! Auditable inventory operations with rollback chains and an append-only
//! SQLite journal.
//!
//! # Examples
//!
//! In-memory usage with [`core::store::OperationStore`]:
//! ```
//! use silo::{
//!     batch::{Batch, BatchCollection},
//!     core::store::OperationStore,
//!     ledger::InMemoryLedger,
//!     operation::Operation,
//!     types::{LocationCode, User},
//! };
//!
//! let mut ledger = InMemoryLedger::new();
//! ledger.add_location("A", None);
//! ledger.add_location("B", None);
//!
//! let mut store = OperationStore::new();
//! let op = Operation::new(
//!     User::new("picker"),
//!     Some("A".into()),
//!     Some("B".into()),
//!     BatchCollection::from(vec![Batch::new("SKU-1", 3)]),
//! ).expect("valid operation");
//! let id = store.insert(op).expect("insert");
//! store.execute(id, User::new("picker"), None, &mut ledger).expect("execute");
//! assert_eq!(ledger.quantity(&LocationCode::new("B"), "SKU-1"), 3);
//!
//! let rollback = store.create_rollback(id, User::new("lead")).expect("rollback");
//! store.execute(rollback, User::new("lead"), None, &mut ledger).expect("execute rollback");
//! assert_eq!(ledger.quantity(&LocationCode::new("B"), "SKU-1"), 0);
//! assert!(store.get(id).expect("operation").is_rollback_part());
//! ```
//!
//! Runtime usage with SQLite sink:
//! ```no_run
//! use silo::{
//!     batch::{Batch, BatchCollection},
//!     core::store::OperationStore,
//!     ledger::InMemoryLedger,
//!     operation::Operation,
//!     persist::sqlite::SqliteEventSink,
//!     runtime::handle::{spawn_silo, RuntimeConfig},
//!     types::User,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let sink = SqliteEventSink::open("silo.db").expect("open sqlite");
//! let store = sink.load_store().expect("replay");
//! let handle = spawn_silo(store, InMemoryLedger::new(), Some(Box::new(sink)), RuntimeConfig::default());
//! let op = Operation::new(
//!     User::new("picker"),
//!     None,
//!     Some("DOCK".into()),
//!     BatchCollection::from(vec![Batch::new("SKU-1", 3)]),
//! ).expect("valid operation");
//! let _id = handle.request(op).await.expect("request");
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```

/// Products and quantities moved by operations.
pub mod batch;
/// Read-only aggregation over several operations.
pub mod collection;
/// Core in-memory operation store.
pub mod core;
/// Domain error types.
pub mod error;
/// Journal events and their persisted envelope.
pub mod event;
/// Location side effects of executed operations.
pub mod ledger;
/// Operation lifecycle and rollback chain.
pub mod operation;
/// Persistence abstraction and SQLite implementation.
pub mod persist;
/// Single-writer runtime handle and events.
pub mod runtime;
/// Shared primitive types.
pub mod types;
/// Serializable transport views.
pub mod view;

pub use batch::{Batch, BatchCollection};
pub use collection::OperationCollection;
pub use error::{OperationError, OperationResult};
pub use ledger::{InMemoryLedger, LocationLedger};
pub use operation::{Content, Operation, OperationStatus};
pub use types::{LocationCode, OperationId, User};
pub use view::OperationView;
