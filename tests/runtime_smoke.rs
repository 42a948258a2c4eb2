use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use silo::{
    batch::{Batch, BatchCollection},
    core::store::{OperationStore, StoreError},
    error::OperationError,
    event::{OperationEvent, StoredEvent},
    ledger::InMemoryLedger,
    operation::Operation,
    persist::{EventSink, PersistResult, sqlite::SqliteEventSink},
    runtime::{
        events::SiloEvent,
        handle::{RuntimeConfig, RuntimeError, spawn_silo},
    },
    types::{EventSeq, User},
};

fn product_move(source: &str, target: &str, qty: i64) -> Operation {
    Operation::new(
        User::new("u1"),
        Some(source.into()),
        Some(target.into()),
        BatchCollection::from(vec![Batch::new("SKU-1", qty)]),
    )
    .expect("operation")
}

fn ledger() -> InMemoryLedger {
    let mut ledger = InMemoryLedger::new();
    ledger.add_location("A", None);
    ledger.add_location("B", None);
    ledger
}

struct SlowSink {
    seen: Arc<Mutex<Vec<StoredEvent>>>,
    delay: Duration,
}

impl EventSink for SlowSink {
    fn append_events(&mut self, events: &[StoredEvent]) -> PersistResult<EventSeq> {
        std::thread::sleep(self.delay);
        let mut seen = self.seen.lock().expect("lock");
        seen.extend(events.iter().cloned());
        Ok(events.last().map(|e| e.seq).unwrap_or(0))
    }
}

#[tokio::test]
async fn runtime_lifecycle_query_and_events_ordered() {
    let handle = spawn_silo(OperationStore::new(), ledger(), None, RuntimeConfig::default());
    let mut sub = handle.subscribe();

    let id = handle
        .request(product_move("A", "B", 3))
        .await
        .expect("request");
    handle
        .execute(id, User::new("u2"), None)
        .await
        .expect("execute");
    let rollback = handle
        .create_rollback(id, User::new("u3"))
        .await
        .expect("rollback");

    let view = handle.view(id).await.expect("view").expect("operation");
    assert!(view.status.is_done);
    assert!(view.is_rollback_part);
    let pending = handle.pending().await.expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, Some(rollback));

    let mut seen = Vec::new();
    for _ in 0..12 {
        let evt = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("event")
            .expect("recv");
        if !matches!(evt, SiloEvent::DurableUpTo { .. }) {
            seen.push(evt);
        }
        if seen.len() == 4 {
            break;
        }
    }

    assert_eq!(seen[0], SiloEvent::Requested { id });
    assert_eq!(seen[1], SiloEvent::Executed { id });
    assert_eq!(seen[2], SiloEvent::Requested { id: rollback });
    assert_eq!(seen[3], SiloEvent::RollbackCreated { id, rollback });

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn refused_transition_surfaces_as_store_error() {
    let handle = spawn_silo(OperationStore::new(), ledger(), None, RuntimeConfig::default());

    let id = handle
        .request(product_move("A", "B", 1))
        .await
        .expect("request");
    handle.cancel(id, User::new("u2")).await.expect("cancel");

    let err = handle
        .execute(id, User::new("u2"), None)
        .await
        .expect_err("cancelled operations cannot execute");
    assert!(matches!(
        err,
        RuntimeError::Store(StoreError::Operation(
            OperationError::InvalidStateTransition { .. }
        ))
    ));

    let missing = handle.cancel(99, User::new("u2")).await.expect_err("missing");
    assert!(matches!(
        missing,
        RuntimeError::Store(StoreError::MissingOperation(99))
    ));

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn sqlite_backed_runtime_flushes_and_replays() {
    let tmp = tempfile::TempDir::new().expect("tmp");
    let db_path = tmp.path().join("runtime.db");

    let sink = SqliteEventSink::open(&db_path).expect("open sqlite");
    let handle = spawn_silo(
        OperationStore::new(),
        ledger(),
        Some(Box::new(sink)),
        RuntimeConfig::default(),
    );

    let id = handle
        .request(product_move("A", "B", 3))
        .await
        .expect("request");
    handle
        .execute(id, User::new("u2"), None)
        .await
        .expect("execute");
    let replacement_source = handle
        .request(product_move("B", "A", 1))
        .await
        .expect("request");
    let replacement = handle
        .create_replace(
            replacement_source,
            User::new("u2"),
            BatchCollection::from(vec![Batch::new("SKU-2", 4)]),
        )
        .await
        .expect("replace");

    let durable = handle.flush().await.expect("flush");
    assert_eq!(durable, 5);
    handle.checkpoint().await.expect("checkpoint");
    handle.shutdown().await.expect("shutdown");

    let reopened = SqliteEventSink::open(&db_path).expect("reopen");
    let store = reopened.load_store().expect("replay");
    assert!(store.get(id).expect("executed").is_executed());
    assert!(store.get(replacement_source).expect("replaced").is_cancelled());
    assert_eq!(
        store
            .get(replacement)
            .expect("replacement")
            .batches()
            .quantity_of("SKU-2"),
        4
    );
}

#[tokio::test]
async fn slow_sink_applies_backpressure_without_losing_events() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = SlowSink {
        seen: Arc::clone(&seen),
        delay: Duration::from_millis(40),
    };

    let cfg = RuntimeConfig {
        flush_on_request: true,
        batch_max_ops: 16,
        batch_max_latency_ms: 500,
        persist_queue_bound: 1,
        snapshot_every_ops: 0,
        compact_after_snapshot: false,
    };

    let handle = spawn_silo(OperationStore::new(), ledger(), Some(Box::new(sink)), cfg);
    let mut sub = handle.subscribe();

    let mut ids = Vec::new();
    for i in 0..6i64 {
        let id = handle
            .request(product_move("A", "B", i + 1))
            .await
            .expect("request under queue pressure");
        ids.push(id);
    }

    let mut durable_seen = false;
    for _ in 0..20 {
        let evt = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("recv timeout")
            .expect("recv");
        if matches!(evt, SiloEvent::DurableUpTo { .. }) {
            durable_seen = true;
            break;
        }
    }
    assert!(durable_seen, "expected DurableUpTo event");

    for id in &ids[..3] {
        handle
            .execute(*id, User::new("u2"), None)
            .await
            .expect("execute under queue pressure");
    }
    let before = handle.view(ids[0]).await.expect("view").expect("operation");
    let refused = handle.execute(ids[0], User::new("u3"), None).await;
    assert!(matches!(refused, Err(RuntimeError::Store(_))));
    let after = handle.view(ids[0]).await.expect("view").expect("operation");
    assert_eq!(after, before);

    handle.shutdown().await.expect("shutdown");

    let seen = seen.lock().expect("lock");
    let seqs: Vec<EventSeq> = seen.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (1..=9).collect::<Vec<_>>());
    for id in &ids {
        assert!(seen.iter().any(|e| matches!(
            &e.event,
            OperationEvent::Requested { operation } if operation.id() == Some(*id)
        )));
    }
    for id in &ids[..3] {
        let executed = seen
            .iter()
            .filter(|e| matches!(&e.event, OperationEvent::Executed { id: done, .. } if done == id))
            .count();
        assert_eq!(executed, 1);
    }
}

#[test]
fn runtime_config_fills_missing_fields_with_defaults() {
    let cfg: RuntimeConfig =
        serde_json::from_str(r#"{ "persist_queue_bound": 8, "compact_after_snapshot": true }"#)
            .expect("config");
    assert_eq!(cfg.persist_queue_bound, 8);
    assert!(cfg.compact_after_snapshot);
    assert_eq!(cfg.batch_max_ops, RuntimeConfig::default().batch_max_ops);
}
