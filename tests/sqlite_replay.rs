use tempfile::TempDir;

use silo::{
    batch::{Batch, BatchCollection},
    core::store::OperationStore,
    event::OperationEvent,
    ledger::InMemoryLedger,
    operation::Operation,
    persist::{EventSink, PersistError, sqlite::SqliteEventSink},
    types::{LocationCode, OperationSet, OperationType, User},
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

#[test]
fn sqlite_replay_round_trips_state_and_order() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("ops.db");

    let mut store = OperationStore::new();
    let mut ledger = ledger();
    let mut sink = SqliteEventSink::open(&db_path).expect("open sqlite");

    let id1 = store.insert(product_move("A", "B", 3)).expect("insert1");
    let id2 = store.insert(product_move("B", "A", 1)).expect("insert2");
    store
        .set_type(id1, OperationType::new("transfer"))
        .expect("type");
    store
        .add_to_set(id1, OperationSet::new(7, "wave-7"))
        .expect("set");
    store
        .execute(
            id1,
            User::new("u2"),
            Some(BatchCollection::from(vec![Batch::new("SKU-1", 2)])),
            &mut ledger,
        )
        .expect("execute");
    store.cancel(id2, User::new("u2")).expect("cancel");
    let rollback = store.create_rollback(id1, User::new("u3")).expect("rollback");

    sink.append_events(&store.drain_pending_events())
        .expect("append");
    drop(sink);

    let reopened = SqliteEventSink::open(&db_path).expect("reopen");
    let replayed = reopened.load_store().expect("replay");

    assert_eq!(replayed.export_snapshot(), store.export_snapshot());

    let executed = replayed.get(id1).expect("executed");
    assert_eq!(executed.batches().quantity_of("SKU-1"), 2);
    assert_eq!(executed.rollback_operation(), Some(rollback));
    assert_eq!(executed.type_name(), Some("transfer"));
    assert!(replayed.get(id2).expect("cancelled").is_cancelled());
    assert!(replayed.get(rollback).expect("rollback").is_pending());
}

#[test]
fn history_lists_events_of_one_operation() {
    let mut store = OperationStore::new();
    let mut ledger = ledger();
    let mut sink = SqliteEventSink::open_in_memory().expect("open sqlite");

    let id = store.insert(product_move("A", "B", 3)).expect("insert");
    let other = store.insert(product_move("B", "A", 3)).expect("insert");
    store
        .execute(id, User::new("u2"), None, &mut ledger)
        .expect("execute");
    store.cancel(other, User::new("u2")).expect("cancel");
    sink.append_events(&store.drain_pending_events())
        .expect("append");

    let history = sink.history(id).expect("history");
    assert_eq!(history.len(), 2);
    assert!(matches!(history[0].event, OperationEvent::Requested { .. }));
    assert!(matches!(history[1].event, OperationEvent::Executed { .. }));
    assert_eq!(sink.latest_seq().expect("latest"), 4);
}

#[test]
fn snapshot_and_compaction_preserve_replay() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("snap.db");

    let mut store = OperationStore::new();
    let mut ledger = ledger();
    let mut sink = SqliteEventSink::open(&db_path).expect("open sqlite");

    for i in 1..=10i64 {
        let id = store.insert(product_move("A", "B", i)).expect("insert");
        if i % 2 == 0 {
            store
                .execute(id, User::new("u2"), None, &mut ledger)
                .expect("execute");
        }
    }
    sink.append_events(&store.drain_pending_events())
        .expect("append");

    let snapshot = store.export_snapshot();
    let last_seq = store.latest_event_seq();
    sink.write_snapshot(&snapshot, last_seq).expect("snapshot");
    let removed = sink.compact_through(last_seq).expect("compact");
    assert_eq!(removed, 15);

    let tail = store.insert(product_move("B", "A", 4)).expect("tail insert");
    sink.append_events(&store.drain_pending_events())
        .expect("append tail");
    drop(sink);

    let reopened = SqliteEventSink::open(&db_path).expect("reopen");
    let replayed = reopened.load_store().expect("replay");

    assert_eq!(replayed.export_snapshot(), store.export_snapshot());
    assert_eq!(
        replayed.get(tail).expect("tail").source(),
        Some(&LocationCode::new("B"))
    );
    assert_eq!(replayed.latest_event_seq(), last_seq + 1);
}

#[test]
fn corrupt_journal_row_reports_its_seq() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("corrupt.db");

    let mut store = OperationStore::new();
    let mut ledger = ledger();
    let mut sink = SqliteEventSink::open(&db_path).expect("open sqlite");
    let id = store.insert(product_move("A", "B", 1)).expect("insert");
    store
        .execute(id, User::new("u2"), None, &mut ledger)
        .expect("execute");
    sink.append_events(&store.drain_pending_events())
        .expect("append");
    drop(sink);

    let conn = rusqlite::Connection::open(&db_path).expect("raw open");
    conn.execute("UPDATE events SET payload = x'00' WHERE seq = 2", [])
        .expect("corrupt row");
    drop(conn);

    let reopened = SqliteEventSink::open(&db_path).expect("reopen");
    assert!(matches!(
        reopened.history(id),
        Err(PersistError::Decode { seq: 2, .. })
    ));
    assert!(matches!(
        reopened.load_store(),
        Err(PersistError::Decode { seq: 2, .. })
    ));
}
