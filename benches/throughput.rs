use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use silo::{
    batch::{Batch, BatchCollection},
    core::store::OperationStore,
    ledger::InMemoryLedger,
    operation::Operation,
    types::User,
};

fn product_move(i: u64) -> Operation {
    Operation::new(
        User::new("bench"),
        Some("A".into()),
        Some("B".into()),
        BatchCollection::from(vec![
            Batch::new(format!("SKU-{}", i % 97), 1),
            Batch::new("SKU-X", 2),
        ]),
    )
    .expect("operation")
}

fn ledger() -> InMemoryLedger {
    let mut ledger = InMemoryLedger::new();
    ledger.add_location("A", None);
    ledger.add_location("B", None);
    ledger
}

fn bench_inserts(c: &mut Criterion) {
    c.bench_function("store_insert_50k", |b| {
        b.iter(|| {
            let mut store = OperationStore::new();
            for i in 0..50_000u64 {
                let _ = store.insert(product_move(i)).expect("insert");
            }
        });
    });
}

fn bench_execute_and_rollback(c: &mut Criterion) {
    c.bench_function("store_execute_rollback_10k", |b| {
        b.iter(|| {
            let mut store = OperationStore::new();
            let mut ledger = ledger();
            let user = User::new("bench");
            for i in 0..10_000u64 {
                let id = store.insert(product_move(i)).expect("insert");
                store
                    .execute(id, user.clone(), None, &mut ledger)
                    .expect("execute");
                let rollback = store.create_rollback(id, user.clone()).expect("rollback");
                store
                    .execute(rollback, user.clone(), None, &mut ledger)
                    .expect("execute rollback");
            }
            let _ = store.drain_pending_events();
        });
    });
}

fn bench_collection_batches(c: &mut Criterion) {
    let mut group = c.benchmark_group("collection_batches");
    let mut store = OperationStore::new();
    for i in 0..50_000u64 {
        let _ = store.insert(product_move(i)).expect("insert");
    }

    for n in [10usize, 100usize, 1000usize] {
        let ids: Vec<_> = store.ordered_ids().iter().rev().take(n).copied().collect();
        group.bench_with_input(BenchmarkId::from_parameter(n), &ids, |b, ids| {
            b.iter(|| {
                let collection = store.collect(ids).expect("collect");
                let _ = collection.batches();
                let _ = collection.types();
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_inserts,
    bench_execute_and_rollback,
    bench_collection_batches
);
criterion_main!(benches);
