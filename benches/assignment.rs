//! Assignment and statistics benchmarks
//!
//! - Weighted pick over growing variant counts
//! - Sticky vs first-visit assignment on the in-memory store
//! - Significance report over a seeded test

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;
use splitpage::assignment::{pick_weighted, AssignmentEngine};
use splitpage::experiment::{
    ContentVersionId, PageId, SplitTest, TestId, TestType, Variant, VisitorId, VisitorSession,
};
use splitpage::stats::StatisticsEngine;
use splitpage::store::{MemoryStore, SplitTestStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Runtime;

async fn seeded_store(variants: u32) -> (Arc<MemoryStore>, TestId) {
    let store = Arc::new(MemoryStore::new());
    let test = store
        .insert_test(SplitTest::builder(PageId(1), "Bench", TestType::Content).build())
        .await
        .unwrap();
    for i in 0..variants {
        store
            .insert_variant(
                Variant::builder(test.id(), format!("V{i}"), ContentVersionId(u64::from(i)))
                    .weight(i + 1)
                    .build(),
            )
            .await
            .unwrap();
    }
    (store, test.id())
}

fn bench_pick_weighted(c: &mut Criterion) {
    let mut group = c.benchmark_group("pick_weighted");
    for size in [2usize, 8, 64] {
        let weights: Vec<u32> = (1..=size as u32).collect();
        let mut rng = StdRng::seed_from_u64(7);
        group.bench_with_input(BenchmarkId::from_parameter(size), &weights, |b, weights| {
            b.iter(|| pick_weighted(black_box(weights), &mut rng));
        });
    }
    group.finish();
}

fn bench_assign_variant(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (store, test_id) = rt.block_on(seeded_store(4));
    let engine = AssignmentEngine::seeded(Arc::clone(&store), 7);
    let returning = VisitorId::new("returning");
    rt.block_on(engine.assign_variant(test_id, &returning)).unwrap();

    let mut group = c.benchmark_group("assign_variant");
    group.bench_function("sticky", |b| {
        b.to_async(&rt)
            .iter(|| async { engine.assign_variant(test_id, black_box(&returning)).await });
    });

    let counter = AtomicU64::new(0);
    group.bench_function("first_visit", |b| {
        b.to_async(&rt).iter(|| async {
            let n = counter.fetch_add(1, Ordering::Relaxed);
            let visitor = VisitorId::new(format!("new-{n}"));
            engine.assign_variant(test_id, &visitor).await
        });
    });
    group.finish();
}

fn bench_significance(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (store, test_id) = rt.block_on(seeded_store(3));
    rt.block_on(async {
        let variants = store.variants_for_test(test_id).await.unwrap();
        for (i, variant) in variants.iter().enumerate() {
            for n in 0..1_000 {
                let visitor = VisitorId::new(format!("{i}-{n}"));
                store
                    .insert_session(VisitorSession::new(test_id, variant.id(), visitor))
                    .await
                    .unwrap();
            }
        }
    });
    let stats = StatisticsEngine::new(store);

    c.bench_function("statistical_significance", |b| {
        b.to_async(&rt)
            .iter(|| async { stats.statistical_significance(black_box(test_id)).await });
    });
}

criterion_group!(benches, bench_pick_weighted, bench_assign_variant, bench_significance);
criterion_main!(benches);
