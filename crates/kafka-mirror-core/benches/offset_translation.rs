//! Performance benchmarks for offset translation.
//!
//! Measures the translation hot path the checkpoint emitter leans on.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use kafka_mirror_core::broker::TopicPartition;
use kafka_mirror_core::sync::{OffsetSync, OffsetSyncStore};

/// Build a store with `partitions` partitions, each carrying a full sync
/// window spaced `spacing` offsets apart.
fn populated_store(partitions: i32, spacing: i64) -> OffsetSyncStore {
    let store = OffsetSyncStore::new();
    for partition in 0..partitions {
        let tp = TopicPartition::new("orders", partition);
        for i in 0..64i64 {
            store.record_sync(OffsetSync::new(&tp, i * spacing, i * spacing + 1000));
        }
    }
    store
}

/// Benchmark a single translation against windows of different densities.
fn bench_translate(c: &mut Criterion) {
    let mut group = c.benchmark_group("translate");

    for spacing in [1i64, 100, 10_000] {
        let store = populated_store(1, spacing);
        let tp = TopicPartition::new("orders", 0);
        let query = 40 * spacing + spacing / 2;

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("spacing", spacing),
            &store,
            |b, s: &OffsetSyncStore| {
                b.iter(|| {
                    black_box(s.translate(&tp, query));
                });
            },
        );
    }

    group.finish();
}

/// Benchmark a checkpoint-tick-shaped sweep: translate one offset for every
/// partition of a topic.
fn bench_translate_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("translate_sweep");

    for partitions in [10i32, 100] {
        let store = populated_store(partitions, 100);

        group.throughput(Throughput::Elements(partitions as u64));
        group.bench_with_input(
            BenchmarkId::new("partitions", partitions),
            &store,
            |b, s: &OffsetSyncStore| {
                b.iter(|| {
                    for partition in 0..partitions {
                        let tp = TopicPartition::new("orders", partition);
                        black_box(s.translate(&tp, 3_250));
                    }
                });
            },
        );
    }

    group.finish();
}

/// Benchmark the writer path: appending a sync point with window eviction.
fn bench_record_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_sync");

    group.throughput(Throughput::Elements(1));
    group.bench_function("append", |b| {
        let store = populated_store(1, 100);
        let tp = TopicPartition::new("orders", 0);
        let mut next = 64 * 100;
        b.iter(|| {
            next += 100;
            black_box(store.record_sync(OffsetSync::new(&tp, next, next + 1000)));
        });
    });

    group.finish();
}

criterion_group!(benches, bench_translate, bench_translate_sweep, bench_record_sync);
criterion_main!(benches);
