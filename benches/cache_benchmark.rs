//! Performance benchmarks for cache-sync
//!
//! This benchmark suite measures:
//! - Store operations (write, read hit/miss, invalidate) across payload sizes
//! - Capacity eviction at the 1000-entry limit
//! - Entry tag generation
//! - Reconciliation against an in-memory remote (updated / not modified)
//!
//! Run with: cargo bench
//! View results: open target/criterion/report/index.html

use cache_sync::remote::InMemoryRemote;
use cache_sync::storage::MemoryStorage;
use cache_sync::tag::entry_tag;
use cache_sync::{
    CacheConfig, CacheOptions, CacheStore, SubscriptionRegistry, SyncEngine, SyncOptions,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde::{Deserialize, Serialize};
use std::hint::black_box;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

// ============================================================================
// Benchmark Fixtures
// ============================================================================

/// Benchmark payload with configurable data size
#[derive(Clone, Serialize, Deserialize)]
struct BenchPayload {
    id: String,
    data: Vec<u8>,
}

impl BenchPayload {
    fn new(id: &str, size: usize) -> Self {
        BenchPayload {
            id: id.to_string(),
            data: vec![1u8; size],
        }
    }
}

fn store() -> CacheStore {
    CacheStore::new(CacheConfig::default(), MemoryStorage::new())
}

// ============================================================================
// Group 1: Store Benchmarks
// ============================================================================

fn store_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("store");
    let options = CacheOptions::default();

    for size in [100, 1_000, 10_000].iter() {
        // WRITE (includes tag generation and snapshot persist)
        group
            .throughput(Throughput::Bytes(*size as u64))
            .bench_with_input(BenchmarkId::new("write", size), size, |b, &size| {
                let store = store();
                let payload = BenchPayload::new("bench", size);
                b.iter(|| store.write(black_box("bench_key"), black_box(&payload), &options));
            });

        // READ (cache hit)
        group
            .throughput(Throughput::Bytes(*size as u64))
            .bench_with_input(BenchmarkId::new("read_hit", size), size, |b, &size| {
                let store = store();
                store.write("bench_key", &BenchPayload::new("bench", size), &options);
                b.iter(|| store.read::<BenchPayload>(black_box("bench_key")));
            });
    }

    // READ (cache miss) - size doesn't matter for misses
    group.bench_function("read_miss", |b| {
        let store = store();
        b.iter(|| store.read::<BenchPayload>(black_box("nonexistent_key")));
    });

    // INVALIDATE
    group.bench_function("invalidate", |b| {
        let store = store();
        let payload = BenchPayload::new("bench", 1000);
        b.iter(|| {
            // Setup: insert before each iteration
            store.write("bench_key", &payload, &options);
            store.invalidate(black_box("bench_key"))
        });
    });

    // WRITE past capacity: every iteration adds a new key
    group.bench_function("write_with_eviction", |b| {
        let store = store();
        let counter = AtomicU32::new(0);
        b.iter(|| {
            let n = counter.fetch_add(1, Ordering::Relaxed);
            store.write(format!("bench_{}", n), black_box(&n), &options);
        });
    });

    group.finish();
}

// ============================================================================
// Group 2: Entry Tag Benchmarks
// ============================================================================

fn tag_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("entry_tag");

    for size in [100, 1_000, 10_000, 100_000].iter() {
        let payload = BenchPayload::new("bench", *size);
        group
            .throughput(Throughput::Bytes(*size as u64))
            .bench_with_input(BenchmarkId::new("tag", size), &payload, |b, payload| {
                b.iter(|| entry_tag(black_box(payload)));
            });
    }

    group.finish();
}

// ============================================================================
// Group 3: Reconciliation Benchmarks
// ============================================================================

fn sync_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync");
    let rt = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");

    let make_engine = |remote: InMemoryRemote| {
        let store = Arc::new(store());
        SyncEngine::new(SubscriptionRegistry::new(store), remote)
    };

    // NOT MODIFIED: tag matches, entry lifetime is refreshed in place
    group.bench_function("not_modified", |b| {
        let remote = InMemoryRemote::new();
        remote.insert("bench_key", serde_json::json!({"n": 1}));
        let engine = make_engine(remote);
        rt.block_on(async {
            engine
                .force_sync("bench_key", &SyncOptions::default())
                .await
                .expect("Failed to populate cache");
        });

        b.to_async(&rt).iter(|| async {
            engine
                .force_sync(black_box("bench_key"), &SyncOptions::default())
                .await
        });
    });

    // UPDATED: entry dropped every iteration, payload stored and dispatched
    group.bench_function("updated", |b| {
        let remote = InMemoryRemote::new();
        remote.insert("bench_key", serde_json::json!({"n": 1}));
        let engine = make_engine(remote);

        b.to_async(&rt).iter(|| async {
            engine.store().invalidate("bench_key");
            engine
                .force_sync(black_box("bench_key"), &SyncOptions::default())
                .await
        });
    });

    group.finish();
}

// ============================================================================
// Benchmark Registration
// ============================================================================

criterion_group!(benches, store_benchmarks, tag_benchmarks, sync_benchmarks);
criterion_main!(benches);
