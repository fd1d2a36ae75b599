//! Performance benchmarks for cache-table
//!
//! This benchmark suite measures:
//! - Cache key derivation
//! - Record encoding and decoding across payload sizes
//! - Batched find (all hits, all misses) across batch sizes
//!
//! Run with: cargo bench
//! View results: open target/criterion/report/index.html

use cache_table::backend::InMemoryBackend;
use cache_table::key::CacheKeyBuilder;
use cache_table::serialization::{deserialize_record, serialize_record};
use cache_table::strategy::CacheStrategy;
use cache_table::{CacheExpander, DataRepository, Error, Record, RecordStructure, Value};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ============================================================================
// Benchmark Test Fixtures
// ============================================================================

fn documents() -> Arc<RecordStructure> {
    Arc::new(
        RecordStructure::new(
            "documents",
            &[("id", "uint"), ("title", "string"), ("body", "string"), ("score", "float")],
            "id",
            true,
        )
        .expect("Failed to build structure"),
    )
}

fn document(structure: &Arc<RecordStructure>, id: u64, size: usize) -> Record {
    Record::from_values(
        Arc::clone(structure),
        [
            ("id", Value::UInt(id)),
            ("title", Value::from(format!("document {}", id))),
            ("body", Value::Text("x".repeat(size))),
            ("score", Value::Float(id as f64 / 7.0)),
        ],
    )
    .expect("Failed to hydrate")
}

/// Repository that synthesises a row for every requested id.
#[derive(Clone)]
struct BenchRepository {
    structure: Arc<RecordStructure>,
    body_size: usize,
}

impl BenchRepository {
    fn new(body_size: usize) -> Self {
        BenchRepository {
            structure: documents(),
            body_size,
        }
    }
}

impl DataRepository for BenchRepository {
    fn structure(&self) -> &Arc<RecordStructure> {
        &self.structure
    }

    async fn fetch_by_values(&self, _field: &str, values: &[Value]) -> cache_table::Result<Vec<Record>> {
        Ok(values
            .iter()
            .filter_map(Value::as_u64)
            .map(|id| document(&self.structure, id, self.body_size))
            .collect())
    }

    async fn insert(&self, _record: &mut Record, _ignore: bool) -> cache_table::Result<bool> {
        Err(Error::NotImplemented("read-only bench repository".to_string()))
    }

    async fn update(&self, _record: &mut Record, _force: bool) -> cache_table::Result<bool> {
        Err(Error::NotImplemented("read-only bench repository".to_string()))
    }

    async fn delete(&self, _record: &mut Record) -> cache_table::Result<()> {
        Err(Error::NotImplemented("read-only bench repository".to_string()))
    }
}

fn ids(range: std::ops::Range<u64>) -> Vec<Value> {
    range.map(Value::UInt).collect()
}

// ============================================================================
// Group 1: Key Derivation
// ============================================================================

fn key_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_key");

    group.bench_function("numeric", |b| {
        let value = Value::UInt(1_234_567);
        b.iter(|| CacheKeyBuilder::for_value(black_box("users"), black_box(&value)));
    });

    group.bench_function("text", |b| {
        let value = Value::from("someone.with.a.long.address@example.com");
        b.iter(|| CacheKeyBuilder::for_value(black_box("users_by_email"), black_box(&value)));
    });

    group.finish();
}

// ============================================================================
// Group 2: Record Encoding
// ============================================================================

fn serialization_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialization");
    let structure = documents();

    for size in [100, 1_000, 10_000, 100_000].iter() {
        let record = document(&structure, 42, *size);

        group
            .throughput(Throughput::Bytes(*size as u64))
            .bench_with_input(BenchmarkId::new("serialize", size), &record, |b, record| {
                b.iter(|| serialize_record(black_box(record)));
            });

        let serialized = serialize_record(&record).expect("Failed to serialize");
        group
            .throughput(Throughput::Bytes(*size as u64))
            .bench_with_input(
                BenchmarkId::new("deserialize", size),
                &serialized,
                |b, serialized| {
                    b.iter(|| deserialize_record(black_box(serialized), &structure));
                },
            );
    }

    group.finish();
}

// ============================================================================
// Group 3: Batched Find
// ============================================================================

fn find_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("batched_find");

    // Create tokio runtime for async operations
    let rt = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");

    for batch in [1u64, 10, 100, 1_000].iter() {
        // All hits: one mget + decode
        group
            .throughput(Throughput::Elements(*batch))
            .bench_with_input(BenchmarkId::new("refresh_hit", batch), batch, |b, &batch| {
                let expander = CacheExpander::new(InMemoryBackend::new());
                let repo = BenchRepository::new(1_000);
                let values = ids(0..batch);

                // Pre-populate cache
                rt.block_on(async {
                    expander
                        .find::<Record, _>(&repo, &values, CacheStrategy::Refresh)
                        .await
                        .expect("Failed to populate cache");
                });

                b.to_async(&rt).iter(|| async {
                    expander
                        .find::<Record, _>(
                            black_box(&repo),
                            black_box(&values),
                            black_box(CacheStrategy::Refresh),
                        )
                        .await
                });
            });

        // All misses: mget + fetch + encode + mset
        group
            .throughput(Throughput::Elements(*batch))
            .bench_with_input(BenchmarkId::new("refresh_miss", batch), batch, |b, &batch| {
                let expander = Arc::new(CacheExpander::new(InMemoryBackend::new()));
                let repo = BenchRepository::new(1_000);
                let next = Arc::new(AtomicU64::new(0));

                b.to_async(&rt).iter(|| {
                    let expander = Arc::clone(&expander);
                    let repo = repo.clone();
                    // Fresh id range per iteration to force misses
                    let start = next.fetch_add(batch, Ordering::Relaxed);
                    async move {
                        expander
                            .find::<Record, _>(
                                black_box(&repo),
                                black_box(&ids(start..start + batch)),
                                black_box(CacheStrategy::Refresh),
                            )
                            .await
                    }
                });
            });
    }

    // Bypass strategy
    // Measures: fetch + encode + mset (skip cache read)
    group.bench_function("bypass_100", |b| {
        let expander = CacheExpander::new(InMemoryBackend::new());
        let repo = BenchRepository::new(1_000);
        let values = ids(0..100);

        b.to_async(&rt).iter(|| async {
            expander
                .find::<Record, _>(
                    black_box(&repo),
                    black_box(&values),
                    black_box(CacheStrategy::Bypass),
                )
                .await
        });
    });

    group.finish();
}

// ============================================================================
// Benchmark Registration
// ============================================================================

criterion_group!(
    benches,
    key_benchmarks,
    serialization_benchmarks,
    find_benchmarks
);
criterion_main!(benches);
