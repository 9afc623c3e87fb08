//! Benchmark suite for the HNSW index.
//!
//! Run with: `cargo bench --bench hnsw_benchmark`

use annidx::cancel::CancellationToken;
use annidx::config::HnswConfig;
use annidx::distance::DistanceMetric;
use annidx::entry::VectorEntry;
use annidx::index::hnsw::HnswIndex;
use annidx::index::Index;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const DIMENSIONS: usize = 128;
const N_VECTORS: usize = 5000;
const K: usize = 10;

fn generate_vectors(n: usize, dim: usize) -> Vec<Vec<f32>> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    (0..n)
        .map(|i| {
            (0..dim)
                .map(|j| {
                    let mut hasher = DefaultHasher::new();
                    (i * dim + j).hash(&mut hasher);
                    (hasher.finish() as f32 / u64::MAX as f32) * 2.0 - 1.0
                })
                .collect()
        })
        .collect()
}

fn config() -> HnswConfig {
    HnswConfig {
        dimension: DIMENSIONS,
        m: 16,
        ef_construction: 200,
        ef_search: 64,
        metric: DistanceMetric::L2,
        seed: 42,
        quantizer: None,
    }
}

fn init_tracing() {
    use std::sync::Once;
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    });
}

fn bench_insert(c: &mut Criterion) {
    init_tracing();
    let vectors = generate_vectors(N_VECTORS, DIMENSIONS);
    let ctx = CancellationToken::none();

    c.bench_function("hnsw_insert_5000x128", |b| {
        b.iter(|| {
            let index = HnswIndex::new(config());
            for (i, v) in vectors.iter().enumerate() {
                index.insert(&ctx, VectorEntry::without_metadata(i.to_string(), v.clone())).unwrap();
            }
            black_box(&index);
        });
    });
}

fn bench_search(c: &mut Criterion) {
    init_tracing();
    let vectors = generate_vectors(N_VECTORS, DIMENSIONS);
    let queries = generate_vectors(100, DIMENSIONS);
    let ctx = CancellationToken::none();

    let index = HnswIndex::new(config());
    for (i, v) in vectors.iter().enumerate() {
        index.insert(&ctx, VectorEntry::without_metadata(i.to_string(), v.clone())).unwrap();
    }

    c.bench_function("hnsw_search_k10", |b| {
        b.iter(|| {
            for q in &queries {
                let results = index.search(&ctx, q, K).unwrap();
                black_box(results);
            }
        });
    });
}

fn bench_memory_mapped_search(c: &mut Criterion) {
    init_tracing();
    let vectors = generate_vectors(N_VECTORS, DIMENSIONS);
    let queries = generate_vectors(100, DIMENSIONS);
    let ctx = CancellationToken::none();
    let dir = tempfile::tempdir().unwrap();

    let index = HnswIndex::new(config());
    for (i, v) in vectors.iter().enumerate() {
        index.insert(&ctx, VectorEntry::without_metadata(i.to_string(), v.clone())).unwrap();
    }
    index.enable_memory_mapping(dir.path()).unwrap();

    c.bench_function("hnsw_search_memory_mapped_k10", |b| {
        b.iter(|| {
            for q in &queries {
                let results = index.search(&ctx, q, K).unwrap();
                black_box(results);
            }
        });
    });
}

criterion_group!(benches, bench_insert, bench_search, bench_memory_mapped_search);
criterion_main!(benches);
