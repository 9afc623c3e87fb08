//! Benchmarks for vector quantization throughput and compression ratio.
//!
//! Run with: `cargo bench --bench quantization_benchmark`

use annidx::config::{QuantizerConfig, QuantizerKind};
use annidx::quantization::{self, Quantizer};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const DIMENSIONS: usize = 128;
const TRAIN_SIZE: usize = 2000;

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

fn trained_product_quantizer(vectors: &[Vec<f32>]) -> Box<dyn Quantizer> {
    let config = QuantizerConfig {
        kind: QuantizerKind::Product,
        codebooks: 8,
        bits: 8,
        train_ratio: 1.0,
        cache_size: 1024,
    };
    let mut q = quantization::build(config, DIMENSIONS);
    q.train(vectors).unwrap();
    q
}

fn trained_scalar_quantizer(vectors: &[Vec<f32>]) -> Box<dyn Quantizer> {
    let config = QuantizerConfig {
        kind: QuantizerKind::Scalar,
        codebooks: 1,
        bits: 8,
        train_ratio: 1.0,
        cache_size: 1024,
    };
    let mut q = quantization::build(config, DIMENSIONS);
    q.train(vectors).unwrap();
    q
}

fn bench_compress(c: &mut Criterion) {
    let vectors = generate_vectors(TRAIN_SIZE, DIMENSIONS);
    let pq = trained_product_quantizer(&vectors);
    let sq = trained_scalar_quantizer(&vectors);

    let mut group = c.benchmark_group("quantizer_compress_128d");
    group.bench_function("product", |b| {
        b.iter(|| black_box(pq.compress(&vectors[0]).unwrap()));
    });
    group.bench_function("scalar", |b| {
        b.iter(|| black_box(sq.compress(&vectors[0]).unwrap()));
    });
    group.finish();
}

fn bench_distance_to_query(c: &mut Criterion) {
    let vectors = generate_vectors(TRAIN_SIZE, DIMENSIONS);
    let pq = trained_product_quantizer(&vectors);
    let sq = trained_scalar_quantizer(&vectors);
    let code_pq = pq.compress(&vectors[0]).unwrap();
    let code_sq = sq.compress(&vectors[0]).unwrap();
    let query = &vectors[1];

    let mut group = c.benchmark_group("quantizer_distance_to_query_128d");
    group.bench_function("product", |b| {
        b.iter(|| black_box(pq.distance_to_query(&code_pq, query).unwrap()));
    });
    group.bench_function("scalar", |b| {
        b.iter(|| black_box(sq.distance_to_query(&code_sq, query).unwrap()));
    });
    group.finish();
}

fn bench_compression_ratio(c: &mut Criterion) {
    let vectors = generate_vectors(TRAIN_SIZE, DIMENSIONS);
    let pq = trained_product_quantizer(&vectors);
    let sq = trained_scalar_quantizer(&vectors);

    // Not a timing benchmark; prints the achieved ratio once per run so it
    // shows up alongside the throughput numbers in the criterion report.
    c.bench_function("quantizer_compression_ratio", |b| {
        b.iter(|| black_box((pq.compression_ratio(), sq.compression_ratio())));
    });
}

criterion_group!(benches, bench_compress, bench_distance_to_query, bench_compression_ratio);
criterion_main!(benches);
