//! IVF-PQ (Inverted File with Product/Scalar Quantization) index (spec §4.5).
//!
//! Coarse centroids plus per-cluster entry lists and a per-entry compressed
//! code cache, guarded by the same single-writer/many-reader
//! `parking_lot::RwLock` convention as the other index kinds.

mod kmeans;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rustc_hash::FxHashMap;

use crate::cancel::CancellationToken;
use crate::config::{IvfPqConfig, QuantizerConfig, QuantizerKind};
use crate::entry::{Metadata, SearchResult, VectorEntry};
use crate::error::{Error, ErrorKind, Result};
use crate::heap::{BoundedMaxHeap, Candidate};
use crate::index::Index;
use crate::quantization::{self, QuantizerRecoveryPolicy, RecoveryAction, Quantizer};

struct Entry {
    id: String,
    vector: Vec<f32>,
    metadata: Option<Metadata>,
}

#[derive(Default)]
struct Cluster {
    entries: Vec<Entry>,
    compressed: FxHashMap<String, Vec<u8>>,
}

/// Rolling statistics driving adaptive probe-count tuning (spec §4.5
/// "Adaptive probe tuning").
struct AdaptiveStats {
    enabled: bool,
    probes: usize,
    count: u64,
    latency_sum_ms: f64,
    accuracy_sum: f64,
    last_adjust: Instant,
}

impl AdaptiveStats {
    fn new(initial_probes: usize, enabled: bool) -> Self {
        Self {
            enabled,
            probes: initial_probes.max(1),
            count: 0,
            latency_sum_ms: 0.0,
            accuracy_sum: 0.0,
            last_adjust: Instant::now(),
        }
    }

    /// Records one search's outcome and, if due, adjusts `probes`.
    fn record(&mut self, n_clusters: usize, latency_ms: f64, accuracy: f64) {
        if !self.enabled {
            return;
        }
        self.count += 1;
        self.latency_sum_ms += latency_ms;
        self.accuracy_sum += accuracy;

        let due = self.count % 100 == 0 || self.last_adjust.elapsed().as_secs() >= 30;
        if !due || self.count < 10 {
            return;
        }

        let avg_latency = self.latency_sum_ms / self.count as f64;
        let avg_accuracy = self.accuracy_sum / self.count as f64;

        if avg_latency > 50.0 && avg_accuracy > 0.9 {
            self.probes = self.probes.saturating_sub(1).max(1);
        } else if avg_latency < 25.0 && avg_accuracy < 0.9 {
            self.probes = (self.probes + 1).min(n_clusters.max(1));
        }
        self.last_adjust = Instant::now();
        self.count = 0;
        self.latency_sum_ms = 0.0;
        self.accuracy_sum = 0.0;
    }
}

struct IvfPqState {
    config: IvfPqConfig,
    centroids: Vec<Vec<f32>>,
    clusters: Vec<Cluster>,
    id_to_cluster: FxHashMap<String, usize>,
    quantizer: Option<Box<dyn Quantizer>>,
    trained: bool,
    rng: ChaCha8Rng,
}

impl IvfPqState {
    fn new(config: IvfPqConfig) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            config,
            centroids: Vec::new(),
            clusters: Vec::new(),
            id_to_cluster: FxHashMap::default(),
            quantizer: None,
            trained: false,
            rng,
        }
    }

    fn remove_if_present(&mut self, id: &str) {
        if let Some(&cluster) = self.id_to_cluster.get(id) {
            let bucket = &mut self.clusters[cluster];
            if let Some(pos) = bucket.entries.iter().position(|e| e.id == id) {
                bucket.entries.swap_remove(pos);
            }
            bucket.compressed.remove(id);
            self.id_to_cluster.remove(id);
        }
    }

    fn entry_distance(&self, cluster: usize, entry: &Entry, query: &[f32]) -> f32 {
        if let Some(code) = self.clusters[cluster].compressed.get(&entry.id) {
            if let Some(q) = &self.quantizer {
                if let Ok(d) = q.distance_to_query(code, query) {
                    return d;
                }
            }
        } else if let Some(q) = &self.quantizer {
            if let Ok(code) = q.compress(&entry.vector) {
                if let Ok(d) = q.distance_to_query(&code, query) {
                    return d;
                }
            }
        }
        self.config.metric.distance(query, &entry.vector)
    }
}

/// IVF-PQ approximate nearest-neighbor index.
pub struct IvfPqIndex {
    state: RwLock<IvfPqState>,
    adaptive: Mutex<AdaptiveStats>,
    closed: AtomicBool,
}

impl IvfPqIndex {
    /// Creates a new, untrained index for the given configuration.
    #[must_use]
    pub fn new(config: IvfPqConfig) -> Self {
        let initial_probes = config.n_probes;
        let adaptive_enabled = config.adaptive_probes;
        Self {
            state: RwLock::new(IvfPqState::new(config)),
            adaptive: Mutex::new(AdaptiveStats::new(initial_probes, adaptive_enabled)),
            closed: AtomicBool::new(false),
        }
    }

    fn require_open(&self, operation: &'static str) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::new(ErrorKind::Closed, "ivfpq", operation))
        } else {
            Ok(())
        }
    }

    /// Whether the coarse quantizer (and fine quantizer, if configured) has
    /// been trained.
    #[must_use]
    pub fn is_trained(&self) -> bool {
        self.state.read().trained
    }

    /// Trains the coarse k-means quantizer (and fine quantizer, if
    /// configured) on a batch of vectors (spec §4.5 "Training").
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Closed`] if closed, [`ErrorKind::TrainingFailed`]
    /// if fewer than `n_clusters` vectors are supplied or the index already
    /// holds data, [`ErrorKind::DimensionMismatch`] if any vector's
    /// dimension disagrees, or [`ErrorKind::Canceled`].
    #[tracing::instrument(level = "debug", skip(self, ctx, vectors), fields(n = vectors.len()))]
    pub fn train(&self, ctx: &CancellationToken, vectors: &[Vec<f32>]) -> Result<()> {
        self.require_open("train")?;
        let mut state = self.state.write();

        if !state.id_to_cluster.is_empty() {
            return Err(Error::new(
                ErrorKind::TrainingFailed("index already holds entries".into()),
                "ivfpq",
                "train",
            ));
        }
        if vectors.len() < state.config.n_clusters {
            return Err(Error::new(
                ErrorKind::TrainingFailed(format!(
                    "need at least {} training vectors, got {}",
                    state.config.n_clusters,
                    vectors.len()
                )),
                "ivfpq",
                "train",
            ));
        }
        let dimension = state.config.dimension;
        for v in vectors {
            if v.len() != dimension {
                return Err(Error::new(
                    ErrorKind::DimensionMismatch {
                        expected: dimension,
                        actual: v.len(),
                    },
                    "ivfpq",
                    "train",
                ));
            }
        }

        let n_clusters = state.config.n_clusters;
        let metric = state.config.metric;
        let max_iterations = state.config.max_iterations;
        let tolerance = state.config.tolerance;
        let result = kmeans::train(ctx, vectors, n_clusters, metric, max_iterations, tolerance, &mut state.rng)?;
        state.centroids = result.centroids;
        state.clusters = (0..n_clusters).map(|_| Cluster::default()).collect();

        if let Some(qc) = state.config.quantizer.clone() {
            let mut recovery = QuantizerRecoveryPolicy::new(2);
            let mut attempt_config = qc;
            loop {
                let mut q = quantization::build(attempt_config.clone(), dimension);
                match q.train(vectors) {
                    Ok(()) => {
                        state.quantizer = Some(q);
                        break;
                    }
                    Err(_) => match recovery.next_action(&attempt_config) {
                        RecoveryAction::RetryReduced(reduced) => attempt_config = reduced,
                        RecoveryAction::FallBackToRaw => {
                            state.quantizer = None;
                            break;
                        }
                    },
                }
            }
        }
        state.trained = true;
        Ok(())
    }

    /// Per-cluster summary: `(cluster index, centroid, member count)`.
    #[must_use]
    pub fn get_cluster_info(&self) -> Vec<(usize, Vec<f32>, usize)> {
        let state = self.state.read();
        state
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, c.clone(), state.clusters.get(i).map_or(0, |cl| cl.entries.len())))
            .collect()
    }

    /// Enables rolling adaptive probe-count tuning (spec §4.5).
    pub fn enable_adaptive_probes(&self) {
        self.adaptive.lock().enabled = true;
    }

    /// Disables adaptive probe-count tuning; the current probe count is
    /// kept as-is.
    pub fn disable_adaptive_probes(&self) {
        self.adaptive.lock().enabled = false;
    }

    /// The probe count currently in effect (adaptive or configured).
    #[must_use]
    pub fn active_probes(&self) -> usize {
        self.adaptive.lock().probes
    }
}

impl Index for IvfPqIndex {
    #[tracing::instrument(level = "debug", skip(self, _ctx, entry), fields(id = %entry.id))]
    fn insert(&self, _ctx: &CancellationToken, entry: VectorEntry) -> Result<()> {
        self.require_open("insert")?;
        let mut state = self.state.write();
        if !state.trained {
            return Err(Error::new(ErrorKind::NotTrained, "ivfpq", "insert"));
        }
        if entry.dimension() != state.config.dimension {
            return Err(Error::new(
                ErrorKind::DimensionMismatch {
                    expected: state.config.dimension,
                    actual: entry.dimension(),
                },
                "ivfpq",
                "insert",
            ));
        }

        state.remove_if_present(&entry.id);

        let (cluster, _) = kmeans::nearest(&state.centroids, &entry.vector, state.config.metric);
        let compressed = state.quantizer.as_ref().and_then(|q| q.compress(&entry.vector).ok());

        if let Some(code) = compressed {
            state.clusters[cluster].compressed.insert(entry.id.clone(), code);
        }
        state.id_to_cluster.insert(entry.id.clone(), cluster);
        state.clusters[cluster].entries.push(Entry {
            id: entry.id,
            vector: entry.vector,
            metadata: entry.metadata,
        });
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, ctx, query))]
    fn search(&self, ctx: &CancellationToken, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        self.require_open("search")?;
        let started = Instant::now();
        let state = self.state.read();
        if !state.trained {
            return Err(Error::new(ErrorKind::NotTrained, "ivfpq", "search"));
        }
        if query.len() != state.config.dimension {
            return Err(Error::new(
                ErrorKind::DimensionMismatch {
                    expected: state.config.dimension,
                    actual: query.len(),
                },
                "ivfpq",
                "search",
            ));
        }
        if state.id_to_cluster.is_empty() {
            return Err(Error::new(ErrorKind::Empty, "ivfpq", "search"));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let n_probes = self.active_probes().clamp(1, state.centroids.len());
        let mut probe_heap = BoundedMaxHeap::new(n_probes);
        for (i, centroid) in state.centroids.iter().enumerate() {
            let d = state.config.metric.distance(query, centroid);
            probe_heap.push(Candidate::new(i as u32, d));
        }
        let probes = probe_heap.into_sorted_ascending();

        // Candidate::id only carries a u32, too narrow for a string entry
        // id, so candidates are gathered into a plain vec and sorted
        // directly rather than routed through a Candidate heap.
        let mut gathered: Vec<(f32, usize, usize)> = Vec::new();
        for (probe_idx, probe) in probes.iter().enumerate() {
            ctx.check("ivfpq", "search")?;
            let cluster = probe.id as usize;
            for (entry_idx, entry) in state.clusters[cluster].entries.iter().enumerate() {
                let d = state.entry_distance(cluster, entry, query);
                gathered.push((d, cluster, entry_idx));
            }

            if gathered.len() >= 10 * k {
                if let Some(next_probe) = probes.get(probe_idx + 1) {
                    let kth_best = kth_smallest_distance(&gathered, k);
                    if kth_best < 0.8 * next_probe.distance {
                        break;
                    }
                }
            }
        }

        gathered.sort_by(|a, b| a.0.total_cmp(&b.0));
        let mut results = Vec::with_capacity(k.min(gathered.len()));
        for (distance, cluster, entry_idx) in gathered.into_iter().take(k) {
            let entry = &state.clusters[cluster].entries[entry_idx];
            results.push(SearchResult::new(entry.id.clone(), distance, entry.vector.clone(), entry.metadata.clone()));
        }

        let accuracy = (results.len() as f64 / k as f64).min(1.0);
        self.adaptive.lock().record(state.centroids.len(), started.elapsed().as_secs_f64() * 1000.0, accuracy);
        Ok(results)
    }

    #[tracing::instrument(level = "debug", skip(self, _ctx))]
    fn delete(&self, _ctx: &CancellationToken, id: &str) -> Result<()> {
        self.require_open("delete")?;
        let mut state = self.state.write();
        if !state.id_to_cluster.contains_key(id) {
            return Err(Error::new(ErrorKind::NotFound(id.to_string()), "ivfpq", "delete"));
        }
        state.remove_if_present(id);
        Ok(())
    }

    fn size(&self) -> usize {
        self.state.read().id_to_cluster.len()
    }

    fn memory_usage(&self) -> usize {
        let state = self.state.read();
        let centroid_bytes: usize = state.centroids.iter().map(|c| c.len() * std::mem::size_of::<f32>()).sum();
        let entry_bytes: usize = state
            .clusters
            .iter()
            .map(|c| {
                let raw: usize = c.entries.iter().map(|e| e.vector.len() * std::mem::size_of::<f32>() + e.id.len()).sum();
                let compressed: usize = c.compressed.values().map(Vec::len).sum();
                raw + compressed
            })
            .sum();
        let quantizer_bytes = state.quantizer.as_ref().map_or(0, |q| q.memory_usage());
        centroid_bytes + entry_bytes + quantizer_bytes
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl Drop for IvfPqIndex {
    fn drop(&mut self) {
        self.close();
    }
}

/// The k-th smallest distance gathered so far, or `f32::MAX` if fewer than
/// `k` candidates have been gathered yet. Used by the early-termination
/// check during a probe scan; `gathered` is small enough that a linear
/// partial scan beats re-sorting on every probe.
fn kth_smallest_distance(gathered: &[(f32, usize, usize)], k: usize) -> f32 {
    if gathered.len() < k {
        return f32::MAX;
    }
    let mut distances: Vec<f32> = gathered.iter().map(|(d, _, _)| *d).collect();
    distances.sort_by(f32::total_cmp);
    distances[k - 1]
}

/// Auto-tunes `(n_clusters, n_probes, fine-quantizer config)` for an
/// estimated corpus size and memory budget (spec §4.5 "Auto-tuning of
/// configuration").
///
/// Heuristic, not exact: cluster count scales as `√N` below one million
/// vectors and `N^0.4` beyond it (clamped to `[4, 16384]`); probe count is
/// `1/2`, `1/4`, or `1/8` of the cluster count depending on corpus size;
/// quantizer bit width is chosen so that `codebooks` bytes per vector fit
/// the per-vector memory budget implied by `target_memory_mb`.
#[must_use]
pub fn auto_tune(dimension: usize, estimated_vectors: usize, target_memory_mb: f64) -> (usize, usize, QuantizerConfig) {
    let n = (estimated_vectors.max(1)) as f64;
    let (raw_clusters, probe_divisor) = if n < 10_000.0 {
        (n.sqrt(), 2.0)
    } else if n < 1_000_000.0 {
        (n.sqrt(), 4.0)
    } else {
        (n.powf(0.4), 8.0)
    };
    let n_clusters = raw_clusters.round().clamp(4.0, 16384.0) as usize;
    let n_probes = ((n_clusters as f64 / probe_divisor).round() as usize).clamp(1, n_clusters);

    let codebooks = (dimension / 4).max(1);
    let budget_bytes_per_vector = (target_memory_mb * 1024.0 * 1024.0) / n;
    let bits = if budget_bytes_per_vector >= codebooks as f64 {
        8
    } else if budget_bytes_per_vector >= codebooks as f64 / 2.0 {
        4
    } else {
        2
    };

    let quantizer = QuantizerConfig {
        kind: QuantizerKind::Product,
        codebooks,
        bits,
        train_ratio: 1.0,
        cache_size: 1024,
    };
    (n_clusters, n_probes, quantizer)
}
