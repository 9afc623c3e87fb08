//! Product Quantization: per-sub-space k-means codebooks.
//!
//! Splits each vector into `codebooks` contiguous sub-vectors, trains an
//! independent k-means codebook per sub-space, and packs the resulting
//! per-sub-space codes per spec §4.2's bit-packed layout.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::QuantizerConfig;
use crate::error::{Error, ErrorKind, Result};

use super::cache::{self, DistanceTable, DistanceTableCache};
use super::{pack_codes, unpack_codes, Quantizer};

/// A trained (or trainable) Product Quantizer.
///
/// `S` sub-spaces, each with `K = 2^bits` centroids of `D/S` floats (spec §3
/// Codebook entity). A compressed vector is `S` codes, each `bits` bits
/// wide, packed little-endian.
#[derive(Debug)]
pub struct ProductQuantizer {
    config: QuantizerConfig,
    dimension: usize,
    sub_dimension: usize,
    k: usize,
    /// `codebooks[s][k]` is the `sub_dimension`-length centroid `k` of
    /// sub-space `s`.
    codebooks: Vec<Vec<Vec<f32>>>,
    trained: bool,
    /// Per-query asymmetric distance tables (spec §4.2), keyed by query
    /// fingerprint so a single search reuses one table across every
    /// compressed entry it scans.
    distance_tables: Mutex<DistanceTableCache>,
}

impl Clone for ProductQuantizer {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            dimension: self.dimension,
            sub_dimension: self.sub_dimension,
            k: self.k,
            codebooks: self.codebooks.clone(),
            trained: self.trained,
            distance_tables: Mutex::new(DistanceTableCache::new(self.config.cache_size)),
        }
    }
}

impl ProductQuantizer {
    /// Creates an untrained quantizer. `dimension` need not divide evenly
    /// by `config.codebooks` until [`Quantizer::train`] is called, at
    /// which point a mismatch fails training.
    #[must_use]
    pub fn new(config: QuantizerConfig, dimension: usize) -> Self {
        let s = config.codebooks.max(1);
        let sub_dimension = if s == 0 { dimension } else { dimension / s.max(1) };
        let k = 1usize << config.bits.min(31);
        let cache_size = config.cache_size;
        Self {
            config,
            dimension,
            sub_dimension,
            k,
            codebooks: Vec::new(),
            trained: false,
            distance_tables: Mutex::new(DistanceTableCache::new(cache_size)),
        }
    }

    fn subvector<'a>(&self, part: usize, vector: &'a [f32]) -> &'a [f32] {
        let start = part * self.sub_dimension;
        let end = start + self.sub_dimension;
        &vector[start..end]
    }

    fn sub_distance(a: &[f32], b: &[f32]) -> f32 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt()
    }

    fn nearest_code(&self, part: usize, subvector: &[f32]) -> u32 {
        self.codebooks[part]
            .iter()
            .enumerate()
            .map(|(i, c)| (i, Self::sub_distance(c, subvector)))
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map_or(0, |(i, _)| i as u32)
    }

    fn require_trained(&self) -> Result<()> {
        if self.trained {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::NotTrained, "quantizer", "product"))
        }
    }

    fn require_dimension(&self, got: usize) -> Result<()> {
        if got == self.dimension {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::DimensionMismatch {
                    expected: self.dimension,
                    actual: got,
                },
                "quantizer",
                "product",
            ))
        }
    }

    /// k-means (classic Lloyd's algorithm, k-means++ init) over a single
    /// sub-space's training subvectors.
    fn train_subspace(&self, subvectors: &[Vec<f32>], seed: u64) -> Result<Vec<Vec<f32>>> {
        let n = subvectors.len();
        if n == 0 {
            return Err(Error::new(
                ErrorKind::TrainingFailed("empty sub-space training batch".into()),
                "quantizer",
                "train",
            ));
        }
        let k = self.k.min(n);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        // k-means++ seeding.
        let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
        centroids.push(subvectors[rng.gen_range(0..n)].clone());
        while centroids.len() < k {
            let weights: Vec<f32> = subvectors
                .iter()
                .map(|v| {
                    centroids
                        .iter()
                        .map(|c| Self::sub_distance(v, c).powi(2))
                        .fold(f32::MAX, f32::min)
                })
                .collect();
            let total: f32 = weights.iter().sum();
            if total <= 0.0 {
                centroids.push(subvectors[rng.gen_range(0..n)].clone());
                continue;
            }
            let mut pick = rng.gen_range(0.0..total);
            let mut chosen = n - 1;
            for (i, &w) in weights.iter().enumerate() {
                if pick < w {
                    chosen = i;
                    break;
                }
                pick -= w;
            }
            centroids.push(subvectors[chosen].clone());
        }

        let max_iterations = 25;
        let tolerance = 1e-4_f32;
        let mut prev_inertia = f32::MAX;

        for _ in 0..max_iterations {
            let mut assignments = vec![0usize; n];
            let mut inertia = 0.0f32;
            for (i, v) in subvectors.iter().enumerate() {
                let (best, dist) = centroids
                    .iter()
                    .enumerate()
                    .map(|(ci, c)| (ci, Self::sub_distance(v, c)))
                    .min_by(|(_, a), (_, b)| a.total_cmp(b))
                    .unwrap_or((0, 0.0));
                assignments[i] = best;
                inertia += dist * dist;
            }

            let mut sums = vec![vec![0.0f32; self.sub_dimension]; k];
            let mut counts = vec![0usize; k];
            for (v, &a) in subvectors.iter().zip(assignments.iter()) {
                counts[a] += 1;
                for (s, &x) in sums[a].iter_mut().zip(v.iter()) {
                    *s += x;
                }
            }
            for c in 0..k {
                if counts[c] == 0 {
                    centroids[c] = subvectors[rng.gen_range(0..n)].clone();
                    continue;
                }
                for (s, sum) in centroids[c].iter_mut().zip(sums[c].iter()) {
                    *s = sum / counts[c] as f32;
                }
            }

            if prev_inertia.is_finite() && prev_inertia > 0.0 {
                let relative_change = (prev_inertia - inertia).abs() / prev_inertia;
                if relative_change < tolerance {
                    break;
                }
            }
            prev_inertia = inertia;
        }

        Ok(centroids)
    }
}

impl Quantizer for ProductQuantizer {
    fn config(&self) -> &QuantizerConfig {
        &self.config
    }

    fn train(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        if vectors.is_empty() {
            return Err(Error::new(
                ErrorKind::TrainingFailed("no training vectors supplied".into()),
                "quantizer",
                "train",
            ));
        }
        for v in vectors {
            self.require_dimension(v.len())?;
        }
        let s = self.config.codebooks.max(1);
        if self.dimension % s != 0 {
            return Err(Error::new(
                ErrorKind::TrainingFailed(format!(
                    "dimension {} does not divide evenly by {s} sub-spaces",
                    self.dimension
                )),
                "quantizer",
                "train",
            ));
        }

        let sample_size = ((self.config.train_ratio * vectors.len() as f64).ceil() as usize).max(1);
        let sample = &vectors[..sample_size.min(vectors.len())];

        let mut codebooks = Vec::with_capacity(s);
        for part in 0..s {
            let subvectors: Vec<Vec<f32>> = sample
                .iter()
                .map(|v| self.subvector(part, v).to_vec())
                .collect();
            let seed = 0xA5A5_u64 ^ (part as u64);
            codebooks.push(self.train_subspace(&subvectors, seed)?);
        }

        self.codebooks = codebooks;
        self.trained = true;
        Ok(())
    }

    fn is_trained(&self) -> bool {
        self.trained
    }

    fn compress(&self, vector: &[f32]) -> Result<Vec<u8>> {
        self.require_trained()?;
        self.require_dimension(vector.len())?;

        let s = self.config.codebooks.max(1);
        let codes: Vec<u32> = (0..s)
            .map(|part| {
                let sub = self.subvector(part, vector);
                self.nearest_code(part, sub)
            })
            .collect();
        Ok(pack_codes(&codes, self.config.bits))
    }

    fn decompress(&self, code: &[u8]) -> Result<Vec<f32>> {
        self.require_trained()?;
        let s = self.config.codebooks.max(1);
        let codes = unpack_codes(code, self.config.bits, s);
        let mut out = Vec::with_capacity(self.dimension);
        for (part, &c) in codes.iter().enumerate() {
            let centroid = self.codebooks[part]
                .get(c as usize)
                .ok_or_else(|| Error::new(ErrorKind::DecompressionFailed("invalid code".into()), "quantizer", "decompress"))?;
            out.extend_from_slice(centroid);
        }
        Ok(out)
    }

    fn distance(&self, code_a: &[u8], code_b: &[u8]) -> Result<f32> {
        self.require_trained()?;
        let s = self.config.codebooks.max(1);
        let a = unpack_codes(code_a, self.config.bits, s);
        let b = unpack_codes(code_b, self.config.bits, s);
        let mut sum = 0.0f32;
        for part in 0..s {
            let ca = &self.codebooks[part][a[part] as usize];
            let cb = &self.codebooks[part][b[part] as usize];
            let d = Self::sub_distance(ca, cb);
            sum += d * d;
        }
        Ok(sum.sqrt())
    }

    fn distance_to_query(&self, code: &[u8], query: &[f32]) -> Result<f32> {
        self.require_trained()?;
        self.require_dimension(query.len())?;
        let s = self.config.codebooks.max(1);
        let codes = unpack_codes(code, self.config.bits, s);
        let key = cache::fingerprint(query);

        let mut tables = self.distance_tables.lock();
        if tables.get(key).is_none() {
            let built: DistanceTable = (0..s)
                .map(|part| {
                    let sub_query = self.subvector(part, query);
                    self.codebooks[part].iter().map(|c| Self::sub_distance(sub_query, c)).collect()
                })
                .collect();
            tables.insert(key, built);
        }

        let sum: f32 = match tables.get(key) {
            Some(table) => codes
                .iter()
                .enumerate()
                .map(|(part, &c)| {
                    let d = table[part][c as usize];
                    d * d
                })
                .sum(),
            // cache_size == 0 disables caching: fall back to direct computation.
            None => codes
                .iter()
                .enumerate()
                .map(|(part, &c)| {
                    let sub_query = self.subvector(part, query);
                    let centroid = &self.codebooks[part][c as usize];
                    let d = Self::sub_distance(sub_query, centroid);
                    d * d
                })
                .sum(),
        };
        Ok(sum.sqrt())
    }

    fn compression_ratio(&self) -> f32 {
        let raw_bytes = 4.0 * self.dimension as f32;
        let s = self.config.codebooks.max(1);
        let packed_bytes = (s * self.config.bits as usize).div_ceil(8) as f32;
        if packed_bytes == 0.0 {
            0.0
        } else {
            raw_bytes / packed_bytes
        }
    }

    fn memory_usage(&self) -> usize {
        self.codebooks
            .iter()
            .map(|cb| cb.len() * self.sub_dimension * std::mem::size_of::<f32>())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuantizerKind;

    fn config() -> QuantizerConfig {
        QuantizerConfig {
            kind: QuantizerKind::Product,
            codebooks: 2,
            bits: 2,
            train_ratio: 1.0,
            cache_size: 16,
        }
    }

    fn training_batch() -> Vec<Vec<f32>> {
        vec![
            vec![0.0, 0.0, 0.0, 0.0],
            vec![0.1, -0.1, 0.0, 0.1],
            vec![10.0, 10.0, 10.0, 10.0],
            vec![9.9, 10.1, 9.8, 10.2],
        ]
    }

    #[test]
    fn train_rejects_uneven_dimension_split() {
        let mut q = ProductQuantizer::new(
            QuantizerConfig {
                codebooks: 3,
                ..config()
            },
            4,
        );
        assert!(q.train(&training_batch()).is_err());
    }

    #[test]
    fn compress_then_decompress_recovers_approximate_cluster() {
        let mut q = ProductQuantizer::new(config(), 4);
        q.train(&training_batch()).unwrap();

        let code = q.compress(&vec![0.05, -0.05, 0.0, 0.05]).unwrap();
        let back = q.decompress(&code).unwrap();
        // Should land near the low cluster, not the high one.
        assert!(back.iter().all(|&x| x.abs() < 5.0));
    }

    #[test]
    fn compression_ratio_reflects_codebooks_and_bits() {
        let mut q = ProductQuantizer::new(config(), 4);
        q.train(&training_batch()).unwrap();
        // 2 codebooks * 2 bits = 4 bits -> 1 byte packed; raw = 16 bytes.
        assert!((q.compression_ratio() - 16.0).abs() < 1e-6);
    }

    #[test]
    fn distance_to_query_is_nonnegative_and_trained_required() {
        let q = ProductQuantizer::new(config(), 4);
        assert!(q.distance_to_query(&[0u8], &[0.0; 4]).is_err());
    }
}
