//! k-means++ coarse clustering for IVF-PQ (spec §4.5 "Training — Coarse").
//!
//! Trains only the coarse, full-dimension centroids; fine quantization is
//! delegated to [`crate::quantization`].

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::cancel::CancellationToken;
use crate::distance::DistanceMetric;
use crate::error::Result;

/// Final centroids and per-vector cluster assignment from a k-means run.
pub struct KMeansResult {
    /// One centroid per cluster.
    pub centroids: Vec<Vec<f32>>,
    /// `assignments[i]` is the cluster index of `vectors[i]`.
    pub assignments: Vec<usize>,
}

/// Runs k-means++-seeded Lloyd's iteration on `vectors` (spec §4.5).
///
/// Stops after `max_iterations` or once the relative inertia change drops
/// below `tolerance`. A cluster left empty after an assignment pass is
/// reseeded to a uniformly random training vector.
///
/// # Errors
///
/// Returns [`crate::error::ErrorKind::Canceled`] if `ctx` is canceled.
pub fn train(
    ctx: &CancellationToken,
    vectors: &[Vec<f32>],
    k: usize,
    metric: DistanceMetric,
    max_iterations: usize,
    tolerance: f64,
    rng: &mut ChaCha8Rng,
) -> Result<KMeansResult> {
    let dimension = vectors[0].len();
    let mut centroids = seed_plus_plus(vectors, k, metric, rng);
    let mut assignments = vec![0usize; vectors.len()];
    let mut prev_inertia = f64::MAX;

    for _ in 0..max_iterations {
        ctx.check("ivfpq", "train")?;

        let mut inertia = 0.0f64;
        for (i, v) in vectors.iter().enumerate() {
            let (c, d) = nearest(&centroids, v, metric);
            assignments[i] = c;
            inertia += f64::from(d) * f64::from(d);
        }

        let mut sums = vec![vec![0.0f32; dimension]; k];
        let mut counts = vec![0usize; k];
        for (v, &c) in vectors.iter().zip(assignments.iter()) {
            counts[c] += 1;
            for (s, x) in sums[c].iter_mut().zip(v.iter()) {
                *s += x;
            }
        }
        for c in 0..k {
            if counts[c] == 0 {
                let idx = rng.gen_range(0..vectors.len());
                centroids[c] = vectors[idx].clone();
                continue;
            }
            for s in &mut sums[c] {
                *s /= counts[c] as f32;
            }
            centroids[c] = std::mem::take(&mut sums[c]);
        }

        let relative_change = (prev_inertia - inertia).abs() / prev_inertia.max(1e-12);
        prev_inertia = inertia;
        if relative_change < tolerance {
            break;
        }
    }

    Ok(KMeansResult { centroids, assignments })
}

/// k-means++ seeding: first center uniform, each subsequent center drawn
/// with probability proportional to its squared distance to the nearest
/// already-chosen center.
fn seed_plus_plus(vectors: &[Vec<f32>], k: usize, metric: DistanceMetric, rng: &mut ChaCha8Rng) -> Vec<Vec<f32>> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(vectors[rng.gen_range(0..vectors.len())].clone());

    while centroids.len() < k {
        let weights: Vec<f64> = vectors
            .iter()
            .map(|v| {
                let (_, d) = nearest(&centroids, v, metric);
                f64::from(d) * f64::from(d)
            })
            .collect();
        let total: f64 = weights.iter().sum();

        let chosen = if total <= 0.0 {
            rng.gen_range(0..vectors.len())
        } else {
            let mut target = rng.gen::<f64>() * total;
            let mut idx = vectors.len() - 1;
            for (i, w) in weights.iter().enumerate() {
                if target < *w {
                    idx = i;
                    break;
                }
                target -= w;
            }
            idx
        };
        centroids.push(vectors[chosen].clone());
    }
    centroids
}

/// Index and distance of the nearest centroid to `v`.
#[must_use]
pub fn nearest(centroids: &[Vec<f32>], v: &[f32], metric: DistanceMetric) -> (usize, f32) {
    let mut best_idx = 0;
    let mut best_dist = f32::MAX;
    for (i, c) in centroids.iter().enumerate() {
        let d = metric.distance(v, c);
        if d < best_dist {
            best_dist = d;
            best_idx = i;
        }
    }
    (best_idx, best_dist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn separated_clusters_converge_to_their_seed_regions() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut vectors = Vec::new();
        for center in [0.0f32, 5.0, -5.0] {
            for i in 0..20 {
                let jitter = (i as f32 % 3.0) * 0.01;
                vectors.push(vec![center + jitter; 4]);
            }
        }
        let ctx = CancellationToken::none();
        let result = train(&ctx, &vectors, 3, DistanceMetric::L2, 25, 1e-4, &mut rng).unwrap();
        assert_eq!(result.centroids.len(), 3);

        let (origin_cluster, _) = nearest(&result.centroids, &vec![0.0; 4], DistanceMetric::L2);
        let (positive_cluster, _) = nearest(&result.centroids, &vec![5.0; 4], DistanceMetric::L2);
        let (negative_cluster, _) = nearest(&result.centroids, &vec![-5.0; 4], DistanceMetric::L2);
        assert_ne!(origin_cluster, positive_cluster);
        assert_ne!(origin_cluster, negative_cluster);
        assert_ne!(positive_cluster, negative_cluster);
    }

    #[test]
    fn nearest_picks_the_closest_centroid() {
        let centroids = vec![vec![0.0, 0.0], vec![10.0, 10.0]];
        let (idx, _) = nearest(&centroids, &[9.0, 9.0], DistanceMetric::L2);
        assert_eq!(idx, 1);
    }
}
