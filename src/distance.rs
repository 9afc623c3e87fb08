//! Distance metrics for vector similarity.
//!
//! All three metrics follow the "smaller is better" convention (spec §4.1):
//! inner product is negated so that, uniformly across metrics, a lower score
//! always means a closer match. Upper layers (heaps, neighbor selection,
//! search) depend on this convention and never special-case the metric.

use serde::{Deserialize, Serialize};

/// Distance metric used by an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// Euclidean (L2) distance.
    L2,
    /// Negated inner product (so smaller is better, matching L2/Cosine).
    InnerProduct,
    /// Cosine distance: `1 - cos(a, b)`.
    Cosine,
}

impl DistanceMetric {
    /// Computes the distance between two equal-length vectors.
    ///
    /// Callers must validate dimensions before calling; an implementation
    /// may panic on mismatch (upper layers always validate first, per
    /// spec §4.1).
    #[must_use]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len(), "vector dimensions must match");
        match self {
            Self::L2 => l2(a, b),
            Self::InnerProduct => -dot(a, b),
            Self::Cosine => cosine_distance(a, b),
        }
    }

    /// Numeric tag used in the on-disk header (spec §6).
    #[must_use]
    pub const fn tag(&self) -> u32 {
        match self {
            Self::L2 => 0,
            Self::InnerProduct => 1,
            Self::Cosine => 2,
        }
    }

    /// Reverse of [`Self::tag`].
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::L2),
            1 => Some(Self::InnerProduct),
            2 => Some(Self::Cosine),
            _ => None,
        }
    }
}

fn l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot(a, b) / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_distance_matches_pythagoras() {
        let a = [0.0, 0.0, 0.0];
        let b = [3.0, 4.0, 0.0];
        assert!((DistanceMetric::L2.distance(&a, &b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn inner_product_is_negated() {
        let a = [1.0, 2.0, 3.0];
        let b = [4.0, 5.0, 6.0];
        let d = DistanceMetric::InnerProduct.distance(&a, &b);
        assert!((d + 32.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_distance_of_identical_vectors_is_zero() {
        let a = [1.0, 0.0, 0.0];
        assert!(DistanceMetric::Cosine.distance(&a, &a).abs() < 1e-6);
    }

    #[test]
    fn cosine_distance_of_orthogonal_vectors_is_one() {
        let a = [1.0, 0.0, 0.0];
        let b = [0.0, 1.0, 0.0];
        assert!((DistanceMetric::Cosine.distance(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_distance_of_zero_vector_is_max() {
        let a = [0.0, 0.0, 0.0];
        let b = [1.0, 2.0, 3.0];
        assert!((DistanceMetric::Cosine.distance(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn tag_round_trips() {
        for m in [DistanceMetric::L2, DistanceMetric::InnerProduct, DistanceMetric::Cosine] {
            assert_eq!(DistanceMetric::from_tag(m.tag()), Some(m));
        }
    }
}
