//! Diversity-preserving neighbor selection (spec §4.4).
//!
//! Implements the classic "no-closer-selected" rule — the VAMANA-style
//! `α · d(q,c) <= d(c,s)` heuristic collapsed to `alpha = 1.0` — per the
//! Open Question decision recorded in `DESIGN.md`.

use crate::distance::DistanceMetric;
use crate::index::hnsw::node::NodeIndex;

/// Given a candidate list sorted by ascending distance to the query,
/// selects up to `max_neighbors` neighbors via the diversity sweep, then
/// fills any remaining slots from the closest unselected candidates.
///
/// `get_vector` must return the (raw or reconstructed) vector for a given
/// candidate index; it is called at most once per candidate.
pub fn select_neighbors<F>(
    metric: DistanceMetric,
    candidates: &[(NodeIndex, f32)],
    max_neighbors: usize,
    get_vector: F,
) -> Vec<NodeIndex>
where
    F: Fn(NodeIndex) -> Vec<f32>,
{
    if candidates.is_empty() {
        return Vec::new();
    }
    if candidates.len() <= max_neighbors {
        return candidates.iter().map(|(id, _)| *id).collect();
    }

    let mut selected: Vec<NodeIndex> = Vec::with_capacity(max_neighbors);
    let mut selected_vecs: Vec<Vec<f32>> = Vec::with_capacity(max_neighbors);

    for &(candidate_id, candidate_dist) in candidates {
        if selected.len() >= max_neighbors {
            break;
        }
        let candidate_vec = get_vector(candidate_id);

        // No-closer-selected rule: keep the candidate unless some already
        // selected neighbor is strictly closer to it than the query is.
        let no_closer_selected = selected_vecs
            .iter()
            .all(|selected_vec| candidate_dist <= metric.distance(&candidate_vec, selected_vec));

        if no_closer_selected || selected.is_empty() {
            selected.push(candidate_id);
            selected_vecs.push(candidate_vec);
        }
    }

    if selected.len() < max_neighbors {
        for &(candidate_id, _) in candidates {
            if selected.len() >= max_neighbors {
                break;
            }
            if !selected.contains(&candidate_id) {
                selected.push(candidate_id);
            }
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fewer_candidates_than_quota_returns_all() {
        let candidates = vec![(1u32, 0.5), (2u32, 1.0)];
        let selected = select_neighbors(DistanceMetric::L2, &candidates, 5, |id| vec![id as f32]);
        assert_eq!(selected, vec![1, 2]);
    }

    #[test]
    fn diversity_sweep_prefers_spread_out_candidates() {
        // Three candidates on a line: 0.0 (query), 1.0, 1.1, 10.0.
        // Candidate at 1.1 is nearly redundant with 1.0; 10.0 is diverse.
        let vectors: std::collections::HashMap<u32, Vec<f32>> = [
            (1u32, vec![1.0]),
            (2u32, vec![1.1]),
            (3u32, vec![10.0]),
        ]
        .into_iter()
        .collect();
        let candidates = vec![(1u32, 1.0), (2u32, 1.1), (3u32, 10.0)];
        let selected = select_neighbors(DistanceMetric::L2, &candidates, 2, |id| vectors[&id].clone());
        assert_eq!(selected, vec![1, 3]);
    }

    #[test]
    fn empty_candidates_selects_nothing() {
        let selected = select_neighbors(DistanceMetric::L2, &[], 4, |_| vec![0.0]);
        assert!(selected.is_empty());
    }
}
