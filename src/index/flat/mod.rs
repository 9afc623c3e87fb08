//! Exact brute-force index (spec §4.3).
//!
//! Built on the `VectorEntry` shape and the single-writer/many-reader
//! `parking_lot::RwLock` convention shared with the other index kinds.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::cancel::CancellationToken;
use crate::config::FlatConfig;
use crate::entry::{Metadata, SearchResult, VectorEntry};
use crate::error::{Error, ErrorKind, Result};
use crate::heap::{BoundedMaxHeap, Candidate};
use crate::index::Index;

struct Entry {
    id: String,
    vector: Vec<f32>,
    metadata: Option<Metadata>,
}

struct State {
    entries: Vec<Entry>,
    ids: rustc_hash::FxHashMap<String, usize>,
}

/// Exact (brute-force) nearest-neighbor index.
///
/// Evaluates the configured metric against every stored vector; always
/// returns the true `k` nearest entries.
pub struct FlatIndex {
    config: FlatConfig,
    state: RwLock<State>,
    closed: AtomicBool,
}

impl FlatIndex {
    /// Creates a new, empty flat index.
    #[must_use]
    pub fn new(config: FlatConfig) -> Self {
        Self {
            config,
            state: RwLock::new(State {
                entries: Vec::new(),
                ids: rustc_hash::FxHashMap::default(),
            }),
            closed: AtomicBool::new(false),
        }
    }

    fn require_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::new(ErrorKind::Closed, "flat", "operation"))
        } else {
            Ok(())
        }
    }

    fn require_dimension(&self, got: usize) -> Result<()> {
        if got == self.config.dimension {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::DimensionMismatch {
                    expected: self.config.dimension,
                    actual: got,
                },
                "flat",
                "operation",
            ))
        }
    }
}

impl Index for FlatIndex {
    #[tracing::instrument(level = "debug", skip(self, _ctx, entry), fields(id = %entry.id))]
    fn insert(&self, _ctx: &CancellationToken, entry: VectorEntry) -> Result<()> {
        self.require_open()?;
        self.require_dimension(entry.dimension())?;

        let mut state = self.state.write();
        let row = Entry {
            id: entry.id.clone(),
            vector: entry.vector,
            metadata: entry.metadata,
        };
        if let Some(&idx) = state.ids.get(&entry.id) {
            state.entries[idx] = row;
        } else {
            let idx = state.entries.len();
            state.entries.push(row);
            state.ids.insert(entry.id, idx);
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, ctx, query))]
    fn search(&self, ctx: &CancellationToken, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        self.require_open()?;
        self.require_dimension(query.len())?;

        let state = self.state.read();
        if state.entries.is_empty() {
            return Err(Error::new(ErrorKind::Empty, "flat", "search"));
        }

        let mut heap = BoundedMaxHeap::new(k.max(1));
        for (i, entry) in state.entries.iter().enumerate() {
            if i % 4096 == 0 {
                ctx.check("flat", "search")?;
            }
            let distance = self.config.metric.distance(query, &entry.vector);
            heap.push(Candidate::new(i as u32, distance));
        }

        let sorted: Vec<Candidate> = heap.into_sorted_ascending();
        Ok(sorted
            .into_iter()
            .take(k)
            .map(|c| {
                let entry = &state.entries[c.id as usize];
                SearchResult::new(entry.id.clone(), c.distance, entry.vector.clone(), entry.metadata.clone())
            })
            .collect())
    }

    #[tracing::instrument(level = "debug", skip(self, _ctx))]
    fn delete(&self, _ctx: &CancellationToken, id: &str) -> Result<()> {
        self.require_open()?;
        let mut state = self.state.write();
        let Some(idx) = state.ids.remove(id) else {
            return Err(Error::new(ErrorKind::NotFound(id.to_string()), "flat", "delete"));
        };
        state.entries.swap_remove(idx);
        if idx < state.entries.len() {
            let moved_id = state.entries[idx].id.clone();
            state.ids.insert(moved_id, idx);
        }
        Ok(())
    }

    fn size(&self) -> usize {
        self.state.read().entries.len()
    }

    fn memory_usage(&self) -> usize {
        let state = self.state.read();
        state
            .entries
            .iter()
            .map(|e| e.vector.len() * std::mem::size_of::<f32>() + e.id.len())
            .sum()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl Drop for FlatIndex {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DistanceMetric;

    fn index() -> FlatIndex {
        FlatIndex::new(FlatConfig {
            dimension: 2,
            metric: DistanceMetric::L2,
        })
    }

    #[test]
    fn search_orders_results_by_ascending_exact_distance() {
        let index = index();
        let ctx = CancellationToken::none();
        let points = [
            ("origin", [0.0, 0.0]),
            ("x1", [1.0, 0.0]),
            ("x2", [2.0, 0.0]),
            ("y1", [0.0, 1.0]),
            ("diagonal", [1.0, 1.0]),
        ];
        for (id, v) in points {
            index.insert(&ctx, VectorEntry::without_metadata(id, v.to_vec())).unwrap();
        }

        let results = index.search(&ctx, &[0.0, 0.0], 5).unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids[0], "origin");
        assert!(ids[1] == "x1" || ids[1] == "y1");
        assert!(ids[2] == "x1" || ids[2] == "y1");
        assert_eq!(ids[3], "diagonal");
        assert_eq!(ids[4], "x2");

        let scores: Vec<f32> = results.iter().map(|r| r.score).collect();
        assert!((scores[0] - 0.0).abs() < 1e-6);
        assert!((scores[1] - 1.0).abs() < 1e-6);
        assert!((scores[3] - std::f32::consts::SQRT_2).abs() < 1e-6);
        assert!((scores[4] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn duplicate_insert_overwrites() {
        let index = index();
        let ctx = CancellationToken::none();
        index.insert(&ctx, VectorEntry::without_metadata("a", vec![0.0, 0.0])).unwrap();
        index.insert(&ctx, VectorEntry::without_metadata("a", vec![5.0, 5.0])).unwrap();
        assert_eq!(index.size(), 1);
        let results = index.search(&ctx, &[5.0, 5.0], 1).unwrap();
        assert!((results[0].score).abs() < 1e-6);
    }

    #[test]
    fn delete_removes_entry_and_preserves_remaining() {
        let index = index();
        let ctx = CancellationToken::none();
        index.insert(&ctx, VectorEntry::without_metadata("a", vec![0.0, 0.0])).unwrap();
        index.insert(&ctx, VectorEntry::without_metadata("b", vec![1.0, 1.0])).unwrap();
        index.delete(&ctx, "a").unwrap();
        assert_eq!(index.size(), 1);
        assert!(index.delete(&ctx, "a").is_err());
        let results = index.search(&ctx, &[1.0, 1.0], 1).unwrap();
        assert_eq!(results[0].id, "b");
    }

    #[test]
    fn dimension_mismatch_fails_without_side_effect() {
        let index = index();
        let ctx = CancellationToken::none();
        let err = index.insert(&ctx, VectorEntry::without_metadata("a", vec![1.0, 2.0, 3.0])).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::DimensionMismatch { .. }));
        assert_eq!(index.size(), 0);
    }

    #[test]
    fn closed_index_rejects_operations() {
        let index = index();
        let ctx = CancellationToken::none();
        index.close();
        assert!(matches!(
            index.insert(&ctx, VectorEntry::without_metadata("a", vec![0.0, 0.0])).unwrap_err().kind,
            ErrorKind::Closed
        ));
    }
}
