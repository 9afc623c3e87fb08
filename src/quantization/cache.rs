//! LRU cache of per-query Product-Quantization asymmetric distance tables.
//!
//! Spec §4.2: for each sub-space precompute a `K`-entry table of distances
//! from the query's sub-vector to each centroid; tables are cached, keyed by
//! the query's identity/fingerprint, and bounded by `cache_size` with LRU
//! eviction. Built on `rustc_hash` for the fingerprint hash.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHasher};
use std::hash::{Hash, Hasher};

/// A precomputed distance table: `tables[s][k]` is the distance from the
/// query's sub-vector `s` to that sub-space's centroid `k`.
pub type DistanceTable = Vec<Vec<f32>>;

/// Fingerprints a query vector to a cache key.
///
/// Collisions only cost a cache miss (a recomputation), never correctness,
/// since the cache is a pure memoization layer.
#[must_use]
pub fn fingerprint(query: &[f32]) -> u64 {
    let mut hasher = FxHasher::default();
    for &x in query {
        x.to_bits().hash(&mut hasher);
    }
    hasher.finish()
}

/// A bounded, LRU-evicted cache of [`DistanceTable`]s keyed by
/// [`fingerprint`].
#[derive(Debug)]
pub struct DistanceTableCache {
    capacity: usize,
    entries: FxHashMap<u64, DistanceTable>,
    order: VecDeque<u64>,
}

impl DistanceTableCache {
    /// Creates an empty cache. `capacity == 0` disables caching (every
    /// lookup misses).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: FxHashMap::default(),
            order: VecDeque::new(),
        }
    }

    /// Looks up a cached table, marking it most-recently-used on hit.
    pub fn get(&mut self, key: u64) -> Option<&DistanceTable> {
        if !self.entries.contains_key(&key) {
            return None;
        }
        self.touch(key);
        self.entries.get(&key)
    }

    /// Inserts a freshly computed table, evicting the least-recently-used
    /// entry if over capacity.
    pub fn insert(&mut self, key: u64, table: DistanceTable) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(key, table).is_some() {
            self.touch(key);
            return;
        }
        self.order.push_back(key);
        while self.entries.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn touch(&mut self, key: u64) {
        if let Some(pos) = self.order.iter().position(|&k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let q = vec![1.0, 2.0, 3.0];
        assert_eq!(fingerprint(&q), fingerprint(&q));
    }

    #[test]
    fn cache_evicts_least_recently_used() {
        let mut cache = DistanceTableCache::new(2);
        cache.insert(1, vec![vec![1.0]]);
        cache.insert(2, vec![vec![2.0]]);
        // Touch key 1 so key 2 becomes the LRU entry.
        assert!(cache.get(1).is_some());
        cache.insert(3, vec![vec![3.0]]);
        assert!(cache.get(2).is_none());
        assert!(cache.get(1).is_some());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn zero_capacity_cache_never_retains_entries() {
        let mut cache = DistanceTableCache::new(0);
        cache.insert(1, vec![vec![1.0]]);
        assert!(cache.is_empty());
    }
}
