//! HNSW index façade (spec §4.4): wraps [`graph::GraphState`] behind a
//! single reader-writer lock and exposes the [`Index`] trait plus
//! HNSW-specific persistence and memory-mapping operations.
//!
//! One `RwLock` guards the whole engine rather than locking per layer or per
//! node — see `graph.rs` for why.

mod graph;
mod mmap;
mod node;
mod persistence;
mod select;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::cancel::CancellationToken;
use crate::config::HnswConfig;
use crate::entry::{SearchResult, VectorEntry};
use crate::error::{Error, ErrorKind, Result};
use crate::index::Index;

pub use persistence::PersistenceMetadata;

/// HNSW approximate nearest-neighbor index.
pub struct HnswIndex {
    state: RwLock<graph::GraphState>,
    persistence: RwLock<Option<PersistenceMetadata>>,
    closed: AtomicBool,
}

impl HnswIndex {
    /// Creates a new, empty index for the given configuration.
    #[must_use]
    pub fn new(config: HnswConfig) -> Self {
        Self {
            state: RwLock::new(graph::GraphState::new(config)),
            persistence: RwLock::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn require_open(&self, operation: &'static str) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::new(ErrorKind::Closed, "hnsw", operation))
        } else {
            Ok(())
        }
    }

    /// Current maximum level among live nodes.
    #[must_use]
    pub fn max_level(&self) -> usize {
        self.state.read().max_level()
    }

    /// Whether the quantizer (if configured) has finished training.
    #[must_use]
    pub fn is_trained(&self) -> bool {
        self.state.read().is_trained()
    }

    /// Atomically writes the index to `path` (spec §4.6 "save_to_disk").
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Closed`] if the index is closed, or
    /// [`ErrorKind::IoError`] on any filesystem failure.
    #[tracing::instrument(level = "debug", skip(self, _ctx), fields(path = %path.display()))]
    pub fn save_to_disk(&self, _ctx: &CancellationToken, path: &Path) -> Result<()> {
        self.require_open("save_to_disk")?;
        let state = self.state.read();
        let metadata = persistence::save_to_disk(&state, path)?;
        *self.persistence.write() = Some(metadata);
        Ok(())
    }

    /// Replaces this index's contents with the file at `path` (spec §4.6
    /// "load_from_disk"). The caller's `seed` and `quantizer` configuration
    /// are preserved, since v1 does not persist them; dimension, `M`,
    /// `ef_construction`, `ef_search`, and metric come from the file header.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Closed`] if the index is closed,
    /// [`ErrorKind::CorruptFile`] or [`ErrorKind::UnsupportedVersion`] on a
    /// malformed file, or [`ErrorKind::IoError`] if the file cannot be read.
    #[tracing::instrument(level = "debug", skip(self, ctx), fields(path = %path.display()))]
    pub fn load_from_disk(&self, ctx: &CancellationToken, path: &Path) -> Result<()> {
        self.require_open("load_from_disk")?;
        let mut state = self.state.write();
        let (seed, quantizer) = {
            let config = state.config();
            (config.seed, config.quantizer.clone())
        };
        let (graph, metadata) = persistence::load_from_disk(ctx, path, seed, quantizer)?;
        *state = graph;
        *self.persistence.write() = Some(metadata);
        Ok(())
    }

    /// The last save or load's file-level metadata, if any.
    #[must_use]
    pub fn get_persistence_metadata(&self) -> Option<PersistenceMetadata> {
        *self.persistence.read()
    }

    /// Evicts raw vector buffers to a memory-mapped file under `dir` (spec
    /// §4.4 "Memory mapping").
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Closed`] if the index is closed, or
    /// [`ErrorKind::MemoryMappingError`] if the index is empty, already
    /// mapped, or the underlying file I/O fails.
    pub fn enable_memory_mapping(&self, dir: &Path) -> Result<()> {
        self.require_open("enable_memory_mapping")?;
        self.state.write().enable_memory_mapping(dir)
    }

    /// Faults memory-mapped vectors back onto the heap and unmaps. A no-op
    /// if not currently mapped.
    pub fn disable_memory_mapping(&self) {
        self.state.write().disable_memory_mapping();
    }

    /// Whether raw vectors are currently evicted to a memory-mapped file.
    #[must_use]
    pub fn is_memory_mapped(&self) -> bool {
        self.state.read().is_memory_mapped()
    }

    /// Byte length of the current memory mapping, or `0` when not mapped.
    #[must_use]
    pub fn memory_mapped_size(&self) -> usize {
        self.state.read().memory_mapped_size()
    }

    /// Whether the index currently has data and is not already mapped.
    #[must_use]
    pub fn can_memory_map(&self) -> bool {
        self.state.read().can_memory_map()
    }

    /// Projected byte size a memory mapping of the current table would
    /// occupy.
    #[must_use]
    pub fn estimate_size(&self) -> usize {
        self.state.read().estimate_size()
    }
}

impl Index for HnswIndex {
    #[tracing::instrument(level = "debug", skip(self, ctx, entry), fields(id = %entry.id))]
    fn insert(&self, ctx: &CancellationToken, entry: VectorEntry) -> Result<()> {
        self.require_open("insert")?;
        self.state.write().insert(ctx, entry)
    }

    #[tracing::instrument(level = "debug", skip(self, ctx, query))]
    fn search(&self, ctx: &CancellationToken, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        self.require_open("search")?;
        self.state.read().search(ctx, query, k)
    }

    #[tracing::instrument(level = "debug", skip(self, ctx))]
    fn delete(&self, ctx: &CancellationToken, id: &str) -> Result<()> {
        self.require_open("delete")?;
        self.state.write().delete(ctx, id)
    }

    fn size(&self) -> usize {
        self.state.read().size()
    }

    fn memory_usage(&self) -> usize {
        self.state.read().memory_usage()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl Drop for HnswIndex {
    fn drop(&mut self) {
        self.close();
    }
}

/// Directory convention for `enable_memory_mapping` callers that want a
/// fixed, predictable vectors-file location alongside a saved index file.
#[must_use]
pub fn default_mmap_dir(index_path: &Path) -> PathBuf {
    index_path.with_extension("mmap")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DistanceMetric;

    fn config() -> HnswConfig {
        HnswConfig {
            dimension: 3,
            m: 8,
            ef_construction: 50,
            ef_search: 20,
            metric: DistanceMetric::L2,
            seed: 42,
            quantizer: None,
        }
    }

    fn populated() -> HnswIndex {
        let index = HnswIndex::new(config());
        let ctx = CancellationToken::none();
        for (id, v) in [
            ("v1", [1.0, 0.0, 0.0]),
            ("v2", [0.0, 1.0, 0.0]),
            ("v3", [0.0, 0.0, 1.0]),
            ("v4", [1.0, 1.0, 0.0]),
        ] {
            index.insert(&ctx, VectorEntry::without_metadata(id, v.to_vec())).unwrap();
        }
        index
    }

    #[test]
    fn insert_search_delete_round_trip() {
        let index = populated();
        let ctx = CancellationToken::none();
        assert_eq!(index.size(), 4);
        let results = index.search(&ctx, &[1.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(results[0].id, "v1");
        index.delete(&ctx, "v1").unwrap();
        assert_eq!(index.size(), 3);
    }

    #[test]
    fn save_then_load_preserves_search_results() {
        let index = populated();
        let ctx = CancellationToken::none();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");

        index.save_to_disk(&ctx, &path).unwrap();
        assert!(index.get_persistence_metadata().is_some());

        let reloaded = HnswIndex::new(config());
        reloaded.load_from_disk(&ctx, &path).unwrap();
        assert_eq!(reloaded.size(), index.size());
        let results = reloaded.search(&ctx, &[1.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(results[0].id, "v1");
    }

    #[test]
    fn memory_mapping_round_trips_search_results() {
        let index = populated();
        let ctx = CancellationToken::none();
        let dir = tempfile::tempdir().unwrap();

        assert!(index.can_memory_map());
        index.enable_memory_mapping(dir.path()).unwrap();
        assert!(index.is_memory_mapped());
        assert!(index.memory_mapped_size() > 0);

        let results = index.search(&ctx, &[1.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(results[0].id, "v1");

        index.disable_memory_mapping();
        assert!(!index.is_memory_mapped());
        let results = index.search(&ctx, &[1.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(results[0].id, "v1");
    }

    #[test]
    fn closed_index_rejects_operations() {
        let index = populated();
        let ctx = CancellationToken::none();
        index.close();
        assert!(matches!(
            index.insert(&ctx, VectorEntry::without_metadata("v5", vec![0.0, 0.0, 0.0])).unwrap_err().kind,
            ErrorKind::Closed
        ));
    }
}
