//! Generic index operations shared by Flat, HNSW, and IVF-PQ (spec §6).

pub mod flat;
pub mod hnsw;
pub mod ivfpq;

use crate::cancel::CancellationToken;
use crate::entry::{SearchResult, VectorEntry};
use crate::error::Result;

/// Operations every index kind implements.
///
/// `insert`/`search`/`delete` take a [`CancellationToken`] so long-running
/// work (graph reconnection, multi-probe scans) can be polled and aborted
/// cooperatively, per spec §5.
pub trait Index {
    /// Inserts or overwrites an entry. Re-insertion under an existing id
    /// overwrites the prior entry (spec §3).
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ErrorKind::DimensionMismatch`] if the
    /// entry's vector does not match the index's configured dimension, or
    /// [`crate::error::ErrorKind::Closed`] if the index has been closed.
    fn insert(&self, ctx: &CancellationToken, entry: VectorEntry) -> Result<()>;

    /// Returns the `k` nearest entries to `query`, ascending by distance.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ErrorKind::DimensionMismatch`] if `query`'s
    /// dimension does not match, or [`crate::error::ErrorKind::Empty`] if
    /// the index has no entries.
    fn search(&self, ctx: &CancellationToken, query: &[f32], k: usize) -> Result<Vec<SearchResult>>;

    /// Removes the entry with the given id, if present.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ErrorKind::NotFound`] if `id` is absent.
    fn delete(&self, ctx: &CancellationToken, id: &str) -> Result<()>;

    /// Number of entries currently stored.
    fn size(&self) -> usize;

    /// Approximate heap memory used, in bytes.
    fn memory_usage(&self) -> usize;

    /// Releases all resources. Idempotent; subsequent operations fail with
    /// [`crate::error::ErrorKind::Closed`].
    fn close(&self);

    /// Convenience wrapper around [`Index::size`].
    fn len(&self) -> usize {
        self.size()
    }

    /// Convenience wrapper around [`Index::size`].
    fn is_empty(&self) -> bool {
        self.size() == 0
    }
}
