//! Memory-mapped raw vector storage (spec §4.4 "Memory mapping").
//!
//! A fixed-stride (`dimension * 4` bytes per slot) file, opened read-only and
//! mapped with `memmap2`. Scope here is narrow by design — evict raw vectors
//! to a read-only snapshot and fault them back in on
//! `disable_memory_mapping` — so this module only needs fixed-stride slot
//! addressing, not a mutable or growable mapping.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::error::{Error, ErrorKind, Result};

const VECTORS_FILE: &str = "vectors.raw";

/// A read-only, fixed-stride memory mapping of raw vectors, addressed by
/// node-table slot index.
pub(super) struct MemoryMap {
    mmap: Mmap,
    dimension: usize,
    path: PathBuf,
}

impl MemoryMap {
    /// Reads the vector at table slot `slot`, or `None` if the slot falls
    /// outside the mapped file (e.g. the file predates a since-grown table).
    pub(super) fn vector_at(&self, slot: usize) -> Option<Vec<f32>> {
        let stride = self.dimension * std::mem::size_of::<f32>();
        let start = slot.checked_mul(stride)?;
        let end = start.checked_add(stride)?;
        if end > self.mmap.len() {
            return None;
        }
        Some(
            self.mmap[start..end]
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes(c.try_into().expect("chunk of 4 bytes")))
                .collect(),
        )
    }

    /// Byte length of the mapped file.
    pub(super) fn byte_len(&self) -> usize {
        self.mmap.len()
    }

    /// Path of the mapped file, for diagnostics.
    #[allow(dead_code)]
    pub(super) fn path(&self) -> &Path {
        &self.path
    }
}

/// Writes a fixed-stride vectors file under `dir`: one `dimension * 4` byte
/// record per table slot, in node-index order. `None` slots (a node the
/// quantizer already holds compressed, or a tombstone) get a zero-filled
/// placeholder so that slot index keeps addressing the right offset.
pub(super) fn write_vectors_file(
    dir: &Path,
    slots: &[Option<&[f32]>],
    dimension: usize,
) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(VECTORS_FILE);
    let stride = dimension * std::mem::size_of::<f32>();
    let mut file = File::create(&path)?;
    let zeros = vec![0u8; stride];
    for slot in slots {
        match slot {
            Some(vector) => {
                for component in *vector {
                    file.write_all(&component.to_le_bytes())?;
                }
            }
            None => file.write_all(&zeros)?,
        }
    }
    file.sync_all()?;
    Ok(path)
}

/// Opens and memory-maps a previously written vectors file.
pub(super) fn map_file(path: &Path, dimension: usize) -> Result<MemoryMap> {
    let file = File::open(path).map_err(Error::from)?;
    // SAFETY: the file is exclusively owned by this index instance for the
    // lifetime of the mapping; callers never truncate it out from under us.
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| {
        Error::new(ErrorKind::MemoryMappingError(e.to_string()), "hnsw", "enable_memory_mapping")
    })?;
    Ok(MemoryMap {
        mmap,
        dimension,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_through_a_mapped_file() {
        let dir = tempfile::tempdir().unwrap();
        let a = vec![1.0f32, 2.0, 3.0];
        let b = vec![4.0f32, 5.0, 6.0];
        let slots: Vec<Option<&[f32]>> = vec![Some(&a), None, Some(&b)];
        let path = write_vectors_file(dir.path(), &slots, 3).unwrap();
        let mapped = map_file(&path, 3).unwrap();

        assert_eq!(mapped.vector_at(0), Some(a));
        assert_eq!(mapped.vector_at(1), Some(vec![0.0, 0.0, 0.0]));
        assert_eq!(mapped.vector_at(2), Some(b));
        assert_eq!(mapped.vector_at(3), None);
    }

    #[test]
    fn byte_len_matches_slot_count_times_stride() {
        let dir = tempfile::tempdir().unwrap();
        let a = vec![1.0f32, 2.0];
        let slots: Vec<Option<&[f32]>> = vec![Some(&a), Some(&a), Some(&a)];
        let path = write_vectors_file(dir.path(), &slots, 2).unwrap();
        let mapped = map_file(&path, 2).unwrap();
        assert_eq!(mapped.byte_len(), 3 * 2 * 4);
    }
}
