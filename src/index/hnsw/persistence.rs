//! Bit-exact binary persistence for HNSW indices (spec §4.6/§6).
//!
//! A table-based CRC32-IEEE checksum over the header, and an atomic
//! tmp-file-then-fsync-then-rename save protocol so a crash mid-write never
//! leaves a corrupt file where a real one was expected. The section layout
//! (magic, version, timestamp, per-field header, chunked node/link sections)
//! is specific to this format.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::cancel::CancellationToken;
use crate::config::HnswConfig;
use crate::distance::DistanceMetric;
use crate::error::{Error, ErrorKind, Result};

use super::graph::{GraphState, PersistedNode};
use super::node::NodeIndex;

/// On-disk format magic, `"HNSW"` read as a big-endian u32.
pub const MAGIC: u32 = 0x484E_5357;
/// Current on-disk format version.
pub const VERSION: u32 = 1;
/// Fixed level cap encoded in the header (spec §4.4 level assignment caps
/// at 16).
pub const MAX_LEVELS: u32 = 16;
/// Header byte length before the variable-length node/link/metadata sections.
const HEADER_LEN: usize = 48;
/// Nodes (and node-link records) are streamed in batches of this size.
const CHUNK_SIZE: usize = 1000;

/// Summary of a saved or loaded HNSW file, returned by
/// `get_persistence_metadata()`.
#[derive(Debug, Clone, Copy)]
pub struct PersistenceMetadata {
    /// Total node-table slots recorded in the file (including tombstones).
    pub node_count: usize,
    /// Vector dimension.
    pub dimension: usize,
    /// Maximum level among surviving nodes, recomputed on load.
    pub max_level: usize,
    /// Seconds since the Unix epoch when the file was written.
    pub saved_at: u64,
}

fn crc32_ieee(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let idx = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ TABLE[idx];
    }
    !crc
}

fn header_crc(m: u32, ef_construction: u32, dimension: u32, node_count: u32) -> u32 {
    let mut buf = Vec::with_capacity(16);
    buf.extend_from_slice(&m.to_le_bytes());
    buf.extend_from_slice(&ef_construction.to_le_bytes());
    buf.extend_from_slice(&dimension.to_le_bytes());
    buf.extend_from_slice(&node_count.to_le_bytes());
    crc32_ieee(&buf)
}

/// Serializes a graph to the v1 binary layout.
pub(super) fn serialize(graph: &GraphState) -> Vec<u8> {
    let config = graph.config();
    let slots = graph.export_nodes();
    let node_count = slots.len() as u32;
    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();

    let mut buf = Vec::with_capacity(HEADER_LEN + node_count as usize * (config.dimension * 4 + 32));

    buf.extend_from_slice(&MAGIC.to_le_bytes());
    buf.extend_from_slice(&VERSION.to_le_bytes());
    buf.extend_from_slice(&timestamp.to_le_bytes());
    buf.extend_from_slice(
        &header_crc(config.m as u32, config.ef_construction as u32, config.dimension as u32, node_count).to_le_bytes(),
    );
    buf.extend_from_slice(&(config.m as u32).to_le_bytes());
    buf.extend_from_slice(&(config.ef_construction as u32).to_le_bytes());
    buf.extend_from_slice(&(config.ef_search as u32).to_le_bytes());
    buf.extend_from_slice(&MAX_LEVELS.to_le_bytes());
    buf.extend_from_slice(&(config.dimension as u32).to_le_bytes());
    buf.extend_from_slice(&config.metric.tag().to_le_bytes());
    buf.extend_from_slice(&node_count.to_le_bytes());
    debug_assert_eq!(buf.len(), HEADER_LEN);

    for chunk in slots.chunks(CHUNK_SIZE) {
        for slot in chunk {
            match slot {
                None => buf.push(0),
                Some(node) => {
                    buf.push(1);
                    buf.extend_from_slice(&(node.id.len() as u32).to_le_bytes());
                    buf.extend_from_slice(node.id.as_bytes());
                    buf.extend_from_slice(&(node.vector.len() as u32).to_le_bytes());
                    for f in &node.vector {
                        buf.extend_from_slice(&f.to_le_bytes());
                    }
                    buf.extend_from_slice(&(node.level as u32).to_le_bytes());
                }
            }
        }
    }

    let live: Vec<(u32, &PersistedNode)> = slots
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.as_ref().map(|n| (i as u32, n)))
        .collect();
    buf.extend_from_slice(&(live.len() as u32).to_le_bytes());
    for chunk in live.chunks(CHUNK_SIZE) {
        for (index, node) in chunk {
            buf.extend_from_slice(&index.to_le_bytes());
            buf.extend_from_slice(&(node.links.len() as u32).to_le_bytes());
            for (level, neighbors) in node.links.iter().enumerate() {
                buf.extend_from_slice(&(level as u32).to_le_bytes());
                buf.extend_from_slice(&(neighbors.len() as u32).to_le_bytes());
                for &n in neighbors {
                    buf.extend_from_slice(&n.to_le_bytes());
                }
            }
        }
    }

    match graph.entry_point_id() {
        Some(id) => {
            buf.push(1);
            buf.extend_from_slice(&(id.len() as u32).to_le_bytes());
            buf.extend_from_slice(id.as_bytes());
        }
        None => buf.push(0),
    }

    buf
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(Error::new(ErrorKind::CorruptFile("unexpected end of file".into()), "hnsw", "load"));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn string(&mut self, len: usize) -> Result<String> {
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::new(ErrorKind::CorruptFile(format!("invalid id utf-8: {e}")), "hnsw", "load"))
    }
}

/// Parses a v1 file into a node table plus its header-derived config
/// fields, validating magic, version, and the header CRC.
///
/// # Errors
///
/// Returns [`ErrorKind::CorruptFile`] on malformed or truncated data, or
/// [`ErrorKind::UnsupportedVersion`] if the version byte isn't 1.
fn parse(ctx: &CancellationToken, data: &[u8]) -> Result<(HnswConfig, Vec<Option<PersistedNode>>, u64)> {
    let mut cur = Cursor::new(data);

    let magic = cur.u32()?;
    if magic != MAGIC {
        return Err(Error::new(ErrorKind::CorruptFile("bad magic".into()), "hnsw", "load"));
    }
    let version = cur.u32()?;
    if version != VERSION {
        return Err(Error::new(ErrorKind::UnsupportedVersion(version), "hnsw", "load"));
    }
    let timestamp = cur.u64()?;
    let stored_crc = cur.u32()?;
    let m = cur.u32()?;
    let ef_construction = cur.u32()?;
    let ef_search = cur.u32()?;
    let _max_levels = cur.u32()?;
    let dimension = cur.u32()?;
    let metric_tag = cur.u32()?;
    let node_count = cur.u32()?;

    let computed_crc = header_crc(m, ef_construction, dimension, node_count);
    if stored_crc != computed_crc {
        return Err(Error::new(ErrorKind::CorruptFile("header CRC mismatch".into()), "hnsw", "load"));
    }
    let metric = DistanceMetric::from_tag(metric_tag)
        .ok_or_else(|| Error::new(ErrorKind::CorruptFile(format!("unknown metric tag {metric_tag}")), "hnsw", "load"))?;

    let mut slots: Vec<Option<PersistedNode>> = Vec::with_capacity(node_count as usize);
    let mut processed = 0usize;
    while slots.len() < node_count as usize {
        if processed % CHUNK_SIZE == 0 {
            ctx.check("hnsw", "load")?;
        }
        processed += 1;
        let present = cur.u8()?;
        if present == 0 {
            slots.push(None);
            continue;
        }
        let id_len = cur.u32()? as usize;
        let id = cur.string(id_len)?;
        let vec_len = cur.u32()? as usize;
        let mut vector = Vec::with_capacity(vec_len);
        for _ in 0..vec_len {
            vector.push(cur.f32()?);
        }
        let level = cur.u32()? as usize;
        slots.push(Some(PersistedNode {
            id,
            level,
            vector,
            links: vec![Vec::new(); level + 1],
        }));
    }

    let linked_node_count = cur.u32()?;
    for i in 0..linked_node_count {
        if i % CHUNK_SIZE as u32 == 0 {
            ctx.check("hnsw", "load")?;
        }
        let node_index = cur.u32()?;
        let level_count = cur.u32()?;
        let slot = slots.get_mut(node_index as usize).ok_or_else(|| {
            Error::new(ErrorKind::CorruptFile(format!("node index {node_index} out of range")), "hnsw", "load")
        })?;
        let node = slot
            .as_mut()
            .ok_or_else(|| Error::new(ErrorKind::CorruptFile("links for a nil node slot".into()), "hnsw", "load"))?;

        for _ in 0..level_count {
            let level = cur.u32()? as usize;
            let link_count = cur.u32()?;
            let mut neighbors = Vec::with_capacity(link_count as usize);
            for _ in 0..link_count {
                let n: NodeIndex = cur.u32()?;
                if n as usize >= node_count as usize {
                    return Err(Error::new(
                        ErrorKind::CorruptFile(format!("link target {n} out of range")),
                        "hnsw",
                        "load",
                    ));
                }
                neighbors.push(n);
            }
            if level >= node.links.len() {
                node.links.resize(level + 1, Vec::new());
            }
            node.links[level] = neighbors;
        }
    }

    let entry_present = cur.u8()?;
    if entry_present == 1 {
        let id_len = cur.u32()? as usize;
        let _entry_id = cur.string(id_len)?;
    }

    let config = HnswConfig {
        dimension: dimension as usize,
        m: m as usize,
        ef_construction: ef_construction as usize,
        ef_search: ef_search as usize,
        metric,
        seed: 42,
        quantizer: None,
    };

    Ok((config, slots, timestamp))
}

/// Atomically writes `graph`'s serialized form to `path` (spec §4.6
/// "Durability model"): write to `path + ".tmp"`, fsync, rename, unlinking
/// the temp file on any failure.
///
/// # Errors
///
/// Returns [`ErrorKind::IoError`] on any filesystem failure; `path` is
/// left unchanged.
pub(super) fn save_to_disk(graph: &GraphState, path: &Path) -> Result<PersistenceMetadata> {
    let bytes = serialize(graph);
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);

    let result = (|| -> std::io::Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if let Err(err) = result {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(Error::from(err));
    }

    Ok(PersistenceMetadata {
        node_count: graph.table_len(),
        dimension: graph.config().dimension,
        max_level: graph.max_level(),
        saved_at: SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs(),
    })
}

/// Loads a graph from `path`, preserving the caller's `seed` and
/// `quantizer` configuration (not persisted in v1) while taking
/// dimension/M/ef/metric from the file header.
///
/// # Errors
///
/// Returns [`ErrorKind::IoError`] if the file cannot be read,
/// [`ErrorKind::CorruptFile`] on malformed content, or
/// [`ErrorKind::UnsupportedVersion`] on an unreadable version.
pub(super) fn load_from_disk(
    ctx: &CancellationToken,
    path: &Path,
    seed: u64,
    quantizer: Option<crate::config::QuantizerConfig>,
) -> Result<(GraphState, PersistenceMetadata)> {
    let mut file = File::open(path).map_err(Error::from)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data).map_err(Error::from)?;

    let (mut config, slots, timestamp) = parse(ctx, &data)?;
    config.seed = seed;
    config.quantizer = quantizer;

    let node_count = slots.len();
    let dimension = config.dimension;
    let graph = GraphState::import_nodes(config, slots);
    let metadata = PersistenceMetadata {
        node_count,
        dimension,
        max_level: graph.max_level(),
        saved_at: timestamp,
    };
    Ok((graph, metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DistanceMetric;
    use crate::entry::VectorEntry;

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

    fn sample_graph() -> GraphState {
        let mut graph = GraphState::new(config());
        let ctx = CancellationToken::none();
        for (id, v) in [
            ("v1", [1.0, 0.0, 0.0]),
            ("v2", [0.0, 1.0, 0.0]),
            ("v3", [0.0, 0.0, 1.0]),
            ("v4", [1.0, 1.0, 0.0]),
        ] {
            graph.insert(&ctx, VectorEntry::without_metadata(id, v.to_vec())).unwrap();
        }
        graph
    }

    #[test]
    fn round_trip_preserves_size_and_search_results() {
        let graph = sample_graph();
        let bytes = serialize(&graph);
        let ctx = CancellationToken::none();
        let (config, slots, _timestamp) = parse(&ctx, &bytes).unwrap();
        assert_eq!(config.dimension, 3);
        let rebuilt = GraphState::import_nodes(config, slots);
        assert_eq!(rebuilt.size(), graph.size());

        let before = graph.search(&ctx, &[1.5, 2.5, 3.5], 2).unwrap();
        let after = rebuilt.search(&ctx, &[1.5, 2.5, 3.5], 2).unwrap();
        assert_eq!(before[0].id, after[0].id);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let graph = sample_graph();
        let mut bytes = serialize(&graph);
        bytes[0] = 0xFF;
        let ctx = CancellationToken::none();
        let err = parse(&ctx, &bytes).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::CorruptFile(_)));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let graph = sample_graph();
        let mut bytes = serialize(&graph);
        bytes[4..8].copy_from_slice(&2u32.to_le_bytes());
        let ctx = CancellationToken::none();
        let err = parse(&ctx, &bytes).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnsupportedVersion(2)));
    }

    #[test]
    fn corrupted_header_crc_is_rejected() {
        let graph = sample_graph();
        let mut bytes = serialize(&graph);
        bytes[16..20].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        let ctx = CancellationToken::none();
        let err = parse(&ctx, &bytes).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::CorruptFile(_)));
    }

    #[test]
    fn save_and_load_round_trip_through_disk() {
        let graph = sample_graph();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");
        let ctx = CancellationToken::none();

        let save_meta = save_to_disk(&graph, &path).unwrap();
        assert_eq!(save_meta.node_count, graph.table_len());

        let (loaded, load_meta) = load_from_disk(&ctx, &path, 42, None).unwrap();
        assert_eq!(load_meta.node_count, save_meta.node_count);
        assert_eq!(loaded.size(), graph.size());
    }
}
