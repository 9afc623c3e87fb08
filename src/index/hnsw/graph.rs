//! Core HNSW graph: two-phase insertion, layered search, and deletion with
//! neighbor re-bridging (spec §4.4).
//!
//! Structured around spec §4.4's single reader-writer lock per index: the
//! whole [`GraphState`] sits behind one `parking_lot::RwLock` (owned by the
//! façade in `mod.rs`), so every method here takes `&self`/`&mut self`
//! directly with no internal locking.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::cancel::CancellationToken;
use crate::config::HnswConfig;
use crate::entry::{SearchResult, VectorEntry};
use crate::error::{Error, ErrorKind, Result};
use crate::heap::{BoundedMaxHeap, BoundedMinHeap, Candidate};
use crate::quantization::{self, QuantizerRecoveryPolicy, RecoveryAction, Quantizer};

use super::mmap::MemoryMap;
use super::node::{Links, Node, NodeIndex, VectorStorage};
use super::select::select_neighbors;

/// Reduced-complexity retries allowed before a failing quantizer falls back
/// to raw storage (spec §4.2/§7).
const QUANTIZER_RECOVERY_RETRIES: u32 = 2;

/// The HNSW quantizer's lifecycle (spec §3 Lifecycle): absent, configured
/// but collecting a training buffer, or trained.
enum QuantizerState {
    Absent,
    Untrained {
        quantizer: Box<dyn Quantizer>,
        buffer: Vec<Vec<f32>>,
    },
    Trained(Box<dyn Quantizer>),
}

/// All mutable state of an HNSW graph, meant to live behind a single
/// `RwLock` in the public façade.
pub struct GraphState {
    config: HnswConfig,
    nodes: Vec<Option<Node>>,
    id_to_index: FxHashMap<String, NodeIndex>,
    entry_point: Option<NodeIndex>,
    /// Cheap alternate entry points: nodes with level >= 2 (spec §4.4
    /// Storage).
    entry_candidates: FxHashSet<NodeIndex>,
    max_level: usize,
    count: usize,
    rng: ChaCha8Rng,
    quantizer: QuantizerState,
    /// Decides how to react when a training attempt fails (spec §4.2/§7):
    /// retry with reduced complexity, then fall back to raw storage.
    recovery: QuantizerRecoveryPolicy,
    /// Present once `enable_memory_mapping` has evicted raw vectors to disk
    /// (spec §4.4 "Memory mapping").
    mmap: Option<MemoryMap>,
}

impl GraphState {
    /// Creates a new, empty graph for the given configuration.
    #[must_use]
    pub fn new(config: HnswConfig) -> Self {
        let quantizer = config
            .quantizer
            .clone()
            .map(|qc| QuantizerState::Untrained {
                quantizer: quantization::build(qc, config.dimension),
                buffer: Vec::new(),
            })
            .unwrap_or(QuantizerState::Absent);
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            config,
            nodes: Vec::new(),
            id_to_index: FxHashMap::default(),
            entry_point: None,
            entry_candidates: FxHashSet::default(),
            max_level: 0,
            count: 0,
            rng,
            quantizer,
            recovery: QuantizerRecoveryPolicy::new(QUANTIZER_RECOVERY_RETRIES),
            mmap: None,
        }
    }

    /// Number of live entries.
    #[must_use]
    pub fn size(&self) -> usize {
        self.count
    }

    /// Approximate heap memory used by nodes and the trained quantizer.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        let nodes_bytes: usize = self.nodes.iter().flatten().map(Node::memory_usage).sum();
        let quantizer_bytes = match &self.quantizer {
            QuantizerState::Trained(q) => q.memory_usage(),
            _ => 0,
        };
        nodes_bytes + quantizer_bytes
    }

    /// The current entry point, if any.
    #[must_use]
    pub fn entry_point_id(&self) -> Option<String> {
        self.entry_point.map(|idx| self.node(idx).id.clone())
    }

    /// The current maximum level among all live nodes.
    #[must_use]
    pub fn max_level(&self) -> usize {
        self.max_level
    }

    fn node(&self, idx: NodeIndex) -> &Node {
        self.nodes[idx as usize]
            .as_ref()
            .expect("a live index never references a tombstoned slot")
    }

    fn node_vector(&self, idx: NodeIndex) -> Vec<f32> {
        self.reconstruct_vector(self.node(idx))
    }

    fn reconstruct_vector(&self, node: &Node) -> Vec<f32> {
        match &node.vector {
            VectorStorage::Raw(v) => v.clone(),
            VectorStorage::Compressed(code) => match &self.quantizer {
                QuantizerState::Trained(q) => {
                    q.decompress(code).unwrap_or_else(|_| vec![0.0; self.config.dimension])
                }
                _ => vec![0.0; self.config.dimension],
            },
            VectorStorage::Mapped(slot) => self
                .mmap
                .as_ref()
                .and_then(|m| m.vector_at(*slot as usize))
                .unwrap_or_else(|| vec![0.0; self.config.dimension]),
        }
    }

    /// Distance from `query` to a node, using the quantizer's asymmetric
    /// distance when the node is compressed, falling back to decompress +
    /// raw-metric on quantizer failure (spec §4.4 "mixed storage").
    fn distance_to_node(&self, query: &[f32], idx: NodeIndex) -> f32 {
        match &self.node(idx).vector {
            VectorStorage::Raw(v) => self.config.metric.distance(query, v),
            VectorStorage::Compressed(code) => {
                if let QuantizerState::Trained(q) = &self.quantizer {
                    if let Ok(d) = q.distance_to_query(code, query) {
                        return d;
                    }
                    if let Ok(raw) = q.decompress(code) {
                        return self.config.metric.distance(query, &raw);
                    }
                }
                f32::MAX
            }
            VectorStorage::Mapped(slot) => match self.mmap.as_ref().and_then(|m| m.vector_at(*slot as usize)) {
                Some(v) => self.config.metric.distance(query, &v),
                None => f32::MAX,
            },
        }
    }

    fn random_layer(&mut self) -> usize {
        let m_l = 1.0 / (self.config.m as f64).ln();
        let mut level = 0usize;
        while self.rng.gen::<f64>() < m_l && level < 16 {
            level += 1;
        }
        level
    }

    /// Single-level bounded search (spec §4.4 "Single-level search"),
    /// shared by greedy descent (`ef = 1`) and widened search.
    fn search_layer(
        &self,
        query: &[f32],
        entry_points: &[NodeIndex],
        ef: usize,
        level: usize,
    ) -> Vec<Candidate> {
        let mut visited: FxHashSet<NodeIndex> = FxHashSet::default();
        let mut frontier = BoundedMinHeap::new();
        let mut best = BoundedMaxHeap::new(ef.max(1));

        for &ep in entry_points {
            if visited.insert(ep) {
                let d = self.distance_to_node(query, ep);
                frontier.push(Candidate::new(ep, d));
                best.push(Candidate::new(ep, d));
            }
        }

        while let Some(c) = frontier.pop() {
            if let Some(top) = best.top() {
                if best.is_full() && c.distance > top.distance {
                    break;
                }
            }

            let node = self.node(c.id);
            if level > node.links.max_level() {
                continue;
            }
            for &neighbor in node.links.get(level) {
                if visited.insert(neighbor) {
                    let d = self.distance_to_node(query, neighbor);
                    let consider = !best.is_full() || best.top().is_some_and(|t| d < t.distance);
                    if consider {
                        frontier.push(Candidate::new(neighbor, d));
                        best.push(Candidate::new(neighbor, d));
                    }
                }
            }
        }

        best.into_sorted_ascending()
    }

    fn offer_quantizer_training_sample(&mut self, vector: &[f32]) {
        let ready = if let QuantizerState::Untrained { quantizer, buffer } = &mut self.quantizer {
            buffer.push(vector.to_vec());
            let threshold = quantization::training_threshold(quantizer.config(), self.config.dimension);
            buffer.len() >= threshold
        } else {
            false
        };
        if !ready {
            return;
        }
        if let QuantizerState::Untrained { mut quantizer, buffer } =
            std::mem::replace(&mut self.quantizer, QuantizerState::Absent)
        {
            match quantizer.train(&buffer) {
                Ok(()) => self.quantizer = QuantizerState::Trained(quantizer),
                Err(_) => match self.recovery.next_action(quantizer.config()) {
                    RecoveryAction::RetryReduced(reduced) => {
                        self.quantizer = QuantizerState::Untrained {
                            quantizer: quantization::build(reduced, self.config.dimension),
                            buffer: Vec::new(),
                        };
                    }
                    RecoveryAction::FallBackToRaw => self.quantizer = QuantizerState::Absent,
                },
            }
        }
    }

    fn compress_for_storage(&self, vector: &[f32]) -> VectorStorage {
        if let QuantizerState::Trained(q) = &self.quantizer {
            if let Ok(code) = q.compress(vector) {
                return VectorStorage::Compressed(code);
            }
        }
        VectorStorage::Raw(vector.to_vec())
    }

    /// Inserts or overwrites (by duplicate-id rejection upstream) a new
    /// entry (spec §4.4 Insertion algorithm).
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::DuplicateId`], [`ErrorKind::DimensionMismatch`],
    /// or [`ErrorKind::Canceled`].
    pub fn insert(&mut self, ctx: &CancellationToken, entry: VectorEntry) -> Result<()> {
        if entry.dimension() != self.config.dimension {
            return Err(Error::new(
                ErrorKind::DimensionMismatch {
                    expected: self.config.dimension,
                    actual: entry.dimension(),
                },
                "hnsw",
                "insert",
            ));
        }
        if self.id_to_index.contains_key(&entry.id) {
            return Err(Error::new(ErrorKind::DuplicateId(entry.id.clone()), "hnsw", "insert"));
        }

        self.offer_quantizer_training_sample(&entry.vector);

        let level = self.random_layer();
        let storage = self.compress_for_storage(&entry.vector);
        let node = Node {
            id: entry.id.clone(),
            level,
            links: Links::new(level),
            vector: storage,
            metadata: entry.metadata,
        };

        let new_index = self.nodes.len() as NodeIndex;
        self.nodes.push(Some(node));
        self.id_to_index.insert(entry.id.clone(), new_index);
        if level >= 2 {
            self.entry_candidates.insert(new_index);
        }

        let Some(entry_point) = self.entry_point else {
            self.entry_point = Some(new_index);
            self.max_level = level;
            self.count += 1;
            return Ok(());
        };

        if let Err(err) = self.connect_new_node(ctx, new_index, level, entry_point) {
            self.nodes[new_index as usize] = None;
            self.id_to_index.remove(&entry.id);
            self.entry_candidates.remove(&new_index);
            while matches!(self.nodes.last(), Some(None)) {
                self.nodes.pop();
            }
            return Err(err);
        }

        if level > self.max_level {
            self.entry_point = Some(new_index);
            self.max_level = level;
        }
        self.count += 1;
        Ok(())
    }

    fn connect_new_node(
        &mut self,
        ctx: &CancellationToken,
        new_index: NodeIndex,
        level: usize,
        mut current_ep: NodeIndex,
    ) -> Result<()> {
        let query = self.node_vector(new_index);

        // Phase A: greedy descent with ef = 1.
        for lvl in (level + 1..=self.max_level).rev() {
            ctx.check("hnsw", "insert")?;
            if let Some(best) = self.search_layer(&query, &[current_ep], 1, lvl).first() {
                current_ep = best.id;
            }
        }

        // Phase B: connect each level from min(level, max_level) down to 0.
        // Every neighbor mutation is recorded so a mid-phase cancellation
        // can undo everything connected so far, not just the new node's own
        // bookkeeping — either the whole insert takes effect or none of it
        // does.
        let mut entry_points = vec![current_ep];
        let mut undo: Vec<(NodeIndex, usize, Vec<NodeIndex>)> = Vec::new();
        for lvl in (0..=level.min(self.max_level)).rev() {
            if let Err(err) = ctx.check("hnsw", "insert") {
                self.rollback_connections(undo);
                return Err(err);
            }
            let candidates = self.search_layer(&query, &entry_points, self.config.ef_construction, lvl);
            let pairs: Vec<(NodeIndex, f32)> = candidates.iter().map(|c| (c.id, c.distance)).collect();
            let m_max = self.config.m_max(lvl);
            let metric = self.config.metric;
            let selected = select_neighbors(metric, &pairs, m_max, |id| self.node_vector(id));

            self.nodes[new_index as usize].as_mut().unwrap().links.set(lvl, selected.clone());
            for &neighbor in &selected {
                let previous = self.node(neighbor).links.get(lvl).to_vec();
                self.add_bidirectional_connection(neighbor, new_index, lvl, m_max);
                undo.push((neighbor, lvl, previous));
            }

            if !selected.is_empty() {
                entry_points = selected;
            }
        }
        Ok(())
    }

    /// Restores every neighbor's link list at the recorded level to its
    /// value from before [`GraphState::connect_new_node`] touched it,
    /// undoing `add_bidirectional_connection` calls made in earlier,
    /// already-committed iterations of Phase B.
    fn rollback_connections(&mut self, undo: Vec<(NodeIndex, usize, Vec<NodeIndex>)>) {
        for (neighbor, lvl, previous) in undo.into_iter().rev() {
            if let Some(node) = self.nodes[neighbor as usize].as_mut() {
                node.links.set(lvl, previous);
            }
        }
    }

    fn add_bidirectional_connection(&mut self, neighbor: NodeIndex, new_node: NodeIndex, level: usize, max_conn: usize) {
        let current_links = self.node(neighbor).links.get(level).to_vec();
        if current_links.len() < max_conn {
            self.nodes[neighbor as usize].as_mut().unwrap().links.push(level, new_node);
            return;
        }

        let mut all_neighbors = current_links;
        all_neighbors.push(new_node);
        let neighbor_vec = self.node_vector(neighbor);
        let mut with_dist: Vec<(NodeIndex, f32)> = all_neighbors
            .iter()
            .map(|&n| (n, self.config.metric.distance(&neighbor_vec, &self.node_vector(n))))
            .collect();
        with_dist.sort_by(|a, b| a.1.total_cmp(&b.1));
        let pruned: Vec<NodeIndex> = with_dist.into_iter().take(max_conn).map(|(n, _)| n).collect();
        self.nodes[neighbor as usize].as_mut().unwrap().links.set(level, pruned);
    }

    /// Looks up the `k` nearest neighbors to `query` (spec §4.4 Query
    /// algorithm).
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::DimensionMismatch`], [`ErrorKind::Empty`], or
    /// [`ErrorKind::Canceled`].
    pub fn search(&self, ctx: &CancellationToken, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        if query.len() != self.config.dimension {
            return Err(Error::new(
                ErrorKind::DimensionMismatch {
                    expected: self.config.dimension,
                    actual: query.len(),
                },
                "hnsw",
                "search",
            ));
        }
        let Some(entry_point) = self.entry_point else {
            return Err(Error::new(ErrorKind::Empty, "hnsw", "search"));
        };

        let mut current_ep = entry_point;
        for lvl in (1..=self.max_level).rev() {
            ctx.check("hnsw", "search")?;
            if let Some(best) = self.search_layer(query, &[current_ep], 1, lvl).first() {
                current_ep = best.id;
            }
        }

        ctx.check("hnsw", "search")?;
        let ef = self.config.ef_search.max(k);
        let candidates = self.search_layer(query, &[current_ep], ef, 0);

        Ok(candidates
            .into_iter()
            .take(k)
            .map(|c| {
                let node = self.node(c.id);
                SearchResult::new(node.id.clone(), c.distance, self.node_vector(c.id), node.metadata.clone())
            })
            .collect())
    }

    fn rebridge(&mut self, ctx: &CancellationToken, neighbors: &[NodeIndex], level: usize, m_max: usize) -> Result<()> {
        if neighbors.len() < 2 {
            return Ok(());
        }
        let vectors: Vec<Vec<f32>> = neighbors.iter().map(|&n| self.node_vector(n)).collect();

        let mut dist = vec![vec![0f32; neighbors.len()]; neighbors.len()];
        let mut pair_count = 0usize;
        for i in 0..neighbors.len() {
            for j in (i + 1)..neighbors.len() {
                pair_count += 1;
                if pair_count % 10 == 0 {
                    ctx.check("hnsw", "delete")?;
                }
                let d = self.config.metric.distance(&vectors[i], &vectors[j]);
                dist[i][j] = d;
                dist[j][i] = d;
            }
        }

        for i in 0..neighbors.len() {
            let node_idx = neighbors[i];
            let current_links = self.node(node_idx).links.get(level).to_vec();
            if current_links.len() >= m_max {
                continue;
            }
            let mut candidates: Vec<(usize, f32)> = (0..neighbors.len())
                .filter(|&j| j != i && !current_links.contains(&neighbors[j]))
                .map(|j| (j, dist[i][j]))
                .collect();
            candidates.sort_by(|a, b| a.1.total_cmp(&b.1));

            let room = m_max - current_links.len();
            for (j, _) in candidates.into_iter().take(room) {
                self.connect_if_room(node_idx, neighbors[j], level, m_max);
            }
        }
        Ok(())
    }

    fn connect_if_room(&mut self, a: NodeIndex, b: NodeIndex, level: usize, m_max: usize) {
        if a == b {
            return;
        }
        let a_links = self.node(a).links.get(level).to_vec();
        if a_links.contains(&b) {
            return;
        }
        let b_links = self.node(b).links.get(level).to_vec();
        if a_links.len() >= m_max || b_links.len() >= m_max {
            return;
        }
        self.nodes[a as usize].as_mut().unwrap().links.push(level, b);
        self.nodes[b as usize].as_mut().unwrap().links.push(level, a);
    }

    /// Removes the entry with the given id, re-bridging bereaved neighbors
    /// (spec §4.4 Deletion).
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::NotFound`] or [`ErrorKind::Canceled`].
    pub fn delete(&mut self, ctx: &CancellationToken, id: &str) -> Result<()> {
        let Some(&idx) = self.id_to_index.get(id) else {
            return Err(Error::new(ErrorKind::NotFound(id.to_string()), "hnsw", "delete"));
        };

        if self.count == 1 {
            self.nodes.clear();
            self.id_to_index.clear();
            self.entry_candidates.clear();
            self.entry_point = None;
            self.max_level = 0;
            self.count = 0;
            return Ok(());
        }

        let level = self.node(idx).level;
        for lvl in 0..=level {
            ctx.check("hnsw", "delete")?;
            let neighbors = self.node(idx).links.get(lvl).to_vec();
            for &n in &neighbors {
                self.nodes[n as usize].as_mut().unwrap().links.remove(lvl, idx);
            }
            let m_max = self.config.m_max(lvl);
            self.rebridge(ctx, &neighbors, lvl, m_max)?;
        }

        if self.entry_point == Some(idx) {
            self.entry_candidates.remove(&idx);
            let replacement = self
                .entry_candidates
                .iter()
                .copied()
                .max_by_key(|&c| self.node(c).level)
                .or_else(|| {
                    self.nodes
                        .iter()
                        .enumerate()
                        .filter_map(|(i, n)| n.as_ref().map(|n| (i as NodeIndex, n.level)))
                        .filter(|&(i, _)| i != idx)
                        .max_by_key(|&(_, lvl)| lvl)
                        .map(|(i, _)| i)
                });
            self.max_level = replacement.map_or(0, |r| self.node(r).level);
            self.entry_point = replacement;
        }

        self.id_to_index.remove(id);
        self.entry_candidates.remove(&idx);
        self.nodes[idx as usize] = None;
        while matches!(self.nodes.last(), Some(None)) {
            self.nodes.pop();
        }
        self.count -= 1;
        Ok(())
    }

    pub(super) fn config(&self) -> &HnswConfig {
        &self.config
    }

    pub(super) fn is_trained(&self) -> bool {
        matches!(self.quantizer, QuantizerState::Trained(_))
    }

    /// Total node-table slots, including tombstoned ones (the on-disk
    /// `NodeCount` header field, spec §6).
    pub(super) fn table_len(&self) -> usize {
        self.nodes.len()
    }

    /// Exports every table slot for serialization. Quantized vectors are
    /// reconstructed to raw float32, since the v1 on-disk format does not
    /// persist compressed storage (spec §9 Open Questions).
    pub(super) fn export_nodes(&self) -> Vec<Option<PersistedNode>> {
        self.nodes
            .iter()
            .map(|slot| {
                slot.as_ref().map(|n| PersistedNode {
                    id: n.id.clone(),
                    level: n.level,
                    vector: self.reconstruct_vector(n),
                    links: (0..=n.links.max_level()).map(|l| n.links.get(l).to_vec()).collect(),
                })
            })
            .collect()
    }

    /// Rebuilds a graph from a deserialized node table (spec §4.6 "Rebuild
    /// after load"): recomputes `id_to_index`, `entry_candidates`, `count`,
    /// `max_level`, and `entry_point` (the highest-level surviving node) in
    /// a single pass, ignoring any stored entry-point hint.
    pub(super) fn import_nodes(config: HnswConfig, slots: Vec<Option<PersistedNode>>) -> Self {
        let mut nodes = Vec::with_capacity(slots.len());
        let mut id_to_index = FxHashMap::default();
        let mut entry_candidates = FxHashSet::default();

        for (idx, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(pn) => {
                    let mut links = Links::new(pn.level);
                    for (level, neighbors) in pn.links.into_iter().enumerate() {
                        links.set(level, neighbors);
                    }
                    if pn.level >= 2 {
                        entry_candidates.insert(idx as NodeIndex);
                    }
                    id_to_index.insert(pn.id.clone(), idx as NodeIndex);
                    nodes.push(Some(Node {
                        id: pn.id,
                        level: pn.level,
                        links,
                        vector: VectorStorage::Raw(pn.vector),
                        metadata: None,
                    }));
                }
                None => nodes.push(None),
            }
        }

        let count = nodes.iter().filter(|n| n.is_some()).count();
        let entry_point = nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|n| (i as NodeIndex, n.level)))
            .max_by_key(|&(_, lvl)| lvl)
            .map(|(i, _)| i);
        let max_level = entry_point.map_or(0, |ep| nodes[ep as usize].as_ref().unwrap().level);

        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        let quantizer = config
            .quantizer
            .clone()
            .map(|qc| QuantizerState::Untrained {
                quantizer: quantization::build(qc, config.dimension),
                buffer: Vec::new(),
            })
            .unwrap_or(QuantizerState::Absent);

        Self {
            config,
            nodes,
            id_to_index,
            entry_point,
            entry_candidates,
            max_level,
            count,
            rng,
            quantizer,
            recovery: QuantizerRecoveryPolicy::new(QUANTIZER_RECOVERY_RETRIES),
            mmap: None,
        }
    }

    /// Whether the raw vector buffers are currently evicted to a
    /// memory-mapped file.
    #[must_use]
    pub fn is_memory_mapped(&self) -> bool {
        self.mmap.is_some()
    }

    /// Byte length of the current memory-mapped vectors file, or `0` when
    /// not mapped.
    #[must_use]
    pub fn memory_mapped_size(&self) -> usize {
        self.mmap.as_ref().map_or(0, MemoryMap::byte_len)
    }

    /// Whether the graph has data and is not already mapped.
    #[must_use]
    pub fn can_memory_map(&self) -> bool {
        self.count > 0 && self.mmap.is_none()
    }

    /// Projected size of the vectors file a mapping would produce: every
    /// table slot (including tombstoned ones, to keep fixed-stride offsets
    /// aligned with node index) at `dimension * 4` bytes.
    #[must_use]
    pub fn estimate_size(&self) -> usize {
        self.nodes.len() * self.config.dimension * std::mem::size_of::<f32>()
    }

    /// Serializes every node's raw vector into a fixed-stride file under
    /// `dir`, memory-maps it read-only, and replaces each raw node's vector
    /// storage with an offset into that mapping, freeing the heap copy
    /// (spec §4.4 "Memory mapping"). Compressed nodes are left untouched —
    /// only raw float32 buffers are evicted.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::MemoryMappingError`] if the graph is empty,
    /// already mapped, or the underlying file I/O fails.
    pub fn enable_memory_mapping(&mut self, dir: &std::path::Path) -> Result<()> {
        if !self.can_memory_map() {
            return Err(Error::new(
                ErrorKind::MemoryMappingError("graph is empty or already memory-mapped".into()),
                "hnsw",
                "enable_memory_mapping",
            ));
        }

        let slots: Vec<Option<Vec<f32>>> = self
            .nodes
            .iter()
            .map(|slot| {
                slot.as_ref().and_then(|n| match &n.vector {
                    VectorStorage::Raw(v) => Some(v.clone()),
                    VectorStorage::Compressed(_) | VectorStorage::Mapped(_) => None,
                })
            })
            .collect();
        let refs: Vec<Option<&[f32]>> = slots.iter().map(|v| v.as_deref()).collect();

        let path = super::mmap::write_vectors_file(dir, &refs, self.config.dimension).map_err(Error::from)?;
        let mapped = super::mmap::map_file(&path, self.config.dimension)?;

        for (idx, slot) in self.nodes.iter_mut().enumerate() {
            if let Some(node) = slot {
                if matches!(node.vector, VectorStorage::Raw(_)) {
                    node.vector = VectorStorage::Mapped(idx as NodeIndex);
                }
            }
        }
        self.mmap = Some(mapped);
        Ok(())
    }

    /// Faults every memory-mapped vector back onto the heap and drops the
    /// mapping. A no-op if not currently mapped.
    pub fn disable_memory_mapping(&mut self) {
        let Some(mapped) = self.mmap.take() else {
            return;
        };
        for slot in &mut self.nodes {
            if let Some(node) = slot {
                if let VectorStorage::Mapped(idx) = node.vector {
                    if let Some(v) = mapped.vector_at(idx as usize) {
                        node.vector = VectorStorage::Raw(v);
                    }
                }
            }
        }
    }
}

/// A node's persisted shape: raw vector only, per the v1 on-disk format
/// (spec §6).
pub(super) struct PersistedNode {
    pub id: String,
    pub level: usize,
    pub vector: Vec<f32>,
    pub links: Vec<Vec<NodeIndex>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HnswConfig;
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

    #[test]
    fn tiny_hnsw_correctness() {
        let mut graph = GraphState::new(config());
        let ctx = CancellationToken::none();
        graph.insert(&ctx, VectorEntry::without_metadata("v1", vec![1.0, 0.0, 0.0])).unwrap();
        graph.insert(&ctx, VectorEntry::without_metadata("v2", vec![0.0, 1.0, 0.0])).unwrap();
        graph.insert(&ctx, VectorEntry::without_metadata("v3", vec![0.0, 0.0, 1.0])).unwrap();
        graph.insert(&ctx, VectorEntry::without_metadata("v4", vec![1.0, 1.0, 0.0])).unwrap();

        let results = graph.search(&ctx, &[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(results[0].id, "v1");
        assert!(results[0].score <= 1e-6);
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let mut graph = GraphState::new(config());
        let ctx = CancellationToken::none();
        graph.insert(&ctx, VectorEntry::without_metadata("v1", vec![1.0, 0.0, 0.0])).unwrap();
        let err = graph
            .insert(&ctx, VectorEntry::without_metadata("v1", vec![0.0, 1.0, 0.0]))
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::DuplicateId(_)));
    }

    #[test]
    fn delete_then_search_excludes_deleted_node() {
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
        graph.delete(&ctx, "v1").unwrap();
        assert_eq!(graph.size(), 3);
        let results = graph.search(&ctx, &[1.0, 0.0, 0.0], 4).unwrap();
        assert!(results.iter().all(|r| r.id != "v1"));
    }

    #[test]
    fn delete_last_node_clears_the_graph() {
        let mut graph = GraphState::new(config());
        let ctx = CancellationToken::none();
        graph.insert(&ctx, VectorEntry::without_metadata("only", vec![1.0, 0.0, 0.0])).unwrap();
        graph.delete(&ctx, "only").unwrap();
        assert_eq!(graph.size(), 0);
        assert!(graph.search(&ctx, &[1.0, 0.0, 0.0], 1).is_err());
    }

    #[test]
    fn export_then_import_preserves_topology() {
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
        let slots = graph.export_nodes();
        let rebuilt = GraphState::import_nodes(config(), slots);
        assert_eq!(rebuilt.size(), graph.size());
        assert_eq!(rebuilt.max_level(), graph.max_level());
        let results = rebuilt.search(&ctx, &[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(results[0].id, "v1");
    }

    #[test]
    fn dimension_mismatch_is_rejected_without_side_effect() {
        let mut graph = GraphState::new(config());
        let ctx = CancellationToken::none();
        let err = graph
            .insert(&ctx, VectorEntry::without_metadata("bad", vec![1.0, 2.0]))
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::DimensionMismatch { .. }));
        assert_eq!(graph.size(), 0);
    }
}
