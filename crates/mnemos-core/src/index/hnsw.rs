//! Multi-layer HNSW proximity graph, built from scratch.
//!
//! # Structure
//!
//! Nodes live in a dense arena indexed by `u32` slot; neighbor lists hold
//! slot numbers, never references, so the graph is cycle-free from the
//! borrow checker's point of view and serializes trivially. A single entry
//! point at the highest occupied level anchors every search.
//!
//! # Algorithm
//!
//! - Insert assigns a geometric random level (continuation probability
//!   `1/ln(M)`), greedily descends through layers above the new node's
//!   level, then runs a beam search (`ef_construction`) at each layer from
//!   the node's level down to 0 and links bidirectionally up to the degree
//!   cap (M, 2*M at layer 0), pruning the farthest edge on overflow.
//! - Search greedily descends to layer 0, then runs a beam search with
//!   width `max(ef_search, k)`.
//!
//! # Invariants
//!
//! - The entry point's level is the maximum level of any live node.
//! - A node present at level L has neighbor lists at every level <= L.
//! - Neighbor lists are capped and kept sorted by ascending distance to
//!   the owning node.
//! - Level assignment is deterministic under a fixed seed: identical
//!   insert sequences build identical graphs.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::HnswConfig;
use crate::error::{CoreError, CoreResult};
use crate::similarity::{cosine_similarity, is_zero_vector};
use crate::types::{VectorMetadata, VectorRecord};

/// One search result: record id plus cosine similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Id of the matching vector record.
    pub id: u64,
    /// Cosine similarity to the query, higher is closer.
    pub similarity: f32,
}

/// A node in the proximity graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HnswNode {
    /// The stored record (vector + metadata).
    record: VectorRecord,
    /// Highest layer this node appears in.
    level: usize,
    /// Per-layer neighbor slots, `neighbors[layer]`, sorted by ascending
    /// distance to this node.
    neighbors: Vec<Vec<u32>>,
    /// Soft-delete marker: removed nodes stay as graph waypoints but are
    /// excluded from results.
    deleted: bool,
}

impl HnswNode {
    fn new(record: VectorRecord, level: usize) -> Self {
        Self {
            record,
            level,
            neighbors: vec![Vec::new(); level + 1],
            deleted: false,
        }
    }
}

/// Scored candidate during beam search. Max-heap pops the highest
/// similarity first; ties break toward the lower slot for determinism.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ScoredSlot {
    score: f32,
    slot: u32,
}

impl Eq for ScoredSlot {}

impl PartialOrd for ScoredSlot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredSlot {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.slot.cmp(&self.slot))
    }
}

/// Per-owner approximate nearest-neighbor index over cosine similarity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProximityIndex {
    config: HnswConfig,
    /// Dense node arena; neighbor lists refer to slots in this vector.
    nodes: Vec<HnswNode>,
    /// Record id -> arena slot for live nodes.
    id_to_slot: HashMap<u64, u32>,
    /// Slot of the entry point, `None` while the arena is empty.
    entry_point: Option<u32>,
    /// Level of the entry point.
    top_level: usize,
    /// Monotonic draw counter for deterministic level assignment.
    level_draws: u64,
    /// Next id handed out by [`ProximityIndex::next_id`].
    next_id: u64,
}

impl ProximityIndex {
    /// Create an empty index with the given parameters.
    pub fn new(config: HnswConfig) -> CoreResult<Self> {
        config.validate()?;
        debug!(
            dimension = config.dimension,
            m = config.m,
            ef_construction = config.ef_construction,
            "created empty proximity index"
        );
        Ok(Self {
            config,
            nodes: Vec::new(),
            id_to_slot: HashMap::new(),
            entry_point: None,
            top_level: 0,
            level_draws: 0,
            next_id: 0,
        })
    }

    /// Number of live vectors.
    pub fn len(&self) -> usize {
        self.id_to_slot.len()
    }

    /// True when no live vectors are present.
    pub fn is_empty(&self) -> bool {
        self.id_to_slot.is_empty()
    }

    /// Configured vector dimension.
    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    /// Index parameters.
    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    /// Smallest id not yet assigned. Callers that let the index pick ids
    /// use this before [`ProximityIndex::insert`].
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// True if a live record with this id exists.
    pub fn contains(&self, id: u64) -> bool {
        self.id_to_slot.contains_key(&id)
    }

    /// Look up a live record by id.
    pub fn record(&self, id: u64) -> Option<&VectorRecord> {
        self.id_to_slot
            .get(&id)
            .map(|&slot| &self.nodes[slot as usize].record)
    }

    /// Iterate over live records in unspecified order.
    pub fn records(&self) -> impl Iterator<Item = &VectorRecord> {
        self.nodes
            .iter()
            .filter(|n| !n.deleted)
            .map(|n| &n.record)
    }

    /// Insert a vector under the given id.
    ///
    /// Fails with [`CoreError::DimensionMismatch`] on a wrong-length
    /// vector, [`CoreError::UndefinedSimilarity`] on a zero vector and
    /// [`CoreError::DuplicateVectorId`] when the id is already live.
    pub fn insert(&mut self, id: u64, vector: Vec<f32>, metadata: VectorMetadata) -> CoreResult<()> {
        if vector.len() != self.config.dimension {
            return Err(CoreError::DimensionMismatch {
                expected: self.config.dimension,
                actual: vector.len(),
            });
        }
        if is_zero_vector(&vector) {
            return Err(CoreError::UndefinedSimilarity);
        }
        if self.id_to_slot.contains_key(&id) {
            return Err(CoreError::DuplicateVectorId { id });
        }

        let level = self.assign_level();
        let slot = self.nodes.len() as u32;
        self.nodes.push(HnswNode::new(
            VectorRecord::new(id, vector, metadata),
            level,
        ));
        self.id_to_slot.insert(id, slot);
        self.next_id = self.next_id.max(id + 1);

        trace!(id, slot, level, "inserting vector");

        let Some(entry) = self.entry_point else {
            // First node anchors the graph.
            self.entry_point = Some(slot);
            self.top_level = level;
            return Ok(());
        };

        let query = self.nodes[slot as usize].record.vector.clone();

        // Greedy descent through layers above the new node's level.
        let mut current = entry;
        if self.top_level > level {
            current = self.greedy_descend(&query, entry, self.top_level, level + 1);
        }

        // Beam search and bidirectional linking from the node's level down.
        let start_layer = level.min(self.top_level);
        for layer in (0..=start_layer).rev() {
            let candidates =
                self.search_layer(&query, current, self.config.ef_construction, layer, true);

            let selected: Vec<u32> = candidates
                .iter()
                .take(self.config.m)
                .map(|c| c.slot)
                .collect();

            // New node's neighbors: candidates arrive sorted by descending
            // similarity, which is ascending distance to the new node.
            self.nodes[slot as usize].neighbors[layer] = selected.clone();

            let cap = self.config.max_connections(layer);
            for &neighbor in &selected {
                self.link_back(neighbor, slot, layer, cap);
            }

            if let Some(closest) = candidates.first() {
                current = closest.slot;
            }
        }

        // Entry-point promotion.
        if level > self.top_level {
            self.entry_point = Some(slot);
            self.top_level = level;
        }

        Ok(())
    }

    /// Remove a record by id. The node stays in the arena as a waypoint;
    /// it no longer appears in results. Returns false for unknown ids.
    pub fn remove(&mut self, id: u64) -> bool {
        match self.id_to_slot.remove(&id) {
            Some(slot) => {
                self.nodes[slot as usize].deleted = true;
                debug!(id, slot, "removed vector from index");
                true
            }
            None => false,
        }
    }

    /// Return up to `k` live records closest to `query` by cosine
    /// similarity, sorted by non-increasing similarity.
    ///
    /// A zero query vector yields an empty result (no match), not an
    /// error. Fewer than `k` hits come back only when the index holds
    /// fewer than `k` live vectors (or recall misses, which callers must
    /// tolerate as a statistical property).
    pub fn search(&self, query: &[f32], k: usize, ef_search: usize) -> CoreResult<Vec<SearchHit>> {
        if query.len() != self.config.dimension {
            return Err(CoreError::DimensionMismatch {
                expected: self.config.dimension,
                actual: query.len(),
            });
        }
        if k == 0 || self.id_to_slot.is_empty() || is_zero_vector(query) {
            return Ok(Vec::new());
        }

        let entry = match self.entry_point {
            Some(e) => e,
            None => return Ok(Vec::new()),
        };

        let start = if self.top_level > 0 {
            self.greedy_descend(query, entry, self.top_level, 1)
        } else {
            entry
        };

        let ef = ef_search.max(k);
        let results = self.search_layer(query, start, ef, 0, false);

        Ok(results
            .into_iter()
            .take(k)
            .map(|c| SearchHit {
                id: self.nodes[c.slot as usize].record.id,
                similarity: c.score,
            })
            .collect())
    }

    // ========================================================================
    // Internal: level assignment
    // ========================================================================

    /// Draw a geometric level: keep climbing with probability `1/ln(M)`.
    ///
    /// Each draw seeds a fresh `StdRng` from `seed + draw counter`, so the
    /// sequence survives serialization without persisting RNG state.
    fn assign_level(&mut self) -> usize {
        self.level_draws += 1;
        let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(self.level_draws));
        let uniform: f64 = rng.gen::<f64>().max(1e-15);
        let level = (-uniform.ln() * self.config.level_multiplier()) as usize;
        level.min(self.config.max_level)
    }

    // ========================================================================
    // Internal: graph traversal
    // ========================================================================

    /// Similarity between `query` and the vector in `slot`.
    ///
    /// Stored vectors are never zero (rejected at insert), so a failure
    /// here can only mean a zero query, which ranks as no-match.
    fn score(&self, query: &[f32], slot: u32) -> f32 {
        cosine_similarity(query, &self.nodes[slot as usize].record.vector)
            .unwrap_or(f32::NEG_INFINITY)
    }

    /// Greedy move-to-best descent from `from_layer` down to `to_layer`.
    fn greedy_descend(&self, query: &[f32], entry: u32, from_layer: usize, to_layer: usize) -> u32 {
        let mut current = entry;
        let mut current_score = self.score(query, current);

        for layer in (to_layer..=from_layer).rev() {
            loop {
                let mut best = current;
                let mut best_score = current_score;

                let node = &self.nodes[current as usize];
                if layer < node.neighbors.len() {
                    for &neighbor in &node.neighbors[layer] {
                        let s = self.score(query, neighbor);
                        if s > best_score || (s == best_score && neighbor < best) {
                            best = neighbor;
                            best_score = s;
                        }
                    }
                }

                if best == current {
                    break;
                }
                current = best;
                current_score = best_score;
            }
        }

        current
    }

    /// Bounded beam search at one layer.
    ///
    /// Returns up to `ef` candidates sorted by descending similarity.
    /// Deleted nodes are traversed as waypoints; they enter the result set
    /// only when `include_deleted` is set (construction links through them
    /// to keep the graph navigable).
    fn search_layer(
        &self,
        query: &[f32],
        entry: u32,
        ef: usize,
        layer: usize,
        include_deleted: bool,
    ) -> Vec<ScoredSlot> {
        let entry_score = self.score(query, entry);

        let mut visited: HashSet<u32> = HashSet::new();
        visited.insert(entry);

        // Candidates: max-heap, nearest first for expansion.
        let mut candidates = BinaryHeap::new();
        candidates.push(ScoredSlot {
            score: entry_score,
            slot: entry,
        });

        // Results: min-heap via Reverse, worst on top for O(1) eviction.
        let mut results: BinaryHeap<Reverse<ScoredSlot>> = BinaryHeap::new();
        if include_deleted || !self.nodes[entry as usize].deleted {
            results.push(Reverse(ScoredSlot {
                score: entry_score,
                slot: entry,
            }));
        }

        while let Some(nearest) = candidates.pop() {
            let worst = results
                .peek()
                .map(|r| r.0.score)
                .unwrap_or(f32::NEG_INFINITY);
            if nearest.score < worst && results.len() >= ef {
                break;
            }

            let node = &self.nodes[nearest.slot as usize];
            if layer >= node.neighbors.len() {
                continue;
            }
            for &neighbor in &node.neighbors[layer] {
                if !visited.insert(neighbor) {
                    continue;
                }
                let s = self.score(query, neighbor);
                let worst = results
                    .peek()
                    .map(|r| r.0.score)
                    .unwrap_or(f32::NEG_INFINITY);

                if results.len() < ef || s > worst {
                    candidates.push(ScoredSlot {
                        score: s,
                        slot: neighbor,
                    });
                    if include_deleted || !self.nodes[neighbor as usize].deleted {
                        results.push(Reverse(ScoredSlot {
                            score: s,
                            slot: neighbor,
                        }));
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        let mut out: Vec<ScoredSlot> = results.into_iter().map(|r| r.0).collect();
        out.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.slot.cmp(&b.slot))
        });
        out
    }

    // ========================================================================
    // Internal: linking
    // ========================================================================

    /// Add a reverse edge `from -> to` at `layer`, keeping the list sorted
    /// by ascending distance to `from` and capped at `cap` by dropping the
    /// farthest neighbor.
    fn link_back(&mut self, from: u32, to: u32, layer: usize, cap: usize) {
        let own_vector = self.nodes[from as usize].record.vector.clone();

        let node = &self.nodes[from as usize];
        if layer >= node.neighbors.len() {
            // Node does not reach this layer; nothing to link.
            return;
        }
        if node.neighbors[layer].contains(&to) {
            return;
        }

        let mut list = node.neighbors[layer].clone();
        list.push(to);

        let mut scored: Vec<ScoredSlot> = list
            .into_iter()
            .map(|slot| ScoredSlot {
                score: self.score(&own_vector, slot),
                slot,
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.slot.cmp(&b.slot))
        });
        scored.truncate(cap);

        self.nodes[from as usize].neighbors[layer] = scored.into_iter().map(|s| s.slot).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(dimension: usize) -> ProximityIndex {
        ProximityIndex::new(HnswConfig {
            dimension,
            ..HnswConfig::default()
        })
        .unwrap()
    }

    fn unit_vector(dimension: usize, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut v: Vec<f32> = (0..dimension).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        for x in &mut v {
            *x /= norm;
        }
        v
    }

    #[test]
    fn test_empty_index_search() {
        let index = index_with(8);
        let hits = index.search(&unit_vector(8, 1), 5, 50).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_insert_then_search_exact_k() {
        let mut index = index_with(16);
        for i in 0..50u64 {
            index
                .insert(i, unit_vector(16, i), VectorMetadata::new())
                .unwrap();
        }

        let query = unit_vector(16, 7);
        let hits = index.search(&query, 10, 100).unwrap();

        assert_eq!(hits.len(), 10);
        // All hits are inserted ids, sorted by non-increasing similarity.
        for hit in &hits {
            assert!(hit.id < 50);
        }
        for pair in hits.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
        // The query is vector 7 itself; it must rank first.
        assert_eq!(hits[0].id, 7);
        assert!(hits[0].similarity > 0.999);
    }

    #[test]
    fn test_search_fewer_than_k_when_small() {
        let mut index = index_with(8);
        for i in 0..3u64 {
            index
                .insert(i, unit_vector(8, i + 100), VectorMetadata::new())
                .unwrap();
        }
        let hits = index.search(&unit_vector(8, 100), 10, 50).unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn test_dimension_mismatch_on_insert() {
        let mut index = index_with(8);
        let result = index.insert(0, unit_vector(4, 1), VectorMetadata::new());
        assert!(matches!(
            result,
            Err(CoreError::DimensionMismatch {
                expected: 8,
                actual: 4
            })
        ));
    }

    #[test]
    fn test_zero_vector_rejected_on_insert() {
        let mut index = index_with(8);
        let result = index.insert(0, vec![0.0; 8], VectorMetadata::new());
        assert!(matches!(result, Err(CoreError::UndefinedSimilarity)));
    }

    #[test]
    fn test_zero_query_is_no_match() {
        let mut index = index_with(8);
        index
            .insert(0, unit_vector(8, 3), VectorMetadata::new())
            .unwrap();
        let hits = index.search(&vec![0.0; 8], 5, 50).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut index = index_with(8);
        index
            .insert(9, unit_vector(8, 1), VectorMetadata::new())
            .unwrap();
        let result = index.insert(9, unit_vector(8, 2), VectorMetadata::new());
        assert!(matches!(
            result,
            Err(CoreError::DuplicateVectorId { id: 9 })
        ));
    }

    #[test]
    fn test_remove_excludes_from_results() {
        let mut index = index_with(8);
        for i in 0..10u64 {
            index
                .insert(i, unit_vector(8, i), VectorMetadata::new())
                .unwrap();
        }
        assert!(index.remove(4));
        assert!(!index.remove(4));
        assert_eq!(index.len(), 9);

        let hits = index.search(&unit_vector(8, 4), 10, 100).unwrap();
        assert_eq!(hits.len(), 9);
        assert!(hits.iter().all(|h| h.id != 4));
    }

    #[test]
    fn test_next_id_tracks_inserts() {
        let mut index = index_with(8);
        assert_eq!(index.next_id(), 0);
        index
            .insert(0, unit_vector(8, 1), VectorMetadata::new())
            .unwrap();
        index
            .insert(5, unit_vector(8, 2), VectorMetadata::new())
            .unwrap();
        assert_eq!(index.next_id(), 6);
    }

    #[test]
    fn test_deterministic_under_fixed_seed() {
        let build = || {
            let mut index = index_with(12);
            for i in 0..40u64 {
                index
                    .insert(i, unit_vector(12, i + 500), VectorMetadata::new())
                    .unwrap();
            }
            index
        };
        let a = build();
        let b = build();

        let query = unit_vector(12, 999);
        assert_eq!(
            a.search(&query, 5, 60).unwrap(),
            b.search(&query, 5, 60).unwrap()
        );
    }

    #[test]
    fn test_neighbor_degree_caps_hold() {
        let mut index = index_with(8);
        for i in 0..200u64 {
            index
                .insert(i, unit_vector(8, i), VectorMetadata::new())
                .unwrap();
        }
        for node in &index.nodes {
            for (layer, list) in node.neighbors.iter().enumerate() {
                assert!(list.len() <= index.config.max_connections(layer));
            }
        }
        // Entry point sits at the maximum level.
        let entry = index.entry_point.unwrap() as usize;
        assert_eq!(index.nodes[entry].level, index.top_level);
        assert!(index
            .nodes
            .iter()
            .all(|n| n.level <= index.top_level));
    }

    #[test]
    fn test_metadata_round_trips_through_record() {
        let mut index = index_with(8);
        let mut metadata = VectorMetadata::new();
        metadata.insert("text".to_string(), crate::types::MetadataValue::Text("hi".into()));
        index.insert(3, unit_vector(8, 3), metadata.clone()).unwrap();
        assert_eq!(index.record(3).unwrap().metadata, metadata);
    }
}
