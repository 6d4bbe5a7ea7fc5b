//! In-memory HNSW graph over unit vectors.
//!
//! Nodes live in an arena keyed by opaque string ids; neighbor sets hold
//! ids, never references, so the cyclic graph stays ownership-free.
//! Distance is cosine distance `1 - a·b` on unit vectors. The graph is
//! not thread-safe on its own — the index service serializes access.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Max connections per node per layer.
const M: usize = 16;

/// Candidate list size during insertion.
const EF_CONSTRUCTION: usize = 200;

/// Hard cap on sampled levels.
const LEVEL_CAP: usize = 16;

/// A search hit: higher score is closer (`score = 1 - distance`).
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node {
    vector: Vec<f32>,
    /// Adjacency per level; index 0 is the base layer. The vec length is
    /// the node's top level plus one.
    neighbors: Vec<HashSet<String>>,
}

impl Node {
    fn top_level(&self) -> usize {
        self.neighbors.len().saturating_sub(1)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HnswIndex {
    dimensions: usize,
    /// Level multiplier `1 / ln(M)`.
    ml: f64,
    nodes: HashMap<String, Node>,
    entry_point: Option<String>,
    max_level: usize,
}

impl HnswIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            ml: 1.0 / (M as f64).ln(),
            nodes: HashMap::new(),
            entry_point: None,
            max_level: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Insert a vector under `id`. An existing `id` is replaced
    /// (delete-then-insert). Rejects vectors of the wrong dimension.
    pub fn insert(&mut self, id: &str, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dimensions {
            bail!(
                "vector dimension mismatch for {id}: expected {}, got {}",
                self.dimensions,
                vector.len()
            );
        }
        if self.nodes.contains_key(id) {
            self.delete(id);
        }

        let level = sample_level(self.ml);
        let node = Node {
            vector,
            neighbors: vec![HashSet::new(); level + 1],
        };

        let Some(entry) = self.entry_point.clone() else {
            self.nodes.insert(id.to_string(), node);
            self.entry_point = Some(id.to_string());
            self.max_level = level;
            return Ok(());
        };

        let query = node.vector.clone();
        self.nodes.insert(id.to_string(), node);

        // Greedy descent through the layers above the new node's level.
        let mut current = entry;
        let mut layer = self.max_level;
        while layer > level {
            current = self.greedy_closest(&query, current, layer);
            layer -= 1;
        }

        // Connect on every layer the new node occupies.
        let mut connect_layer = level.min(self.max_level);
        loop {
            let candidates = self.search_layer(&query, &current, EF_CONSTRUCTION, connect_layer);
            for candidate in candidates.iter().take(M) {
                self.link(id, &candidate.id, connect_layer);
            }
            if let Some(closest) = candidates.first() {
                current = closest.id.clone();
            }
            if connect_layer == 0 {
                break;
            }
            connect_layer -= 1;
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(id.to_string());
        }
        Ok(())
    }

    /// k-nearest search. `ef` defaults to `max(k, 10)`.
    pub fn search(&self, query: &[f32], k: usize, ef: Option<usize>) -> Vec<SearchHit> {
        let Some(entry) = self.entry_point.clone() else {
            return Vec::new();
        };
        let ef = ef.unwrap_or_else(|| k.max(10));

        let mut current = entry;
        let mut layer = self.max_level;
        while layer > 0 {
            current = self.greedy_closest(query, current, layer);
            layer -= 1;
        }

        self.search_layer(query, &current, ef, 0)
            .into_iter()
            .take(k)
            .map(|c| SearchHit {
                id: c.id,
                score: 1.0 - c.dist,
            })
            .collect()
    }

    /// Remove a node and every edge that references it. When the entry
    /// point goes, an arbitrary survivor is promoted and `max_level`
    /// becomes that node's top level — possibly lower than the true
    /// maximum; later inserts raise it again.
    pub fn delete(&mut self, id: &str) -> bool {
        let Some(node) = self.nodes.remove(id) else {
            return false;
        };
        for (layer, neighbors) in node.neighbors.iter().enumerate() {
            for neighbor_id in neighbors {
                if let Some(neighbor) = self.nodes.get_mut(neighbor_id) {
                    if let Some(set) = neighbor.neighbors.get_mut(layer) {
                        set.remove(id);
                    }
                }
            }
        }

        if self.entry_point.as_deref() == Some(id) {
            match self.nodes.iter().next() {
                Some((survivor_id, survivor)) => {
                    self.max_level = survivor.top_level();
                    self.entry_point = Some(survivor_id.clone());
                }
                None => {
                    self.entry_point = None;
                    self.max_level = 0;
                }
            }
        }
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Serialize the full graph for a warm restart.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    // ── Internal ─────────────────────────────────────────────────────────

    /// Add the bidirectional edge `a — b` at `layer`, pruning either side
    /// back to the `M` closest when the edge pushes it over.
    fn link(&mut self, a: &str, b: &str, layer: usize) {
        if a == b {
            return;
        }
        if self.edge_insert(a, b, layer) {
            self.edge_insert(b, a, layer);
            self.prune(a, layer);
            self.prune(b, layer);
        }
    }

    fn edge_insert(&mut self, from: &str, to: &str, layer: usize) -> bool {
        match self.nodes.get_mut(from) {
            Some(node) => match node.neighbors.get_mut(layer) {
                Some(set) => set.insert(to.to_string()),
                None => false,
            },
            None => false,
        }
    }

    /// Enforce the per-layer fan-out bound: keep the `M` closest
    /// neighbors by distance to `id`, dropping reverse edges from the
    /// evicted ones.
    fn prune(&mut self, id: &str, layer: usize) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let Some(set) = node.neighbors.get(layer) else {
            return;
        };
        if set.len() <= M {
            return;
        }

        let origin = node.vector.clone();
        let mut ranked: Vec<(f32, String)> = set
            .iter()
            .filter_map(|n| {
                self.nodes
                    .get(n)
                    .map(|other| (cosine_distance(&origin, &other.vector), n.clone()))
            })
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0));

        let evicted: Vec<String> = ranked.split_off(M).into_iter().map(|(_, n)| n).collect();
        let kept: HashSet<String> = ranked.into_iter().map(|(_, n)| n).collect();

        if let Some(node) = self.nodes.get_mut(id) {
            node.neighbors[layer] = kept;
        }
        for evicted_id in evicted {
            if let Some(other) = self.nodes.get_mut(&evicted_id) {
                if let Some(set) = other.neighbors.get_mut(layer) {
                    set.remove(id);
                }
            }
        }
    }

    /// Repeatedly hop to the closest neighbor at `layer` until no
    /// neighbor improves on the current node.
    fn greedy_closest(&self, query: &[f32], start: String, layer: usize) -> String {
        let mut current = start;
        let mut current_dist = match self.nodes.get(&current) {
            Some(node) => cosine_distance(query, &node.vector),
            None => return current,
        };
        loop {
            let neighbors = match self
                .nodes
                .get(&current)
                .and_then(|n| n.neighbors.get(layer))
            {
                Some(set) => set,
                None => return current,
            };
            let mut best: Option<(f32, &String)> = None;
            for neighbor_id in neighbors {
                if let Some(neighbor) = self.nodes.get(neighbor_id) {
                    let dist = cosine_distance(query, &neighbor.vector);
                    if dist < current_dist && best.map(|(d, _)| dist < d).unwrap_or(true) {
                        best = Some((dist, neighbor_id));
                    }
                }
            }
            match best {
                Some((dist, id)) => {
                    current = id.clone();
                    current_dist = dist;
                }
                None => return current,
            }
        }
    }

    /// Beam search at one layer: returns up to `ef` candidates sorted by
    /// ascending distance.
    fn search_layer(&self, query: &[f32], entry: &str, ef: usize, layer: usize) -> Vec<Candidate> {
        let Some(entry_node) = self.nodes.get(entry) else {
            return Vec::new();
        };
        let entry_dist = cosine_distance(query, &entry_node.vector);

        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(entry);

        // candidates: closest-first; results: furthest-first, bounded at ef.
        let mut candidates: BinaryHeap<std::cmp::Reverse<Candidate>> = BinaryHeap::new();
        let mut results: BinaryHeap<Candidate> = BinaryHeap::new();
        candidates.push(std::cmp::Reverse(Candidate {
            dist: entry_dist,
            id: entry.to_string(),
        }));
        results.push(Candidate {
            dist: entry_dist,
            id: entry.to_string(),
        });

        while let Some(std::cmp::Reverse(closest)) = candidates.pop() {
            let furthest = results.peek().map(|c| c.dist).unwrap_or(f32::INFINITY);
            if closest.dist > furthest {
                break;
            }
            let Some(node) = self.nodes.get(&closest.id) else {
                continue;
            };
            let Some(neighbors) = node.neighbors.get(layer) else {
                continue;
            };
            for neighbor_id in neighbors {
                let Some((key, neighbor)) = self.nodes.get_key_value(neighbor_id) else {
                    continue;
                };
                if !visited.insert(key) {
                    continue;
                }
                let dist = cosine_distance(query, &neighbor.vector);
                let furthest = results.peek().map(|c| c.dist).unwrap_or(f32::INFINITY);
                if dist < furthest || results.len() < ef {
                    let candidate = Candidate {
                        dist,
                        id: neighbor_id.clone(),
                    };
                    candidates.push(std::cmp::Reverse(candidate.clone()));
                    results.push(candidate);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut sorted = results.into_vec();
        sorted.sort_by(|a, b| a.dist.total_cmp(&b.dist));
        sorted
    }

    #[cfg(test)]
    fn neighbors_of(&self, id: &str, layer: usize) -> Option<&HashSet<String>> {
        self.nodes.get(id)?.neighbors.get(layer)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    dist: f32,
    id: String,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.dist
            .total_cmp(&other.dist)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Cosine distance `1 - a·b`, valid for unit vectors.
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    1.0 - dot
}

/// Geometric level sample: starting at 0, keep incrementing while
/// `uniform(0,1) < exp(-level * ml)`, capped at [`LEVEL_CAP`].
fn sample_level(ml: f64) -> usize {
    use rand::Rng;
    let mut rng = rand::rng();
    let mut level = 0usize;
    while level < LEVEL_CAP && rng.random::<f64>() < (-(level as f64) * ml).exp() {
        level += 1;
    }
    level
}
