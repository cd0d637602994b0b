//! Hierarchical Navigable Small World proximity graph.
//!
//! A multi-layer graph over integer labels. Level assignment draws from a
//! geometric distribution seeded by the configured random seed (negative
//! seeds fall back to entropy), so identical insertion orders rebuild
//! identical graphs. Deleted labels stay in the graph as traversal waypoints
//! until a rebuild; searches skip them in results.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Integer label of a vector in the graph.
pub type Label = u32;

/// Distance oracle handed to graph insertion.
pub trait DistanceOracle {
    /// Distance between two stored labels.
    fn between(&self, a: Label, b: Label) -> f32;
}

/// Neighbor lists for one node, one entry per layer up to the node's level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct NodeLinks {
    /// `layers[l]` holds the neighbors at layer `l`.
    layers: Vec<SmallVec<[Label; 16]>>,
}

/// A candidate ordered by distance (min-heap via `Reverse`, max-heap
/// directly).
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    distance: f32,
    label: Label,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.label.cmp(&other.label))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The serialized graph structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswGraph {
    /// Graph degree per layer (layer 0 allows `2 * m`).
    m: usize,
    /// Candidate-list size during insertion.
    ef_construction: usize,
    /// Base seed for level assignment; `None` means entropy-seeded.
    seed: Option<u64>,
    /// Monotone insertion counter, mixed into the per-insert rng.
    insertions: u64,
    /// Entry point of the top layer.
    entry_point: Option<Label>,
    /// Highest populated layer.
    max_layer: usize,
    /// Adjacency lists per node.
    nodes: HashMap<Label, NodeLinks>,
}

impl HnswGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new(m: usize, ef_construction: usize, seed: Option<u64>) -> Self {
        Self {
            m: m.max(2),
            ef_construction: ef_construction.max(m),
            seed,
            insertions: 0,
            entry_point: None,
            max_layer: 0,
            nodes: HashMap::new(),
        }
    }

    /// Number of nodes (including tombstoned ones still in the graph).
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Draw the layer for a new node.
    fn assign_layer(&mut self) -> usize {
        let mut rng = match self.seed {
            Some(base) => StdRng::seed_from_u64(base.wrapping_add(self.insertions)),
            None => StdRng::from_entropy(),
        };
        self.insertions += 1;
        let ml = 1.0 / (self.m as f64).ln();
        let uniform: f64 = rng.gen_range(f64::EPSILON..1.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let layer = (-uniform.ln() * ml).floor() as usize;
        layer.min(31)
    }

    fn max_degree(&self, layer: usize) -> usize {
        if layer == 0 { self.m * 2 } else { self.m }
    }

    /// Insert a label. The oracle provides distances to already-inserted
    /// labels.
    pub fn insert<O: DistanceOracle>(&mut self, label: Label, oracle: &O) {
        let node_layer = self.assign_layer();
        let links = NodeLinks {
            layers: vec![SmallVec::new(); node_layer + 1],
        };
        self.nodes.insert(label, links);

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(label);
            self.max_layer = node_layer;
            return;
        };

        // Greedy descent through the layers above the node's level.
        let mut current = entry;
        let mut current_distance = oracle.between(label, current);
        let mut layer = self.max_layer;
        while layer > node_layer {
            let mut improved = true;
            while improved {
                improved = false;
                for &neighbor in self.neighbors(current, layer) {
                    let d = oracle.between(label, neighbor);
                    if d < current_distance {
                        current = neighbor;
                        current_distance = d;
                        improved = true;
                    }
                }
            }
            layer -= 1;
        }

        // Connect on each layer from min(node_layer, max_layer) down to 0.
        let mut entry_points = vec![current];
        for layer in (0..=node_layer.min(self.max_layer)).rev() {
            let candidates = self.search_layer_for_insert(label, &entry_points, layer, oracle);
            let selected = self.select_neighbors(&candidates, self.max_degree(layer));

            for &neighbor in &selected {
                self.connect(label, neighbor, layer, oracle);
            }
            entry_points = selected;
            if entry_points.is_empty() {
                entry_points.push(current);
            }
        }

        if node_layer > self.max_layer {
            self.max_layer = node_layer;
            self.entry_point = Some(label);
        }
    }

    fn neighbors(&self, label: Label, layer: usize) -> &[Label] {
        self.nodes
            .get(&label)
            .and_then(|links| links.layers.get(layer))
            .map_or(&[], SmallVec::as_slice)
    }

    fn connect<O: DistanceOracle>(&mut self, a: Label, b: Label, layer: usize, oracle: &O) {
        if a == b {
            return;
        }
        let cap = self.max_degree(layer);
        for (from, to) in [(a, b), (b, a)] {
            if let Some(links) = self.nodes.get_mut(&from) {
                if let Some(neighbors) = links.layers.get_mut(layer) {
                    if !neighbors.contains(&to) {
                        neighbors.push(to);
                    }
                }
            }
            // Prune the neighbor list back to the degree cap, keeping the
            // closest links.
            let over = self
                .nodes
                .get(&from)
                .and_then(|l| l.layers.get(layer))
                .is_some_and(|n| n.len() > cap);
            if over {
                let mut scored: Vec<Candidate> = self
                    .neighbors(from, layer)
                    .iter()
                    .map(|&n| Candidate {
                        distance: oracle.between(from, n),
                        label: n,
                    })
                    .collect();
                scored.sort();
                scored.truncate(cap);
                if let Some(links) = self.nodes.get_mut(&from) {
                    if let Some(neighbors) = links.layers.get_mut(layer) {
                        *neighbors = scored.iter().map(|c| c.label).collect();
                    }
                }
            }
        }
    }

    /// `ef_construction`-bounded layer search used during insertion; the
    /// query is the freshly inserted label.
    fn search_layer_for_insert<O: DistanceOracle>(
        &self,
        query: Label,
        entry_points: &[Label],
        layer: usize,
        oracle: &O,
    ) -> Vec<Candidate> {
        self.search_layer(
            |label| oracle.between(query, label),
            entry_points,
            layer,
            self.ef_construction,
        )
    }

    /// Generic best-first layer search bounded by `ef`.
    fn search_layer(
        &self,
        distance_to: impl Fn(Label) -> f32,
        entry_points: &[Label],
        layer: usize,
        ef: usize,
    ) -> Vec<Candidate> {
        let mut visited: HashSet<Label> = HashSet::new();
        let mut frontier: BinaryHeap<std::cmp::Reverse<Candidate>> = BinaryHeap::new();
        let mut best: BinaryHeap<Candidate> = BinaryHeap::new();

        for &entry in entry_points {
            if visited.insert(entry) {
                let candidate = Candidate {
                    distance: distance_to(entry),
                    label: entry,
                };
                frontier.push(std::cmp::Reverse(candidate));
                best.push(candidate);
            }
        }

        while let Some(std::cmp::Reverse(current)) = frontier.pop() {
            let worst = best.peek().map_or(f32::INFINITY, |c| c.distance);
            if current.distance > worst && best.len() >= ef {
                break;
            }
            for &neighbor in self.neighbors(current.label, layer) {
                if !visited.insert(neighbor) {
                    continue;
                }
                let candidate = Candidate {
                    distance: distance_to(neighbor),
                    label: neighbor,
                };
                let worst = best.peek().map_or(f32::INFINITY, |c| c.distance);
                if best.len() < ef || candidate.distance < worst {
                    frontier.push(std::cmp::Reverse(candidate));
                    best.push(candidate);
                    if best.len() > ef {
                        best.pop();
                    }
                }
            }
        }

        let mut results: Vec<Candidate> = best.into_vec();
        results.sort();
        results
    }

    /// Plain closest-first neighbor selection.
    fn select_neighbors(&self, candidates: &[Candidate], count: usize) -> Vec<Label> {
        candidates.iter().take(count).map(|c| c.label).collect()
    }

    /// k-NN search. `ef` bounds the layer-0 candidate list; `skip` holds
    /// tombstoned labels excluded from results (but still traversed).
    /// `allowed` optionally restricts results to a candidate set.
    #[must_use]
    pub fn search(
        &self,
        distance_to: impl Fn(Label) -> f32 + Copy,
        k: usize,
        ef: usize,
        skip: &HashSet<Label>,
        allowed: Option<&HashSet<Label>>,
    ) -> Vec<(Label, f32)> {
        let Some(entry) = self.entry_point else {
            return Vec::new();
        };
        if k == 0 {
            return Vec::new();
        }

        // Greedy descent to layer 1.
        let mut current = entry;
        let mut current_distance = distance_to(current);
        for layer in (1..=self.max_layer).rev() {
            let mut improved = true;
            while improved {
                improved = false;
                for &neighbor in self.neighbors(current, layer) {
                    let d = distance_to(neighbor);
                    if d < current_distance {
                        current = neighbor;
                        current_distance = d;
                        improved = true;
                    }
                }
            }
        }

        let ef = ef.max(k);
        let candidates = self.search_layer(distance_to, &[current], 0, ef);
        candidates
            .into_iter()
            .filter(|c| !skip.contains(&c.label))
            .filter(|c| allowed.is_none_or(|set| set.contains(&c.label)))
            .take(k)
            .map(|c| (c.label, c.distance))
            .collect()
    }
}
