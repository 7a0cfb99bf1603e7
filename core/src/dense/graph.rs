//! HNSW graph storage and construction.

use crate::config::HnswParams;
use crate::dense::search::{search_layer, Scored};
use crate::dense::visited::VisitedSet;
use crate::error::BuildError;
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Position of a node in the arena. Equal to the insertion order of its document.
pub type NodeId = u32;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node {
    /// `links[layer]` holds the out-neighbors on that layer; the node's level is `links.len() - 1`.
    links: Vec<Vec<NodeId>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DenseIndex {
    params: HnswParams,
    dimension: usize,
    doc_ids: Vec<String>,
    vectors: Vec<f32>,
    nodes: Vec<Node>,
    entry_point: Option<NodeId>,
    max_layer: usize,
}

/// Scale `v` to unit L2 norm in place and return its original norm.
/// A zero vector is left untouched.
pub fn normalize(v: &mut [f32]) -> f32 {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    norm
}

#[inline]
pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

impl DenseIndex {
    /// Normalize every vector and insert them in order. `doc_ids[i]` names `vectors[i]`.
    pub fn build(doc_ids: Vec<String>, vectors: Vec<Vec<f32>>, params: HnswParams) -> Result<Self, BuildError> {
        params.validate()?;
        if doc_ids.len() != vectors.len() {
            return Err(BuildError::LengthMismatch { ids: doc_ids.len(), vectors: vectors.len() });
        }
        if doc_ids.is_empty() {
            return Err(BuildError::EmptyCollection);
        }
        let dimension = vectors[0].len();
        if dimension == 0 {
            return Err(BuildError::InvalidParameter("vectors must have at least one dimension".into()));
        }
        let mut seen: HashSet<&str> = HashSet::with_capacity(doc_ids.len());
        for id in &doc_ids {
            if !seen.insert(id.as_str()) {
                return Err(BuildError::DuplicateDocId(id.clone()));
            }
        }
        drop(seen);

        let n = doc_ids.len();
        let mut index = Self {
            params,
            dimension,
            doc_ids: Vec::with_capacity(n),
            vectors: Vec::with_capacity(n * dimension),
            nodes: Vec::with_capacity(n),
            entry_point: None,
            max_layer: 0,
        };
        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut visited = VisitedSet::with_capacity(n);

        for (doc_id, mut vector) in doc_ids.into_iter().zip(vectors) {
            if vector.len() != dimension {
                return Err(BuildError::DimensionMismatch { doc_id, expected: dimension, found: vector.len() });
            }
            if vector.iter().any(|x| !x.is_finite()) {
                return Err(BuildError::NonFiniteVector(doc_id));
            }
            if normalize(&mut vector) == 0.0 {
                return Err(BuildError::ZeroVector(doc_id));
            }
            let level = index.random_level(&mut rng);
            index.insert(doc_id, &vector, level, &mut visited);
        }

        tracing::debug!(nodes = index.len(), dimension, max_layer = index.max_layer, "built dense index");
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    pub fn max_layer(&self) -> usize {
        self.max_layer
    }

    pub fn entry_point(&self) -> Option<NodeId> {
        self.entry_point
    }

    pub fn doc_id(&self, node: NodeId) -> &str {
        &self.doc_ids[node as usize]
    }

    /// Stored unit vector of `node`.
    pub fn vector(&self, node: NodeId) -> &[f32] {
        let start = node as usize * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    /// Out-neighbors of `node` on `layer`; empty above the node's level.
    pub fn links(&self, node: NodeId, layer: usize) -> &[NodeId] {
        self.nodes[node as usize].links.get(layer).map_or(&[], Vec::as_slice)
    }

    pub fn level(&self, node: NodeId) -> usize {
        self.nodes[node as usize].links.len() - 1
    }

    /// Out-degree bound on `layer`.
    pub fn max_degree(&self, layer: usize) -> usize {
        if layer == 0 {
            self.params.m_max0
        } else {
            self.params.m
        }
    }

    #[inline]
    pub(crate) fn similarity(&self, query: &[f32], node: NodeId) -> f32 {
        dot(query, self.vector(node))
    }

    /// Exponentially distributed level, `floor(-ln(U) / ln(M))`, capped at `max_layers - 1`.
    fn random_level(&self, rng: &mut StdRng) -> usize {
        let ml = 1.0 / (self.params.m as f64).ln();
        let u: f64 = 1.0 - rng.gen::<f64>();
        let level = (-u.ln() * ml).floor() as usize;
        level.min(self.params.max_layers - 1)
    }

    fn insert(&mut self, doc_id: String, vector: &[f32], level: usize, visited: &mut VisitedSet) {
        let id = self.nodes.len() as NodeId;
        self.doc_ids.push(doc_id);
        self.vectors.extend_from_slice(vector);
        self.nodes.push(Node { links: vec![Vec::new(); level + 1] });
        visited.ensure_capacity(self.nodes.len());

        let entry = match self.entry_point {
            Some(ep) => ep,
            None => {
                self.entry_point = Some(id);
                self.max_layer = level;
                return;
            }
        };

        // Greedy descent through the layers above the new node's level.
        let mut ep = entry;
        for layer in (level + 1..=self.max_layer).rev() {
            if let Some(best) = search_layer(self, vector, &[ep], 1, layer, visited).first() {
                ep = best.id;
            }
        }

        let mut entry_points = vec![ep];
        for layer in (0..=level.min(self.max_layer)).rev() {
            let candidates = search_layer(self, vector, &entry_points, self.params.ef_construction, layer, visited);
            let selected = select_neighbors(self, &candidates, self.max_degree(layer));
            self.nodes[id as usize].links[layer] = selected.iter().map(|s| s.id).collect();
            for s in &selected {
                self.link_back(s.id, id, layer);
            }
            entry_points = candidates.iter().map(|s| s.id).collect();
            if entry_points.is_empty() {
                entry_points.push(ep);
            }
        }

        if level > self.max_layer {
            self.max_layer = level;
            self.entry_point = Some(id);
        }
    }

    /// Add `new` to `node`'s list on `layer`, re-selecting with the heuristic when over capacity.
    fn link_back(&mut self, node: NodeId, new: NodeId, layer: usize) {
        let cap = self.max_degree(layer);
        let links = &mut self.nodes[node as usize].links[layer];
        links.push(new);
        if links.len() <= cap {
            return;
        }

        let base = self.vector(node);
        let mut candidates: Vec<Scored> = self.nodes[node as usize].links[layer]
            .iter()
            .map(|&c| Scored { sim: OrderedFloat(dot(base, self.vector(c))), id: c })
            .collect();
        candidates.sort_unstable_by(|a, b| b.cmp(a));
        let kept: Vec<NodeId> = select_neighbors(self, &candidates, cap).iter().map(|s| s.id).collect();
        self.nodes[node as usize].links[layer] = kept;
    }
}

/// Neighbor selection heuristic from the HNSW paper (Algorithm 4).
///
/// `candidates` must be sorted best first. A candidate is kept only if it is more
/// similar to the base than to every neighbor kept so far; leftover slots are then
/// filled with the best skipped candidates.
fn select_neighbors(index: &DenseIndex, candidates: &[Scored], m: usize) -> Vec<Scored> {
    let mut selected: Vec<Scored> = Vec::with_capacity(m);
    for c in candidates {
        if selected.len() >= m {
            break;
        }
        let cv = index.vector(c.id);
        let diverse = selected.iter().all(|s| c.sim.0 >= dot(cv, index.vector(s.id)));
        if diverse {
            selected.push(*c);
        }
    }

    if selected.len() < m {
        let taken: HashSet<NodeId> = selected.iter().map(|s| s.id).collect();
        for c in candidates {
            if selected.len() >= m {
                break;
            }
            if !taken.contains(&c.id) {
                selected.push(*c);
            }
        }
    }
    selected
}
