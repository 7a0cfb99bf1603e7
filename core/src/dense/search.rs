//! Layer search and multi-layer k-NN over a built [`DenseIndex`].

use crate::dense::graph::{normalize, DenseIndex, NodeId};
use crate::dense::visited::VisitedSet;
use crate::error::SearchError;
use crate::{sort_by_score_then_id, Hit, RankedList};
use ordered_float::OrderedFloat;
use std::cell::RefCell;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

thread_local! {
    static SEARCH_VISITED: RefCell<VisitedSet> = RefCell::new(VisitedSet::default());
}

/// A node and its similarity to the current query.
///
/// Ordered so that "greater" means better: higher similarity, then lower node id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Scored {
    pub(crate) sim: OrderedFloat<f32>,
    pub(crate) id: NodeId,
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sim.cmp(&other.sim).then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Best-first search of one layer. Returns up to `ef` nodes, best first.
pub(crate) fn search_layer(
    index: &DenseIndex,
    query: &[f32],
    entry_points: &[NodeId],
    ef: usize,
    layer: usize,
    visited: &mut VisitedSet,
) -> Vec<Scored> {
    visited.clear();
    let mut candidates: BinaryHeap<Scored> = BinaryHeap::with_capacity(ef * 2);
    let mut results: BinaryHeap<Reverse<Scored>> = BinaryHeap::with_capacity(ef + 1);

    for &ep in entry_points {
        if visited.insert(ep) {
            let s = Scored { sim: OrderedFloat(index.similarity(query, ep)), id: ep };
            candidates.push(s);
            results.push(Reverse(s));
            if results.len() > ef {
                results.pop();
            }
        }
    }

    while let Some(current) = candidates.pop() {
        if results.len() >= ef {
            if let Some(Reverse(worst)) = results.peek() {
                if current < *worst {
                    break;
                }
            }
        }

        for &neighbor in index.links(current.id, layer) {
            if !visited.insert(neighbor) {
                continue;
            }
            let s = Scored { sim: OrderedFloat(index.similarity(query, neighbor)), id: neighbor };
            let admit = results.len() < ef || results.peek().map_or(true, |Reverse(worst)| s > *worst);
            if admit {
                candidates.push(s);
                results.push(Reverse(s));
                if results.len() > ef {
                    results.pop();
                }
            }
        }
    }

    let mut out: Vec<Scored> = results.into_iter().map(|Reverse(s)| s).collect();
    out.sort_unstable_by(|a, b| b.cmp(a));
    out
}

impl DenseIndex {
    /// Approximate top-`k` by inner product with the normalized `query_vector`.
    ///
    /// `ef_search` is raised to `k` when smaller. Results are sorted by descending
    /// score with ties broken by ascending document id.
    pub fn search(&self, query_id: &str, query_vector: &[f32], k: usize, ef_search: usize) -> Result<RankedList, SearchError> {
        if query_vector.len() != self.dimension() {
            return Err(SearchError::DimensionMismatch { expected: self.dimension(), found: query_vector.len() });
        }
        if query_vector.iter().any(|x| !x.is_finite()) {
            return Err(SearchError::NonFinite);
        }
        let mut query = query_vector.to_vec();
        if normalize(&mut query) == 0.0 {
            return Err(SearchError::ZeroVector);
        }

        let entry = match self.entry_point() {
            Some(ep) if k > 0 => ep,
            _ => return Ok(RankedList::empty(query_id)),
        };

        let found = SEARCH_VISITED.with(|cell| {
            let mut visited = cell.borrow_mut();
            visited.ensure_capacity(self.len());

            let mut ep = entry;
            for layer in (1..=self.max_layer()).rev() {
                if let Some(best) = search_layer(self, &query, &[ep], 1, layer, &mut visited).first() {
                    ep = best.id;
                }
            }
            search_layer(self, &query, &[ep], ef_search.max(k), 0, &mut visited)
        });

        let mut hits: Vec<Hit> = found
            .into_iter()
            .map(|s| Hit { doc_id: self.doc_id(s.id).to_string(), score: s.sim.0 as f64 })
            .collect();
        sort_by_score_then_id(&mut hits);
        hits.truncate(k);
        Ok(RankedList::new(query_id, hits))
    }
}
