//! Reciprocal Rank Fusion.
//!
//! Lexical scores are unbounded corpus statistics and dense scores are cosines, so
//! lists are combined by rank position only: a document at 1-indexed rank `r` in a
//! list earns `1 / (k + r)` from that list, and absent documents earn nothing.

use crate::config::RrfParams;
use crate::{sort_by_score_then_id, FusedList, Hit, RankedList};
use std::collections::{HashMap, HashSet};

/// Fuse `lists` for one query.
///
/// The result depends only on the multiset of input lists, not their order: each
/// document's contributions are summed smallest-rank first. Ties break by ascending
/// document id and the output is cut to `params.top_n`.
pub fn fuse(query_id: &str, lists: &[&RankedList], params: &RrfParams) -> FusedList {
    let mut ranks: HashMap<&str, Vec<usize>> = HashMap::new();
    for list in lists {
        let mut seen_in_list: HashSet<&str> = HashSet::with_capacity(list.len());
        for (rank, hit) in list.ranked() {
            // a repeated document only counts at its best rank
            if !seen_in_list.insert(hit.doc_id.as_str()) {
                continue;
            }
            ranks.entry(hit.doc_id.as_str()).or_default().push(rank);
        }
    }

    let mut hits: Vec<Hit> = ranks
        .into_iter()
        .map(|(doc_id, mut doc_ranks)| {
            doc_ranks.sort_unstable();
            let score: f64 = doc_ranks.iter().map(|&r| 1.0 / (params.k + r as f64)).sum();
            Hit { doc_id: doc_id.to_string(), score }
        })
        .collect();
    sort_by_score_then_id(&mut hits);
    hits.truncate(params.top_n);

    FusedList { list: RankedList::new(query_id, hits), num_sources: lists.len() }
}
