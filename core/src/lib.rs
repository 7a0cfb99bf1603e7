//! Passage retrieval and evaluation core.
//!
//! Two retrievers (BM25 over an inverted index, inner product over an HNSW
//! graph) produce [`RankedList`]s per query, [`fusion`] merges them by rank,
//! and [`metrics`] scores the result against relevance judgments.

pub mod config;
pub mod dense;
pub mod error;
pub mod fusion;
pub mod lexical;
pub mod metrics;
pub mod persist;
pub mod tokenizer;
pub mod trec;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub use dense::DenseIndex;
pub use error::{BuildError, InputError, SearchError};
pub use fusion::fuse;
pub use lexical::LexicalIndex;

/// Internal ordinal of a document inside one index, assigned in first-seen order.
pub type DocOrd = u32;
pub type TermId = u32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub id: String,
    pub text: String,
}

/// One retrieved document and its retriever-specific score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub doc_id: String,
    pub score: f64,
}

/// Ranked output of one retriever for one query, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedList {
    pub query_id: String,
    pub hits: Vec<Hit>,
}

impl RankedList {
    pub fn new(query_id: impl Into<String>, hits: Vec<Hit>) -> Self {
        Self { query_id: query_id.into(), hits }
    }

    pub fn empty(query_id: impl Into<String>) -> Self {
        Self::new(query_id, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Document ids in rank order.
    pub fn doc_ids(&self) -> Vec<&str> {
        self.hits.iter().map(|h| h.doc_id.as_str()).collect()
    }

    /// Iterate `(rank, hit)` with 1-indexed ranks.
    pub fn ranked(&self) -> impl Iterator<Item = (usize, &Hit)> {
        self.hits.iter().enumerate().map(|(i, h)| (i + 1, h))
    }
}

/// Output of rank fusion: a ranked list plus how many source lists fed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedList {
    pub list: RankedList,
    pub num_sources: usize,
}

impl FusedList {
    pub fn into_ranked(self) -> RankedList {
        self.list
    }
}

/// Order hits by descending score, breaking ties by ascending document id.
pub(crate) fn sort_by_score_then_id(hits: &mut [Hit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });
}
