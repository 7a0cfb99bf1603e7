//! Okapi BM25 scoring over a [`LexicalIndex`].

use crate::config::Bm25Params;
use crate::lexical::index::LexicalIndex;
use crate::tokenizer::tokenize_with;
use crate::{DocOrd, Hit, RankedList};
use ordered_float::OrderedFloat;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// `ln((N - df + 0.5) / (df + 0.5) + 1)`. Non-negative whenever `df <= N`,
/// and finite for unseen terms (`df = 0`).
pub fn idf(num_docs: usize, df: u32) -> f64 {
    let n = num_docs as f64;
    let df = df as f64;
    ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
}

impl LexicalIndex {
    /// BM25 top-`k` for `query_text`.
    ///
    /// Only documents sharing a term with the query are scored and zero scores are
    /// dropped. Ties keep first-seen document order.
    pub fn search(&self, query_id: &str, query_text: &str, k: usize, params: &Bm25Params) -> RankedList {
        let query_terms = tokenize_with(query_text, self.tokenizer());
        if query_terms.is_empty() || k == 0 {
            return RankedList::empty(query_id);
        }

        let n = self.num_docs();
        let avgdl = self.avg_doc_length();
        let k1 = params.k1;
        let b = params.b;

        let mut scores: HashMap<DocOrd, f64> = HashMap::with_capacity(256.min(n));
        // Repeated query terms contribute once per occurrence.
        for term in query_terms.iter() {
            let postings = self.postings(term);
            if postings.is_empty() {
                continue;
            }
            let term_idf = idf(n, self.doc_frequency(term));
            for posting in postings {
                let tf = posting.tf as f64;
                let len_ratio = if avgdl > 0.0 { self.doc_length(posting.doc) as f64 / avgdl } else { 1.0 };
                let tf_norm = (tf * (k1 + 1.0)) / (tf + k1 * (1.0 - b + b * len_ratio));
                *scores.entry(posting.doc).or_insert(0.0) += term_idf * tf_norm;
            }
        }

        // Min-heap of size k: the root is the current worst (lowest score, latest ordinal).
        let mut heap: BinaryHeap<Reverse<(OrderedFloat<f64>, Reverse<DocOrd>)>> = BinaryHeap::with_capacity(k + 1);
        for (doc, score) in scores {
            if score <= 0.0 {
                continue;
            }
            heap.push(Reverse((OrderedFloat(score), Reverse(doc))));
            if heap.len() > k {
                heap.pop();
            }
        }

        let mut ranked: Vec<(f64, DocOrd)> = heap.into_iter().map(|Reverse((s, Reverse(doc)))| (s.0, doc)).collect();
        ranked.sort_unstable_by(|a, b| OrderedFloat(b.0).cmp(&OrderedFloat(a.0)).then(a.1.cmp(&b.1)));

        let hits = ranked
            .into_iter()
            .filter_map(|(score, doc)| self.doc_id(doc).map(|id| Hit { doc_id: id.to_string(), score }))
            .collect();
        RankedList::new(query_id, hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenizerConfig;
    use crate::Document;

    fn corpus() -> LexicalIndex {
        let docs = [
            ("d0", "rust programming systems language fast"),
            ("d1", "python programming scripting easy"),
            ("d2", "java enterprise programming verbose"),
            ("d3", "rust memory safety zero cost abstractions"),
        ];
        let docs: Vec<Document> = docs.iter().map(|(id, t)| Document { id: id.to_string(), text: t.to_string() }).collect();
        LexicalIndex::build(&docs, TokenizerConfig::default()).unwrap()
    }

    fn search(idx: &LexicalIndex, q: &str, k: usize) -> RankedList {
        idx.search("q", q, k, &Bm25Params::default())
    }

    #[test]
    fn empty_query_returns_nothing() {
        let idx = corpus();
        assert!(search(&idx, "", 10).is_empty());
        assert!(search(&idx, "the of and", 10).is_empty());
    }

    #[test]
    fn only_matching_docs_are_returned() {
        let idx = corpus();
        let res = search(&idx, "rust", 10);
        // d0 is the shorter of the two
        assert_eq!(res.doc_ids(), vec!["d0", "d3"]);
        assert!(search(&idx, "nonexistentxyz", 10).is_empty());
    }

    #[test]
    fn higher_tf_ranks_first() {
        let docs = vec![
            Document { id: "low".into(), text: "rust programming".into() },
            Document { id: "high".into(), text: "rust rust rust".into() },
        ];
        let idx = LexicalIndex::build(&docs, TokenizerConfig::default()).unwrap();
        let res = search(&idx, "rust", 10);
        assert_eq!(res.hits[0].doc_id, "high");
    }

    #[test]
    fn matches_hand_computed_score() {
        let docs = vec![
            Document { id: "a".into(), text: "apple banana".into() },
            Document { id: "b".into(), text: "cherry".into() },
        ];
        let cfg = TokenizerConfig { stem: false, min_len: 2 };
        let idx = LexicalIndex::build(&docs, cfg).unwrap();
        let res = idx.search("q", "apple", 10, &Bm25Params::default());
        // N=2, df=1, |d|=2, avgdl=1.5
        let expected_idf = ((2.0 - 1.0 + 0.5) / (1.0 + 0.5) + 1.0f64).ln();
        let tf_norm = 2.5 / (1.0 + 1.5 * (1.0 - 0.75 + 0.75 * 2.0 / 1.5));
        assert_eq!(res.len(), 1);
        assert!((res.hits[0].score - expected_idf * tf_norm).abs() < 1e-12);
    }

    #[test]
    fn ties_keep_first_seen_order() {
        let docs: Vec<Document> = ["z", "m", "a"]
            .iter()
            .map(|id| Document { id: id.to_string(), text: "same words here".into() })
            .collect();
        let idx = LexicalIndex::build(&docs, TokenizerConfig::default()).unwrap();
        let res = search(&idx, "words", 2);
        assert_eq!(res.doc_ids(), vec!["z", "m"]);
    }

    #[test]
    fn truncates_to_k_and_scores_are_positive() {
        let idx = corpus();
        let res = search(&idx, "programming rust", 2);
        assert_eq!(res.len(), 2);
        assert!(res.hits.iter().all(|h| h.score > 0.0));
        assert!(res.hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(search(&idx, "rust", 0).is_empty());
    }

    #[test]
    fn idf_is_non_negative_and_finite() {
        for n in [1usize, 2, 10, 1000] {
            for df in 0..=n as u32 {
                let v = idf(n, df);
                assert!(v.is_finite());
                assert!(v >= 0.0);
            }
        }
    }
}
