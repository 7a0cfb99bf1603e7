use crate::config::TokenizerConfig;
use crate::error::BuildError;
use crate::tokenizer::tokenize_with;
use crate::{DocOrd, Document, TermId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A document containing a term, and how often.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub doc: DocOrd,
    pub tf: u32,
}

/// Term → postings mapping plus the corpus statistics BM25 needs.
///
/// Document ordinals follow input order, so posting lists are sorted by ordinal
/// and ordinal order is the first-seen order used for tie-breaking.
#[derive(Debug, Serialize, Deserialize)]
pub struct LexicalIndex {
    tokenizer: TokenizerConfig,
    doc_ids: Vec<String>,
    doc_lengths: Vec<u32>,
    avg_doc_length: f64,
    dictionary: HashMap<String, TermId>,
    df: Vec<u32>,
    postings: Vec<Vec<Posting>>,
}

impl LexicalIndex {
    pub fn build(documents: &[Document], tokenizer: TokenizerConfig) -> Result<Self, BuildError> {
        if documents.is_empty() {
            return Err(BuildError::EmptyCollection);
        }

        let mut seen_ids: HashSet<&str> = HashSet::with_capacity(documents.len());
        for doc in documents {
            if !seen_ids.insert(doc.id.as_str()) {
                return Err(BuildError::DuplicateDocId(doc.id.clone()));
            }
        }

        let mut doc_ids = Vec::with_capacity(documents.len());
        let mut doc_lengths = Vec::with_capacity(documents.len());
        let mut dictionary: HashMap<String, TermId> = HashMap::new();
        let mut df: Vec<u32> = Vec::new();
        let mut postings: Vec<Vec<Posting>> = Vec::new();
        let mut total_length: u64 = 0;

        for (ord, doc) in documents.iter().enumerate() {
            let ord = ord as DocOrd;
            let tokens = tokenize_with(&doc.text, &tokenizer);
            let len = tokens.len() as u32;
            total_length += len as u64;

            // Term ids are assigned in first-seen order so the build is deterministic.
            let mut tf_counts: HashMap<TermId, u32> = HashMap::new();
            for term in tokens {
                let tid = match dictionary.get(&term) {
                    Some(&tid) => tid,
                    None => {
                        let tid = df.len() as TermId;
                        dictionary.insert(term, tid);
                        df.push(0);
                        postings.push(Vec::new());
                        tid
                    }
                };
                *tf_counts.entry(tid).or_insert(0) += 1;
            }

            for (tid, tf) in tf_counts {
                df[tid as usize] += 1;
                postings[tid as usize].push(Posting { doc: ord, tf });
            }
            doc_ids.push(doc.id.clone());
            doc_lengths.push(len);
        }

        let avg_doc_length = total_length as f64 / documents.len() as f64;
        tracing::debug!(num_docs = doc_ids.len(), num_terms = dictionary.len(), avg_doc_length, "built lexical index");

        Ok(Self { tokenizer, doc_ids, doc_lengths, avg_doc_length, dictionary, df, postings })
    }

    pub fn tokenizer(&self) -> &TokenizerConfig {
        &self.tokenizer
    }

    pub fn num_docs(&self) -> usize {
        self.doc_ids.len()
    }

    pub fn num_terms(&self) -> usize {
        self.dictionary.len()
    }

    pub fn avg_doc_length(&self) -> f64 {
        self.avg_doc_length
    }

    pub fn doc_id(&self, ord: DocOrd) -> Option<&str> {
        self.doc_ids.get(ord as usize).map(String::as_str)
    }

    pub fn doc_length(&self, ord: DocOrd) -> u32 {
        self.doc_lengths.get(ord as usize).copied().unwrap_or(0)
    }

    /// Number of documents containing `term` (already normalized). 0 when unseen.
    pub fn doc_frequency(&self, term: &str) -> u32 {
        self.dictionary.get(term).map_or(0, |&tid| self.df[tid as usize])
    }

    /// Posting list of `term` (already normalized), sorted by document ordinal.
    pub fn postings(&self, term: &str) -> &[Posting] {
        match self.dictionary.get(term) {
            Some(&tid) => &self.postings[tid as usize],
            None => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, text: &str) -> Document {
        Document { id: id.into(), text: text.into() }
    }

    fn plain() -> TokenizerConfig {
        TokenizerConfig { stem: false, min_len: 2 }
    }

    #[test]
    fn records_tf_df_and_lengths() {
        let idx = LexicalIndex::build(
            &[doc("a", "hello hello hello world"), doc("b", "hello rust")],
            plain(),
        )
        .unwrap();
        assert_eq!(idx.num_docs(), 2);
        assert_eq!(idx.doc_frequency("hello"), 2);
        assert_eq!(idx.doc_frequency("world"), 1);
        assert_eq!(idx.doc_frequency("missing"), 0);
        assert_eq!(idx.postings("hello"), &[Posting { doc: 0, tf: 3 }, Posting { doc: 1, tf: 1 }]);
        assert_eq!(idx.doc_length(0), 4);
        assert_eq!(idx.doc_length(1), 2);
        assert!((idx.avg_doc_length() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn stop_words_are_not_indexed() {
        let idx = LexicalIndex::build(&[doc("a", "the quick brown fox")], plain()).unwrap();
        assert_eq!(idx.doc_frequency("the"), 0);
        assert_eq!(idx.doc_frequency("quick"), 1);
        assert_eq!(idx.doc_length(0), 3);
    }

    #[test]
    fn rejects_empty_and_duplicate_input() {
        assert!(matches!(LexicalIndex::build(&[], plain()), Err(BuildError::EmptyCollection)));
        let dup = [doc("a", "x y"), doc("a", "z")];
        assert!(matches!(LexicalIndex::build(&dup, plain()), Err(BuildError::DuplicateDocId(id)) if id == "a"));
    }

    #[test]
    fn documents_without_tokens_still_count() {
        let idx = LexicalIndex::build(&[doc("a", "the of"), doc("b", "rust code")], plain()).unwrap();
        assert_eq!(idx.num_docs(), 2);
        assert_eq!(idx.doc_length(0), 0);
        assert!((idx.avg_doc_length() - 1.0).abs() < 1e-12);
    }
}
