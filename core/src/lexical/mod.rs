//! Inverted index and Okapi BM25 retrieval.
//!
//! The index is built once from a document collection and is read-only afterwards;
//! [`LexicalIndex::search`] takes `&self` and may be called from many threads.

pub mod index;
pub mod search;

pub use index::{LexicalIndex, Posting};
pub use search::idf;
