//! Approximate nearest neighbor retrieval over unit-normalized vectors.
//!
//! The index is a Hierarchical Navigable Small World graph stored as an arena:
//! node `i` owns `vectors[i * dim..(i + 1) * dim]` and one adjacency list per layer
//! it lives on. Similarity is the inner product, which equals cosine similarity
//! because every stored and query vector is normalized first.
//!
//! Level assignment uses a seeded RNG and every heap orders equal similarities by
//! node id, so the same input always produces the same graph and the same answers.

pub mod graph;
pub mod search;
mod visited;

pub use graph::{normalize, DenseIndex, NodeId};
