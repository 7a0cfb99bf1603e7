//! Default tuning parameters and the serializable parameter records built from them.
//!
//! Constants are compile-time defaults; the binaries override them from CLI flags
//! and persist the build-time records in each index's `meta.json`.

use crate::error::BuildError;
use serde::{Deserialize, Serialize};

/// BM25 term frequency saturation.
pub const BM25_K1: f64 = 1.5;

/// BM25 document length normalization. 0.0 disables it, 1.0 normalizes fully.
pub const BM25_B: f64 = 0.75;

/// Tokens shorter than this (in chars) are dropped.
pub const TOKEN_MIN_LEN: usize = 2;

/// Links per node on layers above 0. Layer 0 allows twice as many.
pub const HNSW_DEFAULT_M: usize = 16;

/// Candidate list size while inserting into the graph.
pub const HNSW_DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Candidate list size at query time.
pub const HNSW_DEFAULT_EF_SEARCH: usize = 256;

pub const HNSW_DEFAULT_MAX_LAYERS: usize = 16;

/// Seed for level assignment, so identical inputs build identical graphs.
pub const HNSW_DEFAULT_SEED: u64 = 0x5eed_1234;

/// Reciprocal Rank Fusion constant `k` in `1 / (k + rank)`.
pub const RRF_K: f64 = 60.0;

/// Length of a fused list.
pub const RRF_TOP_N: usize = 1000;

/// Retrieval depth per retriever and query.
pub const RETRIEVAL_DEPTH: usize = 1000;

/// Cutoffs for nDCG, Recall and MRR.
pub const DEFAULT_KS: [usize; 3] = [10, 100, 1000];

/// Decimal places of the score column in run files.
pub const RUN_SCORE_PRECISION: usize = 6;

/// Wall clock limit for the external reference evaluator.
pub const REFERENCE_EVAL_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: BM25_K1, b: BM25_B }
    }
}

impl Bm25Params {
    pub fn validate(&self) -> Result<(), BuildError> {
        if !self.k1.is_finite() || self.k1 < 0.0 {
            return Err(BuildError::InvalidParameter(format!("k1 must be a non-negative number, got {}", self.k1)));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(BuildError::InvalidParameter(format!("b must lie in [0, 1], got {}", self.b)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizerConfig {
    pub stem: bool,
    pub min_len: usize,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self { stem: true, min_len: TOKEN_MIN_LEN }
    }
}

/// Build-time knobs of the HNSW graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HnswParams {
    /// Max out-degree on layers above 0.
    pub m: usize,
    /// Max out-degree on layer 0.
    pub m_max0: usize,
    pub ef_construction: usize,
    pub max_layers: usize,
    pub seed: u64,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self::with_m(HNSW_DEFAULT_M)
    }
}

impl HnswParams {
    pub fn with_m(m: usize) -> Self {
        Self {
            m,
            m_max0: m * 2,
            ef_construction: HNSW_DEFAULT_EF_CONSTRUCTION,
            max_layers: HNSW_DEFAULT_MAX_LAYERS,
            seed: HNSW_DEFAULT_SEED,
        }
    }

    pub fn validate(&self) -> Result<(), BuildError> {
        if self.m < 2 {
            return Err(BuildError::InvalidParameter(format!("M must be at least 2, got {}", self.m)));
        }
        if self.m_max0 < self.m {
            return Err(BuildError::InvalidParameter(format!(
                "layer-0 degree {} is below M {}",
                self.m_max0, self.m
            )));
        }
        if self.ef_construction == 0 {
            return Err(BuildError::InvalidParameter("efConstruction must be positive".into()));
        }
        if self.max_layers == 0 {
            return Err(BuildError::InvalidParameter("max_layers must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RrfParams {
    pub k: f64,
    pub top_n: usize,
}

impl Default for RrfParams {
    fn default() -> Self {
        Self { k: RRF_K, top_n: RRF_TOP_N }
    }
}

impl RrfParams {
    /// `k` must keep `k + rank` positive for every rank from 1.
    pub fn validate(&self) -> Result<(), BuildError> {
        if !self.k.is_finite() || self.k <= -1.0 {
            return Err(BuildError::InvalidParameter(format!("RRF k must be a finite number above -1, got {}", self.k)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Bm25Params::default().validate().is_ok());
        assert!(HnswParams::default().validate().is_ok());
        assert!(RrfParams::default().validate().is_ok());
        assert_eq!(HnswParams::default().m_max0, 2 * HNSW_DEFAULT_M);
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(Bm25Params { k1: 1.2, b: 1.5 }.validate().is_err());
        assert!(Bm25Params { k1: -1.0, b: 0.5 }.validate().is_err());
        assert!(HnswParams::with_m(1).validate().is_err());
        let mut p = HnswParams::default();
        p.ef_construction = 0;
        assert!(p.validate().is_err());
        assert!(RrfParams { k: -61.0, top_n: 10 }.validate().is_err());
        assert!(RrfParams { k: f64::NAN, top_n: 10 }.validate().is_err());
        assert!(RrfParams { k: 0.0, top_n: 10 }.validate().is_ok());
    }
}
