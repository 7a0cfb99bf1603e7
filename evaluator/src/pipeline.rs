//! Per-query retrieval over one collection variant and scoring of the resulting runs.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rayon::prelude::*;
use retrieval::config::{Bm25Params, RrfParams, HNSW_DEFAULT_EF_SEARCH, RETRIEVAL_DEPTH};
use retrieval::metrics::{score_lists, EvalResult};
use retrieval::persist::{load_dense_opt, load_lexical, load_meta, IndexPaths, MetaFile};
use retrieval::trec::{compare_query_ids, Qrels};
use retrieval::{fuse, DenseIndex, LexicalIndex, Query, RankedList};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Bm25,
    Dense,
    Hybrid,
}

impl Method {
    pub const ALL: [Method; 3] = [Method::Bm25, Method::Dense, Method::Hybrid];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Bm25 => "bm25",
            Method::Dense => "dense",
            Method::Hybrid => "hybrid",
        }
    }

    pub fn needs_dense(&self) -> bool {
        !matches!(self, Method::Bm25)
    }

    pub fn run_tag(&self, variant: &str) -> String {
        format!("{}_{}", self.as_str(), variant)
    }

    pub fn run_file_name(&self, variant: &str) -> String {
        format!("run_{}.txt", self.run_tag(variant))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a single query degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// The query text had no indexable terms.
    Lexical,
    /// No vector was supplied for the query.
    QueryVector,
    Dense,
}

impl Stage {
    fn affects(&self, method: Method) -> bool {
        match self {
            Stage::Lexical => method != Method::Dense,
            Stage::QueryVector | Stage::Dense => method != Method::Bm25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub variant: String,
    pub query_id: String,
    pub stage: Stage,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrievalSettings {
    /// Hits kept per retriever and query.
    pub depth: usize,
    pub bm25: Bm25Params,
    pub ef_search: usize,
    pub rrf: RrfParams,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { depth: RETRIEVAL_DEPTH, bm25: Bm25Params::default(), ef_search: HNSW_DEFAULT_EF_SEARCH, rrf: RrfParams::default() }
    }
}

/// A persisted collection variant, loaded read-only.
pub struct Variant {
    pub name: String,
    pub lexical: LexicalIndex,
    pub dense: Option<DenseIndex>,
    pub meta: MetaFile,
}

impl Variant {
    /// `Ok(None)` when the variant has no index directory.
    pub fn load(index_root: &Path, name: &str) -> Result<Option<Self>> {
        let paths = IndexPaths::new(index_root.join(name));
        if !paths.root.is_dir() {
            return Ok(None);
        }
        let meta = load_meta(&paths).with_context(|| format!("variant {name}"))?;
        let lexical = load_lexical(&paths).with_context(|| format!("variant {name}"))?;
        let dense = load_dense_opt(&paths).with_context(|| format!("variant {name}"))?;
        tracing::info!(variant = name, num_docs = meta.num_docs, num_terms = meta.num_terms, dense = dense.is_some(), "loaded variant");
        Ok(Some(Self { name: name.to_string(), lexical, dense, meta }))
    }

    pub fn supports(&self, method: Method) -> bool {
        !method.needs_dense() || self.dense.is_some()
    }
}

pub type QueryVectors = HashMap<String, Vec<f32>>;

/// One method's lists for every query, with `latencies_ms[i]` belonging to `lists[i]`.
#[derive(Debug, Clone)]
pub struct MethodRuns {
    pub method: Method,
    pub lists: Vec<RankedList>,
    pub latencies_ms: Vec<f64>,
}

#[derive(Debug)]
pub struct Retrieval {
    pub runs: Vec<MethodRuns>,
    pub diagnostics: Vec<Diagnostic>,
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Run every requested method the variant supports on every query, in parallel.
/// A failing query gets an empty list for the affected methods and a diagnostic.
pub fn retrieve_all(
    variant: &Variant,
    queries: &[Query],
    vectors: &QueryVectors,
    methods: &[Method],
    settings: &RetrievalSettings,
) -> Retrieval {
    let methods: Vec<Method> = methods.iter().copied().filter(|m| variant.supports(*m)).collect();
    let diagnostics = Mutex::new(Vec::new());

    let per_query: Vec<Vec<(Method, RankedList, f64)>> = queries
        .par_iter()
        .map(|q| retrieve_one(variant, q, vectors, &methods, settings, &diagnostics))
        .collect();

    let mut runs: Vec<MethodRuns> = methods
        .iter()
        .map(|&method| MethodRuns {
            method,
            lists: Vec::with_capacity(queries.len()),
            latencies_ms: Vec::with_capacity(queries.len()),
        })
        .collect();
    for outputs in per_query {
        for (method, list, ms) in outputs {
            if let Some(run) = runs.iter_mut().find(|r| r.method == method) {
                run.lists.push(list);
                run.latencies_ms.push(ms);
            }
        }
    }

    let mut diagnostics = diagnostics.into_inner();
    diagnostics.sort_by(|a, b| compare_query_ids(&a.query_id, &b.query_id));
    if !diagnostics.is_empty() {
        tracing::warn!(variant = %variant.name, count = diagnostics.len(), "queries degraded during retrieval");
    }
    Retrieval { runs, diagnostics }
}

fn retrieve_one(
    variant: &Variant,
    query: &Query,
    vectors: &QueryVectors,
    methods: &[Method],
    settings: &RetrievalSettings,
    diagnostics: &Mutex<Vec<Diagnostic>>,
) -> Vec<(Method, RankedList, f64)> {
    let want = |m: Method| methods.contains(&m);
    let note = |stage: Stage, message: String| {
        tracing::debug!(variant = %variant.name, query_id = %query.id, ?stage, %message, "query degraded");
        diagnostics.lock().push(Diagnostic { variant: variant.name.clone(), query_id: query.id.clone(), stage, message });
    };

    let (lexical, lexical_ms) = if want(Method::Bm25) || want(Method::Hybrid) {
        let start = Instant::now();
        let list = variant.lexical.search(&query.id, &query.text, settings.depth, &settings.bm25);
        let ms = elapsed_ms(start);
        if list.is_empty() && retrieval::tokenizer::tokenize_with(&query.text, variant.lexical.tokenizer()).is_empty() {
            note(Stage::Lexical, "query has no indexable terms".into());
        }
        (list, ms)
    } else {
        (RankedList::empty(&query.id), 0.0)
    };

    let (dense, dense_ms) = match &variant.dense {
        Some(index) if want(Method::Dense) || want(Method::Hybrid) => {
            let start = Instant::now();
            let list = match vectors.get(&query.id) {
                None => {
                    note(Stage::QueryVector, "no vector for query".into());
                    RankedList::empty(&query.id)
                }
                Some(v) => match index.search(&query.id, v, settings.depth, settings.ef_search) {
                    Ok(list) => list,
                    Err(e) => {
                        note(Stage::Dense, e.to_string());
                        RankedList::empty(&query.id)
                    }
                },
            };
            (list, elapsed_ms(start))
        }
        _ => (RankedList::empty(&query.id), 0.0),
    };

    let mut out = Vec::with_capacity(methods.len());
    if want(Method::Hybrid) {
        let start = Instant::now();
        let fused = fuse(&query.id, &[&lexical, &dense], &settings.rrf).into_ranked();
        out.push((Method::Hybrid, fused, lexical_ms + dense_ms + elapsed_ms(start)));
    }
    if want(Method::Bm25) {
        out.push((Method::Bm25, lexical, lexical_ms));
    }
    if want(Method::Dense) {
        out.push((Method::Dense, dense, dense_ms));
    }
    out
}

/// Scores of one method on one variant against one qrels set.
#[derive(Debug, Clone, Serialize)]
pub struct MethodEvaluation {
    pub variant: String,
    pub qrels: String,
    pub method: Method,
    pub run_file: Option<PathBuf>,
    pub result: EvalResult,
    /// Degraded queries among the scored ones.
    pub diagnostics: usize,
    pub reference: Option<BTreeMap<String, f64>>,
    pub reference_error: Option<String>,
}

/// Score each run against `qrels`. Only queries with judgments count; their
/// latencies are the ones averaged.
pub fn evaluate_runs(
    variant: &str,
    retrieval: &Retrieval,
    qrels_name: &str,
    qrels: &Qrels,
    ks: &[usize],
) -> Vec<MethodEvaluation> {
    retrieval
        .runs
        .iter()
        .map(|run| {
            let mut scored: HashSet<&str> = HashSet::new();
            let judged: Vec<(&RankedList, f64)> = run
                .lists
                .iter()
                .zip(run.latencies_ms.iter().copied())
                .filter(|(list, _)| qrels.judgments(&list.query_id).is_some() && scored.insert(list.query_id.as_str()))
                .collect();
            let per_query = score_lists(judged.iter().map(|(list, _)| *list), qrels, ks);
            let latencies = judged.iter().map(|(_, ms)| *ms).collect();
            let mut result = EvalResult::new(run.method.as_str(), per_query, latencies);

            let empty = judged.iter().filter(|(list, _)| list.is_empty()).count();
            result.stats.insert("retrieved_queries".into(), run.lists.len() as f64);
            result.stats.insert("empty_lists".into(), empty as f64);
            result.stats.insert("unanswered_judged_queries".into(), qrels.num_queries().saturating_sub(judged.len()) as f64);

            let diagnostics = retrieval
                .diagnostics
                .iter()
                .filter(|d| d.stage.affects(run.method) && qrels.judgments(&d.query_id).is_some())
                .count();

            tracing::info!(
                variant,
                qrels = qrels_name,
                method = %run.method,
                num_queries = result.aggregate.num_queries,
                ndcg_10 = result.metric("ndcg@10"),
                "scored run"
            );
            MethodEvaluation {
                variant: variant.to_string(),
                qrels: qrels_name.to_string(),
                method: run.method,
                run_file: None,
                result,
                diagnostics,
                reference: None,
                reference_error: None,
            }
        })
        .collect()
}
