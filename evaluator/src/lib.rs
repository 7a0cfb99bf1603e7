//! Batch evaluation of lexical, dense and hybrid retrieval over persisted
//! collection variants.

pub mod pipeline;
pub mod reference;
pub mod report;
pub mod runfiles;

use anyhow::Result;
use pipeline::{evaluate_runs, retrieve_all, Method, QueryVectors, RetrievalSettings, Variant};
use reference::TrecEval;
use report::{EvalReport, Skipped};
use retrieval::config::DEFAULT_KS;
use retrieval::persist::timestamp;
use retrieval::trec::{read_qrels, read_queries, read_vectors, write_run_file, Qrels};
use retrieval::Query;
use std::path::{Path, PathBuf};

pub const DEFAULT_VARIANTS: [&str; 4] = ["original", "expanded", "validated", "doc2query"];

/// A named relevance judgment file, e.g. `trec2019=data/qrels.eval.one.tsv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrelsSource {
    pub name: String,
    pub path: PathBuf,
}

impl QrelsSource {
    /// Parse `name=path`; a bare path is named after its file stem.
    pub fn parse(arg: &str) -> Result<Self, String> {
        match arg.split_once('=') {
            Some((name, path)) if !name.is_empty() && !path.is_empty() => {
                Ok(Self { name: name.to_string(), path: PathBuf::from(path) })
            }
            Some(_) => Err(format!("expected name=path, got {arg:?}")),
            None => {
                let path = PathBuf::from(arg);
                let name = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .ok_or_else(|| format!("cannot name qrels file {arg:?}"))?
                    .to_string();
                Ok(Self { name, path })
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct EvalConfig {
    pub index_root: PathBuf,
    pub variants: Vec<String>,
    pub queries: PathBuf,
    pub query_vectors: Option<PathBuf>,
    pub qrels: Vec<QrelsSource>,
    pub output_dir: PathBuf,
    pub methods: Vec<Method>,
    pub settings: RetrievalSettings,
    pub ks: Vec<usize>,
    pub query_limit: Option<usize>,
}

impl EvalConfig {
    pub fn new(index_root: impl Into<PathBuf>, queries: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            index_root: index_root.into(),
            variants: DEFAULT_VARIANTS.iter().map(|v| v.to_string()).collect(),
            queries: queries.into(),
            query_vectors: None,
            qrels: Vec::new(),
            output_dir: output_dir.into(),
            methods: Method::ALL.to_vec(),
            settings: RetrievalSettings::default(),
            ks: DEFAULT_KS.to_vec(),
            query_limit: None,
        }
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.output_dir.join("runs")
    }
}

fn empty_report(config: &EvalConfig, num_queries: usize) -> Result<EvalReport> {
    Ok(EvalReport {
        created_at: timestamp()?,
        settings: config.settings,
        ks: config.ks.clone(),
        num_queries,
        evaluations: Vec::new(),
        skipped: Vec::new(),
        diagnostics: Vec::new(),
    })
}

fn load_queries(config: &EvalConfig) -> Result<Option<Vec<Query>>> {
    let mut queries = match read_queries(&config.queries) {
        Ok((queries, _)) => queries,
        Err(e) if e.is_missing() => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if let Some(limit) = config.query_limit {
        queries.truncate(limit);
    }
    Ok(Some(queries))
}

fn load_query_vectors(path: Option<&Path>) -> Result<QueryVectors> {
    let Some(path) = path else {
        return Ok(QueryVectors::new());
    };
    match read_vectors(path) {
        Ok((pairs, _)) => Ok(pairs.into_iter().collect()),
        Err(e) if e.is_missing() => {
            tracing::warn!(path = %path.display(), "query vectors missing; dense retrieval will return empty lists");
            Ok(QueryVectors::new())
        }
        Err(e) => Err(e.into()),
    }
}

/// Retrieve, write run files and score every variant × qrels set × method.
///
/// Missing inputs and unloadable variants are recorded as skipped with zero
/// coverage; only unreadable (as opposed to absent) input files are errors.
pub fn evaluate(config: &EvalConfig) -> Result<EvalReport> {
    let Some(queries) = load_queries(config)? else {
        tracing::warn!(path = %config.queries.display(), "queries file missing; nothing to evaluate");
        let mut report = empty_report(config, 0)?;
        report.skipped.push(Skipped {
            variant: None,
            qrels: None,
            method: None,
            reason: format!("queries file not found: {}", config.queries.display()),
        });
        return Ok(report);
    };
    let vectors = load_query_vectors(config.query_vectors.as_deref())?;
    let mut report = empty_report(config, queries.len())?;
    tracing::info!(queries = queries.len(), query_vectors = vectors.len(), "loaded queries");

    let mut qrels_sets: Vec<(String, Qrels)> = Vec::with_capacity(config.qrels.len());
    for source in &config.qrels {
        match read_qrels(&source.path) {
            Ok((qrels, parse)) => {
                tracing::info!(qrels = %source.name, queries = qrels.num_queries(), skipped = parse.skipped, "loaded qrels");
                qrels_sets.push((source.name.clone(), qrels));
            }
            Err(e) if e.is_missing() => {
                tracing::warn!(qrels = %source.name, path = %source.path.display(), "qrels missing, skipped");
                report.skipped.push(Skipped {
                    variant: None,
                    qrels: Some(source.name.clone()),
                    method: None,
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }
    }

    for name in &config.variants {
        let variant = match Variant::load(&config.index_root, name) {
            Ok(Some(v)) => v,
            Ok(None) => {
                tracing::warn!(variant = %name, root = %config.index_root.display(), "variant index not found, skipped");
                report.skipped.push(Skipped {
                    variant: Some(name.clone()),
                    qrels: None,
                    method: None,
                    reason: "index not found".into(),
                });
                continue;
            }
            Err(e) => {
                tracing::warn!(variant = %name, error = %format!("{e:#}"), "variant failed to load, skipped");
                report.skipped.push(Skipped { variant: Some(name.clone()), qrels: None, method: None, reason: format!("{e:#}") });
                continue;
            }
        };
        for method in config.methods.iter().filter(|m| !variant.supports(**m)) {
            tracing::warn!(variant = %name, %method, "no dense index for variant, method skipped");
            report.skipped.push(Skipped {
                variant: Some(name.clone()),
                qrels: None,
                method: Some(method.to_string()),
                reason: "no dense index".into(),
            });
        }

        let retrieval = retrieve_all(&variant, &queries, &vectors, &config.methods, &config.settings);

        let mut run_files = Vec::with_capacity(retrieval.runs.len());
        for run in &retrieval.runs {
            let path = config.runs_dir().join(run.method.run_file_name(name));
            write_run_file(&path, &run.lists, &run.method.run_tag(name))?;
            tracing::info!(variant = %name, method = %run.method, path = %path.display(), "wrote run file");
            run_files.push((run.method, path));
        }

        for (qrels_name, qrels) in &qrels_sets {
            for mut evaluation in evaluate_runs(name, &retrieval, qrels_name, qrels, &config.ks) {
                evaluation.run_file = run_files.iter().find(|(m, _)| *m == evaluation.method).map(|(_, p)| p.clone());
                report.evaluations.push(evaluation);
            }
        }
        report.diagnostics.extend(retrieval.diagnostics);
    }

    Ok(report)
}

/// Run the reference evaluator on every scored run file and attach its metrics.
/// Failures are recorded per evaluation and never abort.
pub async fn cross_check(report: &mut EvalReport, trec_eval: &TrecEval, qrels: &[QrelsSource]) {
    for evaluation in report.evaluations.iter_mut() {
        let Some(run_file) = evaluation.run_file.as_ref() else {
            continue;
        };
        let Some(source) = qrels.iter().find(|q| q.name == evaluation.qrels) else {
            continue;
        };
        match trec_eval.run(&source.path, run_file).await {
            Ok(metrics) => {
                tracing::info!(variant = %evaluation.variant, qrels = %evaluation.qrels, method = %evaluation.method, measures = metrics.len(), "reference evaluation done");
                evaluation.reference = Some(metrics);
            }
            Err(e) => {
                tracing::warn!(variant = %evaluation.variant, qrels = %evaluation.qrels, method = %evaluation.method, error = %e, "reference evaluation unavailable");
                evaluation.reference_error = Some(e.to_string());
            }
        }
    }
}
