use crate::pipeline::{Diagnostic, MethodEvaluation, RetrievalSettings};
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::{create_dir_all, File};
use std::io::Write;
use std::path::Path;

/// Metrics shown in the markdown table, with their column headers.
pub const TABLE_COLUMNS: [(&str, &str); 5] = [
    ("ndcg@10", "nDCG@10"),
    ("recall@100", "Recall@100"),
    ("recall@1000", "Recall@1000"),
    ("mrr@10", "MRR@10"),
    ("map", "MAP"),
];

/// An evaluation that could not run, reported with zero coverage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Skipped {
    pub variant: Option<String>,
    pub qrels: Option<String>,
    pub method: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub created_at: String,
    pub settings: RetrievalSettings,
    pub ks: Vec<usize>,
    pub num_queries: usize,
    pub evaluations: Vec<MethodEvaluation>,
    pub skipped: Vec<Skipped>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Serialize)]
struct MethodSummary<'a> {
    metrics: &'a BTreeMap<String, f64>,
    counts: &'a BTreeMap<String, usize>,
    num_queries: usize,
    avg_latency_ms: f64,
    stats: &'a BTreeMap<String, f64>,
    diagnostics: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference: Option<&'a BTreeMap<String, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_error: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ResultsFile<'a> {
    created_at: &'a str,
    settings: &'a RetrievalSettings,
    num_queries: usize,
    /// variant → qrels set → method → summary
    results: BTreeMap<&'a str, BTreeMap<&'a str, BTreeMap<&'a str, MethodSummary<'a>>>>,
    skipped: &'a [Skipped],
    diagnostics: usize,
}

fn results_file(report: &EvalReport) -> ResultsFile<'_> {
    let mut results: BTreeMap<&str, BTreeMap<&str, BTreeMap<&str, MethodSummary>>> = BTreeMap::new();
    for e in &report.evaluations {
        let summary = MethodSummary {
            metrics: &e.result.aggregate.means,
            counts: &e.result.aggregate.counts,
            num_queries: e.result.aggregate.num_queries,
            avg_latency_ms: e.result.avg_latency_ms,
            stats: &e.result.stats,
            diagnostics: e.diagnostics,
            reference: e.reference.as_ref(),
            reference_error: e.reference_error.as_deref(),
        };
        results
            .entry(e.variant.as_str())
            .or_default()
            .entry(e.qrels.as_str())
            .or_default()
            .insert(e.method.as_str(), summary);
    }
    ResultsFile {
        created_at: &report.created_at,
        settings: &report.settings,
        num_queries: report.num_queries,
        results,
        skipped: &report.skipped,
        diagnostics: report.diagnostics.len(),
    }
}

pub fn results_json(report: &EvalReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(&results_file(report))?)
}

pub fn render_markdown(report: &EvalReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Retrieval evaluation\n");
    let _ = writeln!(out, "Generated {} over {} queries.\n", report.created_at, report.num_queries);

    let mut by_qrels: BTreeMap<&str, Vec<&MethodEvaluation>> = BTreeMap::new();
    for e in &report.evaluations {
        by_qrels.entry(e.qrels.as_str()).or_default().push(e);
    }
    for (qrels, evals) in by_qrels {
        let _ = writeln!(out, "## {qrels}\n");
        let mut header = String::from("| Variant | Method |");
        let mut rule = String::from("|---------|--------|");
        for (_, title) in TABLE_COLUMNS {
            let _ = write!(header, " {title} |");
            let _ = write!(rule, "{}|", "-".repeat(title.len() + 2));
        }
        header.push_str(" Queries | Latency (ms) |");
        rule.push_str("---------|--------------|");
        let _ = writeln!(out, "{header}\n{rule}");
        for e in evals {
            let mut row = format!("| {} | {} |", e.variant, e.method);
            for (key, _) in TABLE_COLUMNS {
                let _ = write!(row, " {:.4} |", e.result.metric(key));
            }
            let _ = write!(row, " {} | {:.2} |", e.result.aggregate.num_queries, e.result.avg_latency_ms);
            let _ = writeln!(out, "{row}");
        }
        out.push('\n');
    }

    let checked: Vec<&MethodEvaluation> = report.evaluations.iter().filter(|e| e.reference.is_some()).collect();
    if !checked.is_empty() {
        let _ = writeln!(out, "## Reference evaluator\n");
        for e in checked {
            let values: Vec<String> = e
                .reference
                .iter()
                .flatten()
                .map(|(name, v)| format!("{name}={v:.4}"))
                .collect();
            let _ = writeln!(out, "- {} / {} / {}: {}", e.variant, e.qrels, e.method, values.join(", "));
        }
        out.push('\n');
    }

    if !report.skipped.is_empty() {
        let _ = writeln!(out, "## Skipped\n");
        for s in &report.skipped {
            let scope: Vec<&str> = [s.variant.as_deref(), s.qrels.as_deref(), s.method.as_deref()].into_iter().flatten().collect();
            let scope = if scope.is_empty() { "all".to_string() } else { scope.join(" / ") };
            let _ = writeln!(out, "- {scope}: {}", s.reason);
        }
        out.push('\n');
    }
    out
}

/// Write `results.json` and `report.md` into `dir`.
pub fn write_all(dir: &Path, report: &EvalReport) -> Result<()> {
    create_dir_all(dir)?;
    let mut f = File::create(dir.join("results.json"))?;
    f.write_all(results_json(report)?.as_bytes())?;
    let mut f = File::create(dir.join("report.md"))?;
    f.write_all(render_markdown(report).as_bytes())?;
    tracing::info!(dir = %dir.display(), evaluations = report.evaluations.len(), skipped = report.skipped.len(), "wrote reports");
    Ok(())
}
