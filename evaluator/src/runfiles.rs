//! Operations on existing run files: rank fusion and direct scoring.

use anyhow::{Context, Result};
use retrieval::config::RrfParams;
use retrieval::metrics::{score_lists, EvalResult};
use retrieval::trec::{compare_query_ids, read_qrels, read_run, write_run_file};
use retrieval::{fuse, RankedList};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuseSummary {
    pub inputs: usize,
    pub queries: usize,
    pub lines: usize,
}

/// Query ids judged in any of `qrels_paths`, used to filter fusion. Missing files
/// contribute nothing; `None` when no file yielded a judged query, so nothing is filtered.
pub fn judged_query_ids(qrels_paths: &[PathBuf]) -> Result<Option<HashSet<String>>> {
    let mut ids = HashSet::new();
    for path in qrels_paths {
        match read_qrels(path) {
            Ok((qrels, _)) => ids.extend(qrels.query_ids().map(str::to_string)),
            Err(e) if e.is_missing() => tracing::warn!(path = %path.display(), "qrels file missing, not used as a filter"),
            Err(e) => return Err(e.into()),
        }
    }
    if ids.is_empty() {
        if !qrels_paths.is_empty() {
            tracing::warn!("no judged queries found, fusing every query");
        }
        return Ok(None);
    }
    Ok(Some(ids))
}

/// Fuse run files query by query with RRF over their rank columns and write the result.
///
/// Missing run files are skipped. With `only`, queries outside the set are dropped
/// before fusion.
pub fn fuse_run_files(
    runs: &[PathBuf],
    only: Option<&HashSet<String>>,
    params: &RrfParams,
    output: &Path,
    run_tag: &str,
) -> Result<FuseSummary> {
    let mut per_query: HashMap<String, Vec<RankedList>> = HashMap::new();
    let mut inputs = 0;
    for path in runs {
        let (lists, report) = match read_run(path, only) {
            Ok(parsed) => parsed,
            Err(e) if e.is_missing() => {
                tracing::warn!(path = %path.display(), "run file missing, skipped");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        inputs += 1;
        tracing::info!(path = %path.display(), queries = lists.len(), skipped = report.skipped, "read run");
        for list in lists {
            per_query.entry(list.query_id.clone()).or_default().push(list);
        }
    }

    let mut qids: Vec<&String> = per_query.keys().collect();
    qids.sort_by(|a, b| compare_query_ids(a, b));
    let fused: Vec<RankedList> = qids
        .into_iter()
        .map(|qid| {
            let lists: Vec<&RankedList> = per_query[qid].iter().collect();
            fuse(qid, &lists, params).into_ranked()
        })
        .collect();

    write_run_file(output, &fused, run_tag).with_context(|| format!("writing {}", output.display()))?;
    let lines = fused.iter().map(RankedList::len).sum();
    tracing::info!(output = %output.display(), inputs, queries = fused.len(), lines, "wrote fused run");
    Ok(FuseSummary { inputs, queries: fused.len(), lines })
}

/// Score a run file against a qrels file.
///
/// Every judged query is scored; one without run lines counts as an empty list,
/// so the result matches the in-process evaluation of the same run.
pub fn score_run_file(run: &Path, qrels: &Path, ks: &[usize]) -> Result<EvalResult> {
    let (qrels, _) = read_qrels(qrels)?;
    let (lists, _) = read_run(run, None)?;
    let run_queries = lists.len();
    let mut by_query: HashMap<String, RankedList> = lists.into_iter().map(|l| (l.query_id.clone(), l)).collect();

    let mut judged: Vec<&str> = qrels.query_ids().collect();
    judged.sort_by(|a, b| compare_query_ids(a, b));
    let mut judged_only = 0;
    let scored: Vec<RankedList> = judged
        .into_iter()
        .map(|qid| {
            by_query.remove(qid).unwrap_or_else(|| {
                judged_only += 1;
                RankedList::empty(qid)
            })
        })
        .collect();
    let run_only = by_query.len();
    let per_query = score_lists(&scored, &qrels, ks);

    let run_tags: BTreeSet<String> = std::fs::read_to_string(run)
        .with_context(|| format!("reading {}", run.display()))?
        .lines()
        .filter_map(|l| l.split_whitespace().nth(5).map(str::to_string))
        .collect();
    let label = run_tags.into_iter().next().unwrap_or_else(|| run.display().to_string());
    if judged_only > 0 || run_only > 0 {
        tracing::info!(run = %run.display(), judged_only, run_only, "run and qrels cover different queries");
    }

    let mut result = EvalResult::new(label, per_query, Vec::new());
    result.stats.insert("run_queries".into(), run_queries as f64);
    result.stats.insert("judged_queries".into(), qrels.num_queries() as f64);
    result.stats.insert("judged_only_queries".into(), judged_only as f64);
    result.stats.insert("run_only_queries".into(), run_only as f64);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn fuses_two_runs_like_the_hybrid_method() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("run_bm25_original.txt");
        let b = dir.path().join("run_dense_original.txt");
        fs::write(&a, "q1 Q0 d2 1 9.0 bm25\nq1 Q0 d1 2 8.0 bm25\nq1 Q0 d3 3 7.0 bm25\nq2 Q0 x 1 1.0 bm25\n").unwrap();
        fs::write(&b, "q1 Q0 d3 2 0.8 dense\nq1 Q0 d1 1 0.9 dense\nq1 Q0 d2 3 0.7 dense\n").unwrap();
        let out = dir.path().join("out").join("run_hybrid_original.txt");

        let only: HashSet<String> = ["q1".to_string()].into_iter().collect();
        let missing = dir.path().join("absent.txt");
        let summary = fuse_run_files(&[a, b, missing], Some(&only), &RrfParams::default(), &out, "hybrid_original").unwrap();
        assert_eq!(summary, FuseSummary { inputs: 2, queries: 1, lines: 3 });

        let text = fs::read_to_string(&out).unwrap();
        let first: Vec<&str> = text.lines().next().unwrap().split(' ').collect();
        assert_eq!(first, vec!["q1", "Q0", "d1", "1", "0.032522", "hybrid_original"]);
    }

    #[test]
    fn scores_a_run_file() {
        let dir = tempfile::tempdir().unwrap();
        let run = dir.path().join("run.txt");
        let qrels = dir.path().join("qrels.tsv");
        fs::write(&run, "1 Q0 d1 1 3.0 tag\n1 Q0 d2 2 2.0 tag\n2 Q0 d9 1 1.0 tag\n").unwrap();
        fs::write(&qrels, "1\t0\td2\t1\n3\t0\td4\t1\n").unwrap();
        let result = score_run_file(&run, &qrels, &[10]).unwrap();
        assert_eq!(result.method, "tag");
        // query 3 is judged but absent from the run, so it scores zero
        assert_eq!(result.aggregate.num_queries, 2);
        assert_eq!(result.metric("mrr@10"), 0.25);
        assert_eq!(result.stats["judged_only_queries"], 1.0);
        assert_eq!(result.stats["run_only_queries"], 1.0);
    }

    #[test]
    fn rescoring_a_written_run_matches_in_process_scores() {
        use crate::pipeline::{evaluate_runs, Method, MethodRuns, Retrieval};
        use retrieval::Hit;

        let dir = tempfile::tempdir().unwrap();
        let qrels_path = dir.path().join("qrels.tsv");
        fs::write(&qrels_path, "1\t0\td1\t1\n2\t0\td2\t1\n").unwrap();
        let lists = vec![
            RankedList::new("1", vec![Hit { doc_id: "d1".into(), score: 2.5 }]),
            RankedList::empty("2"),
        ];
        let run_path = dir.path().join("run_bm25_original.txt");
        write_run_file(&run_path, &lists, "bm25_original").unwrap();

        let (qrels, _) = read_qrels(&qrels_path).unwrap();
        let retrieval = Retrieval {
            runs: vec![MethodRuns { method: Method::Bm25, lists, latencies_ms: vec![1.0, 1.0] }],
            diagnostics: Vec::new(),
        };
        let in_process = &evaluate_runs("original", &retrieval, "dev", &qrels, &[10])[0].result;
        let from_file = score_run_file(&run_path, &qrels_path, &[10]).unwrap();

        assert_eq!(in_process.aggregate.num_queries, 2);
        assert_eq!(from_file.aggregate.num_queries, 2);
        assert_eq!(from_file.aggregate.means, in_process.aggregate.means);
        assert_eq!(from_file.metric("mrr@10"), 0.5);
    }

    #[test]
    fn missing_qrels_do_not_filter_fusion() {
        let dir = tempfile::tempdir().unwrap();
        let run = dir.path().join("run_bm25_original.txt");
        fs::write(&run, "q1 Q0 d1 1 9.0 bm25\n").unwrap();
        let only = judged_query_ids(&[dir.path().join("missing.tsv")]).unwrap();
        assert!(only.is_none());

        let out = dir.path().join("fused.txt");
        let summary = fuse_run_files(&[run], only.as_ref(), &RrfParams::default(), &out, "hybrid").unwrap();
        assert_eq!(summary.queries, 1);
        assert_eq!(summary.lines, 1);
    }
}
