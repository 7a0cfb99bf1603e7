//! Ranking quality metrics: nDCG@k, Recall@k, MRR@k and MAP.
//!
//! A document missing from a query's judgments has grade 0. "Relevant" means
//! grade > 0. Queries without any relevant document score 0 on every metric and
//! still count in the aggregate, so methods compared on the same qrels share
//! denominators.

use crate::trec::Qrels;
use crate::RankedList;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Relevance grades of one query: doc id → grade.
pub type Judgments = HashMap<String, u32>;

/// Metric name (`ndcg@10`, `recall@100`, `mrr@10`, `map`) → value.
pub type MetricMap = BTreeMap<String, f64>;

fn grade(judgments: &Judgments, doc_id: &str) -> u32 {
    judgments.get(doc_id).copied().unwrap_or(0)
}

fn relevant_set(judgments: &Judgments) -> HashSet<&str> {
    judgments.iter().filter(|(_, &g)| g > 0).map(|(d, _)| d.as_str()).collect()
}

/// `Σ_{i=1..k} gains[i-1] / log2(i + 1)`.
pub fn dcg(gains: &[u32], k: usize) -> f64 {
    gains
        .iter()
        .take(k)
        .enumerate()
        .map(|(i, &g)| g as f64 / ((i + 2) as f64).log2())
        .sum()
}

/// DCG@k of the retrieved order over the DCG@k of all judged grades sorted descending.
pub fn ndcg(retrieved: &[&str], judgments: &Judgments, k: usize) -> f64 {
    let mut ideal: Vec<u32> = judgments.values().copied().filter(|&g| g > 0).collect();
    ideal.sort_unstable_by(|a, b| b.cmp(a));
    let idcg = dcg(&ideal, k);
    if idcg == 0.0 {
        return 0.0;
    }
    // a repeated document keeps its rank slot but earns gain only once
    let mut credited: HashSet<&str> = HashSet::new();
    let gains: Vec<u32> = retrieved
        .iter()
        .take(k)
        .map(|d| if credited.insert(*d) { grade(judgments, d) } else { 0 })
        .collect();
    dcg(&gains, k) / idcg
}

pub fn recall(retrieved: &[&str], judgments: &Judgments, k: usize) -> f64 {
    let relevant = relevant_set(judgments);
    if relevant.is_empty() {
        return 0.0;
    }
    let top: HashSet<&str> = retrieved.iter().take(k).copied().collect();
    top.intersection(&relevant).count() as f64 / relevant.len() as f64
}

/// `1 / rank` of the first relevant document within the top `k`, else 0.
pub fn reciprocal_rank(retrieved: &[&str], judgments: &Judgments, k: usize) -> f64 {
    retrieved
        .iter()
        .take(k)
        .position(|d| grade(judgments, d) > 0)
        .map_or(0.0, |i| 1.0 / (i + 1) as f64)
}

/// Precision at each relevant hit, summed over the whole list and divided by |relevant|.
pub fn average_precision(retrieved: &[&str], judgments: &Judgments) -> f64 {
    let relevant = relevant_set(judgments);
    if relevant.is_empty() {
        return 0.0;
    }
    let mut hits = 0usize;
    let mut total = 0.0;
    let mut counted: HashSet<&str> = HashSet::new();
    for (i, doc) in retrieved.iter().enumerate() {
        if relevant.contains(doc) && counted.insert(*doc) {
            hits += 1;
            total += hits as f64 / (i + 1) as f64;
        }
    }
    if hits == 0 {
        return 0.0;
    }
    total / relevant.len() as f64
}

/// Every metric for one query: nDCG, Recall and MRR at each cutoff in `ks`, plus MAP.
pub fn score(retrieved: &[&str], judgments: &Judgments, ks: &[usize]) -> MetricMap {
    let mut out = MetricMap::new();
    for &k in ks {
        out.insert(format!("ndcg@{k}"), ndcg(retrieved, judgments, k));
        out.insert(format!("recall@{k}"), recall(retrieved, judgments, k));
        out.insert(format!("mrr@{k}"), reciprocal_rank(retrieved, judgments, k));
    }
    out.insert("map".to_string(), average_precision(retrieved, judgments));
    out
}

/// Mean of each metric across queries, with the number of queries behind each mean.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub means: BTreeMap<String, f64>,
    pub counts: BTreeMap<String, usize>,
    pub num_queries: usize,
}

impl Aggregate {
    /// Mean of `metric`, 0 when no query reported it.
    pub fn mean(&self, metric: &str) -> f64 {
        self.means.get(metric).copied().unwrap_or(0.0)
    }
}

pub fn aggregate<'a, I>(per_query: I) -> Aggregate
where
    I: IntoIterator<Item = &'a MetricMap>,
{
    let mut sums: BTreeMap<String, f64> = BTreeMap::new();
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut num_queries = 0;
    for metrics in per_query {
        num_queries += 1;
        for (name, value) in metrics {
            *sums.entry(name.clone()).or_insert(0.0) += value;
            *counts.entry(name.clone()).or_insert(0) += 1;
        }
    }
    let means = sums.into_iter().map(|(name, sum)| {
        let n = counts[&name] as f64;
        (name, sum / n)
    }).collect();
    Aggregate { means, counts, num_queries }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMetrics {
    pub query_id: String,
    pub metrics: MetricMap,
}

/// Score every list whose query has judgments. Lists for unjudged queries are skipped.
pub fn score_lists<'a, I>(lists: I, qrels: &Qrels, ks: &[usize]) -> Vec<QueryMetrics>
where
    I: IntoIterator<Item = &'a RankedList>,
{
    lists
        .into_iter()
        .filter_map(|list| {
            let judgments = qrels.judgments(&list.query_id)?;
            Some(QueryMetrics { query_id: list.query_id.clone(), metrics: score(&list.doc_ids(), judgments, ks) })
        })
        .collect()
}

/// Evaluation of one retrieval method: aggregate, per-query breakdown and timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalResult {
    pub method: String,
    pub aggregate: Aggregate,
    pub per_query: Vec<QueryMetrics>,
    pub latencies_ms: Vec<f64>,
    pub avg_latency_ms: f64,
    pub stats: BTreeMap<String, f64>,
}

impl EvalResult {
    pub fn new(method: impl Into<String>, per_query: Vec<QueryMetrics>, latencies_ms: Vec<f64>) -> Self {
        let aggregate = aggregate(per_query.iter().map(|q| &q.metrics));
        let avg_latency_ms = if latencies_ms.is_empty() {
            0.0
        } else {
            latencies_ms.iter().sum::<f64>() / latencies_ms.len() as f64
        };
        Self { method: method.into(), aggregate, per_query, latencies_ms, avg_latency_ms, stats: BTreeMap::new() }
    }

    pub fn metric(&self, name: &str) -> f64 {
        self.aggregate.mean(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn judgments(pairs: &[(&str, u32)]) -> Judgments {
        pairs.iter().map(|(d, g)| (d.to_string(), *g)).collect()
    }

    #[test]
    fn dcg_discounts_by_log2_rank() {
        assert!((dcg(&[1, 0, 1], 3) - 1.5).abs() < 1e-12);
        assert!((dcg(&[3, 2], 1) - 3.0).abs() < 1e-12);
        assert_eq!(dcg(&[], 10), 0.0);
    }

    #[test]
    fn ndcg_of_ideal_order_is_one() {
        let j = judgments(&[("a", 3), ("b", 2), ("c", 1)]);
        assert!((ndcg(&["a", "b", "c"], &j, 3) - 1.0).abs() < 1e-12);
        assert!(ndcg(&["c", "b", "a"], &j, 3) < 1.0);
    }

    #[test]
    fn ndcg_without_relevant_docs_is_zero() {
        let j = judgments(&[("a", 0)]);
        assert_eq!(ndcg(&["a", "b"], &j, 10), 0.0);
        assert_eq!(ndcg(&["a"], &Judgments::new(), 10), 0.0);
    }

    #[test]
    fn ndcg_counts_unretrieved_relevant_docs_in_ideal() {
        let j = judgments(&[("a", 1), ("z", 1)]);
        let v = ndcg(&["a"], &j, 10);
        assert!(v > 0.0 && v < 1.0);
    }

    #[test]
    fn recall_and_mrr() {
        let j = judgments(&[("a", 1), ("b", 0), ("c", 2)]);
        let retrieved = ["b", "c", "x", "a"];
        assert_eq!(recall(&retrieved, &j, 1), 0.0);
        assert_eq!(recall(&retrieved, &j, 2), 0.5);
        assert_eq!(recall(&retrieved, &j, 4), 1.0);
        assert_eq!(reciprocal_rank(&retrieved, &j, 10), 0.5);
        assert_eq!(reciprocal_rank(&retrieved, &j, 1), 0.0);
    }

    #[test]
    fn average_precision_by_hand() {
        let j = judgments(&[("a", 1), ("c", 1), ("z", 1)]);
        // hits at ranks 1 and 3, three relevant docs
        let ap = average_precision(&["a", "b", "c"], &j);
        assert!((ap - (1.0 + 2.0 / 3.0) / 3.0).abs() < 1e-12);
        assert_eq!(average_precision(&["b"], &j), 0.0);
        assert_eq!(average_precision(&["a"], &Judgments::new()), 0.0);
    }

    #[test]
    fn score_names_every_cutoff() {
        let j = judgments(&[("a", 1)]);
        let m = score(&["a"], &j, &[10, 100]);
        let names: Vec<&str> = m.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["map", "mrr@10", "mrr@100", "ndcg@10", "ndcg@100", "recall@10", "recall@100"]);
    }

    #[test]
    fn aggregate_averages_and_counts() {
        let mut a = MetricMap::new();
        a.insert("map".into(), 1.0);
        let mut b = MetricMap::new();
        b.insert("map".into(), 0.0);
        b.insert("mrr@10".into(), 0.5);
        let agg = aggregate([&a, &b]);
        assert_eq!(agg.num_queries, 2);
        assert_eq!(agg.mean("map"), 0.5);
        assert_eq!(agg.counts["map"], 2);
        assert_eq!(agg.counts["mrr@10"], 1);
        assert_eq!(agg.mean("ndcg@10"), 0.0);
    }

    #[test]
    fn eval_result_averages_latency() {
        let r = EvalResult::new("bm25", Vec::new(), vec![2.0, 4.0]);
        assert_eq!(r.avg_latency_ms, 3.0);
        assert_eq!(r.aggregate.num_queries, 0);
        assert_eq!(EvalResult::new("x", Vec::new(), Vec::new()).avg_latency_ms, 0.0);
    }
}
