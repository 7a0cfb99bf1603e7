use retrieval::config::{Bm25Params, HnswParams, RrfParams, TokenizerConfig};
use retrieval::metrics::{self, Judgments};
use retrieval::trec::{self, Qrels, QrelEntry};
use retrieval::{fuse, DenseIndex, Document, Hit, LexicalIndex, RankedList};
use std::collections::HashSet;
use std::io::{BufReader, Cursor};

fn ranked(qid: &str, ids: &[&str]) -> RankedList {
    let hits = ids
        .iter()
        .enumerate()
        .map(|(i, id)| Hit { doc_id: id.to_string(), score: 1.0 / (i + 1) as f64 })
        .collect();
    RankedList::new(qid, hits)
}

fn judgments(pairs: &[(&str, u32)]) -> Judgments {
    pairs.iter().map(|(d, g)| (d.to_string(), *g)).collect()
}

#[test]
fn hybrid_scenario_end_to_end() {
    let lexical = ranked("q1", &["d2", "d1", "d3"]);
    let dense = ranked("q1", &["d1", "d3", "d2"]);
    let fused = fuse("q1", &[&lexical, &dense], &RrfParams::default()).into_ranked();
    assert_eq!(fused.doc_ids(), vec!["d1", "d2", "d3"]);

    let formatted: Vec<String> = fused.hits.iter().map(|h| format!("{:.6}", h.score)).collect();
    assert_eq!(formatted, vec!["0.032522", "0.032266", "0.032002"]);

    let j = judgments(&[("d1", 1), ("d2", 0), ("d3", 1)]);
    let m = metrics::score(&fused.doc_ids(), &j, &[3]);
    assert!((m["ndcg@3"] - 0.9197).abs() < 1e-4);
    assert_eq!(m["recall@3"], 1.0);
    assert_eq!(m["mrr@3"], 1.0);
    assert!((m["map"] - 0.8333).abs() < 1e-4);
}

#[test]
fn fused_length_is_bounded() {
    let a = ranked("q", &["a", "b", "c", "d"]);
    let b = ranked("q", &["d", "e"]);
    let c = ranked("q", &[]);
    for top_n in [0, 1, 3, 5, 100] {
        let params = RrfParams { k: 60.0, top_n };
        let fused = fuse("q", &[&a, &b, &c], &params);
        assert!(fused.list.len() <= top_n.min(a.len() + b.len() + c.len()));
    }
}

#[test]
fn fusion_never_invents_documents() {
    let a = ranked("q", &["a", "b"]);
    let b = ranked("q", &["c"]);
    let fused = fuse("q", &[&a, &b], &RrfParams::default());
    let inputs: HashSet<&str> = ["a", "b", "c"].into_iter().collect();
    assert!(fused.list.doc_ids().iter().all(|d| inputs.contains(d)));
}

#[test]
fn recall_is_monotone_in_k() {
    let j = judgments(&[("a", 1), ("c", 2), ("e", 1), ("z", 3)]);
    let retrieved = ["b", "a", "x", "c", "y", "e", "f"];
    let mut prev = 0.0;
    for k in 0..=retrieved.len() + 2 {
        let r = metrics::recall(&retrieved, &j, k);
        assert!(r >= prev);
        prev = r;
    }
}

#[test]
fn ndcg_stays_in_unit_interval() {
    let j = judgments(&[("a", 3), ("b", 1), ("c", 2), ("d", 0)]);
    let orders: [&[&str]; 6] = [&["a", "c", "b"], &["b", "a"], &["d", "x", "c"], &[], &["a", "a"], &["a", "c", "a", "c", "b"]];
    for order in orders {
        for k in [1, 2, 3, 10] {
            let v = metrics::ndcg(order, &j, k);
            assert!((0.0..=1.0 + 1e-12).contains(&v), "ndcg {v} out of range");
        }
    }
    assert!((metrics::ndcg(&["a", "c", "b"], &j, 3) - 1.0).abs() < 1e-12);
    assert!(metrics::ndcg(&["a", "b", "c"], &j, 3) < 1.0);

    let only_a = judgments(&[("a", 3)]);
    assert!((metrics::ndcg(&["a", "a"], &only_a, 10) - 1.0).abs() < 1e-12);
}

#[test]
fn bm25_scores_are_positive_and_ordered() {
    let docs: Vec<Document> = [
        ("p1", "Rust guarantees memory safety without a garbage collector"),
        ("p2", "The garbage collector in Java pauses the world"),
        ("p3", "Memory safety bugs dominate security advisories"),
        ("p4", "Cooking pasta requires salted boiling water"),
    ]
    .into_iter()
    .map(|(id, text)| Document { id: id.into(), text: text.into() })
    .collect();
    let index = LexicalIndex::build(&docs, TokenizerConfig::default()).unwrap();
    let res = index.search("q", "memory safety garbage collector", 10, &Bm25Params::default());
    assert_eq!(res.len(), 3);
    assert_eq!(res.hits[0].doc_id, "p1");
    assert!(res.hits.iter().all(|h| h.score > 0.0));
    assert!(res.hits.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(index.search("q", "the of and", 10, &Bm25Params::default()).is_empty());
}

#[test]
fn run_file_round_trip() {
    let lists = vec![
        RankedList::new("2", vec![Hit { doc_id: "d9".into(), score: 12.3456789 }, Hit { doc_id: "d1".into(), score: 0.5 }]),
        RankedList::new("1", vec![Hit { doc_id: "d3".into(), score: 0.0325224 }]),
    ];
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs").join("run_bm25_original.txt");
    trec::write_run_file(&path, &lists, "bm25_original").unwrap();

    let (back, report) = trec::read_run(&path, None).unwrap();
    assert_eq!(report.skipped, 0);
    assert_eq!(report.lines, 3);
    assert_eq!(back.len(), 2);
    assert_eq!(back[0].query_id, "1");
    for original in &lists {
        let parsed = back.iter().find(|l| l.query_id == original.query_id).unwrap();
        assert_eq!(parsed.doc_ids(), original.doc_ids());
        for (a, b) in parsed.hits.iter().zip(&original.hits) {
            assert!((a.score - b.score).abs() <= 5e-7);
        }
    }
}

#[test]
fn qrels_file_round_trip_preserves_iteration() {
    let qrels = Qrels::from_entries(vec![
        QrelEntry { query_id: "7".into(), iteration: "Q0".into(), doc_id: "a".into(), grade: 2 },
        QrelEntry { query_id: "7".into(), iteration: "0".into(), doc_id: "b".into(), grade: 0 },
    ]);
    let mut buf = Vec::new();
    trec::write_qrels(&mut buf, &qrels).unwrap();
    let (back, _) = trec::parse_qrels(&mut BufReader::new(Cursor::new(buf))).unwrap();
    assert_eq!(back.entries(), qrels.entries());
}

#[test]
fn dense_and_lexical_fuse_over_the_same_ids() {
    let docs: Vec<Document> = (0..30)
        .map(|i| Document { id: format!("d{i}"), text: format!("topic{} shared words number{}", i % 3, i) })
        .collect();
    let vectors: Vec<Vec<f32>> = (0..30).map(|i| vec![(i % 3) as f32 + 0.1, 1.0, (i as f32) * 0.01]).collect();
    let lexical = LexicalIndex::build(&docs, TokenizerConfig::default()).unwrap();
    let dense = DenseIndex::build(docs.iter().map(|d| d.id.clone()).collect(), vectors, HnswParams::with_m(4)).unwrap();

    let lex = lexical.search("q", "topic1", 10, &Bm25Params::default());
    let den = dense.search("q", &[1.1, 1.0, 0.05], 10, 64).unwrap();
    let fused = fuse("q", &[&lex, &den], &RrfParams::default());
    assert!(fused.list.len() <= lex.len() + den.len());
    assert_eq!(fused.num_sources, 2);
}
