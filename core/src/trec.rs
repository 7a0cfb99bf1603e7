//! Flat-text formats exchanged between stages and with the reference evaluator.
//!
//! - queries / collection: `id \t text`
//! - qrels: `query_id iteration doc_id grade` (tabs or spaces)
//! - run: `query_id Q0 doc_id rank score run_tag`
//! - vectors: JSON lines `{"id": "...", "vector": [..]}`
//!
//! Lines with too few or unparseable fields are skipped and counted in a
//! [`ParseReport`]; only a missing or unreadable file fails the whole read.

use crate::config::RUN_SCORE_PRECISION;
use crate::error::InputError;
use crate::metrics::Judgments;
use crate::{Document, Hit, Query, RankedList};
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseReport {
    pub lines: usize,
    pub skipped: usize,
}

impl ParseReport {
    fn skip(&mut self, path: &str, line_no: usize, reason: &str) {
        self.skipped += 1;
        tracing::debug!(path, line_no, reason, "skipping malformed line");
    }
}

fn open(path: &Path) -> Result<BufReader<File>, InputError> {
    if !path.exists() {
        return Err(InputError::Missing(path.to_path_buf()));
    }
    File::open(path).map(BufReader::new).map_err(|e| InputError::io(path, e))
}

fn read_with<T>(
    path: &Path,
    parse: impl FnOnce(&mut dyn BufRead, &str) -> io::Result<(T, ParseReport)>,
) -> Result<(T, ParseReport), InputError> {
    let mut file = open(path)?;
    let reader: &mut dyn BufRead = &mut file;
    let label = path.display().to_string();
    let (value, report) = parse(reader, &label).map_err(|e| InputError::io(path, e))?;
    if report.skipped > 0 {
        tracing::warn!(path = %label, skipped = report.skipped, lines = report.lines, "skipped malformed lines");
    }
    Ok((value, report))
}

/// `id \t text` records, shared by the queries and collection formats.
fn parse_id_text(reader: &mut dyn BufRead, label: &str) -> io::Result<(Vec<(String, String)>, ParseReport)> {
    let mut report = ParseReport::default();
    let mut out = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        report.lines += 1;
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            report.skip(label, i + 1, "blank");
            continue;
        }
        let mut parts = line.split('\t');
        match (parts.next().map(str::trim), parts.next()) {
            (Some(id), Some(text)) if !id.is_empty() => out.push((id.to_string(), text.trim().to_string())),
            _ => report.skip(label, i + 1, "expected id<TAB>text"),
        }
    }
    Ok((out, report))
}

/// Query records keyed by id. A repeated id keeps its first line; later ones are skipped.
fn id_text_to_queries(reader: &mut dyn BufRead, label: &str) -> io::Result<(Vec<Query>, ParseReport)> {
    let (rows, mut report) = parse_id_text(reader, label)?;
    let mut seen = HashSet::with_capacity(rows.len());
    let mut queries = Vec::with_capacity(rows.len());
    for (id, text) in rows {
        if seen.insert(id.clone()) {
            queries.push(Query { id, text });
        } else {
            report.skipped += 1;
            tracing::warn!(path = label, query_id = %id, "duplicate query id, keeping the first");
        }
    }
    Ok((queries, report))
}

pub fn parse_queries(reader: &mut dyn BufRead) -> io::Result<(Vec<Query>, ParseReport)> {
    id_text_to_queries(reader, "queries")
}

pub fn read_queries(path: &Path) -> Result<(Vec<Query>, ParseReport), InputError> {
    read_with(path, id_text_to_queries)
}

pub fn parse_collection(reader: &mut dyn BufRead) -> io::Result<(Vec<Document>, ParseReport)> {
    let (rows, report) = parse_id_text(reader, "collection")?;
    Ok((rows.into_iter().map(|(id, text)| Document { id, text }).collect(), report))
}

pub fn read_collection(path: &Path) -> Result<(Vec<Document>, ParseReport), InputError> {
    read_with(path, |r, label| {
        let (rows, report) = parse_id_text(r, label)?;
        Ok((rows.into_iter().map(|(id, text)| Document { id, text }).collect(), report))
    })
}

/// One judgment line. `iteration` is unused for scoring but written back unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrelEntry {
    pub query_id: String,
    pub iteration: String,
    pub doc_id: String,
    pub grade: u32,
}

/// Relevance judgments: `query_id → (doc_id → grade)`, plus the source lines in order.
#[derive(Debug, Clone, Default)]
pub struct Qrels {
    by_query: BTreeMap<String, Judgments>,
    entries: Vec<QrelEntry>,
}

impl Qrels {
    pub fn from_entries(entries: Vec<QrelEntry>) -> Self {
        let mut by_query: BTreeMap<String, Judgments> = BTreeMap::new();
        for e in &entries {
            by_query.entry(e.query_id.clone()).or_default().insert(e.doc_id.clone(), e.grade);
        }
        Self { by_query, entries }
    }

    pub fn judgments(&self, query_id: &str) -> Option<&Judgments> {
        self.by_query.get(query_id)
    }

    pub fn query_ids(&self) -> impl Iterator<Item = &str> {
        self.by_query.keys().map(String::as_str)
    }

    pub fn num_queries(&self) -> usize {
        self.by_query.len()
    }

    pub fn entries(&self) -> &[QrelEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.by_query.is_empty()
    }

    /// Keep only the given queries.
    pub fn restrict_to(&self, query_ids: &HashSet<&str>) -> Self {
        let entries = self.entries.iter().filter(|e| query_ids.contains(e.query_id.as_str())).cloned().collect();
        Self::from_entries(entries)
    }
}

pub fn parse_qrels(reader: &mut dyn BufRead) -> io::Result<(Qrels, ParseReport)> {
    parse_qrels_labeled(reader, "qrels")
}

fn parse_qrels_labeled(reader: &mut dyn BufRead, label: &str) -> io::Result<(Qrels, ParseReport)> {
    let mut report = ParseReport::default();
    let mut entries = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        report.lines += 1;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            report.skip(label, i + 1, "expected 4 fields");
            continue;
        }
        // Some judgment sets use negative grades for "judged non-relevant".
        let grade = match fields[3].parse::<i64>() {
            Ok(g) => g.max(0) as u32,
            Err(_) => {
                report.skip(label, i + 1, "grade is not an integer");
                continue;
            }
        };
        entries.push(QrelEntry {
            query_id: fields[0].to_string(),
            iteration: fields[1].to_string(),
            doc_id: fields[2].to_string(),
            grade,
        });
    }
    Ok((Qrels::from_entries(entries), report))
}

pub fn read_qrels(path: &Path) -> Result<(Qrels, ParseReport), InputError> {
    read_with(path, parse_qrels_labeled)
}

pub fn write_qrels<W: Write>(out: &mut W, qrels: &Qrels) -> io::Result<()> {
    for e in qrels.entries() {
        writeln!(out, "{}\t{}\t{}\t{}", e.query_id, e.iteration, e.doc_id, e.grade)?;
    }
    Ok(())
}

/// Numeric ids compare numerically and sort before non-numeric ones, which compare as strings.
pub fn compare_query_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

pub fn format_run_line(query_id: &str, doc_id: &str, rank: usize, score: f64, run_tag: &str) -> String {
    format!("{query_id} Q0 {doc_id} {rank} {score:.prec$} {run_tag}", prec = RUN_SCORE_PRECISION)
}

/// Write lists grouped by query (in [`compare_query_ids`] order), ranks starting at 1.
pub fn write_run<W: Write>(out: &mut W, lists: &[RankedList], run_tag: &str) -> io::Result<()> {
    let mut ordered: Vec<&RankedList> = lists.iter().collect();
    ordered.sort_by(|a, b| compare_query_ids(&a.query_id, &b.query_id));
    for list in ordered {
        for (rank, hit) in list.ranked() {
            writeln!(out, "{}", format_run_line(&list.query_id, &hit.doc_id, rank, hit.score, run_tag))?;
        }
    }
    Ok(())
}

pub fn write_run_file(path: &Path, lists: &[RankedList], run_tag: &str) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let mut out = io::BufWriter::new(File::create(path)?);
    write_run(&mut out, lists, run_tag)?;
    out.flush()
}

/// Parse a run into one list per query, each ordered by its rank column.
/// With `only`, queries outside the set are dropped.
pub fn parse_run(reader: &mut dyn BufRead, only: Option<&HashSet<String>>) -> io::Result<(Vec<RankedList>, ParseReport)> {
    parse_run_labeled(reader, only, "run")
}

fn parse_run_labeled(
    reader: &mut dyn BufRead,
    only: Option<&HashSet<String>>,
    label: &str,
) -> io::Result<(Vec<RankedList>, ParseReport)> {
    let mut report = ParseReport::default();
    let mut per_query: HashMap<String, Vec<(usize, Hit)>> = HashMap::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        report.lines += 1;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 6 {
            report.skip(label, i + 1, "expected 6 fields");
            continue;
        }
        let (rank, score) = match (fields[3].parse::<usize>(), fields[4].parse::<f64>()) {
            (Ok(r), Ok(s)) => (r, s),
            _ => {
                report.skip(label, i + 1, "rank or score not numeric");
                continue;
            }
        };
        if only.is_some_and(|set| !set.contains(fields[0])) {
            continue;
        }
        per_query
            .entry(fields[0].to_string())
            .or_default()
            .push((rank, Hit { doc_id: fields[2].to_string(), score }));
    }

    let mut lists: Vec<RankedList> = per_query
        .into_iter()
        .map(|(query_id, mut rows)| {
            rows.sort_by_key(|(rank, _)| *rank);
            RankedList::new(query_id, rows.into_iter().map(|(_, hit)| hit).collect())
        })
        .collect();
    lists.sort_by(|a, b| compare_query_ids(&a.query_id, &b.query_id));
    Ok((lists, report))
}

pub fn read_run(path: &Path, only: Option<&HashSet<String>>) -> Result<(Vec<RankedList>, ParseReport), InputError> {
    read_with(path, |r, label| parse_run_labeled(r, only, label))
}

#[derive(Debug, Deserialize)]
struct VectorRecord {
    id: String,
    vector: Vec<f32>,
}

/// `(id, vector)` pairs from JSON lines, as produced by the embedding collaborator.
pub fn parse_vectors(reader: &mut dyn BufRead) -> io::Result<(Vec<(String, Vec<f32>)>, ParseReport)> {
    parse_vectors_labeled(reader, "vectors")
}

fn parse_vectors_labeled(reader: &mut dyn BufRead, label: &str) -> io::Result<(Vec<(String, Vec<f32>)>, ParseReport)> {
    let mut report = ParseReport::default();
    let mut out = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        report.lines += 1;
        if line.trim().is_empty() {
            report.skip(label, i + 1, "blank");
            continue;
        }
        match serde_json::from_str::<VectorRecord>(&line) {
            Ok(rec) => out.push((rec.id, rec.vector)),
            Err(_) => report.skip(label, i + 1, "not a {id, vector} record"),
        }
    }
    Ok((out, report))
}

pub fn read_vectors(path: &Path) -> Result<(Vec<(String, Vec<f32>)>, ParseReport), InputError> {
    read_with(path, parse_vectors_labeled)
}
