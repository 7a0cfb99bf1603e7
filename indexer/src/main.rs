use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use retrieval::config::{HnswParams, TokenizerConfig, HNSW_DEFAULT_EF_CONSTRUCTION, HNSW_DEFAULT_M, HNSW_DEFAULT_SEED, TOKEN_MIN_LEN};
use retrieval::persist::{save_dense, save_lexical, save_meta, timestamp, IndexPaths, MetaFile, FORMAT_VERSION};
use retrieval::trec::{read_collection, read_vectors};
use retrieval::{DenseIndex, Document, LexicalIndex};
use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build lexical and dense passage indexes for one collection variant", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index from a collection TSV file or a directory of TSV shards
    Build {
        /// Collection path (`doc_id<TAB>text` file or directory of *.tsv)
        #[arg(long, env = "RETRIEVAL_COLLECTION")]
        collection: PathBuf,
        /// Document vectors as JSON lines; the dense index is skipped without it
        #[arg(long, env = "RETRIEVAL_DOC_VECTORS")]
        vectors: Option<PathBuf>,
        /// Output index directory
        #[arg(long)]
        output: PathBuf,
        /// Index surface forms instead of stems
        #[arg(long, default_value_t = false)]
        no_stem: bool,
        #[arg(long, default_value_t = TOKEN_MIN_LEN)]
        min_token_len: usize,
        /// HNSW out-degree on upper layers (layer 0 allows twice as many)
        #[arg(long, default_value_t = HNSW_DEFAULT_M)]
        m: usize,
        #[arg(long, default_value_t = HNSW_DEFAULT_EF_CONSTRUCTION)]
        ef_construction: usize,
        #[arg(long, default_value_t = HNSW_DEFAULT_SEED)]
        seed: u64,
    },
}

struct BuildOptions {
    tokenizer: TokenizerConfig,
    hnsw: HnswParams,
}

#[derive(Debug, Serialize)]
struct BuildSummary {
    output: PathBuf,
    num_docs: usize,
    num_terms: usize,
    skipped_lines: usize,
    dense_docs: usize,
    dimension: Option<usize>,
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { collection, vectors, output, no_stem, min_token_len, m, ef_construction, seed } => {
            let mut hnsw = HnswParams::with_m(m);
            hnsw.ef_construction = ef_construction;
            hnsw.seed = seed;
            let opts = BuildOptions { tokenizer: TokenizerConfig { stem: !no_stem, min_len: min_token_len }, hnsw };
            let summary = build_index(&collection, vectors.as_deref(), &output, &opts)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
    }
}

/// Collection shards in a stable order: the path itself, or every `.tsv` under it sorted by name.
fn collection_files(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        bail!("collection not found: {}", input.display());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(input).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
        let p = entry.path();
        if p.is_file() && p.extension().and_then(|s| s.to_str()) == Some("tsv") {
            files.push(p.to_path_buf());
        }
    }
    if files.is_empty() {
        bail!("no .tsv shards under {}", input.display());
    }
    Ok(files)
}

fn load_documents(input: &Path) -> Result<(Vec<Document>, usize)> {
    let mut docs = Vec::new();
    let mut skipped = 0;
    for file in collection_files(input)? {
        let (mut shard, report) = read_collection(&file)?;
        tracing::debug!(file = %file.display(), docs = shard.len(), skipped = report.skipped, "read shard");
        skipped += report.skipped;
        docs.append(&mut shard);
    }
    Ok((docs, skipped))
}

/// Pair vectors with documents in collection order. Documents without a vector
/// are left out of the dense index; vectors for unknown ids are ignored.
fn align_vectors(docs: &[Document], vectors: Vec<(String, Vec<f32>)>) -> (Vec<String>, Vec<Vec<f32>>) {
    let known: HashSet<&str> = docs.iter().map(|d| d.id.as_str()).collect();
    let mut by_id: HashMap<String, Vec<f32>> = HashMap::with_capacity(vectors.len());
    let mut unknown = 0usize;
    let mut duplicates = 0usize;
    for (id, v) in vectors {
        if !known.contains(id.as_str()) {
            unknown += 1;
            continue;
        }
        if by_id.contains_key(&id) {
            duplicates += 1;
            continue;
        }
        by_id.insert(id, v);
    }

    let mut ids = Vec::with_capacity(by_id.len());
    let mut vecs = Vec::with_capacity(by_id.len());
    for doc in docs {
        if let Some(v) = by_id.remove(&doc.id) {
            ids.push(doc.id.clone());
            vecs.push(v);
        }
    }
    let missing = docs.len() - ids.len();
    if unknown > 0 || duplicates > 0 || missing > 0 {
        tracing::warn!(unknown, duplicates, missing, "document vectors do not cover the collection exactly");
    }
    (ids, vecs)
}

fn build_index(collection: &Path, vectors: Option<&Path>, output: &Path, opts: &BuildOptions) -> Result<BuildSummary> {
    let out_paths = IndexPaths::new(output);

    let (docs, skipped_lines) = load_documents(collection)?;
    tracing::info!(num_docs = docs.len(), skipped_lines, "ingested documents");

    let lexical = LexicalIndex::build(&docs, opts.tokenizer)
        .with_context(|| format!("building lexical index from {}", collection.display()))?;
    tracing::info!(num_docs = lexical.num_docs(), num_terms = lexical.num_terms(), avg_doc_length = lexical.avg_doc_length(), "lexical index built");
    save_lexical(&out_paths, &lexical)?;

    let mut dense_docs = 0;
    let mut dimension = None;
    if let Some(path) = vectors {
        let (pairs, report) = read_vectors(path)?;
        let (ids, vecs) = align_vectors(&docs, pairs);
        tracing::info!(vectors = ids.len(), skipped = report.skipped, "building dense index");
        let dense = DenseIndex::build(ids, vecs, opts.hnsw)
            .with_context(|| format!("building dense index from {}", path.display()))?;
        dense_docs = dense.len();
        dimension = Some(dense.dimension());
        tracing::info!(nodes = dense.len(), dimension = dense.dimension(), max_layer = dense.max_layer(), "dense index built");
        save_dense(&out_paths, &dense)?;
    } else {
        tracing::warn!("no document vectors given; dense retrieval will be unavailable for this variant");
    }

    let meta = MetaFile {
        num_docs: lexical.num_docs(),
        num_terms: lexical.num_terms(),
        dimension,
        created_at: timestamp()?,
        version: FORMAT_VERSION,
        tokenizer: opts.tokenizer,
        hnsw: vectors.map(|_| opts.hnsw),
    };
    save_meta(&out_paths, &meta)?;

    tracing::info!(output = %output.display(), "index build complete");
    Ok(BuildSummary {
        output: output.to_path_buf(),
        num_docs: meta.num_docs,
        num_terms: meta.num_terms,
        skipped_lines,
        dense_docs,
        dimension,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrieval::persist::{load_dense_opt, load_lexical, load_meta};
    use std::fs;

    fn opts() -> BuildOptions {
        BuildOptions { tokenizer: TokenizerConfig::default(), hnsw: HnswParams::with_m(4) }
    }

    #[test]
    fn builds_from_sharded_directory() {
        let dir = tempfile::tempdir().unwrap();
        let shards = dir.path().join("collection");
        fs::create_dir_all(&shards).unwrap();
        fs::write(shards.join("part-0001.tsv"), "d3\tthird passage about graphs\n").unwrap();
        fs::write(shards.join("part-0000.tsv"), "d1\trust borrow checker\nbad line\nd2\tpython garbage collection\n").unwrap();
        fs::write(shards.join("notes.txt"), "ignored").unwrap();

        let out = dir.path().join("index");
        let summary = build_index(&shards, None, &out, &opts()).unwrap();
        assert_eq!(summary.num_docs, 3);
        assert_eq!(summary.skipped_lines, 1);

        let lexical = load_lexical(&IndexPaths::new(&out)).unwrap();
        assert_eq!(lexical.doc_id(0), Some("d1"));
        assert_eq!(lexical.doc_id(2), Some("d3"));
        assert!(load_dense_opt(&IndexPaths::new(&out)).unwrap().is_none());
        assert_eq!(load_meta(&IndexPaths::new(&out)).unwrap().hnsw, None);
    }

    #[test]
    fn builds_dense_index_from_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let collection = dir.path().join("collection.tsv");
        fs::write(&collection, "a\tfirst\nb\tsecond\nc\tthird\n").unwrap();
        let vectors = dir.path().join("vectors.jsonl");
        fs::write(
            &vectors,
            "{\"id\":\"b\",\"vector\":[0.0,1.0]}\n{\"id\":\"a\",\"vector\":[1.0,0.0]}\n{\"id\":\"zz\",\"vector\":[1.0,1.0]}\n",
        )
        .unwrap();

        let out = dir.path().join("index");
        let summary = build_index(&collection, Some(&vectors), &out, &opts()).unwrap();
        assert_eq!(summary.dense_docs, 2);
        assert_eq!(summary.dimension, Some(2));

        let dense = load_dense_opt(&IndexPaths::new(&out)).unwrap().unwrap();
        // collection order, not vector file order
        assert_eq!(dense.doc_id(0), "a");
        let meta = load_meta(&IndexPaths::new(&out)).unwrap();
        assert_eq!(meta.dimension, Some(2));
        assert_eq!(meta.hnsw, Some(HnswParams::with_m(4)));
    }

    #[test]
    fn empty_collection_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let collection = dir.path().join("empty.tsv");
        fs::write(&collection, "").unwrap();
        assert!(build_index(&collection, None, &dir.path().join("index"), &opts()).is_err());
        assert!(build_index(&dir.path().join("nope"), None, &dir.path().join("index"), &opts()).is_err());
    }
}
