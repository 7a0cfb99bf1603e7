use crate::config::{HnswParams, TokenizerConfig};
use crate::{DenseIndex, LexicalIndex};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub const FORMAT_VERSION: u32 = 1;

/// Current UTC time as RFC 3339, the format of every `created_at` field.
pub fn timestamp() -> Result<String> {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("formatting timestamp")
}

/// Build metadata stored next to the binary index files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaFile {
    pub num_docs: usize,
    pub num_terms: usize,
    /// Present only when a dense index was built.
    pub dimension: Option<usize>,
    pub created_at: String,
    pub version: u32,
    pub tokenizer: TokenizerConfig,
    pub hnsw: Option<HnswParams>,
}

/// Layout of one collection variant's index directory.
pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn lexical(&self) -> PathBuf { self.root.join("lexical.bin") }
    pub fn dense(&self) -> PathBuf { self.root.join("dense.bin") }
    pub fn meta(&self) -> PathBuf { self.root.join("meta.json") }

    pub fn has_dense(&self) -> bool {
        self.dense().is_file()
    }
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent() {
        create_dir_all(dir)?;
    }
    let mut f = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    f.write_all(bytes)?;
    Ok(())
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    let mut f = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    Ok(buf)
}

pub fn save_lexical(paths: &IndexPaths, index: &LexicalIndex) -> Result<()> {
    let bytes = bincode::serialize(index)?;
    write_bytes(&paths.lexical(), &bytes)
}

pub fn load_lexical(paths: &IndexPaths) -> Result<LexicalIndex> {
    let buf = read_bytes(&paths.lexical())?;
    let index = bincode::deserialize(&buf).with_context(|| format!("decoding {}", paths.lexical().display()))?;
    Ok(index)
}

pub fn save_dense(paths: &IndexPaths, index: &DenseIndex) -> Result<()> {
    let bytes = bincode::serialize(index)?;
    write_bytes(&paths.dense(), &bytes)
}

pub fn load_dense(paths: &IndexPaths) -> Result<DenseIndex> {
    let buf = read_bytes(&paths.dense())?;
    let index = bincode::deserialize(&buf).with_context(|| format!("decoding {}", paths.dense().display()))?;
    Ok(index)
}

/// Dense index if one was built for this variant.
pub fn load_dense_opt(paths: &IndexPaths) -> Result<Option<DenseIndex>> {
    if paths.has_dense() {
        load_dense(paths).map(Some)
    } else {
        Ok(None)
    }
}

pub fn save_meta(paths: &IndexPaths, meta: &MetaFile) -> Result<()> {
    let json = serde_json::to_string_pretty(meta)?;
    write_bytes(&paths.meta(), json.as_bytes())
}

pub fn load_meta(paths: &IndexPaths) -> Result<MetaFile> {
    let mut f = File::open(paths.meta()).with_context(|| format!("opening {}", paths.meta().display()))?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    let meta: MetaFile = serde_json::from_str(&buf)?;
    if meta.version != FORMAT_VERSION {
        anyhow::bail!("index at {} has format version {}, expected {}", paths.root.display(), meta.version, FORMAT_VERSION);
    }
    Ok(meta)
}
