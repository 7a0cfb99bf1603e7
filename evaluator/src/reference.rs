//! Optional cross-check with an external TREC-style evaluator binary.
//!
//! The binary is run as `<bin> -m <measure>... <qrels> <run>` and prints one
//! `name [scope] value` line per measure. Every failure mode is reported as an
//! [`ExternalError`] so the caller can mark the cross-check unavailable and move on.

use retrieval::config::REFERENCE_EVAL_TIMEOUT_SECS;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

pub const DEFAULT_MEASURES: [&str; 3] = ["recip_rank.10", "recall.100", "ndcg_cut.10"];

#[derive(Debug, thiserror::Error)]
pub enum ExternalError {
    #[error("reference evaluator not found: {}", .0.display())]
    MissingBinary(PathBuf),

    #[error("reference evaluator timed out after {0:?}")]
    Timeout(Duration),

    #[error("reference evaluator exited with {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("failed to start reference evaluator: {0}")]
    Spawn(#[source] io::Error),

    #[error("reference evaluator input unavailable: {}", .0.display())]
    MissingInput(PathBuf),
}

pub type ReferenceMetrics = BTreeMap<String, f64>;

#[derive(Debug, Clone)]
pub struct TrecEval {
    binary: PathBuf,
    measures: Vec<String>,
    timeout: Duration,
}

impl TrecEval {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            measures: DEFAULT_MEASURES.iter().map(|m| m.to_string()).collect(),
            timeout: Duration::from_secs(REFERENCE_EVAL_TIMEOUT_SECS),
        }
    }

    pub fn with_measures(mut self, measures: Vec<String>) -> Self {
        if !measures.is_empty() {
            self.measures = measures;
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn args(&self, qrels: &Path, run: &Path) -> Vec<OsString> {
        let mut args = Vec::with_capacity(self.measures.len() * 2 + 2);
        for m in &self.measures {
            args.push(OsString::from("-m"));
            args.push(OsString::from(m));
        }
        args.push(qrels.as_os_str().to_owned());
        args.push(run.as_os_str().to_owned());
        args
    }

    pub async fn run(&self, qrels: &Path, run: &Path) -> Result<ReferenceMetrics, ExternalError> {
        for input in [qrels, run] {
            if !input.is_file() {
                return Err(ExternalError::MissingInput(input.to_path_buf()));
            }
        }
        // A bare name is resolved through PATH by the OS; only explicit paths can be checked here.
        if self.binary.components().count() > 1 && !self.binary.exists() {
            return Err(ExternalError::MissingBinary(self.binary.clone()));
        }

        let mut cmd = Command::new(&self.binary);
        cmd.args(self.args(qrels, run)).kill_on_drop(true);
        let output = match timeout(self.timeout, cmd.output()).await {
            Err(_) => return Err(ExternalError::Timeout(self.timeout)),
            Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => return Err(ExternalError::MissingBinary(self.binary.clone())),
            Ok(Err(e)) => return Err(ExternalError::Spawn(e)),
            Ok(Ok(output)) => output,
        };
        if !output.status.success() {
            return Err(ExternalError::NonZeroExit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(parse_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// `name [scope] value` lines; the value is the last field. Unparseable lines are ignored.
pub fn parse_output(stdout: &str) -> ReferenceMetrics {
    let mut out = ReferenceMetrics::new();
    for line in stdout.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 2 {
            continue;
        }
        if let Some(Ok(value)) = fields.last().map(|v| v.parse::<f64>()) {
            out.insert(fields[0].to_string(), value);
        }
    }
    out
}
