use std::path::PathBuf;

/// Index construction rejected its input. Fatal to the collection variant being built.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("cannot build an index over an empty collection")]
    EmptyCollection,

    #[error("duplicate document id: {0}")]
    DuplicateDocId(String),

    #[error("{ids} document ids but {vectors} vectors")]
    LengthMismatch { ids: usize, vectors: usize },

    #[error("vector for {doc_id} has dimension {found}, expected {expected}")]
    DimensionMismatch { doc_id: String, expected: usize, found: usize },

    #[error("vector for {0} has zero norm")]
    ZeroVector(String),

    #[error("vector for {0} contains a non-finite component")]
    NonFiniteVector(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// A single query could not be answered. Callers degrade that query to an empty list.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SearchError {
    #[error("query vector has dimension {found}, index expects {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("query vector has zero norm")]
    ZeroVector,

    #[error("query vector contains a non-finite component")]
    NonFinite,
}

/// Reading one of the flat-text inputs failed as a whole.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("input file not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("failed reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl InputError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing(_))
    }
}
