use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building, persisting, or consuming reduced bases and
/// waveform datasets.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported SVD method: {method}")]
    UnsupportedMethod { method: String },

    #[error("reduced basis is not initialised (called {operation})")]
    BasisNotInitialized { operation: &'static str },

    #[error("file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("malformed file {}: {reason}", path.display())]
    FormatError { path: PathBuf, reason: String },

    #[error("schema error in {}: {reason}", path.display())]
    SchemaError { path: PathBuf, reason: String },

    #[error("index {index} out of range for table of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("training matrix is empty")]
    EmptyTrainingData,

    #[error("singular value decomposition failed: {reason}")]
    Decomposition { reason: String },

    #[error("transform {stage} failed: {reason}")]
    Transform { stage: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    pub(crate) fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::FormatError {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn schema(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::SchemaError {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
