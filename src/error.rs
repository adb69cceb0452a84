use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by the classification core.
///
/// Loaders and the command line layer wrap these in `anyhow` with context;
/// tests match on the variants directly.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("corrupted model parameters: {0}")]
    CorruptedParameters(String),

    #[error("unknown classification algorithm \"{name}\" (available: {available})")]
    UnknownAlgorithm { name: String, available: String },

    /// A model or vectorizer was used before being trained or loaded.
    #[error("{0} needs to be trained or loaded first")]
    NotFitted(&'static str),

    #[error("train a model to get a non-empty encoding")]
    EmptyEncoding,

    #[error("encoding with value \"{0}\" does not exist")]
    UnknownEncoding(usize),

    #[error("incomplete model bundle at {}: missing {missing}", .dir.display())]
    IncompleteBundle { dir: PathBuf, missing: &'static str },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("model artifact (de)serialization failed: {0}")]
    Artifact(#[from] bincode::Error),

    #[error("writing parameters failed: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ClassifierError>;
