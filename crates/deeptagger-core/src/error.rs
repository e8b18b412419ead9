use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading vectors or building and running a tagger.
#[derive(Debug, Error)]
pub enum TaggerError {
    /// The embedding format name is not one of the known formats.
    #[error("unrecognized embedding format: {0:?} (expected polyglot, word2vec, fasttext or glove)")]
    Format(String),

    /// The reader for a known format was not compiled into this build.
    #[error("no reader available for {format} embeddings: {hint}")]
    MissingDependency {
        /// The format whose reader is absent.
        format: String,
        /// How to make the reader available.
        hint: String,
    },

    /// Tensor or table dimensions disagree.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// forward/loss/predict was called before `build`.
    #[error("model is not built; call build() before running it")]
    NotBuilt,

    /// A configuration value is out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A configuration value names a feature that is not implemented.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A token could not be mapped and its vocabulary has no UNK entry.
    #[error("token {0:?} is not in the vocabulary")]
    UnknownToken(String),

    /// An embedding file could not be parsed.
    #[error("malformed vectors in {path:?} (record {record}): {reason}")]
    MalformedVectors {
        /// File being read.
        path: PathBuf,
        /// One-based line or record number.
        record: usize,
        /// What went wrong.
        reason: String,
    },

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Candle ML framework error.
    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Safetensors (de)serialization error.
    #[error("safetensors error: {0}")]
    Safetensors(#[from] safetensors::SafeTensorError),

    /// JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for tagger operations.
pub type Result<T> = std::result::Result<T, TaggerError>;
