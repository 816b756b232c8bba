//! Error types for the embeddings core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for embeddings operations.
pub type Result<T> = std::result::Result<T, EmbeddingsError>;

/// Errors that can occur while loading models or computing embeddings.
#[derive(Error, Debug)]
pub enum EmbeddingsError {
    /// An expected file is absent from a model folder.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Malformed JSON, vocabulary, merges or word-vector file.
    #[error("invalid file: {0}")]
    InvalidFile(String),

    /// A required tensor name is absent from the weight bundle.
    #[error("missing weight key: {0}")]
    MissingWeightKey(String),

    /// A merged subword has no entry in the vocabulary.
    #[error("unknown token: {0:?}")]
    UnknownToken(String),

    /// A merges file line that does not hold exactly two symbols.
    #[error("malformed merge on line {line}: {content:?}")]
    MalformedMergeLine {
        /// One-based line number in the merges file.
        line: usize,
        /// The offending line.
        content: String,
    },

    /// A tensor does not have the shape implied by the model config.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A tensor stored with a dtype that cannot be used.
    #[error("unsupported dtype: {0}")]
    UnsupportedDtype(String),

    /// Caller-supplied argument outside its valid range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Failure inside the subword segmentation engine.
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// Reading tensor values back failed.
    #[error("materialize error: {0}")]
    Materialize(String),

    /// I/O error.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// Candle tensor error.
    #[error("tensor error: {0}")]
    TensorError(#[from] candle_core::Error),
}
