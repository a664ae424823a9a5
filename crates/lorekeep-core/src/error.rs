//! Error types for lorekeep.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using lorekeep's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for lorekeep operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Notebook item not found
    #[error("Item not found: {0}")]
    ItemNotFound(Uuid),

    /// Index job not found
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    /// Embedding provider returned a non-success status
    #[error("Embedding request failed: status {status}: {body}")]
    EmbeddingFailed { status: u16, body: String },

    /// Embedding provider returned no vector
    #[error("Embedding provider returned an empty vector")]
    EmbeddingEmpty,

    /// Embedding dimension does not match the collection's configured size
    #[error("Embedding dimension mismatch: expected {expected} got {actual}")]
    EmbeddingDimMismatch { expected: usize, actual: usize },

    /// Rerank provider failed
    #[error("Rerank error: {0}")]
    Rerank(String),

    /// Vector store operation failed
    #[error("Vector store error: {0}")]
    VectorStore(String),

    /// Provider capability missing or disabled for this tenant
    #[error("Capability disabled: {0}")]
    CapabilityDisabled(String),

    /// File type has no registered parser
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// Source extraction failed
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input, rejected before any side effect
    #[error("Invalid input: {0}")]
    Validation(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
