//! Error types for the embeddings system.

use thiserror::Error;

/// Result type alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Errors that can occur in the embeddings system.
///
/// A single element that fails to embed is not an error: the backend returns
/// a zero vector for it and reports the position as degraded. An unknown
/// collection is not an error either; lookups return `None`, empty results or
/// `false`.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// Requested model is not in the catalog.
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// Model is known but its backend is unreachable or failed to load.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Remote backend did not answer within its bound.
    #[error("backend timed out after {timeout_secs}s")]
    BackendTimeout { timeout_secs: u64 },

    /// Collection is bound to a different embedding model.
    #[error("collection {collection} uses model {bound}, not {requested}")]
    ModelMismatch {
        collection: String,
        bound: String,
        requested: String,
    },

    /// A collection with this name already exists.
    #[error("collection already exists: {0}")]
    CollectionExists(String),

    /// Caller supplied inconsistent arguments.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// API request failed.
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// Invalid response from provider.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Similarity backend rejected an operation.
    #[error("index error: {0}")]
    Index(String),

    /// Configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration file could not be parsed.
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
