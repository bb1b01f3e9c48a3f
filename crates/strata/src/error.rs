//! Error types for Strata

use thiserror::Error;

/// Main error type for Strata operations
///
/// Only `Persistence`, `Configuration` and (in strict mode) `SessionState`
/// ever reach callers of [`crate::service::ContextService`]. The remaining
/// variants are produced by collaborators and absorbed by the service.
#[derive(Error, Debug)]
pub enum StrataError {
    /// Durable-store write failed; the interaction is not committed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Distributed cache unreachable or timed out
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Embedding generation failed or returned an unusable vector
    #[error("Embedding service error: {0}")]
    EmbeddingService(String),

    /// Invalid tier size, TTL, or unreadable configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operation on a session that is not active
    #[error("Session state error: {0}")]
    SessionState(String),

    /// Vector index insert or query failed
    #[error("Vector index error: {0}")]
    VectorIndex(String),

    /// Backend storage errors (file layout, missing data, etc.)
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StrataError {
    fn from(err: serde_json::Error) -> Self {
        StrataError::Serialization(err.to_string())
    }
}

/// Result type alias for Strata operations
pub type Result<T> = std::result::Result<T, StrataError>;
