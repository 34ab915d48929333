//! Error types for the store boundary and the post repository.

use crate::types::DocumentId;
use thiserror::Error;

/// Errors raised by a document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Permission denied on collection: {0}")]
    PermissionDenied(String),

    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: DocumentId },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Errors raised by the post repository.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Passed through from the store untouched.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Malformed post document {id}: {source}")]
    Malformed {
        id: DocumentId,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type for repository operations.
pub type Result<T, E = FeedError> = std::result::Result<T, E>;
