//! Error taxonomy shared by every store backend and retrieval operation.

use thiserror::Error;

/// Errors surfaced by the retrieval core.
///
/// Storage backends wrap their own failures in [`RetrievalError::Storage`];
/// every other variant is a domain error the caller is expected to handle.
/// An empty search result is never an error.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// A chatbot, shared knowledge base, or revision does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A chunk, link, or revision references a scope that does not exist,
    /// or a chunk row carries an illegal scope combination.
    #[error("invalid scope: {0}")]
    InvalidScope(String),

    /// A stored or incoming vector does not match the configured model.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimensionMismatch { expected: usize, actual: usize },

    /// The request payload is structurally valid but semantically empty or malformed.
    #[error("validation error: {0}")]
    Validation(String),

    /// The external embedding service failed.
    #[error("embedding service error: {0}")]
    Embedding(String),

    /// The caller cancelled the operation before it completed.
    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type Result<T, E = RetrievalError> = std::result::Result<T, E>;

impl RetrievalError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
