use thiserror::Error;

pub type Result<T> = std::result::Result<T, NoteSearchError>;

#[derive(Error, Debug)]
pub enum NoteSearchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Embedding service error: {0}")]
    Service(String),

    #[error("Invalid response from embedding service: expected {expected} vectors, got {actual}")]
    InvalidResponse { expected: usize, actual: usize },

    #[error("Invalid embedding: {0}")]
    InvalidEmbedding(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Content error: {0}")]
    Content(String),

    #[error("A bulk reindex is already in progress")]
    ReindexInProgress,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl NoteSearchError {
    /// Whether this error came from the remote embedding service.
    ///
    /// Malformed responses are reported the same way as transport failures.
    #[inline]
    pub fn is_service_error(&self) -> bool {
        matches!(
            self,
            Self::Service(_) | Self::InvalidResponse { .. } | Self::InvalidEmbedding(_)
        )
    }
}

pub mod cache;
pub mod commands;
pub mod config;
pub mod embeddings;
pub mod indexer;
pub mod search;
pub mod service;
pub mod vault;

#[cfg(test)]
pub(crate) mod testing;
