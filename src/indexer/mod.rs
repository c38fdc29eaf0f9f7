// Indexer module
// Turns document text into cached chunk embeddings

pub mod bulk;
pub mod debounce;


use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::{DocumentEmbedding, IndexCache};
use crate::config::IndexingConfig;
use crate::embeddings::{EmbeddingProvider, Tokenizer};
use crate::{NoteSearchError, Result};

pub use bulk::{
    AutoConfirm, BulkReindexController, CancelHandle, ReindexEstimate, ReindexObserver,
    ReindexOutcome, ReindexProgress, ReindexState, ReindexSummary,
};
pub use debounce::Debouncer;

/// Result of a single index attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// The document is not an indexable content type
    Skipped,
    Indexed { chunks: usize },
}

/// Chunks documents, embeds them in one request, and stores the vectors
#[derive(Clone)]
pub struct Indexer {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<IndexCache>,
    tokenizer: Tokenizer,
    config: IndexingConfig,
}

impl Indexer {
    #[inline]
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        cache: Arc<IndexCache>,
        config: IndexingConfig,
    ) -> Result<Self> {
        Ok(Self {
            provider,
            cache,
            tokenizer: Tokenizer::cl100k()?,
            config,
        })
    }

    #[inline]
    pub fn cache(&self) -> &Arc<IndexCache> {
        &self.cache
    }

    #[inline]
    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    #[inline]
    pub fn config(&self) -> &IndexingConfig {
        &self.config
    }

    #[inline]
    pub fn is_indexable(&self, key: &str) -> bool {
        self.config.is_indexable(key)
    }

    /// Tokens the service will be billed for when indexing this document
    #[inline]
    pub fn estimate_tokens(&self, key: &str, text: &str) -> usize {
        self.tokenizer.count_tokens(&embedding_input(key, text))
    }

    /// Embed `text` and replace the cached entry for `key`.
    ///
    /// The cache is only written once every chunk has a vector; any failure
    /// leaves the previous entry (if any) in place.
    #[inline]
    pub async fn index_document(&self, key: &str, text: &str) -> Result<IndexOutcome> {
        if !self.is_indexable(key) {
            debug!("Skipping non-indexable document: {}", key);
            return Ok(IndexOutcome::Skipped);
        }

        let chunks = self
            .tokenizer
            .chunk(&embedding_input(key, text), self.config.chunk_token_bound())?;
        let texts: Vec<String> = chunks.into_iter().map(|chunk| chunk.text).collect();

        debug!("Embedding {} chunks for {}", texts.len(), key);
        let vectors = self.provider.embed(&texts).await?;

        if vectors.len() != texts.len() {
            return Err(NoteSearchError::InvalidResponse {
                expected: texts.len(),
                actual: vectors.len(),
            });
        }

        let entry = DocumentEmbedding::new(key, vectors)?;
        self.cache.upsert(entry)?;

        info!("Indexed {} ({} chunks)", key, texts.len());
        Ok(IndexOutcome::Indexed {
            chunks: texts.len(),
        })
    }

    /// Drop the cached entry for `key`; returns whether one existed
    #[inline]
    pub fn remove_document(&self, key: &str) -> bool {
        let removed = self.cache.delete(key);
        if removed {
            info!("Removed {} from the index", key);
        }
        removed
    }
}

/// The key is embedded along with the body so short notes still carry their title
fn embedding_input(key: &str, text: &str) -> String {
    format!("{key}\n{text}")
}
