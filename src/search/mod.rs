// Search module
// Embeds queries and ranks cached documents against them


use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, error};

use crate::cache::IndexCache;
use crate::config::SearchConfig;
use crate::embeddings::{Embedding, EmbeddingProvider, QueryResult, rank};
use crate::{NoteSearchError, Result};

/// Answers similarity queries over the embedding cache
#[derive(Clone)]
pub struct QueryService {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<IndexCache>,
    config: SearchConfig,
}

impl QueryService {
    #[inline]
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        cache: Arc<IndexCache>,
        config: SearchConfig,
    ) -> Self {
        Self {
            provider,
            cache,
            config,
        }
    }

    #[inline]
    pub fn default_limit(&self) -> usize {
        self.config.default_limit
    }

    /// Rank every cached document against `query`.
    ///
    /// A blank query returns no results without contacting the service.
    #[inline]
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<QueryResult>> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let vectors = self.provider.embed(&[query.to_string()]).await?;
        let [query_vector] = <[Embedding; 1]>::try_from(vectors).map_err(|vectors| {
            NoteSearchError::InvalidResponse {
                expected: 1,
                actual: vectors.len(),
            }
        })?;

        let entries = self.cache.all();
        let results = rank(
            entries
                .iter()
                .map(|(key, entry)| (key.as_str(), entry.chunk_vectors.as_slice())),
            &query_vector,
            limit,
        );

        debug!(
            "Query matched {} of {} documents",
            results.len(),
            entries.len()
        );
        Ok(results)
    }

    /// Start an interactive session whose searches are debounced
    #[inline]
    pub fn session(&self) -> QuerySession {
        QuerySession {
            service: self.clone(),
            delay: self.config.debounce(),
            latest: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// Debounced searches for one interactive query box.
///
/// Only the most recent call within the debounce delay runs; earlier calls
/// resolve to `None`. Failures are logged and surface as an empty result.
#[derive(Clone)]
pub struct QuerySession {
    service: QueryService,
    delay: Duration,
    latest: Arc<AtomicU64>,
}

impl QuerySession {
    #[inline]
    pub async fn search(&self, query: &str, limit: usize) -> Option<Vec<QueryResult>> {
        let generation = self.latest.fetch_add(1, Ordering::SeqCst) + 1;

        tokio::time::sleep(self.delay).await;
        if self.is_superseded(generation) {
            return None;
        }

        let results = match self.service.search(query, limit).await {
            Ok(results) => results,
            Err(e) => {
                error!("Search failed: {}", e);
                Vec::new()
            }
        };

        // A newer query may have started while this one was in flight
        if self.is_superseded(generation) {
            return None;
        }
        Some(results)
    }

    fn is_superseded(&self, generation: u64) -> bool {
        self.latest.load(Ordering::SeqCst) != generation
    }
}
