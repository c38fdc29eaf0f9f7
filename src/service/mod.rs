// Service module
// Single entry point tying the index, search, and live updates together


use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::Result;
use crate::cache::{IndexCache, SnapshotStore};
use crate::config::Config;
use crate::embeddings::openai::highlight_in_context;
use crate::embeddings::{EmbeddingProvider, QueryResult};
use crate::indexer::{BulkReindexController, Debouncer, IndexOutcome, Indexer};
use crate::search::{QueryService, QuerySession};
use crate::vault::{DocumentEvent, DocumentRef, DocumentSource};

/// Semantic search over a document source.
///
/// Live changes are fed in through [`EmbeddingSearch::handle_event`]; every
/// update for a given document runs through one per-key queue, so two index
/// attempts for the same document never overlap.
pub struct EmbeddingSearch {
    provider: Arc<dyn EmbeddingProvider>,
    source: Arc<dyn DocumentSource>,
    store: Arc<dyn SnapshotStore>,
    indexer: Indexer,
    queries: QueryService,
    reindex: BulkReindexController,
    updates: Debouncer<String>,
    update_delay: Duration,
    ready: AtomicBool,
}

impl EmbeddingSearch {
    /// Restore the cache from `store` and build the service around it
    #[inline]
    pub async fn open(
        provider: Arc<dyn EmbeddingProvider>,
        source: Arc<dyn DocumentSource>,
        store: Arc<dyn SnapshotStore>,
        config: &Config,
    ) -> Result<Self> {
        let cache = Arc::new(IndexCache::restore(store.as_ref()).await);
        Self::new(provider, source, store, cache, config)
    }

    #[inline]
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        source: Arc<dyn DocumentSource>,
        store: Arc<dyn SnapshotStore>,
        cache: Arc<IndexCache>,
        config: &Config,
    ) -> Result<Self> {
        let indexer = Indexer::new(
            Arc::clone(&provider),
            Arc::clone(&cache),
            config.indexing.clone(),
        )?;
        let queries = QueryService::new(Arc::clone(&provider), cache, config.search.clone());
        let updates = Debouncer::new();
        let reindex =
            BulkReindexController::new(indexer.clone(), Arc::clone(&source), Arc::clone(&store))
                .with_debouncer(updates.clone());

        Ok(Self {
            provider,
            source,
            store,
            indexer,
            queries,
            reindex,
            updates,
            update_delay: config.indexing.update_debounce(),
            ready: AtomicBool::new(false),
        })
    }

    /// Start accepting change events
    #[inline]
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        info!("Accepting document events");
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn cache(&self) -> &Arc<IndexCache> {
        self.indexer.cache()
    }

    #[inline]
    pub fn reindex(&self) -> &BulkReindexController {
        &self.reindex
    }

    #[inline]
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<QueryResult>> {
        self.queries.search(query, limit).await
    }

    #[inline]
    pub fn default_limit(&self) -> usize {
        self.queries.default_limit()
    }

    #[inline]
    pub fn query_session(&self) -> QuerySession {
        self.queries.session()
    }

    /// Read, embed, and store one document, then save the cache
    #[inline]
    pub async fn index_document(&self, key: &str) -> Result<IndexOutcome> {
        self.updates
            .run_exclusive(key.to_string(), self.refresh(key))
            .await
    }

    /// Drop a document from the index; the cache is saved only if it changed
    #[inline]
    pub async fn remove_document(&self, key: &str) -> bool {
        self.updates
            .run_exclusive(key.to_string(), self.evict(key))
            .await
    }

    #[inline]
    pub fn indexed_keys(&self) -> BTreeSet<String> {
        self.cache().keys()
    }

    /// Swap the service credential; later requests use it immediately
    #[inline]
    pub fn reconfigure(&self, credential: &str) {
        self.provider.reconfigure(credential);
        info!("Embedding service credential updated");
    }

    /// Ask what `selection` means where it first appears in `document_text`
    #[inline]
    pub async fn explain_in_context(&self, document_text: &str, selection: &str) -> Result<String> {
        let (highlighted, context) = highlight_in_context(document_text, selection);
        if highlighted.is_empty() {
            return Ok(String::new());
        }

        self.provider.explain(&context, &highlighted).await
    }

    /// Route a change notification.
    ///
    /// Creations are indexed right away, modifications after the update
    /// delay, and deletions remove the entry. Returns whether the event was
    /// accepted; events before [`EmbeddingSearch::mark_ready`] are ignored.
    #[inline]
    pub fn handle_event(self: &Arc<Self>, event: DocumentEvent) -> bool {
        if !self.is_ready() {
            debug!("Ignoring event before ready: {:?}", event);
            return false;
        }

        let document = event.document();
        if !document.is_file() || !self.indexer.is_indexable(&document.key) {
            return false;
        }

        let key = document.key.clone();
        let service = Arc::clone(self);

        match event {
            DocumentEvent::Created(_) => {
                self.updates.schedule(key.clone(), Duration::ZERO, move || async move {
                    service.apply_update(&key).await;
                });
            }
            DocumentEvent::Modified(_) => {
                self.updates
                    .schedule(key.clone(), self.update_delay, move || async move {
                        service.apply_update(&key).await;
                    });
            }
            // Replaces any pending update so a stale index cannot follow the removal
            DocumentEvent::Deleted(_) => {
                self.updates.schedule(key.clone(), Duration::ZERO, move || async move {
                    service.evict(&key).await;
                });
            }
        }

        true
    }

    /// Updates waiting for their quiet period
    #[inline]
    pub fn pending_updates(&self) -> usize {
        self.updates.pending_count()
    }

    #[inline]
    pub async fn save(&self) -> Result<()> {
        self.cache()
            .persist(self.store.as_ref(), self.provider.model())
            .await
    }

    /// Drop pending updates and write the cache one last time
    #[inline]
    pub async fn shutdown(&self) -> Result<()> {
        self.ready.store(false, Ordering::SeqCst);
        let dropped = self.updates.cancel_all();
        if dropped > 0 {
            info!("Dropped {} pending updates at shutdown", dropped);
        }
        self.save().await
    }

    // `refresh` and `evict` expect the caller to hold the run lock for `key`

    async fn refresh(&self, key: &str) -> Result<IndexOutcome> {
        if !self.indexer.is_indexable(key) {
            return Ok(IndexOutcome::Skipped);
        }

        let text = self.source.read(&DocumentRef::file(key)).await?;
        let outcome = self.indexer.index_document(key, &text).await?;

        if matches!(outcome, IndexOutcome::Indexed { .. }) {
            self.save_logged().await;
        }
        Ok(outcome)
    }

    async fn evict(&self, key: &str) -> bool {
        let removed = self.indexer.remove_document(key);
        if removed {
            self.save_logged().await;
        }
        removed
    }

    async fn apply_update(&self, key: &str) {
        if let Err(e) = self.refresh(key).await {
            error!("Failed to index {}: {}", key, e);
        }
    }

    async fn save_logged(&self) {
        if let Err(e) = self.save().await {
            warn!("Failed to save embeddings, will retry on next change: {}", e);
        }
    }
}
