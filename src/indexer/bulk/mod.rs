
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{Debouncer, IndexOutcome, Indexer};
use crate::cache::SnapshotStore;
use crate::vault::{DocumentRef, DocumentSource};
use crate::{NoteSearchError, Result};

/// Work a full reindex would do, shown before asking for confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReindexEstimate {
    /// Indexable documents in the corpus
    pub documents: usize,
    /// Tokens across every indexable document
    pub total_tokens: usize,
    /// Documents already in the cache, which will not be re-embedded
    pub already_indexed: usize,
}

impl ReindexEstimate {
    #[inline]
    pub fn pending(&self) -> usize {
        self.documents.saturating_sub(self.already_indexed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReindexProgress {
    pub processed: usize,
    pub total: usize,
    /// Document that just finished
    pub document_key: String,
    pub succeeded: bool,
}

impl ReindexProgress {
    #[inline]
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.processed as f64 / self.total as f64 * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReindexOutcome {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReindexSummary {
    pub outcome: ReindexOutcome,
    /// Documents that needed indexing when the run started
    pub total: usize,
    pub indexed: usize,
    pub failed: usize,
    pub checkpoints: usize,
}

impl ReindexSummary {
    fn declined() -> Self {
        Self {
            outcome: ReindexOutcome::Cancelled,
            total: 0,
            indexed: 0,
            failed: 0,
            checkpoints: 0,
        }
    }

    #[inline]
    pub fn processed(&self) -> usize {
        self.indexed + self.failed
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReindexState {
    Idle,
    Estimating,
    AwaitingConfirmation(ReindexEstimate),
    Running(ReindexProgress),
    Completed(ReindexSummary),
    Cancelled(ReindexSummary),
}

/// Receives the estimate for confirmation and per-document progress
#[async_trait]
pub trait ReindexObserver: Send + Sync {
    /// Return `false` to abandon the run before any document is indexed
    async fn confirm(&self, estimate: &ReindexEstimate) -> bool;

    fn progress(&self, _progress: &ReindexProgress) {}
}

/// Observer that accepts every estimate
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

#[async_trait]
impl ReindexObserver for AutoConfirm {
    async fn confirm(&self, _estimate: &ReindexEstimate) -> bool {
        true
    }
}

/// Requests cancellation of a running reindex; takes effect between batches
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives a full, resumable reindex of a document source
pub struct BulkReindexController {
    indexer: Indexer,
    source: Arc<dyn DocumentSource>,
    store: Arc<dyn SnapshotStore>,
    state: watch::Sender<ReindexState>,
    cancel: CancelHandle,
    running: AtomicBool,
    /// Per-document run locks, shared with live updates
    updates: Debouncer<String>,
}

/// Clears the running flag and returns the machine to `Idle` however the run ends
struct RunGuard<'a> {
    controller: &'a BulkReindexController,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.controller.state.send_replace(ReindexState::Idle);
        self.controller.running.store(false, Ordering::SeqCst);
    }
}

impl BulkReindexController {
    #[inline]
    pub fn new(
        indexer: Indexer,
        source: Arc<dyn DocumentSource>,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        let (state, _) = watch::channel(ReindexState::Idle);
        Self {
            indexer,
            source,
            store,
            state,
            cancel: CancelHandle::default(),
            running: AtomicBool::new(false),
            updates: Debouncer::new(),
        }
    }

    /// Serialize each document's indexing with the updates queued on `updates`
    #[inline]
    #[must_use]
    pub fn with_debouncer(mut self, updates: Debouncer<String>) -> Self {
        self.updates = updates;
        self
    }

    #[inline]
    pub fn state(&self) -> ReindexState {
        self.state.borrow().clone()
    }

    /// Watch state transitions
    #[inline]
    pub fn subscribe(&self) -> watch::Receiver<ReindexState> {
        self.state.subscribe()
    }

    #[inline]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Estimate, confirm, then index every uncached document.
    ///
    /// Per-document failures are logged and skipped. The cache is saved every
    /// `checkpoint_interval` documents and once more at the end of the run,
    /// including a cancelled one.
    #[inline]
    pub async fn run(&self, observer: &dyn ReindexObserver) -> Result<ReindexSummary> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(NoteSearchError::ReindexInProgress);
        }
        let _guard = RunGuard { controller: self };
        self.cancel.reset();

        self.state.send_replace(ReindexState::Estimating);
        let (estimate, pending) = self.collect_pending().await?;
        info!(
            "Reindex estimate: {} documents, {} tokens, {} already indexed",
            estimate.documents, estimate.total_tokens, estimate.already_indexed
        );

        self.state
            .send_replace(ReindexState::AwaitingConfirmation(estimate));
        if !observer.confirm(&estimate).await {
            info!("Reindex declined");
            let summary = ReindexSummary::declined();
            self.state.send_replace(ReindexState::Cancelled(summary));
            return Ok(summary);
        }

        let summary = self.index_pending(&pending, observer).await;

        let terminal = match summary.outcome {
            ReindexOutcome::Completed => ReindexState::Completed(summary),
            ReindexOutcome::Cancelled => ReindexState::Cancelled(summary),
        };
        self.state.send_replace(terminal);

        info!(
            "Reindex {:?}: {} indexed, {} failed of {}",
            summary.outcome, summary.indexed, summary.failed, summary.total
        );
        Ok(summary)
    }

    /// Read every indexable document, count its tokens, and keep the uncached ones.
    ///
    /// Only the references are kept; each document is read again when its
    /// batch runs.
    async fn collect_pending(&self) -> Result<(ReindexEstimate, Vec<DocumentRef>)> {
        let documents = self.source.list().await?;
        let cache = self.indexer.cache();

        let mut estimate = ReindexEstimate {
            documents: 0,
            total_tokens: 0,
            already_indexed: 0,
        };
        let mut pending = Vec::new();

        for document in documents {
            if !document.is_file() || !self.indexer.is_indexable(&document.key) {
                continue;
            }

            let text = match self.source.read(&document).await {
                Ok(text) => text,
                Err(e) => {
                    warn!("Skipping unreadable document {}: {}", document.key, e);
                    continue;
                }
            };

            estimate.documents += 1;
            estimate.total_tokens += self.indexer.estimate_tokens(&document.key, &text);

            if cache.contains(&document.key) {
                estimate.already_indexed += 1;
            } else {
                pending.push(document);
            }
        }

        Ok((estimate, pending))
    }

    async fn index_pending(
        &self,
        pending: &[DocumentRef],
        observer: &dyn ReindexObserver,
    ) -> ReindexSummary {
        let batch_size = self.indexer.config().batch_size.max(1);
        let checkpoint_interval = self.indexer.config().checkpoint_interval.max(1);

        let mut summary = ReindexSummary {
            outcome: ReindexOutcome::Completed,
            total: pending.len(),
            indexed: 0,
            failed: 0,
            checkpoints: 0,
        };
        self.state.send_replace(ReindexState::Running(ReindexProgress {
            processed: 0,
            total: summary.total,
            document_key: String::new(),
            succeeded: true,
        }));

        for batch in pending.chunks(batch_size) {
            if self.cancel.is_cancelled() {
                info!("Reindex cancelled after {} documents", summary.processed());
                summary.outcome = ReindexOutcome::Cancelled;
                break;
            }

            let mut in_flight: FuturesUnordered<_> = batch
                .iter()
                .map(|document| async move {
                    let result = self
                        .updates
                        .run_exclusive(document.key.clone(), self.index_current(document))
                        .await;
                    (document, result)
                })
                .collect();

            while let Some((document, result)) = in_flight.next().await {
                let succeeded = match result {
                    Ok(_) => {
                        summary.indexed += 1;
                        true
                    }
                    Err(e) => {
                        error!("Failed to index {}: {}", document.key, e);
                        summary.failed += 1;
                        false
                    }
                };

                let progress = ReindexProgress {
                    processed: summary.processed(),
                    total: summary.total,
                    document_key: document.key.clone(),
                    succeeded,
                };
                observer.progress(&progress);
                self.state.send_replace(ReindexState::Running(progress));

                if summary.processed() % checkpoint_interval == 0 {
                    self.checkpoint(&mut summary).await;
                }
            }
        }

        self.checkpoint(&mut summary).await;
        summary
    }

    /// Index the document as it reads now; a live delete or edit that won
    /// the run lock first is already reflected in the source
    async fn index_current(&self, document: &DocumentRef) -> Result<IndexOutcome> {
        let text = self.source.read(document).await?;
        self.indexer.index_document(&document.key, &text).await
    }

    async fn checkpoint(&self, summary: &mut ReindexSummary) {
        let model = self.indexer.provider().model();
        match self.indexer.cache().persist(self.store.as_ref(), model).await {
            Ok(()) => {
                summary.checkpoints += 1;
                debug!("Checkpoint after {} documents", summary.processed());
            }
            Err(e) => warn!("Checkpoint failed, will retry at the next one: {}", e),
        }
    }
}
