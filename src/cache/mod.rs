// Embedding cache module
// In-memory store of document embeddings and its persisted snapshot

pub mod snapshot;

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::embeddings::Embedding;
use crate::{NoteSearchError, Result};

pub use snapshot::{JsonFileStore, MemoryStore, Snapshot, SnapshotStore};

/// Cached embeddings of one document, one vector per chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEmbedding {
    #[serde(default, alias = "notePath")]
    pub document_key: String,
    /// Older snapshots stored one flat vector per document under `embeddings`
    #[serde(default, alias = "embeddings", deserialize_with = "one_or_many_vectors")]
    pub chunk_vectors: Vec<Embedding>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<Embedding>),
    One(Embedding),
}

fn one_or_many_vectors<'de, D>(deserializer: D) -> std::result::Result<Vec<Embedding>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::Many(vectors) => vectors,
        OneOrMany::One(vector) => vec![vector],
    })
}

impl DocumentEmbedding {
    /// Build an entry, rejecting empty vector lists and mixed dimensions
    #[inline]
    pub fn new(document_key: impl Into<String>, chunk_vectors: Vec<Embedding>) -> Result<Self> {
        let entry = Self {
            document_key: document_key.into(),
            chunk_vectors,
        };
        entry.validate()?;
        Ok(entry)
    }

    #[inline]
    pub fn validate(&self) -> Result<()> {
        let Some(first) = self.chunk_vectors.first() else {
            return Err(NoteSearchError::InvalidEmbedding(format!(
                "{} has no chunk vectors",
                self.document_key
            )));
        };

        if first.is_empty() {
            return Err(NoteSearchError::InvalidEmbedding(format!(
                "{} has a zero-length vector",
                self.document_key
            )));
        }

        if let Some(mismatch) = self.chunk_vectors.iter().find(|v| v.len() != first.len()) {
            return Err(NoteSearchError::InvalidEmbedding(format!(
                "{} mixes vector dimensions {} and {}",
                self.document_key,
                first.len(),
                mismatch.len()
            )));
        }

        Ok(())
    }

    /// Dimensionality shared by every chunk vector
    #[inline]
    pub fn dimension(&self) -> usize {
        self.chunk_vectors.first().map_or(0, Vec::len)
    }
}

/// Shared map from document key to its embeddings.
///
/// Entries are immutable once stored; an update swaps in a new `Arc`, so a
/// reader holding an entry never sees a half-written vector list.
#[derive(Debug, Default)]
pub struct IndexCache {
    entries: RwLock<BTreeMap<String, Arc<DocumentEmbedding>>>,
    /// Held from taking a snapshot until it is saved
    persisting: tokio::sync::Mutex<()>,
}

impl IndexCache {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a cache from a snapshot, dropping entries that fail validation
    #[inline]
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut entries = BTreeMap::new();

        for (key, mut entry) in snapshot.documents {
            if entry.document_key.is_empty() {
                entry.document_key.clone_from(&key);
            }

            match entry.validate() {
                Ok(()) => {
                    entries.insert(key, Arc::new(entry));
                }
                Err(e) => warn!("Dropping invalid cached entry {}: {}", key, e),
            }
        }

        Self {
            entries: RwLock::new(entries),
            persisting: tokio::sync::Mutex::default(),
        }
    }

    /// Load the cache from `store`, starting empty if nothing usable is stored
    #[inline]
    pub async fn restore(store: &dyn SnapshotStore) -> Self {
        match store.load().await {
            Ok(Some(snapshot)) => {
                let cache = Self::from_snapshot(snapshot);
                info!("Restored {} cached document embeddings", cache.len());
                cache
            }
            Ok(None) => {
                debug!("No embedding snapshot found, starting with an empty cache");
                Self::new()
            }
            Err(e) => {
                warn!("Failed to load embedding snapshot, starting empty: {}", e);
                Self::new()
            }
        }
    }

    /// Serialize the current contents
    #[inline]
    pub fn to_snapshot(&self, model: &str) -> Snapshot {
        let documents = self
            .read()
            .iter()
            .map(|(key, entry)| (key.clone(), DocumentEmbedding::clone(entry)))
            .collect();

        Snapshot::new(model, documents)
    }

    /// Write the current contents to `store`
    #[inline]
    pub async fn persist(&self, store: &dyn SnapshotStore, model: &str) -> Result<()> {
        // A later snapshot must never be overwritten by an earlier one
        let _persisting = self.persisting.lock().await;
        let snapshot = self.to_snapshot(model);
        store.save(&snapshot).await?;
        debug!("Persisted {} document embeddings", snapshot.documents.len());
        Ok(())
    }

    /// Insert or replace the entry for `entry.document_key`
    #[inline]
    pub fn upsert(&self, entry: DocumentEmbedding) -> Result<Option<Arc<DocumentEmbedding>>> {
        entry.validate()?;
        let key = entry.document_key.clone();
        Ok(self.write().insert(key, Arc::new(entry)))
    }

    /// Remove the entry for `key`; returns whether one existed
    #[inline]
    pub fn delete(&self, key: &str) -> bool {
        self.write().remove(key).is_some()
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<Arc<DocumentEmbedding>> {
        self.read().get(key).cloned()
    }

    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    #[inline]
    pub fn keys(&self) -> BTreeSet<String> {
        self.read().keys().cloned().collect()
    }

    /// Point-in-time view of every entry, in key order
    #[inline]
    pub fn all(&self) -> BTreeMap<String, Arc<DocumentEmbedding>> {
        self.read().clone()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Arc<DocumentEmbedding>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Arc<DocumentEmbedding>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}
