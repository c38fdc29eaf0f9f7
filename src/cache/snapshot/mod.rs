
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::DocumentEmbedding;
use crate::{NoteSearchError, Result};

pub const SNAPSHOT_VERSION: u32 = 1;

/// Serialized form of the embedding cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub documents: BTreeMap<String, DocumentEmbedding>,
}

const fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

impl Default for Snapshot {
    #[inline]
    fn default() -> Self {
        Self::new("", BTreeMap::new())
    }
}

impl Snapshot {
    #[inline]
    pub fn new(model: &str, documents: BTreeMap<String, DocumentEmbedding>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            model: model.to_string(),
            saved_at: Some(Utc::now()),
            documents,
        }
    }
}

/// Durable storage for cache snapshots
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the last saved snapshot, `None` if nothing was ever saved
    async fn load(&self) -> Result<Option<Snapshot>>;

    async fn save(&self, snapshot: &Snapshot) -> Result<()>;
}

/// Snapshot stored as a single JSON file.
///
/// Saves through one store (or its clones) are serialized, so they never
/// share the temp file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl JsonFileStore {
    #[inline]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::default(),
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn load(&self) -> Result<Option<Snapshot>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(NoteSearchError::Persistence(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        let snapshot: Snapshot = serde_json::from_str(&content).map_err(|e| {
            NoteSearchError::Persistence(format!("Failed to parse {}: {}", self.path.display(), e))
        })?;

        if snapshot.version > SNAPSHOT_VERSION {
            return Err(NoteSearchError::Persistence(format!(
                "Unsupported snapshot version {} in {}",
                snapshot.version,
                self.path.display()
            )));
        }

        debug!(
            "Loaded snapshot with {} documents from {}",
            snapshot.documents.len(),
            self.path.display()
        );
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let persistence_error = |action: &str, e: &dyn std::fmt::Display| {
            NoteSearchError::Persistence(format!("Failed to {action} {}: {e}", self.path.display()))
        };

        let json = serde_json::to_vec(snapshot).map_err(|e| persistence_error("serialize", &e))?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| persistence_error("create directory for", &e))?;
        }

        let _writing = self.write_lock.lock().await;

        // Replace the file in one step so a crash never leaves a truncated snapshot
        let temp_path = self.temp_path();
        tokio::fs::write(&temp_path, &json)
            .await
            .map_err(|e| persistence_error("write", &e))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| persistence_error("replace", &e))?;

        Ok(())
    }
}

/// Snapshot kept in memory, for callers that do not persist to disk
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Mutex<Option<Snapshot>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of completed saves
    #[inline]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn latest(&self) -> Option<Snapshot> {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load(&self) -> Result<Option<Snapshot>> {
        Ok(self.latest())
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
