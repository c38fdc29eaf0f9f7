// Vault module
// Document listing, reading, and change notifications for a notes directory


use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify::event::{EventKind, ModifyKind, RenameMode};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::{NoteSearchError, Result};

const EVENT_CHANNEL_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    File,
    Folder,
}

/// A document as identified by the content store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentRef {
    /// Stable key, the path relative to the vault root with `/` separators
    pub key: String,
    pub kind: DocumentKind,
}

impl DocumentRef {
    #[inline]
    pub fn file(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: DocumentKind::File,
        }
    }

    #[inline]
    pub fn folder(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: DocumentKind::Folder,
        }
    }

    #[inline]
    pub fn is_file(&self) -> bool {
        self.kind == DocumentKind::File
    }
}

/// Change notification from the content store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEvent {
    Created(DocumentRef),
    Modified(DocumentRef),
    Deleted(DocumentRef),
}

impl DocumentEvent {
    #[inline]
    pub fn document(&self) -> &DocumentRef {
        match self {
            Self::Created(document) | Self::Modified(document) | Self::Deleted(document) => {
                document
            }
        }
    }
}

/// Source of document contents
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Every document currently in the store, folders excluded
    async fn list(&self) -> Result<Vec<DocumentRef>>;

    async fn read(&self, document: &DocumentRef) -> Result<String>;
}

/// A directory of notes on the local filesystem
#[derive(Debug, Clone)]
pub struct FsVault {
    root: PathBuf,
}

impl FsVault {
    #[inline]
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();

        if !root.is_dir() {
            return Err(NoteSearchError::Content(format!(
                "Vault is not a directory: {}",
                root.display()
            )));
        }

        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Key for an absolute path inside the vault, `None` for paths outside it
    /// or inside hidden directories
    #[inline]
    pub fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let mut parts = Vec::new();

        for component in relative.components() {
            let Component::Normal(part) = component else {
                return None;
            };
            let part = part.to_str()?;
            if part.starts_with('.') {
                return None;
            }
            parts.push(part);
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }

    /// Resolve a key inside the vault.
    ///
    /// Every `/`-separated segment must be a plain name, so a key can never
    /// reach outside the root.
    #[inline]
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();

        for part in key.split('/') {
            let mut components = Path::new(part).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(name)), None) if name == part => path.push(name),
                _ => {
                    return Err(NoteSearchError::Content(format!(
                        "Invalid document key: {key}"
                    )));
                }
            }
        }

        Ok(path)
    }

    /// Start watching the vault; events arrive on the returned watcher
    #[inline]
    pub fn watch(&self) -> Result<VaultWatcher> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let vault = self.clone();

        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    for document_event in vault.translate(&event) {
                        if let Err(e) = event_tx.blocking_send(document_event) {
                            error!("Failed to forward vault event: {e}");
                        }
                    }
                }
                Err(e) => error!("Watch error: {e}"),
            },
        )
        .map_err(|e| NoteSearchError::Content(format!("Failed to create watcher: {e}")))?;

        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| {
                NoteSearchError::Content(format!(
                    "Failed to watch {}: {e}",
                    self.root.display()
                ))
            })?;

        debug!("Watching vault at {}", self.root.display());
        Ok(VaultWatcher {
            _watcher: watcher,
            events: event_rx,
        })
    }

    fn document_at(&self, path: &Path) -> Option<DocumentRef> {
        let key = self.key_for(path)?;
        // Removed paths cannot be inspected; treat them as files
        let kind = if path.is_dir() {
            DocumentKind::Folder
        } else {
            DocumentKind::File
        };
        Some(DocumentRef { key, kind })
    }

    fn translate(&self, event: &notify::Event) -> Vec<DocumentEvent> {
        let documents = || event.paths.iter().filter_map(|path| self.document_at(path));

        match event.kind {
            EventKind::Create(_) => documents().map(DocumentEvent::Created).collect(),
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) | EventKind::Remove(_) => {
                documents().map(DocumentEvent::Deleted).collect()
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                documents().map(DocumentEvent::Created).collect()
            }
            // Paths are [from, to]
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                let mut events = Vec::new();
                if let Some(from) = event.paths.first().and_then(|p| self.document_at(p)) {
                    events.push(DocumentEvent::Deleted(from));
                }
                if let Some(to) = event.paths.get(1).and_then(|p| self.document_at(p)) {
                    events.push(DocumentEvent::Created(to));
                }
                events
            }
            EventKind::Modify(ModifyKind::Metadata(_)) | EventKind::Access(_) => Vec::new(),
            EventKind::Modify(_) => documents().map(DocumentEvent::Modified).collect(),
            EventKind::Any | EventKind::Other => Vec::new(),
        }
    }
}

#[async_trait]
impl DocumentSource for FsVault {
    async fn list(&self) -> Result<Vec<DocumentRef>> {
        let mut documents = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| {
                NoteSearchError::Content(format!("Failed to list {}: {e}", dir.display()))
            })?;

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let Some(key) = self.key_for(&path) else {
                    continue;
                };

                let file_type = match entry.file_type().await {
                    Ok(file_type) => file_type,
                    Err(e) => {
                        warn!("Skipping {}: {}", path.display(), e);
                        continue;
                    }
                };

                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    documents.push(DocumentRef::file(key));
                }
            }
        }

        documents.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(documents)
    }

    async fn read(&self, document: &DocumentRef) -> Result<String> {
        let path = self.path_for(&document.key)?;
        tokio::fs::read_to_string(&path).await.map_err(|e| {
            NoteSearchError::Content(format!("Failed to read {}: {e}", document.key))
        })
    }
}

/// Live change feed for a vault; watching stops when this is dropped
#[derive(Debug)]
pub struct VaultWatcher {
    _watcher: RecommendedWatcher,
    events: mpsc::Receiver<DocumentEvent>,
}

impl VaultWatcher {
    /// Next document event, `None` once the watcher has shut down
    #[inline]
    pub async fn next_event(&mut self) -> Option<DocumentEvent> {
        self.events.recv().await
    }
}
