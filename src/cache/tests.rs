use super::*;
use std::collections::BTreeMap;

fn entry(key: &str, vectors: Vec<Vec<f32>>) -> DocumentEmbedding {
    DocumentEmbedding::new(key, vectors).expect("valid entry")
}

#[test]
fn entry_validation() {
    assert!(DocumentEmbedding::new("a.md", vec![vec![1.0, 2.0], vec![3.0, 4.0]]).is_ok());

    let empty = DocumentEmbedding::new("a.md", Vec::new());
    assert!(matches!(empty, Err(NoteSearchError::InvalidEmbedding(_))));

    let zero_length = DocumentEmbedding::new("a.md", vec![Vec::new()]);
    assert!(matches!(zero_length, Err(NoteSearchError::InvalidEmbedding(_))));

    let mixed = DocumentEmbedding::new("a.md", vec![vec![1.0, 2.0], vec![3.0]]);
    assert!(matches!(mixed, Err(NoteSearchError::InvalidEmbedding(_))));
}

#[test]
fn upsert_replaces_whole_entry() {
    let cache = IndexCache::new();
    assert!(cache.is_empty());

    let previous = cache
        .upsert(entry("a.md", vec![vec![1.0, 0.0], vec![0.0, 1.0]]))
        .expect("upsert succeeds");
    assert!(previous.is_none());

    let held = cache.get("a.md").expect("entry exists");

    let previous = cache
        .upsert(entry("a.md", vec![vec![0.5, 0.5]]))
        .expect("upsert succeeds");
    assert_eq!(previous.as_deref(), Some(&*held));

    // A reader holding the old entry still sees it intact
    assert_eq!(held.chunk_vectors.len(), 2);
    let current = cache.get("a.md").expect("entry exists");
    assert_eq!(current.chunk_vectors, vec![vec![0.5, 0.5]]);
    assert_eq!(cache.len(), 1);
}

#[test]
fn upsert_rejects_invalid_entry() {
    let cache = IndexCache::new();
    let invalid = DocumentEmbedding {
        document_key: "bad.md".to_string(),
        chunk_vectors: Vec::new(),
    };

    assert!(cache.upsert(invalid).is_err());
    assert!(!cache.contains("bad.md"));
}

#[test]
fn delete_is_idempotent() {
    let cache = IndexCache::new();
    cache
        .upsert(entry("a.md", vec![vec![1.0]]))
        .expect("upsert succeeds");

    assert!(cache.delete("a.md"));
    assert!(!cache.delete("a.md"));
    assert!(!cache.delete("never-existed.md"));
    assert!(cache.is_empty());
}

#[test]
fn keys_and_all_are_ordered() {
    let cache = IndexCache::new();
    for key in ["c.md", "a.md", "b.md"] {
        cache
            .upsert(entry(key, vec![vec![1.0]]))
            .expect("upsert succeeds");
    }

    let keys: Vec<String> = cache.keys().into_iter().collect();
    assert_eq!(keys, vec!["a.md", "b.md", "c.md"]);

    let all: Vec<String> = cache.all().into_keys().collect();
    assert_eq!(all, keys);
}

#[test]
fn snapshot_round_trip_drops_invalid_entries() {
    let mut documents = BTreeMap::new();
    documents.insert("good.md".to_string(), entry("good.md", vec![vec![1.0, 0.0]]));
    documents.insert(
        "empty.md".to_string(),
        DocumentEmbedding {
            document_key: "empty.md".to_string(),
            chunk_vectors: Vec::new(),
        },
    );
    documents.insert(
        "unnamed.md".to_string(),
        DocumentEmbedding {
            document_key: String::new(),
            chunk_vectors: vec![vec![0.0, 1.0]],
        },
    );

    let cache = IndexCache::from_snapshot(Snapshot::new("model", documents));
    assert_eq!(cache.len(), 2);
    assert!(!cache.contains("empty.md"));
    assert_eq!(
        cache.get("unnamed.md").expect("entry kept").document_key,
        "unnamed.md"
    );

    let snapshot = cache.to_snapshot("model");
    assert_eq!(snapshot.model, "model");
    assert_eq!(snapshot.documents.len(), 2);
}

#[tokio::test]
async fn restore_and_persist_through_store() {
    let store = MemoryStore::new();
    let cache = IndexCache::restore(&store).await;
    assert!(cache.is_empty());

    cache
        .upsert(entry("a.md", vec![vec![1.0, 0.0]]))
        .expect("upsert succeeds");
    cache
        .persist(&store, "text-embedding-ada-002")
        .await
        .expect("persist succeeds");
    assert_eq!(store.save_count(), 1);

    let restored = IndexCache::restore(&store).await;
    assert_eq!(restored.keys(), cache.keys());
}

#[tokio::test]
async fn restore_falls_back_to_empty_on_corrupt_snapshot() {
    let temp_dir = tempfile::TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("embeddings.json");
    tokio::fs::write(&path, "garbage")
        .await
        .expect("should write file");

    let cache = IndexCache::restore(&JsonFileStore::new(&path)).await;
    assert!(cache.is_empty());
}

/// Takes longer to save snapshots that still contain `slow_key`
struct SlowStore {
    inner: MemoryStore,
    slow_key: &'static str,
}

#[async_trait::async_trait]
impl SnapshotStore for SlowStore {
    async fn load(&self) -> Result<Option<Snapshot>> {
        self.inner.load().await
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        if snapshot.documents.contains_key(self.slow_key) {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        self.inner.save(snapshot).await
    }
}

#[tokio::test(start_paused = true)]
async fn overlapping_persists_keep_the_newest_state() {
    let cache = Arc::new(IndexCache::new());
    let store = Arc::new(SlowStore {
        inner: MemoryStore::new(),
        slow_key: "a.md",
    });
    cache
        .upsert(entry("a.md", vec![vec![1.0, 0.0]]))
        .expect("upsert succeeds");

    let first = {
        let cache = Arc::clone(&cache);
        let store = Arc::clone(&store);
        tokio::spawn(async move { cache.persist(store.as_ref(), "model").await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    assert!(cache.delete("a.md"));
    cache
        .persist(store.as_ref(), "model")
        .await
        .expect("persist succeeds");
    first
        .await
        .expect("task should not panic")
        .expect("persist succeeds");

    assert_eq!(store.inner.save_count(), 2);
    let saved = store.inner.latest().expect("snapshot saved");
    assert!(saved.documents.is_empty());
}
