use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::embeddings::{Embedding, EmbeddingProvider};
use crate::vault::{DocumentRef, DocumentSource};
use crate::{NoteSearchError, Result};

/// Deterministic in-process provider: letter-frequency vectors plus a bias term
#[derive(Debug, Default)]
pub(crate) struct FakeProvider {
    calls: Mutex<Vec<Vec<String>>>,
    failing: Mutex<HashSet<String>>,
    credential: Mutex<String>,
    explain_calls: AtomicUsize,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    started: Mutex<Vec<Instant>>,
}

impl FakeProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Fail any request containing a text that starts with `prefix`
    pub(crate) fn fail_on(&self, prefix: &str) {
        lock(&self.failing).insert(prefix.to_string());
    }

    pub(crate) fn calls(&self) -> Vec<Vec<String>> {
        lock(&self.calls).clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    pub(crate) fn explain_count(&self) -> usize {
        self.explain_calls.load(Ordering::SeqCst)
    }

    /// Most embed requests that were ever running at once
    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// When each embed request started, in call order
    pub(crate) fn started(&self) -> Vec<Instant> {
        lock(&self.started).clone()
    }

    pub(crate) fn credential(&self) -> String {
        lock(&self.credential).clone()
    }

    pub(crate) fn vector_for(text: &str) -> Embedding {
        let mut vector = vec![0.0_f32; 27];
        for c in text.chars().filter(char::is_ascii_alphabetic) {
            let slot = (c.to_ascii_lowercase() as usize) - ('a' as usize);
            vector[slot] += 1.0;
        }
        vector[26] = 1.0;
        vector
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl EmbeddingProvider for FakeProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        lock(&self.calls).push(texts.to_vec());
        lock(&self.started).push(Instant::now());

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failing = lock(&self.failing).clone();
        if texts
            .iter()
            .any(|text| failing.iter().any(|prefix| text.starts_with(prefix)))
        {
            return Err(NoteSearchError::Service("simulated failure".to_string()));
        }

        Ok(texts.iter().map(|text| Self::vector_for(text)).collect())
    }

    async fn explain(&self, context: &str, highlighted: &str) -> Result<String> {
        self.explain_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{highlighted} in {} chars", context.len()))
    }

    fn reconfigure(&self, credential: &str) {
        *lock(&self.credential) = credential.trim().to_string();
    }

    fn model(&self) -> &str {
        "fake-embedding"
    }
}

/// Document source backed by a map of key to text
#[derive(Debug, Default)]
pub(crate) struct MemorySource {
    documents: Mutex<BTreeMap<String, String>>,
}

impl MemorySource {
    pub(crate) fn with_documents<'a>(documents: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let documents = documents
            .into_iter()
            .map(|(key, text)| (key.to_string(), text.to_string()))
            .collect();
        Self {
            documents: Mutex::new(documents),
        }
    }

    pub(crate) fn insert(&self, key: &str, text: &str) {
        lock(&self.documents).insert(key.to_string(), text.to_string());
    }

    pub(crate) fn remove(&self, key: &str) {
        lock(&self.documents).remove(key);
    }
}

#[async_trait]
impl DocumentSource for MemorySource {
    async fn list(&self) -> Result<Vec<DocumentRef>> {
        Ok(lock(&self.documents)
            .keys()
            .map(|key| DocumentRef::file(key.clone()))
            .collect())
    }

    async fn read(&self, document: &DocumentRef) -> Result<String> {
        lock(&self.documents)
            .get(&document.key)
            .cloned()
            .ok_or_else(|| NoteSearchError::Content(format!("No such document: {}", document.key)))
    }
}
