
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use url::Url;

use crate::config::OpenAiConfig;
use crate::embeddings::{Embedding, EmbeddingProvider};
use crate::{NoteSearchError, Result};

const EXPONENTIAL_BACKOFF_BASE: u64 = 2;
const HIGHLIGHT_MARKER: &str = "==";

/// Client for the OpenAI embeddings and chat completion endpoints
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    base_url: Url,
    embedding_model: String,
    completion_model: String,
    api_key: Arc<RwLock<String>>,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

impl OpenAiClient {
    #[inline]
    pub fn new(config: &OpenAiConfig) -> Result<Self> {
        let mut base_url = config
            .base_url()
            .map_err(|e| NoteSearchError::Config(e.to_string()))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            base_url,
            embedding_model: config.embedding_model.clone(),
            completion_model: config.completion_model.clone(),
            api_key: Arc::new(RwLock::new(config.resolved_api_key())),
            agent: build_agent(Duration::from_secs(config.timeout_seconds)),
            retry_attempts: config.retry_attempts.max(1),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Whether a credential is currently configured
    #[inline]
    pub fn has_api_key(&self) -> bool {
        !self.current_key().is_empty()
    }

    fn current_key(&self) -> String {
        self.api_key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| NoteSearchError::Config(format!("Failed to build {} URL: {}", path, e)))
    }

    /// POST `body` as JSON to `path` and decode the JSON response
    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let api_key = self.current_key();
        if api_key.is_empty() {
            return Err(NoteSearchError::Service(
                "OpenAI API key is not configured".to_string(),
            ));
        }

        let url = self.endpoint(path)?;
        let request_json = serde_json::to_string(body)
            .map_err(|e| NoteSearchError::Service(format!("Failed to serialize request: {}", e)))?;

        let agent = self.agent.clone();
        let retry_attempts = self.retry_attempts;
        let response_text = tokio::task::spawn_blocking(move || {
            make_request_with_retry(retry_attempts, url.as_str(), || {
                agent
                    .post(url.as_str())
                    .header("Authorization", format!("Bearer {}", api_key))
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
        })
        .await
        .map_err(|e| NoteSearchError::Service(format!("Request task failed: {}", e)))??;

        serde_json::from_str(&response_text).map_err(|e| {
            NoteSearchError::Service(format!("Failed to parse {} response: {}", path, e))
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Requesting {} embeddings from model {}",
            texts.len(),
            self.embedding_model
        );

        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input: texts,
        };
        let mut response: EmbeddingResponse = self.post_json("embeddings", &request).await?;

        if response.data.len() != texts.len() {
            return Err(NoteSearchError::InvalidResponse {
                expected: texts.len(),
                actual: response.data.len(),
            });
        }

        // The service may answer out of order; `index` restores input order
        response
            .data
            .sort_by_key(|item| item.index.unwrap_or(usize::MAX));
        let embeddings: Vec<Embedding> = response.data.into_iter().map(|d| d.embedding).collect();

        debug!(
            "Received {} embeddings with {} dimensions",
            embeddings.len(),
            embeddings.first().map_or(0, Vec::len)
        );

        Ok(embeddings)
    }

    async fn explain(&self, context: &str, highlighted: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.completion_model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: format!(
                        "You explain what a highlighted passage means in the context of the \
                         document it appears in. The passage is wrapped in {} markers.",
                        HIGHLIGHT_MARKER
                    ),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: format!(
                        "Document:\n{}\n\nWhat does {} mean in this context?",
                        context, highlighted
                    ),
                },
            ],
        };

        let response: ChatResponse = self.post_json("chat/completions", &request).await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| NoteSearchError::Service("Completion returned no choices".to_string()))
    }

    fn reconfigure(&self, credential: &str) {
        let mut key = self
            .api_key
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *key = credential.trim().to_string();
        debug!("OpenAI credential updated");
    }

    fn model(&self) -> &str {
        &self.embedding_model
    }
}

/// Wrap `selection` in highlight markers inside `document`.
///
/// Returns the marked selection and the document with the selection marked at
/// its first occurrence. An empty or missing selection yields empty strings.
#[inline]
pub fn highlight_in_context(document: &str, selection: &str) -> (String, String) {
    if selection.is_empty() {
        return (String::new(), String::new());
    }

    let Some((before, after)) = document.split_once(selection) else {
        return (String::new(), String::new());
    };

    let marked = format!("{}{}{}", HIGHLIGHT_MARKER, selection, HIGHLIGHT_MARKER);
    let context = format!("{}{}{}", before, marked, after);

    (marked, context)
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

fn make_request_with_retry<F>(retry_attempts: u32, target: &str, mut request_fn: F) -> Result<String>
where
    F: FnMut() -> std::result::Result<String, ureq::Error>,
{
    let mut last_error = None;

    for attempt in 1..=retry_attempts {
        debug!("HTTP request attempt {}/{}", attempt, retry_attempts);

        match request_fn() {
            Ok(response_text) => {
                debug!("Request succeeded on attempt {}", attempt);
                return Ok(response_text);
            }
            Err(error) => {
                let should_retry = match &error {
                    ureq::Error::StatusCode(status) => {
                        if *status >= 500 {
                            warn!(
                                "Server error (status {}), attempt {}/{}",
                                status, attempt, retry_attempts
                            );
                            true
                        } else {
                            warn!("Client error (status {}), not retrying", status);
                            return Err(NoteSearchError::Service(format!(
                                "Client error: HTTP {}",
                                status
                            )));
                        }
                    }
                    ureq::Error::ConnectionFailed
                    | ureq::Error::HostNotFound
                    | ureq::Error::Timeout(_)
                    | ureq::Error::Io(_) => {
                        warn!(
                            "Transport error: {}, attempt {}/{}",
                            error, attempt, retry_attempts
                        );
                        true
                    }
                    _ => {
                        warn!("Non-retryable error: {}", error);
                        false
                    }
                };

                if !should_retry {
                    return Err(NoteSearchError::Service(format!(
                        "Non-retryable error: {}",
                        error
                    )));
                }

                last_error = Some(NoteSearchError::Service(format!("Request error: {}", error)));

                if attempt < retry_attempts {
                    let delay_ms = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000;
                    let delay = Duration::from_millis(delay_ms);
                    debug!("Waiting {:?} before retry", delay);
                    std::thread::sleep(delay);
                }
            }
        }
    }

    error!("All retry attempts failed for request to {}", target);

    Err(last_error
        .unwrap_or_else(|| NoteSearchError::Service("Request failed after retries".to_string())))
}
