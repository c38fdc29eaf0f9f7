// Embeddings module
// Tokenization, similarity ranking, and the remote embedding service

pub mod chunking;
pub mod openai;
pub mod similarity;

use async_trait::async_trait;

use crate::Result;

pub use chunking::{Chunk, Tokenizer, chunk_text, count_tokens};
pub use openai::OpenAiClient;
pub use similarity::{QueryResult, best_chunk, cosine_similarity, rank};

/// An embedding vector as returned by the embedding service
pub type Embedding = Vec<f32>;

/// Boundary to the remote embedding/completion service.
///
/// Implementations must return exactly one vector per input, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed every text in `texts`
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>>;

    /// Ask the completion model what `highlighted` means inside `context`
    async fn explain(&self, context: &str, highlighted: &str) -> Result<String>;

    /// Replace the credential used for subsequent requests
    fn reconfigure(&self, credential: &str);

    /// Identifier of the embedding model, recorded alongside cached vectors
    fn model(&self) -> &str;
}
