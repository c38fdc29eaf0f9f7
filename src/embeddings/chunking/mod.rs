
use std::fmt;
use std::sync::{Arc, OnceLock};

use tiktoken_rs::{CoreBPE, Rank};
use tracing::debug;

use crate::{NoteSearchError, Result};

/// A token-bounded piece of a document, ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The chunk text
    pub text: String,
    /// Number of encoded tokens in this chunk
    pub token_count: usize,
}

/// Byte-pair encoder matching the OpenAI embedding models (`cl100k_base`).
///
/// Cloning is cheap: every clone shares the same encoder tables.
#[derive(Clone)]
pub struct Tokenizer {
    bpe: Arc<CoreBPE>,
}

impl fmt::Debug for Tokenizer {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tokenizer")
            .field("encoding", &"cl100k_base")
            .finish()
    }
}

fn shared_encoding() -> Result<Arc<CoreBPE>> {
    static ENCODING: OnceLock<Arc<CoreBPE>> = OnceLock::new();

    if let Some(bpe) = ENCODING.get() {
        return Ok(Arc::clone(bpe));
    }

    let bpe = tiktoken_rs::cl100k_base()
        .map_err(|e| NoteSearchError::Encoding(format!("Failed to load cl100k_base: {}", e)))?;
    Ok(Arc::clone(ENCODING.get_or_init(|| Arc::new(bpe))))
}

impl Tokenizer {
    /// Tokenizer for the encoding used by `text-embedding-ada-002` and later models
    #[inline]
    pub fn cl100k() -> Result<Self> {
        Ok(Self {
            bpe: shared_encoding()?,
        })
    }

    /// Number of tokens the embedding service will count for `text`
    #[inline]
    pub fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    /// Split `text` into consecutive chunks of at most `max_tokens` tokens.
    ///
    /// Joining the returned chunks reproduces `text` exactly. A boundary never
    /// falls inside a character whose bytes are spread over several tokens;
    /// the boundary moves back to the previous character instead. Only when a
    /// single character needs more than `max_tokens` tokens does its chunk
    /// exceed the bound.
    #[inline]
    pub fn chunk(&self, text: &str, max_tokens: usize) -> Result<Vec<Chunk>> {
        if max_tokens == 0 {
            return Err(NoteSearchError::Config(
                "max_tokens must be greater than zero".to_string(),
            ));
        }

        let tokens = self.bpe.encode_ordinary(text);
        let mut chunks = Vec::with_capacity(tokens.len().div_ceil(max_tokens));
        let mut start = 0;

        while start < tokens.len() {
            let (end, chunk_text) = self.next_boundary(&tokens, start, max_tokens)?;
            chunks.push(Chunk {
                text: chunk_text,
                token_count: end - start,
            });
            start = end;
        }

        debug!(
            "Split {} tokens into {} chunks (max {} tokens each)",
            tokens.len(),
            chunks.len(),
            max_tokens
        );

        Ok(chunks)
    }

    /// Find the furthest end index from `start` that decodes to whole characters
    fn next_boundary(
        &self,
        tokens: &[Rank],
        start: usize,
        max_tokens: usize,
    ) -> Result<(usize, String)> {
        let limit = (start + max_tokens).min(tokens.len());

        for end in (start + 1..=limit).rev() {
            if let Some(text) = self.decode(&tokens[start..end]) {
                return Ok((end, text));
            }
        }

        // A single character spans more tokens than the bound allows
        for end in limit + 1..=tokens.len() {
            if let Some(text) = self.decode(&tokens[start..end]) {
                return Ok((end, text));
            }
        }

        Err(NoteSearchError::Encoding(format!(
            "Tokens starting at position {} do not decode to valid UTF-8",
            start
        )))
    }

    fn decode(&self, tokens: &[Rank]) -> Option<String> {
        self.bpe.decode(tokens.to_vec()).ok()
    }
}

/// Chunk `text` with the shared `cl100k_base` tokenizer
#[inline]
pub fn chunk_text(text: &str, max_tokens: usize) -> Result<Vec<Chunk>> {
    Tokenizer::cl100k()?.chunk(text, max_tokens)
}

/// Count tokens in `text` with the shared `cl100k_base` tokenizer
#[inline]
pub fn count_tokens(text: &str) -> Result<usize> {
    Ok(Tokenizer::cl100k()?.count_tokens(text))
}
