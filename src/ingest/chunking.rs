//! Chunk-size heuristics and semantic chunking of document text.
//!
//! - Automatic sizing derives a token budget from the embedding model's context window,
//!   clamped to `[256, 1024]`; `TEXT_SPLITTER_CHUNK_SIZE` overrides it.
//! - `TEXT_SPLITTER_CHUNK_OVERLAP` adds a sliding token overlap between adjacent chunks.
//! - Token counting prefers `tiktoken-rs` and falls back to whitespace counting for models
//!   whose tokenizer is unknown (common with Ollama).

use crate::config::EmbeddingProvider;
use anyhow::Error as TokenizerError;
use semchunk_rs::Chunker;
use std::sync::Arc;
use thiserror::Error;
use tiktoken_rs::{
    CoreBPE, cl100k_base, get_bpe_from_model, model::get_context_size, o200k_base, p50k_base,
    r50k_base,
};

type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

const MIN_AUTOMATIC_CHUNK_SIZE: usize = 256;
const MAX_AUTOMATIC_CHUNK_SIZE: usize = 1024;

/// Errors produced while turning document text into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Ingestion configured an impossible token budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Tokenizer resources were unavailable for the configured model.
    #[error("failed to initialize tokenizer for model '{model}': {source}")]
    Tokenizer {
        /// Embedding model we attempted to load.
        model: String,
        /// Underlying error raised by the tokenizer library.
        #[source]
        source: TokenizerError,
    },
}

/// Determine the chunk size, preferring an explicit override.
pub(crate) fn determine_chunk_size(
    override_size: Option<usize>,
    provider: EmbeddingProvider,
    model: &str,
) -> usize {
    if let Some(explicit) = override_size {
        return explicit.max(1);
    }

    let window = embedding_context_window(provider, model);
    (window / 4).clamp(MIN_AUTOMATIC_CHUNK_SIZE, MAX_AUTOMATIC_CHUNK_SIZE)
}

fn embedding_context_window(provider: EmbeddingProvider, model: &str) -> usize {
    match provider {
        EmbeddingProvider::OpenAI => {
            if model.starts_with("text-embedding-3") || model.starts_with("text-embedding-ada-002")
            {
                8192
            } else {
                get_context_size(model)
            }
        }
        EmbeddingProvider::Ollama => {
            let normalized = model.to_lowercase();
            match normalized.as_str() {
                "nomic-embed-text" | "mxbai-embed-large" | "mxbai-embed-large-v1" => 8192,
                value if value.contains("all-minilm") => 512,
                _ => 4096,
            }
        }
    }
}

/// Chunk text into semantic segments no larger than `chunk_size` tokens.
///
/// Returns an empty vector when the input is all whitespace.
pub(crate) fn chunk_text(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    provider: EmbeddingProvider,
    model: &str,
) -> Result<Vec<String>, ChunkingError> {
    if chunk_size == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let token_counter = build_token_counter(provider, model)?;
    Ok(chunk_text_with_counter(
        text,
        chunk_size,
        overlap,
        token_counter,
    ))
}

fn build_token_counter(
    provider: EmbeddingProvider,
    model: &str,
) -> Result<TokenCounter, ChunkingError> {
    match provider {
        EmbeddingProvider::OpenAI => build_tiktoken_counter(model),
        EmbeddingProvider::Ollama => match build_tiktoken_counter(model) {
            Ok(counter) => Ok(counter),
            Err(error) => {
                tracing::warn!(
                    model,
                    error = %error,
                    "Tokenizer unavailable for Ollama model; falling back to whitespace counter"
                );
                Ok(whitespace_token_counter())
            }
        },
    }
}

fn build_tiktoken_counter(model: &str) -> Result<TokenCounter, ChunkingError> {
    let normalized = model.trim();
    let target = if normalized.is_empty() {
        "cl100k_base"
    } else {
        normalized
    };
    let encoding = resolve_encoding(target).map_err(|source| ChunkingError::Tokenizer {
        model: target.to_string(),
        source,
    })?;
    let encoding = Arc::new(encoding);

    Ok(Arc::new(move |segment: &str| {
        encoding.encode_ordinary(segment).len()
    }))
}

fn resolve_encoding(model: &str) -> Result<CoreBPE, TokenizerError> {
    match get_bpe_from_model(model) {
        Ok(encoding) => Ok(encoding),
        Err(model_err) => {
            tracing::debug!(
                model,
                error = %model_err,
                "Tokenizer model lookup failed; trying encoding name"
            );
            match model {
                "o200k_base" => o200k_base(),
                "p50k_base" => p50k_base(),
                "r50k_base" | "gpt2" => r50k_base(),
                _ => cl100k_base(),
            }
        }
    }
}

fn whitespace_token_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() {
            1
        } else {
            tokens
        }
    })
}

fn chunk_text_with_counter(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    token_counter: TokenCounter,
) -> Vec<String> {
    let counter_for_chunker = token_counter.clone();
    let chunker = Chunker::new(
        chunk_size,
        Box::new(move |segment: &str| counter_for_chunker.as_ref()(segment)),
    );
    let base_chunks = chunker.chunk(text);
    apply_overlap(base_chunks, chunk_size, overlap, &token_counter)
}

/// Prefix each chunk with the tail of its predecessor, staying within `chunk_size`.
fn apply_overlap(
    chunks: Vec<String>,
    chunk_size: usize,
    overlap: usize,
    token_counter: &TokenCounter,
) -> Vec<String> {
    let effective_overlap = overlap.min(chunk_size.saturating_sub(1));
    if effective_overlap == 0 || chunks.len() < 2 {
        return chunks;
    }

    let mut overlapped = Vec::with_capacity(chunks.len());
    let mut previous: Option<String> = None;

    for current in chunks {
        let chunk = match previous.as_deref() {
            Some(prev) => {
                let tail = trim_to_token_budget(prev, effective_overlap, token_counter);
                let mut combined = String::with_capacity(tail.len() + current.len() + 1);
                if !tail.is_empty() {
                    combined.push_str(&tail);
                    if !tail.ends_with(char::is_whitespace)
                        && !current.starts_with(char::is_whitespace)
                    {
                        combined.push(' ');
                    }
                }
                combined.push_str(&current);
                trim_to_token_budget(&combined, chunk_size, token_counter)
            }
            None => current.clone(),
        };
        overlapped.push(chunk);
        previous = Some(current);
    }

    overlapped
}

/// Drop leading characters until `text` fits within `token_budget`.
fn trim_to_token_budget(text: &str, token_budget: usize, token_counter: &TokenCounter) -> String {
    if token_budget == 0 {
        return String::new();
    }

    let trimmed = text.trim_start();
    if token_counter.as_ref()(trimmed) <= token_budget {
        return trimmed.to_string();
    }

    for (offset, _) in text.char_indices().skip(1) {
        let candidate = text[offset..].trim_start();
        if token_counter.as_ref()(candidate) <= token_budget {
            return candidate.to_string();
        }
    }

    String::new()
}
