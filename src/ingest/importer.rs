//! Import of assembled descriptors into the document store.

use super::chunking::{chunk_text, determine_chunk_size};
use super::types::{Descriptor, ImportError, ImportReceipt};
use crate::config::{Config, EmbeddingProvider};
use crate::embedding::SharedEmbedder;
use crate::qdrant::compute_chunk_hash;
use crate::qdrant::payload::{
    build_chunk_payload, build_document_payload, chunk_point_id, current_timestamp_rfc3339,
    document_point_id,
};
use crate::qdrant::{DOCUMENT_ID_FIELD, PointInsert};
use crate::store::DocumentStore;
use async_trait::async_trait;
use std::collections::HashSet;

/// Writes a descriptor into a store.
///
/// A returned error is a hint, not a verdict: writes may have landed anyway, so callers confirm
/// the outcome against the store before reporting it.
#[async_trait]
pub trait Importer: Send + Sync {
    /// Import `descriptor` through `connection`.
    async fn import(
        &self,
        connection: &dyn DocumentStore,
        descriptor: &Descriptor,
    ) -> Result<ImportReceipt, ImportError>;
}

/// Collection names and chunking parameters used by [`StoreImporter`].
#[derive(Debug, Clone)]
pub struct ImportSettings {
    /// Collection holding one record per document.
    pub document_collection: String,
    /// Collection holding chunk records.
    pub chunk_collection: String,
    /// Embedding dimension used when creating collections.
    pub vector_size: u64,
    /// Token budget per chunk.
    pub chunk_size: usize,
    /// Token overlap between adjacent chunks.
    pub chunk_overlap: usize,
    /// Provider used for tokenizer selection.
    pub provider: EmbeddingProvider,
    /// Model used for tokenizer selection.
    pub model: String,
}

impl ImportSettings {
    /// Derive settings from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        let chunk_size = determine_chunk_size(
            config.text_splitter_chunk_size,
            config.embedding_provider,
            &config.embedding_model,
        );
        tracing::debug!(
            chunk_size,
            override = config.text_splitter_chunk_size,
            provider = ?config.embedding_provider,
            model = %config.embedding_model,
            "Derived chunk size"
        );
        Self {
            document_collection: config.document_collection.clone(),
            chunk_collection: config.chunk_collection.clone(),
            vector_size: config.embedding_dimension as u64,
            chunk_size,
            chunk_overlap: config.text_splitter_chunk_overlap.unwrap_or(0),
            provider: config.embedding_provider,
            model: config.embedding_model.clone(),
        }
    }
}

/// Chunks, embeds, and writes a document plus its chunks.
///
/// Chunk points are written before the document record, so a record visible to the probe
/// implies its chunks were accepted. Chunks left by an earlier import of the same upload are
/// removed first.
pub struct StoreImporter {
    embedder: SharedEmbedder,
    settings: ImportSettings,
}

impl StoreImporter {
    /// Create an importer.
    pub fn new(embedder: SharedEmbedder, settings: ImportSettings) -> Self {
        Self { embedder, settings }
    }

    async fn write_chunks(
        &self,
        connection: &dyn DocumentStore,
        descriptor: &Descriptor,
        timestamp: &str,
    ) -> Result<(usize, usize), ImportError> {
        let chunks = chunk_text(
            &descriptor.content,
            self.settings.chunk_size,
            self.settings.chunk_overlap,
            self.settings.provider,
            &self.settings.model,
        )?;
        let (prepared, skipped_duplicates) = dedupe_chunks(chunks);
        if prepared.is_empty() {
            return Ok((0, skipped_duplicates));
        }

        let texts = prepared.iter().map(|(text, _)| text.clone()).collect();
        let embeddings = self.embedder.generate_embeddings(texts).await?;
        debug_assert_eq!(prepared.len(), embeddings.len());

        let points: Vec<PointInsert> = prepared
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(chunk_index, ((text, hash), vector))| PointInsert {
                id: chunk_point_id(&descriptor.id, chunk_index),
                vector,
                payload: build_chunk_payload(descriptor, chunk_index, &hash, &text, timestamp),
            })
            .collect();
        let written = connection
            .upsert(&self.settings.chunk_collection, points)
            .await?;
        Ok((written, skipped_duplicates))
    }
}

#[async_trait]
impl Importer for StoreImporter {
    async fn import(
        &self,
        connection: &dyn DocumentStore,
        descriptor: &Descriptor,
    ) -> Result<ImportReceipt, ImportError> {
        let settings = &self.settings;
        connection
            .ensure_collection(&settings.document_collection, settings.vector_size)
            .await?;
        connection
            .ensure_collection(&settings.chunk_collection, settings.vector_size)
            .await?;

        connection
            .delete_equal(&settings.chunk_collection, DOCUMENT_ID_FIELD, &descriptor.id)
            .await?;

        let timestamp = current_timestamp_rfc3339();
        let (chunks_written, skipped_duplicates) = self
            .write_chunks(connection, descriptor, &timestamp)
            .await?;

        let vector = self
            .embedder
            .generate_embeddings(vec![descriptor.title().to_string()])
            .await?
            .pop()
            .unwrap_or_default();
        let record = PointInsert {
            id: document_point_id(&descriptor.id),
            vector,
            payload: build_document_payload(descriptor, chunks_written, &timestamp),
        };
        connection
            .upsert(&settings.document_collection, vec![record])
            .await?;

        tracing::info!(
            upload_id = %descriptor.id,
            collection = %settings.document_collection,
            chunks = chunks_written,
            skipped_duplicates,
            "Document imported"
        );
        Ok(ImportReceipt {
            chunks_written,
            skipped_duplicates,
        })
    }
}

/// Drop blank and repeated chunks, pairing each survivor with its hash.
fn dedupe_chunks(chunks: Vec<String>) -> (Vec<(String, String)>, usize) {
    let mut seen = HashSet::new();
    let mut prepared = Vec::new();
    let mut skipped = 0;

    for text in chunks {
        if text.trim().is_empty() {
            continue;
        }
        let hash = compute_chunk_hash(&text);
        if seen.insert(hash.clone()) {
            prepared.push((text, hash));
        } else {
            skipped += 1;
        }
    }

    (prepared, skipped)
}
