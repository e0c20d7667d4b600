//! Wire messages, descriptors, and error types shared across the ingestion pipeline.

use crate::embedding::EmbeddingClientError;
use crate::store::{ConnectionError, Credentials, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use super::chunking::ChunkingError;

/// One inbound fragment of a larger upload.
///
/// Field aliases accept the names used by older clients (`fileID`, `order`, `chunk`,
/// `isLastChunk`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentMessage {
    /// Upload identifier shared by all fragments of one upload.
    #[serde(alias = "fileID")]
    pub id: String,
    /// Position of this fragment in the reassembled payload.
    #[serde(alias = "order")]
    pub index: usize,
    /// Declared number of fragments in the upload.
    pub total: usize,
    /// Fragment text.
    #[serde(alias = "chunk")]
    pub payload: String,
    /// Forces completion with whatever fragments have been recorded.
    #[serde(default, alias = "isLastChunk")]
    pub is_final: bool,
    /// Store the upload should be imported into; the configured store when absent.
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

/// A fully reassembled upload, ready for import.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Descriptor {
    /// Upload identifier.
    #[serde(alias = "fileID")]
    pub id: String,
    /// Document name. See [`Descriptor::title`] for the identity used in the store.
    #[serde(default, alias = "filename")]
    pub name: String,
    /// File extension without the leading dot.
    #[serde(default)]
    pub extension: String,
    /// Original file size in bytes.
    #[serde(default, alias = "fileSize")]
    pub file_size: u64,
    /// Free-form labels attached by the uploader.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Provenance of the document (path, URL, connector).
    #[serde(default)]
    pub source: String,
    /// Document text.
    #[serde(default)]
    pub content: String,
    /// Arbitrary additional metadata.
    #[serde(default)]
    pub metadata: Value,
}

impl Descriptor {
    /// Parse the reassembled payload of upload `upload_id`.
    pub fn parse(upload_id: &str, raw: &str) -> Result<Self, ParseError> {
        serde_json::from_str(raw).map_err(|source| ParseError {
            upload_id: upload_id.to_string(),
            source,
        })
    }

    /// Title written to the store and checked during verification: the name, or the upload id
    /// when the descriptor is nameless.
    pub fn title(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// The reassembled payload of an upload was not a valid descriptor.
#[derive(Debug, Error)]
#[error("failed to parse upload {upload_id}: {source}")]
pub struct ParseError {
    /// Upload whose session was discarded.
    pub upload_id: String,
    /// Underlying JSON error.
    #[source]
    pub source: serde_json::Error,
}

/// Lifecycle phase carried by a status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Work is ongoing.
    Processing,
    /// The upload is confirmed present in the store.
    Done,
    /// The upload could not be confirmed.
    Error,
}

impl Phase {
    /// `DONE` and `ERROR` end an upload's lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Processing => "PROCESSING",
            Self::Done => "DONE",
            Self::Error => "ERROR",
        })
    }
}

/// Outbound status message for one upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Upload identifier.
    pub id: String,
    /// Lifecycle phase.
    pub phase: Phase,
    /// Human-readable detail.
    pub message: String,
    /// Seconds since the upload's reconciliation started.
    pub elapsed_seconds: f64,
}

impl StatusReport {
    /// Build a report.
    pub fn new(
        id: impl Into<String>,
        phase: Phase,
        message: impl Into<String>,
        elapsed_seconds: f64,
    ) -> Self {
        Self {
            id: id.into(),
            phase,
            message: message.into(),
            elapsed_seconds,
        }
    }
}

/// Result of an existence check against the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationOutcome {
    /// Whether an exact identity match was found.
    pub found: bool,
    /// Store identifier of the matching record.
    pub matched_id: Option<String>,
}

impl VerificationOutcome {
    /// A confirmed match.
    pub fn found(id: impl Into<String>) -> Self {
        Self {
            found: true,
            matched_id: Some(id.into()),
        }
    }

    /// No match.
    pub fn not_found() -> Self {
        Self::default()
    }
}

/// Final decision reached for an upload.
#[derive(Debug, Clone, PartialEq)]
pub struct Disposition {
    /// `DONE` or `ERROR`.
    pub phase: Phase,
    /// Message sent to the client.
    pub message: String,
    /// Seconds spent reconciling.
    pub elapsed_seconds: f64,
    /// Store identifier of the verified record.
    pub matched_id: Option<String>,
}

/// Summary of a completed import call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReceipt {
    /// Chunks written to the store.
    pub chunks_written: usize,
    /// Duplicate chunks skipped within the document.
    pub skipped_duplicates: usize,
}

/// Failure reported by an importer. Not authoritative: data may still have landed.
#[derive(Debug, Error)]
pub enum ImportError {
    /// Chunking step failed to segment the document.
    #[error("Failed to chunk document: {0}")]
    Chunking(#[from] ChunkingError),
    /// Embedding provider failed to produce vectors.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// A store write failed.
    #[error("Store write failed: {0}")]
    Store(#[from] StoreError),
}

/// Error propagated to the control loop when an upload ends in `ERROR`.
#[derive(Debug, Error)]
pub enum ReconciliationError {
    /// The importer failed and the document is not in the store.
    #[error("Import failed: {0}")]
    Import(#[source] ImportError),
    /// The importer reported success but the document is not in the store.
    #[error("Document {name} not found after import (verification failed)")]
    NotFound {
        /// Name that was searched for.
        name: String,
    },
    /// No store connection could be established for the import.
    #[error("Could not reach store: {0}")]
    Connection(#[from] ConnectionError),
}
