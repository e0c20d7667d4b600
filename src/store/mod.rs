//! Store seam used by the importer and the existence probe.
//!
//! [`DocumentStore`] is the narrow set of operations the ingestion pipeline needs from the
//! remote document/vector store, and [`ConnectionFactory`] acquires a fresh handle to it. The
//! Qdrant-backed implementations live in [`qdrant`]; tests substitute in-memory stores.

pub mod qdrant;

use crate::config::Config;
use crate::embedding::EmbeddingClientError;
use crate::qdrant::{PointInsert, QdrantError};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use self::qdrant::{QdrantConnectionFactory, QdrantStore};

/// Location and secret identifying a store instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// Base URL of the store.
    pub url: String,
    /// Optional API key.
    #[serde(default, alias = "key")]
    pub api_key: Option<String>,
}

impl Credentials {
    /// Credentials for the store configured through the environment.
    pub fn from_config(config: &Config) -> Self {
        Self {
            url: config.qdrant_url.clone(),
            api_key: config.qdrant_api_key.clone(),
        }
    }
}

/// A search hit returned by the store; only its identity matters to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Store-assigned record identifier.
    pub id: String,
    /// Title stored with the record, when present.
    pub title: Option<String>,
}

impl Candidate {
    /// Whether this candidate's title equals `name` exactly (case-sensitive).
    pub fn is_exact_match(&self, name: &str) -> bool {
        self.title.as_deref() == Some(name)
    }
}

/// Errors raised by store queries and writes.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The query did not complete within its deadline.
    #[error("store query timed out after {0:?}")]
    Timeout(Duration),
    /// Transport or protocol failure talking to Qdrant.
    #[error("Qdrant request failed: {0}")]
    Qdrant(#[from] QdrantError),
    /// The query text could not be embedded for ranking.
    #[error("Failed to embed query: {0}")]
    Embedding(#[from] EmbeddingClientError),
}

/// Failure to acquire a store connection.
#[derive(Debug, Error)]
#[error("failed to connect to store at {url}: {source}")]
pub struct ConnectionError {
    /// Store URL we attempted to reach.
    pub url: String,
    /// Underlying failure.
    #[source]
    pub source: QdrantError,
}

/// Operations the ingestion pipeline performs against the remote store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Report whether the named collection exists.
    async fn collection_exists(&self, collection: &str) -> Result<bool, StoreError>;

    /// Create the collection (and its lookup indexes) when missing.
    async fn ensure_collection(&self, collection: &str, vector_size: u64)
    -> Result<(), StoreError>;

    /// Write points, returning how many were applied.
    async fn upsert(
        &self,
        collection: &str,
        points: Vec<PointInsert>,
    ) -> Result<usize, StoreError>;

    /// Relevance-ranked text search over record titles.
    async fn search_ranked(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
        timeout: Duration,
    ) -> Result<Vec<Candidate>, StoreError>;

    /// Exact-equality lookup on a payload field, bypassing ranking.
    async fn query_equal(
        &self,
        collection: &str,
        field: &str,
        value: &str,
        limit: usize,
    ) -> Result<Vec<Candidate>, StoreError>;

    /// Remove every record whose payload `field` equals `value`.
    async fn delete_equal(&self, collection: &str, field: &str, value: &str)
    -> Result<(), StoreError>;
}

/// Shared handle to a store.
pub type Connection = Arc<dyn DocumentStore>;

/// Acquires store connections, independently of any previously acquired one.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Open a new connection using `credentials`.
    async fn connect(&self, credentials: &Credentials) -> Result<Connection, ConnectionError>;
}
