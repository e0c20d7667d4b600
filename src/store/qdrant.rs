//! Qdrant-backed [`DocumentStore`] and [`ConnectionFactory`].

use super::{
    Candidate, Connection, ConnectionError, ConnectionFactory, Credentials, DocumentStore,
    StoreError,
};
use crate::embedding::SharedEmbedder;
use crate::qdrant::{PointInsert, QdrantService, TITLE_FIELD, keyword_filter};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Qdrant collection access with title ranking through the embedding client.
pub struct QdrantStore {
    qdrant: QdrantService,
    embedder: SharedEmbedder,
}

impl QdrantStore {
    /// Wrap an existing Qdrant client.
    pub fn new(qdrant: QdrantService, embedder: SharedEmbedder) -> Self {
        Self { qdrant, embedder }
    }
}

#[async_trait]
impl DocumentStore for QdrantStore {
    async fn collection_exists(&self, collection: &str) -> Result<bool, StoreError> {
        Ok(self.qdrant.collection_exists(collection).await?)
    }

    async fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> Result<(), StoreError> {
        self.qdrant
            .create_collection_if_not_exists(collection, vector_size)
            .await?;
        self.qdrant.ensure_payload_indexes(collection).await?;
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        points: Vec<PointInsert>,
    ) -> Result<usize, StoreError> {
        Ok(self.qdrant.upsert_points(collection, points).await?)
    }

    async fn search_ranked(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
        timeout: Duration,
    ) -> Result<Vec<Candidate>, StoreError> {
        let mut vectors = self
            .embedder
            .generate_embeddings(vec![query.to_string()])
            .await?;
        let Some(vector) = vectors.pop() else {
            return Ok(Vec::new());
        };

        match self
            .qdrant
            .search_points(collection, vector, limit, Some(timeout))
            .await
        {
            Ok(points) => Ok(points
                .into_iter()
                .map(|point| candidate(point.id, point.payload.as_ref()))
                .collect()),
            Err(error) if error.is_timeout() => Err(StoreError::Timeout(timeout)),
            Err(error) => Err(error.into()),
        }
    }

    async fn query_equal(
        &self,
        collection: &str,
        field: &str,
        value: &str,
        limit: usize,
    ) -> Result<Vec<Candidate>, StoreError> {
        let points = self
            .qdrant
            .scroll_points(collection, keyword_filter(field, value), limit)
            .await?;
        Ok(points
            .into_iter()
            .map(|(id, payload)| candidate(id, Some(&payload)))
            .collect())
    }

    async fn delete_equal(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        Ok(self
            .qdrant
            .delete_points(collection, keyword_filter(field, value))
            .await?)
    }
}

fn candidate(id: String, payload: Option<&Map<String, Value>>) -> Candidate {
    let title = payload
        .and_then(|map| map.get(TITLE_FIELD))
        .and_then(Value::as_str)
        .map(str::to_string);
    Candidate { id, title }
}

/// Opens Qdrant connections, checking reachability before handing them out.
pub struct QdrantConnectionFactory {
    embedder: SharedEmbedder,
}

impl QdrantConnectionFactory {
    /// Create a factory whose stores rank titles with `embedder`.
    pub fn new(embedder: SharedEmbedder) -> Self {
        Self { embedder }
    }

    /// Open a concrete Qdrant store.
    pub async fn open(
        &self,
        credentials: &Credentials,
    ) -> Result<Arc<QdrantStore>, ConnectionError> {
        let to_error = |source| ConnectionError {
            url: credentials.url.clone(),
            source,
        };
        let qdrant = QdrantService::connect(&credentials.url, credentials.api_key.clone())
            .map_err(to_error)?;
        let collections = qdrant.list_collections().await.map_err(to_error)?;
        tracing::debug!(
            url = %qdrant.base_url(),
            collections = collections.len(),
            "Store connection established"
        );
        Ok(Arc::new(QdrantStore::new(qdrant, self.embedder.clone())))
    }
}

#[async_trait]
impl ConnectionFactory for QdrantConnectionFactory {
    async fn connect(&self, credentials: &Credentials) -> Result<Connection, ConnectionError> {
        let store: Connection = self.open(credentials).await?;
        Ok(store)
    }
}
