//! In-memory collaborators shared by the ingestion unit tests.

use super::importer::Importer;
use super::reporter::{StatusSink, TransportError};
use super::types::{Descriptor, ImportError, ImportReceipt, StatusReport};
use crate::qdrant::{PointInsert, QdrantError, TITLE_FIELD};
use crate::store::{
    Candidate, Connection, ConnectionError, ConnectionFactory, Credentials, DocumentStore,
    StoreError,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Clone, Copy, Default, PartialEq, Eq)]
enum RankedMode {
    #[default]
    Normal,
    Hang,
    ReportTimeout,
}

/// Store keeping points in memory, with switches for slow or failing queries.
#[derive(Default)]
pub(crate) struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<PointInsert>>>,
    ranked_mode: RankedMode,
    hidden_for: u32,
    failing_ranked_for: u32,
    failing_collection_checks: bool,
    failing_equality_queries: bool,
    failing_upserts: bool,
    ranked_calls: AtomicU32,
    equality_calls: AtomicU32,
}

fn unavailable(body: &str) -> StoreError {
    StoreError::Qdrant(QdrantError::UnexpectedStatus {
        status: StatusCode::SERVICE_UNAVAILABLE,
        body: body.into(),
    })
}

pub(crate) fn titled_point(id: &str, title: &str) -> PointInsert {
    let mut payload = Map::new();
    payload.insert(TITLE_FIELD.into(), Value::String(title.into()));
    PointInsert {
        id: id.into(),
        vector: Vec::new(),
        payload,
    }
}

impl MemoryStore {
    pub(crate) fn empty() -> Self {
        Self::default()
    }

    /// Seed `collection` with one record per title, identified as `id-<title>`.
    pub(crate) fn with_titles(collection: &str, titles: &[&str]) -> Self {
        let points = titles
            .iter()
            .map(|title| titled_point(&format!("id-{title}"), title))
            .collect();
        Self {
            collections: Mutex::new(HashMap::from([(collection.to_string(), points)])),
            ..Self::default()
        }
    }

    /// Ranked searches never complete.
    pub(crate) fn hanging_ranked_search(mut self) -> Self {
        self.ranked_mode = RankedMode::Hang;
        self
    }

    /// Ranked searches fail with [`StoreError::Timeout`].
    pub(crate) fn timing_out_ranked_search(mut self) -> Self {
        self.ranked_mode = RankedMode::ReportTimeout;
        self
    }

    /// The first `calls` ranked searches return nothing.
    pub(crate) fn hidden_for(mut self, calls: u32) -> Self {
        self.hidden_for = calls;
        self
    }

    /// The first `calls` ranked searches fail with a store error.
    pub(crate) fn failing_ranked_for(mut self, calls: u32) -> Self {
        self.failing_ranked_for = calls;
        self
    }

    /// Every collection check fails.
    pub(crate) fn failing_collection_checks(mut self) -> Self {
        self.failing_collection_checks = true;
        self
    }

    /// Every equality query fails.
    pub(crate) fn failing_equality_queries(mut self) -> Self {
        self.failing_equality_queries = true;
        self
    }

    /// Every upsert fails.
    pub(crate) fn failing_upserts(mut self) -> Self {
        self.failing_upserts = true;
        self
    }

    pub(crate) async fn points(&self, collection: &str) -> Vec<PointInsert> {
        self.collections
            .lock()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) async fn insert(&self, collection: &str, point: PointInsert) {
        self.collections
            .lock()
            .await
            .entry(collection.to_string())
            .or_default()
            .push(point);
    }

    pub(crate) fn ranked_calls(&self) -> u32 {
        self.ranked_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn equality_calls(&self) -> u32 {
        self.equality_calls.load(Ordering::SeqCst)
    }

    async fn candidates(
        &self,
        collection: &str,
        limit: usize,
        keep: impl Fn(&PointInsert) -> bool,
    ) -> Vec<Candidate> {
        self.points(collection)
            .await
            .into_iter()
            .filter(|point| keep(point))
            .take(limit)
            .map(|point| Candidate {
                title: point
                    .payload
                    .get(TITLE_FIELD)
                    .and_then(Value::as_str)
                    .map(str::to_string),
                id: point.id,
            })
            .collect()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn collection_exists(&self, collection: &str) -> Result<bool, StoreError> {
        if self.failing_collection_checks {
            return Err(unavailable("collection lookup failed"));
        }
        Ok(self.collections.lock().await.contains_key(collection))
    }

    async fn ensure_collection(
        &self,
        collection: &str,
        _vector_size: u64,
    ) -> Result<(), StoreError> {
        self.collections
            .lock()
            .await
            .entry(collection.to_string())
            .or_default();
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        points: Vec<PointInsert>,
    ) -> Result<usize, StoreError> {
        if self.failing_upserts {
            return Err(StoreError::Qdrant(QdrantError::UnexpectedStatus {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: "write rejected".into(),
            }));
        }
        let count = points.len();
        let mut collections = self.collections.lock().await;
        let stored = collections.entry(collection.to_string()).or_default();
        for point in points {
            stored.retain(|existing| existing.id != point.id);
            stored.push(point);
        }
        Ok(count)
    }

    async fn search_ranked(
        &self,
        collection: &str,
        _query: &str,
        limit: usize,
        timeout: Duration,
    ) -> Result<Vec<Candidate>, StoreError> {
        let call = self.ranked_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failing_ranked_for {
            return Err(unavailable("search failed"));
        }
        match self.ranked_mode {
            RankedMode::Hang => std::future::pending().await,
            RankedMode::ReportTimeout => Err(StoreError::Timeout(timeout)),
            RankedMode::Normal if call <= self.hidden_for => Ok(Vec::new()),
            RankedMode::Normal => Ok(self.candidates(collection, limit, |_| true).await),
        }
    }

    async fn query_equal(
        &self,
        collection: &str,
        field: &str,
        value: &str,
        limit: usize,
    ) -> Result<Vec<Candidate>, StoreError> {
        self.equality_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_equality_queries {
            return Err(unavailable("scroll failed"));
        }
        Ok(self
            .candidates(collection, limit, |point| {
                point.payload.get(field).and_then(Value::as_str) == Some(value)
            })
            .await)
    }

    async fn delete_equal(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        if let Some(stored) = self.collections.lock().await.get_mut(collection) {
            stored.retain(|point| point.payload.get(field).and_then(Value::as_str) != Some(value));
        }
        Ok(())
    }
}

/// Factory handing out a fixed store, or refusing every connection.
pub(crate) struct StubFactory {
    store: Option<Connection>,
    connects: AtomicU32,
}

impl StubFactory {
    pub(crate) fn serving(store: Connection) -> Self {
        Self {
            store: Some(store),
            connects: AtomicU32::new(0),
        }
    }

    pub(crate) fn unreachable() -> Self {
        Self {
            store: None,
            connects: AtomicU32::new(0),
        }
    }

    pub(crate) fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionFactory for StubFactory {
    async fn connect(&self, credentials: &Credentials) -> Result<Connection, ConnectionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.store.clone().ok_or_else(|| ConnectionError {
            url: credentials.url.clone(),
            source: QdrantError::InvalidUrl(credentials.url.clone()),
        })
    }
}

/// Importer that optionally writes a titled record and optionally reports failure.
pub(crate) struct StubImporter {
    pub(crate) collection: &'static str,
    pub(crate) writes: bool,
    pub(crate) fails: bool,
}

#[async_trait]
impl Importer for StubImporter {
    async fn import(
        &self,
        connection: &dyn DocumentStore,
        descriptor: &Descriptor,
    ) -> Result<ImportReceipt, ImportError> {
        if self.writes {
            let point = titled_point(&format!("id-{}", descriptor.title()), descriptor.title());
            connection.upsert(self.collection, vec![point]).await?;
        }
        if self.fails {
            return Err(ImportError::Store(StoreError::Timeout(Duration::from_secs(
                30,
            ))));
        }
        Ok(ImportReceipt::default())
    }
}

/// Sink recording every delivered report.
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub(crate) reports: Mutex<Vec<StatusReport>>,
}

#[async_trait]
impl StatusSink for RecordingSink {
    async fn deliver(&self, report: &StatusReport) -> Result<(), TransportError> {
        self.reports.lock().await.push(report.clone());
        Ok(())
    }
}
