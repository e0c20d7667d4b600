//! Per-connection control loop state and the shared ingestion service.

use super::assembler::FragmentAssembler;
use super::importer::{ImportSettings, Importer, StoreImporter};
use super::probe::{ExistenceProbe, ProbePolicy};
use super::reconciler::ImportReconciler;
use super::reporter::{ReporterPolicy, StatusSink, TransportReporter};
use super::types::{Descriptor, FragmentMessage, Phase, ReconciliationError, StatusReport};
use crate::config::Config;
use crate::embedding::get_embedding_client;
use crate::metrics::{IngestMetrics, MetricsSnapshot};
use crate::store::{ConnectionFactory, Credentials, QdrantConnectionFactory};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Long-lived ingestion components shared by every connection.
///
/// Construct once near process start and share through an `Arc`; each WebSocket opens its own
/// [`ImportSession`] from it.
pub struct IngestService {
    factory: Arc<dyn ConnectionFactory>,
    importer: Arc<dyn Importer>,
    reconciler: ImportReconciler,
    reporter_policy: ReporterPolicy,
    default_credentials: Credentials,
    metrics: Arc<IngestMetrics>,
}

impl IngestService {
    /// Assemble a service from its collaborators.
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        importer: Arc<dyn Importer>,
        reconciler: ImportReconciler,
        default_credentials: Credentials,
    ) -> Self {
        Self {
            factory,
            importer,
            reconciler,
            reporter_policy: ReporterPolicy::default(),
            default_credentials,
            metrics: Arc::new(IngestMetrics::new()),
        }
    }

    /// Override the retry policy of reporters created for new sessions.
    pub fn with_reporter_policy(mut self, policy: ReporterPolicy) -> Self {
        self.reporter_policy = policy;
        self
    }

    /// Build the Qdrant-backed service described by `config`.
    pub fn from_config(config: &Config) -> Self {
        tracing::info!("Initializing embedding client");
        let embedder = get_embedding_client(config);
        let factory: Arc<dyn ConnectionFactory> =
            Arc::new(QdrantConnectionFactory::new(embedder.clone()));
        let importer = Arc::new(StoreImporter::new(
            embedder,
            ImportSettings::from_config(config),
        ));
        let probe = ExistenceProbe::new(config.document_collection.as_str()).with_policy(
            ProbePolicy {
                max_retries: config.probe_max_retries,
                search_timeout: Duration::from_secs(config.probe_search_timeout_secs),
                ..ProbePolicy::default()
            },
        );
        let reconciler = ImportReconciler::new(factory.clone(), probe)
            .with_settle_delay(Duration::from_millis(config.settle_delay_ms));
        tracing::debug!(
            url = %config.qdrant_url,
            collection = %config.document_collection,
            chunk_collection = %config.chunk_collection,
            "Ingestion service configured"
        );

        Self::new(
            factory,
            importer,
            reconciler,
            Credentials::from_config(config),
        )
    }

    /// Open a session whose status reports go to `sink`.
    pub fn open_session(self: &Arc<Self>, sink: Arc<dyn StatusSink>) -> ImportSession {
        ImportSession {
            service: Arc::clone(self),
            assembler: FragmentAssembler::new(),
            credentials: HashMap::new(),
            reporter: Arc::new(TransportReporter::new(sink, self.reporter_policy)),
        }
    }

    /// Current ingestion counters.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn reconcile(
        &self,
        descriptor: Descriptor,
        credentials: Credentials,
        reporter: &TransportReporter,
    ) {
        self.metrics.reconciliation_started();
        let result = match self.factory.connect(&credentials).await {
            Ok(connection) => {
                self.reconciler
                    .run(
                        &descriptor,
                        self.importer.as_ref(),
                        connection,
                        &credentials,
                        reporter,
                    )
                    .await
            }
            Err(error) => {
                let error = ReconciliationError::from(error);
                reporter
                    .send(&StatusReport::new(
                        descriptor.id.as_str(),
                        Phase::Error,
                        error.to_string(),
                        0.0,
                    ))
                    .await;
                Err(error)
            }
        };

        match result {
            Ok(disposition) => {
                self.metrics.reconciliation_finished(true);
                tracing::info!(
                    upload_id = %descriptor.id,
                    phase = %disposition.phase,
                    elapsed_seconds = disposition.elapsed_seconds,
                    "Upload reconciled"
                );
            }
            Err(error) => {
                self.metrics.reconciliation_finished(false);
                tracing::error!(upload_id = %descriptor.id, error = %error, "Upload failed");
            }
        }
    }
}

/// Fragment-handling state owned by one connection's control loop.
pub struct ImportSession {
    service: Arc<IngestService>,
    assembler: FragmentAssembler,
    credentials: HashMap<String, Credentials>,
    reporter: Arc<TransportReporter>,
}

impl ImportSession {
    /// Handle one inbound text frame.
    ///
    /// Returns the handle of any task spawned for it: a reconciliation once an upload
    /// completes, or an `ERROR` report when its payload fails to parse. Spawned tasks are
    /// detached from the connection and keep running after it closes.
    pub fn handle_text(&mut self, text: &str) -> Option<JoinHandle<()>> {
        let fragment: FragmentMessage = match serde_json::from_str(text) {
            Ok(fragment) => fragment,
            Err(error) => {
                tracing::warn!(error = %error, "Ignoring malformed fragment message");
                return None;
            }
        };
        self.service.metrics.record_fragment();

        let FragmentMessage {
            id,
            index,
            total,
            payload,
            is_final,
            credentials,
        } = fragment;
        if let Some(credentials) = credentials {
            self.credentials.insert(id.clone(), credentials);
        }

        match self
            .assembler
            .add_fragment(&id, index, total, payload, is_final)
        {
            Ok(None) => None,
            Ok(Some(descriptor)) => {
                self.service.metrics.record_assembled();
                let credentials = self
                    .credentials
                    .remove(&id)
                    .unwrap_or_else(|| self.service.default_credentials.clone());
                let service = Arc::clone(&self.service);
                let reporter = Arc::clone(&self.reporter);
                Some(tokio::spawn(async move {
                    service.reconcile(descriptor, credentials, &reporter).await;
                }))
            }
            Err(error) => {
                self.service.metrics.record_parse_failure();
                self.credentials.remove(&id);
                tracing::warn!(upload_id = %id, error = %error, "Discarding unparseable upload");
                let reporter = Arc::clone(&self.reporter);
                let report = StatusReport::new(id, Phase::Error, error.to_string(), 0.0);
                Some(tokio::spawn(async move {
                    reporter.send(&report).await;
                }))
            }
        }
    }

    /// Uploads still waiting for fragments.
    pub fn pending_uploads(&self) -> usize {
        self.assembler.pending_sessions()
    }

    /// End the session. In-flight reconciliations keep running.
    pub fn finish(self) {
        let abandoned = self.assembler.pending_sessions();
        let in_flight = self.service.metrics.in_flight();
        tracing::info!(
            abandoned_uploads = abandoned,
            in_flight_reconciliations = in_flight,
            "Import connection closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::test_support::{MemoryStore, RecordingSink, StubFactory, StubImporter};
    use crate::store::Connection;
    use serde_json::json;

    fn service(factory: Arc<StubFactory>, writes: bool) -> Arc<IngestService> {
        let probe = ExistenceProbe::new("documents").with_policy(ProbePolicy {
            max_retries: 1,
            search_timeout: Duration::from_millis(50),
            ranked_limit: 5,
            missing_collection_backoff: Duration::from_millis(1),
            miss_backoff: Duration::from_millis(1),
        });
        let reconciler = ImportReconciler::new(factory.clone(), probe)
            .with_settle_delay(Duration::from_millis(1));
        let importer = Arc::new(StubImporter {
            collection: "documents",
            writes,
            fails: false,
        });
        Arc::new(IngestService::new(
            factory,
            importer,
            reconciler,
            Credentials {
                url: "http://default".into(),
                api_key: None,
            },
        ))
    }

    fn fragment(id: &str, index: usize, total: usize, payload: &str) -> String {
        json!({ "id": id, "index": index, "total": total, "payload": payload }).to_string()
    }

    #[tokio::test]
    async fn completed_upload_is_reconciled_and_reported() {
        let store: Connection = Arc::new(MemoryStore::empty());
        let service = service(Arc::new(StubFactory::serving(store)), true);
        let sink = Arc::new(RecordingSink::default());
        let mut session = service.open_session(sink.clone());

        assert!(
            session
                .handle_text(&fragment("f1", 1, 2, r#""name":"A.pdf"}"#))
                .is_none()
        );
        assert_eq!(session.pending_uploads(), 1);
        let task = session
            .handle_text(&fragment("f1", 0, 2, r#"{"id":"f1","#))
            .expect("reconciliation spawned");
        session.finish();
        task.await.expect("task");

        let reports = sink.reports.lock().await;
        let phases: Vec<_> = reports.iter().map(|report| report.phase).collect();
        assert_eq!(phases, vec![Phase::Processing, Phase::Done]);
        let snapshot = service.metrics_snapshot();
        assert_eq!(snapshot.uploads_assembled, 1);
        assert_eq!(snapshot.imports_succeeded, 1);
        assert_eq!(snapshot.in_flight, 0);
    }

    #[tokio::test]
    async fn parse_failure_reports_error_for_that_upload() {
        let store: Connection = Arc::new(MemoryStore::empty());
        let service = service(Arc::new(StubFactory::serving(store)), true);
        let sink = Arc::new(RecordingSink::default());
        let mut session = service.open_session(sink.clone());

        let task = session
            .handle_text(&fragment("bad", 0, 1, "not json"))
            .expect("error report spawned");
        task.await.expect("task");

        let reports = sink.reports.lock().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].id, "bad");
        assert_eq!(reports[0].phase, Phase::Error);
        assert_eq!(service.metrics_snapshot().parse_failures, 1);
    }

    #[tokio::test]
    async fn malformed_messages_are_ignored() {
        let store: Connection = Arc::new(MemoryStore::empty());
        let service = service(Arc::new(StubFactory::serving(store)), true);
        let sink = Arc::new(RecordingSink::default());
        let mut session = service.open_session(sink.clone());

        assert!(session.handle_text("{\"hello\":1}").is_none());
        assert!(session.handle_text("garbage").is_none());
        assert!(sink.reports.lock().await.is_empty());
        assert_eq!(service.metrics_snapshot().fragments_received, 0);
    }

    #[tokio::test]
    async fn unreachable_store_ends_in_error() {
        let factory = Arc::new(StubFactory::unreachable());
        let service = service(factory.clone(), true);
        let sink = Arc::new(RecordingSink::default());
        let mut session = service.open_session(sink.clone());

        let task = session
            .handle_text(&fragment("f1", 0, 1, r#"{"id":"f1","name":"A.pdf"}"#))
            .expect("spawned");
        task.await.expect("task");

        let reports = sink.reports.lock().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].phase, Phase::Error);
        assert!(reports[0].message.contains("http://default"));
        assert_eq!(factory.connects(), 1);
        assert_eq!(service.metrics_snapshot().imports_failed, 1);
    }

    #[tokio::test]
    async fn fragment_credentials_override_the_default_store() {
        let factory = Arc::new(StubFactory::unreachable());
        let service = service(factory, true);
        let sink = Arc::new(RecordingSink::default());
        let mut session = service.open_session(sink.clone());

        let message = json!({
            "fileID": "f1",
            "order": 0,
            "total": 1,
            "chunk": r#"{"id":"f1"}"#,
            "credentials": { "url": "http://tenant", "apiKey": "secret" }
        })
        .to_string();
        session.handle_text(&message).expect("spawned").await.expect("task");

        let reports = sink.reports.lock().await;
        assert!(reports[0].message.contains("http://tenant"));
    }
}
