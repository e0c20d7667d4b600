//! HTTP surface for docsink.
//!
//! - `GET /ws/import` – WebSocket for fragment uploads. Each text frame carries one fragment;
//!   status reports for every upload on the connection are written back as JSON text frames.
//! - `GET /metrics` – Ingestion counters.
//!
//! Reconciliations started on a connection outlive it: closing the socket only stops status
//! delivery.

use crate::ingest::{ChannelSink, ImportSession, IngestService};
use crate::metrics::MetricsSnapshot;
use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

/// Build the HTTP router exposing the ingestion surface.
pub fn create_router(service: Arc<IngestService>) -> Router {
    Router::new()
        .route("/ws/import", get(import_socket))
        .route("/metrics", get(get_metrics))
        .with_state(service)
}

async fn import_socket(
    ws: WebSocketUpgrade,
    State(service): State<Arc<IngestService>>,
) -> Response {
    ws.on_upgrade(move |socket| drive_import_socket(socket, service))
}

/// Control loop for one import connection.
async fn drive_import_socket(socket: WebSocket, service: Arc<IngestService>) {
    let (mut sender, mut receiver) = socket.split();
    let (sink, mut reports) = ChannelSink::new();

    // A failed write ends the writer, closing the queue so the reporter sees a permanent failure.
    tokio::spawn(async move {
        while let Some(report) = reports.recv().await {
            let text = match serde_json::to_string(&report) {
                Ok(text) => text,
                Err(error) => {
                    tracing::warn!(upload_id = %report.id, error = %error, "Failed to encode status");
                    continue;
                }
            };
            if let Err(error) = sender.send(Message::Text(text)).await {
                tracing::debug!(error = %error, "Status write failed; closing writer");
                break;
            }
        }
    });

    let mut session = service.open_session(Arc::new(sink));
    tracing::info!("Import connection opened");
    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => dispatch(&mut session, &text),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => dispatch(&mut session, &text),
                Err(error) => {
                    tracing::warn!(error = %error, "Ignoring non UTF-8 binary frame");
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Err(error) => {
                tracing::debug!(error = %error, "Import connection read failed");
                break;
            }
        }
    }
    session.finish();
}

fn dispatch(session: &mut ImportSession, text: &str) {
    if session.handle_text(text).is_some() {
        tracing::trace!(pending = session.pending_uploads(), "Upload task spawned");
    }
}

/// Return the ingestion counters.
async fn get_metrics(State(service): State<Arc<IngestService>>) -> Json<MetricsSnapshot> {
    Json(service.metrics_snapshot())
}

#[cfg(test)]
mod tests {
    use super::create_router;
    use crate::ingest::test_support::{MemoryStore, StubFactory, StubImporter};
    use crate::ingest::{ExistenceProbe, ImportReconciler, IngestService};
    use crate::metrics::MetricsSnapshot;
    use crate::store::Credentials;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
    };
    use std::sync::Arc;
    use tower::ServiceExt;

    fn service() -> Arc<IngestService> {
        let factory = Arc::new(StubFactory::serving(Arc::new(MemoryStore::empty())));
        let reconciler = ImportReconciler::new(factory.clone(), ExistenceProbe::new("documents"));
        let importer = Arc::new(StubImporter {
            collection: "documents",
            writes: false,
            fails: false,
        });
        Arc::new(IngestService::new(
            factory,
            importer,
            reconciler,
            Credentials {
                url: "http://127.0.0.1:6333".into(),
                api_key: None,
            },
        ))
    }

    #[tokio::test]
    async fn metrics_route_returns_counters() {
        let app = create_router(service());

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::GET)
                    .uri("/metrics")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let snapshot: MetricsSnapshot = serde_json::from_slice(&body).expect("json body");
        assert_eq!(snapshot.uploads_assembled, 0);
        assert_eq!(snapshot.in_flight, 0);
    }

    #[tokio::test]
    async fn import_route_requires_websocket_upgrade() {
        let app = create_router(service());

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::GET)
                    .uri("/ws/import")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert!(response.status().is_client_error());
    }
}
