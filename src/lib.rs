#![deny(missing_docs)]

//! Fragmented document ingestion with store-verified import status.

/// HTTP routing and the import WebSocket.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Upload reassembly, import reconciliation, and status reporting.
pub mod ingest;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion metrics helpers.
pub mod metrics;
/// Qdrant REST client.
pub mod qdrant;
/// Document store seam and its Qdrant implementation.
pub mod store;
