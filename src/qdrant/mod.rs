//! Qdrant vector store integration.

pub mod client;
pub mod filters;
pub mod payload;
pub mod types;

pub use client::QdrantService;
pub use filters::keyword_filter;
pub use payload::{DOCUMENT_ID_FIELD, TITLE_FIELD, compute_chunk_hash};
pub use types::{PointInsert, QdrantError, ScoredPoint};
