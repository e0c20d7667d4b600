//! Helpers for constructing and hashing Qdrant payloads.

use crate::ingest::Descriptor;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

/// Payload field carrying the document title; the identity used for verification.
pub const TITLE_FIELD: &str = "title";
/// Payload field carrying the upload identifier.
pub const DOCUMENT_ID_FIELD: &str = "document_id";

/// Build the payload stored with the single record describing an imported document.
pub(crate) fn build_document_payload(
    descriptor: &Descriptor,
    chunk_count: usize,
    timestamp_rfc3339: &str,
) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert(
        DOCUMENT_ID_FIELD.into(),
        Value::String(descriptor.id.clone()),
    );
    payload.insert(
        TITLE_FIELD.into(),
        Value::String(descriptor.title().to_string()),
    );
    payload.insert(
        "extension".into(),
        Value::String(descriptor.extension.clone()),
    );
    payload.insert("file_size".into(), Value::from(descriptor.file_size));
    payload.insert("chunk_count".into(), Value::from(chunk_count));
    payload.insert(
        "timestamp".into(),
        Value::String(timestamp_rfc3339.to_string()),
    );

    if !descriptor.source.is_empty() {
        payload.insert("source".into(), Value::String(descriptor.source.clone()));
    }

    if !descriptor.labels.is_empty() {
        payload.insert(
            "labels".into(),
            Value::Array(
                descriptor
                    .labels
                    .iter()
                    .map(|label| Value::String(label.clone()))
                    .collect(),
            ),
        );
    }

    if !descriptor.metadata.is_null() {
        payload.insert("metadata".into(), descriptor.metadata.clone());
    }

    payload
}

/// Build the payload stored with one chunk of a document.
pub(crate) fn build_chunk_payload(
    descriptor: &Descriptor,
    chunk_index: usize,
    chunk_hash: &str,
    text: &str,
    timestamp_rfc3339: &str,
) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert(
        DOCUMENT_ID_FIELD.into(),
        Value::String(descriptor.id.clone()),
    );
    payload.insert(
        TITLE_FIELD.into(),
        Value::String(descriptor.title().to_string()),
    );
    payload.insert("chunk_index".into(), Value::from(chunk_index));
    payload.insert("chunk_hash".into(), Value::String(chunk_hash.to_string()));
    payload.insert("text".into(), Value::String(text.to_string()));
    payload.insert(
        "timestamp".into(),
        Value::String(timestamp_rfc3339.to_string()),
    );
    payload
}

/// Compute a deterministic SHA-256 hash for the chunk text.
pub fn compute_chunk_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Current timestamp formatted for payload storage.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Stable point identifier for a document record, so re-imports overwrite in place.
pub(crate) fn document_point_id(document_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, document_id.as_bytes()).to_string()
}

/// Stable point identifier for one chunk of a document, so re-imports overwrite in place.
pub(crate) fn chunk_point_id(document_id: &str, chunk_index: usize) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{document_id}:{chunk_index}").as_bytes(),
    )
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor() -> Descriptor {
        serde_json::from_value(json!({
            "fileID": "f1",
            "filename": "Quarterly.pdf",
            "extension": "pdf",
            "fileSize": 2048,
            "labels": ["finance"],
            "source": "upload",
            "content": "hello"
        }))
        .expect("descriptor")
    }

    #[test]
    fn chunk_hash_is_stable() {
        let h1 = compute_chunk_hash("Hello world");
        let h2 = compute_chunk_hash("Hello world");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn timestamp_is_rfc3339_like() {
        let ts = current_timestamp_rfc3339();
        assert!(ts.contains('T') && ts.ends_with('Z'));
    }

    #[test]
    fn document_point_id_is_deterministic() {
        assert_eq!(document_point_id("f1"), document_point_id("f1"));
        assert_ne!(document_point_id("f1"), document_point_id("f2"));
        assert!(Uuid::parse_str(&document_point_id("f1")).is_ok());
    }

    #[test]
    fn chunk_point_id_is_deterministic_per_index() {
        assert_eq!(chunk_point_id("f1", 0), chunk_point_id("f1", 0));
        assert_ne!(chunk_point_id("f1", 0), chunk_point_id("f1", 1));
        assert_ne!(chunk_point_id("f1", 0), chunk_point_id("f2", 0));
        assert_ne!(chunk_point_id("f1", 0), document_point_id("f1"));
    }

    #[test]
    fn nameless_descriptor_is_titled_by_its_id() {
        let nameless: Descriptor =
            serde_json::from_value(json!({ "id": "f9", "content": "x" })).expect("descriptor");
        let payload = build_document_payload(&nameless, 0, "2025-01-01T00:00:00Z");
        assert_eq!(payload[TITLE_FIELD], "f9");
        let payload = build_chunk_payload(&nameless, 0, "abc", "x", "2025-01-01T00:00:00Z");
        assert_eq!(payload[TITLE_FIELD], "f9");
    }

    #[test]
    fn document_payload_carries_identity_and_metadata() {
        let payload = build_document_payload(&descriptor(), 3, "2025-01-01T00:00:00Z");
        assert_eq!(payload[DOCUMENT_ID_FIELD], "f1");
        assert_eq!(payload[TITLE_FIELD], "Quarterly.pdf");
        assert_eq!(payload["extension"], "pdf");
        assert_eq!(payload["file_size"], 2048);
        assert_eq!(payload["chunk_count"], 3);
        assert_eq!(payload["labels"], json!(["finance"]));
        assert_eq!(payload["source"], "upload");
        assert!(!payload.contains_key("metadata"));
    }

    #[test]
    fn chunk_payload_links_back_to_document() {
        let payload = build_chunk_payload(&descriptor(), 2, "abc", "body", "2025-01-01T00:00:00Z");
        assert_eq!(payload[DOCUMENT_ID_FIELD], "f1");
        assert_eq!(payload["chunk_index"], 2);
        assert_eq!(payload["chunk_hash"], "abc");
        assert_eq!(payload["text"], "body");
    }
}
