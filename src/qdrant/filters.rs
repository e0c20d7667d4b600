//! Filter helpers for Qdrant scroll and query requests.

use serde_json::{Value, json};

/// Build a filter requiring `field` to equal `value` exactly (keyword match).
pub fn keyword_filter(field: &str, value: &str) -> Value {
    json!({
        "must": [
            {
                "key": field,
                "match": { "value": value }
            }
        ]
    })
}
