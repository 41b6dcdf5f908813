//! Canonical JSON and content digests.
//!
//! Object keys are sorted by UTF-16 code units and integer-valued floats are
//! written as integers, so the same logical document always hashes the same
//! regardless of key order or `1.0` vs `1`.

use scenario_store::ContentDigest;
use serde_json::{Map, Number, Value};

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.encode_utf16().cmp(b.encode_utf16()));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k.clone(), canonicalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Number(n) if !n.is_i64() && !n.is_u64() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                Value::Number(Number::from(f as i64))
            }
            _ => value.clone(),
        },
        other => other.clone(),
    }
}

/// Compact canonical serialization.
pub fn canonical_json(value: &Value) -> serde_json::Result<String> {
    serde_json::to_string(&canonicalize(value))
}

/// SHA-256 of the canonical serialization.
pub fn content_digest(value: &Value) -> serde_json::Result<ContentDigest> {
    Ok(ContentDigest::from_bytes(canonical_json(value)?.as_bytes()))
}

/// Digest of a scenario document's content, ignoring its `version` field.
///
/// Two versions with identical content share a digest.
pub fn scenario_digest(document: &Value) -> serde_json::Result<ContentDigest> {
    match document {
        Value::Object(map) => {
            let mut content = map.clone();
            content.remove("version");
            content_digest(&Value::Object(content))
        }
        other => content_digest(other),
    }
}
