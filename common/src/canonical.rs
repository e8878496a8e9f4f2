//! Canonical JSON normalization and the project-state fingerprint (§6).
//!
//! `canonical_json` produces a deterministic `serde_json::Value` — object
//! keys sorted, nothing else reordered — so two semantically identical
//! manifests serialize to the same bytes regardless of source field order.
//! `fingerprint` hashes that canonical form with SHA-256.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Recursively rebuilds `value` with every object's keys sorted. Arrays are
/// left in place: order within a slice is caller-controlled (the diff
/// engine is the one that knows whether a given array is order-significant,
/// per `PlanConfig::ignore_order_in_slices`), this function never guesses.
pub fn canonical_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), canonical_json(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical_json).collect()),
        other => other.clone(),
    }
}

/// Serializes `value` to canonical JSON and returns it as a `String`, ready
/// to hash or diff byte-for-byte.
pub fn canonical_json_string<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let raw = serde_json::to_value(value)?;
    serde_json::to_string(&canonical_json(&raw))
}

/// SHA-256 fingerprint (hex-encoded) of `value`'s canonical JSON form, used
/// by state discovery (§4.2) to cheaply detect whether a project's observed
/// state changed between two polls.
pub fn fingerprint<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let canonical = canonical_json_string(value)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_object_keys() {
        let value = json!({"b": 1, "a": 2, "c": {"z": 1, "y": 2}});
        let canonical = canonical_json(&value);
        assert_eq!(
            serde_json::to_string(&canonical).unwrap(),
            r#"{"a":2,"b":1,"c":{"y":2,"z":1}}"#
        );
    }

    #[test]
    fn fingerprint_is_stable_across_field_order() {
        let a = json!({"name": "prod", "size": "M10"});
        let b = json!({"size": "M10", "name": "prod"});
        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn fingerprint_changes_when_a_value_changes() {
        let a = json!({"name": "prod", "size": "M10"});
        let b = json!({"name": "prod", "size": "M20"});
        assert_ne!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }
}
