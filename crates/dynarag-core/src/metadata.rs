//! Deterministic metadata hashing.
//!
//! Every stored embedding carries a digest of its metadata. The same digest
//! is used for deduplication signaling and for exact-match filtering during
//! retrieval, so it must be stable across processes and serializer settings.
//!
//! # Canonical form
//!
//! 1. Object keys are sorted (byte order) at every nesting level.
//! 2. Array elements keep their original order.
//! 3. Scalars keep their JSON type: `1`, `1.0` and `"1"` all serialize
//!    differently and therefore hash differently.
//! 4. No insignificant whitespace.
//!
//! The canonical bytes are hashed with SHA-256 and rendered as lowercase hex.
//! The digest is not used for any security purpose.
//!
//! Absent metadata (`None` or JSON `null`) hashes exactly like `{}`; there is
//! no "no hash" sentinel. Callers that want "no filter" pass no filter at all.
//!
//! ```rust
//! use dynarag_core::metadata::{metadata_hash, empty_metadata_hash};
//! use serde_json::json;
//!
//! let a = json!({"tenant": "a", "tags": ["x", "y"]});
//! let b = json!({"tags": ["x", "y"], "tenant": "a"});
//! assert_eq!(metadata_hash(Some(&a)), metadata_hash(Some(&b)));
//! assert_eq!(metadata_hash(None), empty_metadata_hash());
//! ```

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialize a JSON value in canonical form (sorted keys, compact).
///
/// Does not rely on the `serde_json` map ordering feature, so the output is
/// identical whether or not `preserve_order` is enabled anywhere in the
/// dependency graph.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_scalar(&Value::String((*key).clone()), out);
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => write_scalar(scalar, out),
    }
}

fn write_scalar(value: &Value, out: &mut String) {
    // Serializing a scalar Value cannot fail.
    out.push_str(&serde_json::to_string(value).unwrap_or_default());
}

/// Hash metadata into a lowercase hex digest.
///
/// `None` and `Some(Value::Null)` hash as the empty object.
pub fn metadata_hash(metadata: Option<&Value>) -> String {
    let canonical = match metadata {
        None | Some(Value::Null) => "{}".to_string(),
        Some(v) => canonical_json(v),
    };
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Digest of the empty object `{}`.
pub fn empty_metadata_hash() -> String {
    metadata_hash(Some(&Value::Object(serde_json::Map::new())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_is_irrelevant_at_every_level() {
        let a = json!({
            "outer": {"b": 1, "a": {"y": [1, 2], "x": null}},
            "list": [{"k2": "v", "k1": true}],
        });
        let b = json!({
            "list": [{"k1": true, "k2": "v"}],
            "outer": {"a": {"x": null, "y": [1, 2]}, "b": 1},
        });
        assert_eq!(metadata_hash(Some(&a)), metadata_hash(Some(&b)));
    }

    #[test]
    fn test_array_order_matters() {
        let a = json!({"tags": ["x", "y"]});
        let b = json!({"tags": ["y", "x"]});
        assert_ne!(metadata_hash(Some(&a)), metadata_hash(Some(&b)));
    }

    #[test]
    fn test_nested_array_order_matters() {
        let a = json!({"outer": {"inner": [[1, 2], [3]]}});
        let b = json!({"outer": {"inner": [[3], [1, 2]]}});
        assert_ne!(metadata_hash(Some(&a)), metadata_hash(Some(&b)));
    }

    #[test]
    fn test_value_type_matters() {
        let int = json!({"v": 1});
        let float = json!({"v": 1.0});
        let string = json!({"v": "1"});
        let boolean = json!({"v": true});
        let hashes = [
            metadata_hash(Some(&int)),
            metadata_hash(Some(&float)),
            metadata_hash(Some(&string)),
            metadata_hash(Some(&boolean)),
        ];
        for i in 0..hashes.len() {
            for j in (i + 1)..hashes.len() {
                assert_ne!(hashes[i], hashes[j], "{} vs {}", i, j);
            }
        }
    }

    #[test]
    fn test_absent_metadata_hashes_as_empty_object() {
        let empty = empty_metadata_hash();
        assert_eq!(metadata_hash(None), empty);
        assert_eq!(metadata_hash(Some(&Value::Null)), empty);
        assert_eq!(metadata_hash(Some(&json!({}))), empty);
    }

    #[test]
    fn test_digest_shape() {
        let h = metadata_hash(Some(&json!({"a": 1})));
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_canonical_json_is_compact_and_sorted() {
        let v = json!({"b": [3, 1], "a": {"d": "x", "c": 2.5}});
        assert_eq!(canonical_json(&v), r#"{"a":{"c":2.5,"d":"x"},"b":[3,1]}"#);
    }

    #[test]
    fn test_key_escaping_is_preserved() {
        let v = json!({"quo\"te": 1});
        assert_eq!(canonical_json(&v), r#"{"quo\"te":1}"#);
    }
}
