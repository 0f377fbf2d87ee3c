//! Canonical JSON serialization: the single representation used anywhere a
//! byte-for-byte stable signing input is required (currently, certificate
//! signing in `meshhub-identity`).
//!
//! Canonical form: UTF-8, object keys sorted lexicographically, no
//! insignificant whitespace. The commonest source of signature-mismatch
//! bugs in systems like this is two call sites canonicalizing slightly
//! differently; routing every caller through this one function closes that
//! gap.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// Serialize `value` to its canonical JSON byte representation.
pub fn canonical_json_bytes(value: &impl Serialize) -> serde_json::Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    Ok(canonicalize(&value).into_bytes())
}

/// Serialize `value` to its canonical JSON string representation.
pub fn canonical_json_string(value: &impl Serialize) -> serde_json::Result<String> {
    let value = serde_json::to_value(value)?;
    Ok(canonicalize(&value))
}

fn canonicalize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            let mut out = String::from("{");
            for (i, (k, v)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(k).unwrap_or_default());
                out.push(':');
                out.push_str(&canonicalize(v));
            }
            out.push('}');
            out
        },
        Value::Array(items) => {
            let mut out = String::from("[");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&canonicalize(item));
            }
            out.push(']');
            out
        },
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_keys_and_drops_whitespace() {
        let value = serde_json::json!({"b": 1, "a": {"d": 2, "c": 3}});
        let canon = canonical_json_string(&value).unwrap_or_default();
        assert_eq!(canon, r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[test]
    fn is_stable_regardless_of_input_key_order() {
        let v1 = serde_json::json!({"agent_id": "a1", "expires_at": 2, "issued_at": 1});
        let v2 = serde_json::json!({"issued_at": 1, "agent_id": "a1", "expires_at": 2});
        assert_eq!(
            canonical_json_string(&v1).unwrap_or_default(),
            canonical_json_string(&v2).unwrap_or_default()
        );
    }
}
