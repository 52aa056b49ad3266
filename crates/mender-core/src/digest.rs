//! Canonical JSON and SHA-256 digests used by the audit chain.

use crate::types::ProposedAction;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Canonical JSON bytes: object keys sorted lexicographically at every depth,
/// arrays in order, no whitespace.
pub fn canonical_json_bytes(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_scalar(&Value::String(key.clone()), out);
                out.push(b':');
                write_canonical(&map[key], out);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        scalar => write_scalar(scalar, out),
    }
}

fn write_scalar(value: &Value, out: &mut Vec<u8>) {
    // Scalars have a single JSON spelling; serde_json never fails on them.
    if let Ok(bytes) = serde_json::to_vec(value) {
        out.extend_from_slice(&bytes);
    }
}

/// SHA-256 of bytes as lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Digest of a JSON value in canonical form.
pub fn value_digest(value: &Value) -> String {
    sha256_hex(&canonical_json_bytes(value))
}

/// Digest identifying an action set by ids and command text, in order.
/// Tiers and labels do not participate: a dry run simulates commands.
pub fn action_set_digest(actions: &[ProposedAction]) -> String {
    let items: Vec<Value> = actions
        .iter()
        .map(|a| serde_json::json!({ "id": a.id, "command": a.command }))
        .collect();
    value_digest(&Value::Array(items))
}
