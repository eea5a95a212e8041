//! Canonical JSON and content hashing.
//!
//! Every AIGOS hash is specified against a single canonical byte string:
//! UTF-8 JSON without insignificant whitespace, object keys in lexical
//! order (unless a structure pins an explicit order), strings with only the
//! required JSON escapes, numbers in shortest round-trip form. The helpers
//! here are shared by Golden Thread hashing, capability hashing in A2A
//! tokens, and per-event hashing in the ledger.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Render a JSON value in canonical form: objects with lexically sorted
/// keys, no whitespace.
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
                // serde_json applies exactly the required JSON escapes
                out.push_str(&serde_json::to_string(key).expect("string serialization"));
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
        // Scalars already serialize canonically (shortest round-trip numbers)
        other => out.push_str(&serde_json::to_string(other).expect("scalar serialization")),
    }
}

/// SHA-256 of `bytes` as 64 lowercase hex characters.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// SHA-256 of `bytes` in the `sha256:<64 hex>` rendering used everywhere
/// a hash crosses a trust boundary.
pub fn sha256_prefixed(bytes: &[u8]) -> String {
    format!("sha256:{}", sha256_hex(bytes))
}
