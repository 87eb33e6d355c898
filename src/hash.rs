//! Order-independent content hashing for records and manifests
//!
//! Hashes are used only to skip redundant saves, never as an identity or
//! security guarantee, so a fast non-cryptographic hash is enough.
//!
//! Records are first written in a canonical form:
//!
//! - object keys sorted at every nesting level
//! - integral numbers written without a fraction (`1.0` → `1`)
//! - RFC 3339 timestamps normalized to UTC
//!
//! and the canonical bytes are run through 64-bit FNV-1a. The canonical form
//! follows the equality rules of [`crate::diff::deep_equal`], so two records
//! whose diff is empty always hash equal.
//!
//! ```rust
//! use vellum::hash::content_hash;
//! use serde_json::json;
//!
//! let a = json!({"hp": 10, "stats": {"atk": 3, "def": 1}});
//! let b = json!({"stats": {"def": 1, "atk": 3}, "hp": 10.0});
//! assert_eq!(content_hash(&a), content_hash(&b));
//! assert_eq!(content_hash(&a).len(), 16);
//! ```

use crate::diff::{canonical_number, parse_date_like, CanonicalNumber};
use crate::types::{entity_id, Manifests};
use chrono::SecondsFormat;
use serde_json::{Number, Value};
use std::fmt::Write as _;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Incremental 64-bit FNV-1a hasher
#[derive(Debug, Clone, Copy)]
pub struct Fnv1a {
    state: u64,
}

impl Default for Fnv1a {
    fn default() -> Self {
        Self::new()
    }
}

impl Fnv1a {
    /// Fresh hasher at the FNV offset basis
    pub fn new() -> Self {
        Self {
            state: FNV_OFFSET_BASIS,
        }
    }

    /// Feed bytes into the hash
    pub fn update(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= u64::from(byte);
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
    }

    /// Current hash value
    pub fn finish(&self) -> u64 {
        self.state
    }

    /// Current hash as 16 lowercase hex characters
    pub fn finish_hex(&self) -> String {
        hex::encode(self.state.to_be_bytes())
    }
}

/// Hash arbitrary bytes with FNV-1a, hex encoded
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Fnv1a::new();
    hasher.update(bytes);
    hasher.finish_hex()
}

/// Deterministic, key-order-independent hash of a JSON value
pub fn content_hash(value: &Value) -> String {
    hash_bytes(canonical_json(value).as_bytes())
}

/// Canonical serialization used for hashing
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(n, out),
        Value::String(s) => match parse_date_like(s) {
            Some(instant) => {
                write_string(&instant.to_rfc3339_opts(SecondsFormat::AutoSi, true), out)
            }
            None => write_string(s, out),
        },
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
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
    }
}

fn write_number(n: &Number, out: &mut String) {
    let _ = match canonical_number(n) {
        CanonicalNumber::Int(i) => write!(out, "{}", i),
        CanonicalNumber::Float(f) => write!(out, "{}", f),
    };
}

fn write_string(s: &str, out: &mut String) {
    // Serializing a str cannot fail
    out.push_str(&serde_json::to_string(s).unwrap_or_default());
}

/// Composite hash of a manifest set
///
/// Combines a hash of the sorted entity ids per collection with a content
/// hash of every collection sorted by entity id, so reordering entities
/// inside a collection does not change the result.
pub fn manifests_hash(manifests: &Manifests) -> String {
    let mut ids = Fnv1a::new();
    let mut content = Fnv1a::new();

    for (collection, entities) in manifests.iter() {
        let mut sorted: Vec<&Value> = entities.iter().collect();
        sorted.sort_by(|a, b| entity_id(a).cmp(&entity_id(b)));

        ids.update(collection.as_bytes());
        ids.update(b":");
        for (i, entity) in sorted.iter().enumerate() {
            if i > 0 {
                ids.update(b",");
            }
            ids.update(entity_id(entity).unwrap_or_default().as_bytes());
        }
        ids.update(b";");

        let mut body = String::new();
        write_string(collection, &mut body);
        body.push(':');
        for entity in &sorted {
            write_canonical(entity, &mut body);
            body.push('\n');
        }
        content.update(body.as_bytes());
    }

    format!("{}-{}", ids.finish_hex(), content.finish_hex())
}
