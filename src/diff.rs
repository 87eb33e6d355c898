//! Structural diff computation for JSON records
//!
//! This module computes path-addressed differences between two structured
//! records, the building block for version diffs, snapshot comparison and
//! history reconstruction.
//!
//! ## Overview
//!
//! The record diff walks the union of both key sets:
//!
//! - key only in the new record → `added`
//! - key only in the old record → `deleted`
//! - both values are objects → recurse, joining paths with `.`
//! - otherwise → `modified` when the values are not deeply equal
//!
//! A `.` or `\` inside a key is escaped with a backslash, so every path
//! names exactly one field. [`split_path`] recovers the keys. The empty key
//! is a real field whose path is the empty string.
//!
//! Arrays are compared as whole values. An array with one inserted element
//! reports the entire field as `modified`. [`diff_keyed`] layers an
//! element-level diff keyed by `id` on top of this for callers that need it.
//!
//! Deep equality treats numbers numerically (`1 == 1.0`) and RFC 3339
//! strings by the instant they denote.
//!
//! ## Examples
//!
//! ```rust
//! use vellum::diff::diff_values;
//! use vellum::types::ChangeType;
//! use serde_json::json;
//!
//! let old = json!({"a": 1, "b": {"c": 2}});
//! let new = json!({"a": 1, "b": {"c": 3}, "d": 4});
//!
//! let changes = diff_values(&old, &new);
//! assert_eq!(changes.len(), 2);
//! assert_eq!(changes[0].path, "b.c");
//! assert_eq!(changes[0].change_type, ChangeType::Modified);
//! assert_eq!(changes[1].path, "d");
//! assert_eq!(changes[1].change_type, ChangeType::Added);
//! ```

#[cfg(feature = "gxhash")]
use crate::collections::{HashMapExt, HashSetExt};
use crate::collections::{HashMap, HashSet};
use crate::types::{entity_id, ChangeType, FieldChange, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use tracing::trace;

/// Compute the field changes that turn `old` into `new`
///
/// Output order is stable for a given pair of inputs: keys of `old` in
/// their own order, then keys that only exist in `new`.
pub fn diff_records(old: &Record, new: &Record) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    walk_records(old, new, None, &mut changes);
    changes
}

/// Compute field changes between two arbitrary JSON values
///
/// Two objects are diffed field by field. Any other pair is compared as a
/// whole and reported as a single change with an empty path. Such a change
/// describes a non-record value and is not replayable by [`crate::patch`],
/// which always reads paths as field addresses.
pub fn diff_values(old: &Value, new: &Value) -> Vec<FieldChange> {
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => diff_records(old, new),
        _ if deep_equal(old, new) => Vec::new(),
        _ => vec![FieldChange::modified("", old.clone(), new.clone())],
    }
}

/// Whether two records differ at all
pub fn has_changes(old: &Record, new: &Record) -> bool {
    !diff_records(old, new).is_empty()
}

/// Split a change path into the keys it addresses
///
/// Inverse of the path building done by [`diff_records`]: `\.` is a literal
/// dot and `\\` a literal backslash. The empty path addresses the empty key.
pub fn split_path(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => current.push('\\'),
            },
            '.' => segments.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    segments.push(current);
    segments
}

fn escape_key(key: &str) -> String {
    if !key.contains(['.', '\\']) {
        return key.to_string();
    }
    let mut escaped = String::with_capacity(key.len() + 2);
    for c in key.chars() {
        if c == '.' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn join_path(prefix: Option<&str>, key: &str) -> String {
    match prefix {
        None => escape_key(key),
        Some(prefix) => format!("{}.{}", prefix, escape_key(key)),
    }
}

fn walk_records(old: &Record, new: &Record, prefix: Option<&str>, out: &mut Vec<FieldChange>) {
    for (key, old_value) in old {
        let path = join_path(prefix, key);
        match new.get(key) {
            None => out.push(FieldChange::deleted(path, old_value.clone())),
            Some(new_value) => match (old_value, new_value) {
                (Value::Object(old_child), Value::Object(new_child)) => {
                    walk_records(old_child, new_child, Some(&path), out);
                }
                _ => {
                    if !deep_equal(old_value, new_value) {
                        out.push(FieldChange::modified(path, old_value.clone(), new_value.clone()));
                    }
                }
            },
        }
    }

    for (key, new_value) in new {
        if !old.contains_key(key) {
            out.push(FieldChange::added(join_path(prefix, key), new_value.clone()));
        }
    }
}

/// Deep value equality used by the diff engine
///
/// - numbers compare numerically
/// - strings that are both RFC 3339 timestamps compare by instant
/// - arrays compare element-wise in order
/// - objects compare key-wise regardless of key order
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::String(x), Value::String(y)) => {
            if x == y {
                return true;
            }
            match (parse_date_like(x), parse_date_like(y)) {
                (Some(dx), Some(dy)) => dx == dy,
                _ => false,
            }
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| deep_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| y.get(k).map_or(false, |other| deep_equal(v, other)))
        }
        _ => false,
    }
}

/// A JSON number reduced to the value it denotes
///
/// Integers and integral floats collapse to `Int`, so `3`, `3.0` and
/// `-0.0`/`0` meet. Only non-integral floats stay `Float`. Equality and
/// the content hash both go through this form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum CanonicalNumber {
    Int(i128),
    Float(f64),
}

/// 2^127, the first float magnitude outside `i128`
const I128_LIMIT: f64 = 170_141_183_460_469_231_731_687_303_715_884_105_728.0;

pub(crate) fn canonical_number(n: &Number) -> CanonicalNumber {
    if let Some(i) = n.as_i64() {
        return CanonicalNumber::Int(i128::from(i));
    }
    if let Some(u) = n.as_u64() {
        return CanonicalNumber::Int(i128::from(u));
    }
    let f = n.as_f64().unwrap_or(f64::NAN);
    if f.is_finite() && f.fract() == 0.0 && f.abs() < I128_LIMIT {
        CanonicalNumber::Int(f as i128)
    } else {
        CanonicalNumber::Float(f)
    }
}

pub(crate) fn numbers_equal(a: &Number, b: &Number) -> bool {
    canonical_number(a) == canonical_number(b)
}

/// Parse a string as a date-like value
///
/// Only full RFC 3339 timestamps qualify, so ordinary strings such as
/// `"2024"` stay plain strings.
pub fn parse_date_like(s: &str) -> Option<DateTime<Utc>> {
    // Cheap reject before invoking the parser
    if s.len() < 20 || !s.as_bytes()[0].is_ascii_digit() {
        return None;
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Element-level change inside an array of id-keyed records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementChange {
    /// Id of the element
    pub id: String,
    /// Kind of change
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    /// Element before the change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    /// Element after the change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
    /// Field-level changes for modified elements
    #[serde(default)]
    pub field_changes: Vec<FieldChange>,
}

/// Diff two arrays element by element, matching elements on their `id` field
///
/// Elements present only in `new` are `added`, only in `old` are `deleted`,
/// and elements in both are `modified` when their fields differ. Unchanged
/// elements and elements without a string id are omitted. Added and
/// modified elements come in `new` order, followed by deletions in `old`
/// order.
pub fn diff_keyed(old: &[Value], new: &[Value]) -> Vec<ElementChange> {
    let mut old_by_id: HashMap<&str, &Value> = HashMap::with_capacity(old.len());
    for element in old {
        match entity_id(element) {
            Some(id) => {
                old_by_id.insert(id, element);
            }
            None => trace!("Skipping array element without id"),
        }
    }

    let mut changes = Vec::new();
    let mut seen: HashSet<&str> = HashSet::with_capacity(new.len());

    for element in new {
        let Some(id) = entity_id(element) else {
            trace!("Skipping array element without id");
            continue;
        };
        seen.insert(id);
        match old_by_id.get(id) {
            None => changes.push(ElementChange {
                id: id.to_string(),
                change_type: ChangeType::Added,
                old: None,
                new: Some(element.clone()),
                field_changes: Vec::new(),
            }),
            Some(previous) => {
                let field_changes = diff_values(previous, element);
                if !field_changes.is_empty() {
                    changes.push(ElementChange {
                        id: id.to_string(),
                        change_type: ChangeType::Modified,
                        old: Some((*previous).clone()),
                        new: Some(element.clone()),
                        field_changes,
                    });
                }
            }
        }
    }

    for element in old {
        if let Some(id) = entity_id(element) {
            if !seen.contains(id) {
                changes.push(ElementChange {
                    id: id.to_string(),
                    change_type: ChangeType::Deleted,
                    old: Some(element.clone()),
                    new: None,
                    field_changes: Vec::new(),
                });
            }
        }
    }

    changes
}
