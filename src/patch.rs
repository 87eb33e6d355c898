//! Applying field changes to records
//!
//! A change list produced by [`crate::diff::diff_records`] can be replayed
//! onto the old record to obtain the new one, or reversed and replayed onto
//! the new record to obtain the old one.
//!
//! Changes are applied in three passes: deletions, then additions, then
//! modifications. Patching never fails:
//!
//! - deleting below a missing parent does nothing
//! - setting below a missing or non-object parent creates the parent chain
//!
//! Paths are always field addresses. The empty path is the empty key.
//!
//! ```rust
//! use vellum::diff::diff_values;
//! use vellum::patch::{apply_forward, apply_reverse};
//! use serde_json::json;
//!
//! let old = json!({"hp": 10, "stats": {"atk": 2}});
//! let new = json!({"hp": 12, "stats": {"atk": 2, "def": 1}});
//! let changes = diff_values(&old, &new);
//!
//! let forward = apply_forward(old.as_object().unwrap(), &changes);
//! assert_eq!(serde_json::Value::Object(forward), new);
//!
//! let back = apply_reverse(new.as_object().unwrap(), &changes);
//! assert_eq!(serde_json::Value::Object(back), old);
//! ```

use crate::diff::split_path;
use crate::types::{ChangeType, FieldChange, Record};
use serde_json::{Map, Value};
use tracing::trace;

/// Apply changes to a copy of `record`
pub fn apply_forward(record: &Record, changes: &[FieldChange]) -> Record {
    let mut patched = record.clone();
    apply_in_place(&mut patched, changes);
    patched
}

/// Roll changes back on a copy of `record`
pub fn apply_reverse(record: &Record, changes: &[FieldChange]) -> Record {
    apply_forward(record, &reverse_changes(changes))
}

/// Invert a change list: added ↔ deleted, old ↔ new
pub fn reverse_changes(changes: &[FieldChange]) -> Vec<FieldChange> {
    changes.iter().map(FieldChange::reversed).collect()
}

/// Apply changes to `record` in place
pub fn apply_in_place(record: &mut Record, changes: &[FieldChange]) {
    for pass in [ChangeType::Deleted, ChangeType::Added, ChangeType::Modified] {
        for change in changes.iter().filter(|c| c.change_type == pass) {
            apply_one(record, change);
        }
    }
}

fn apply_one(record: &mut Record, change: &FieldChange) {
    let owned = split_path(&change.path);
    let segments: Vec<&str> = owned.iter().map(String::as_str).collect();
    match change.change_type {
        ChangeType::Deleted => delete_path(record, &segments),
        ChangeType::Added | ChangeType::Modified => {
            let value = change.new_value.clone().unwrap_or(Value::Null);
            set_path(record, &segments, value);
        }
    }
}

fn set_path(record: &mut Record, segments: &[&str], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut current = record;
    for segment in parents {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        current = match slot {
            Value::Object(map) => map,
            _ => unreachable!("slot was just made an object"),
        };
    }
    current.insert(last.to_string(), value);
}

fn delete_path(record: &mut Record, segments: &[&str]) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut current = record;
    for segment in parents {
        match current.get_mut(*segment) {
            Some(Value::Object(map)) => current = map,
            _ => {
                trace!("Parent of '{}' missing, nothing to delete", segments.join("."));
                return;
            }
        }
    }
    current.remove(*last);
}
