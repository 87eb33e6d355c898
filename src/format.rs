//! Human-readable rendering of change lists
//!
//! Changes are grouped by their top-level field (or by collection for
//! snapshot diffs) and rendered either as plain/colored text for terminals
//! and logs, or as structured [`DiffSection`]s a UI can lay out itself.
//!
//! ```rust
//! use vellum::diff::diff_values;
//! use vellum::format::{format_changes, group_changes, FormatOptions};
//! use serde_json::json;
//!
//! let changes = diff_values(
//!     &json!({"stats": {"attack": 5}, "name": "Sword"}),
//!     &json!({"stats": {"attack": 7}, "name": "Sword", "rarity": "rare"}),
//! );
//!
//! let sections = group_changes(&changes);
//! assert_eq!(sections[0].title, "Stats");
//! assert_eq!(sections[0].entries[0].label, "Attack");
//!
//! let text = format_changes(&changes, &FormatOptions::plain());
//! assert!(text.contains("~ stats.attack: 5 → 7"));
//! ```

use crate::diff::split_path;
use crate::types::{
    AssetHistoryEntry, ChangeType, DiffSummary, FieldChange, HistoryChangeType, SnapshotDiff,
};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;

/// Options controlling text rendering
#[derive(Debug, Clone)]
pub struct FormatOptions {
    /// Emit ANSI colors
    pub color: bool,
    /// Values longer than this are truncated with an ellipsis
    pub max_value_width: usize,
    /// Print old/new values next to each path
    pub show_values: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            color: true,
            max_value_width: 60,
            show_values: true,
        }
    }
}

impl FormatOptions {
    /// Default options without colors
    pub fn plain() -> Self {
        Self {
            color: false,
            ..Default::default()
        }
    }
}

/// One rendered change inside a section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffEntry {
    /// Full dot path
    pub path: String,
    /// Humanized last path segment
    pub label: String,
    /// Kind of change
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    /// Display form of the old value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_display: Option<String>,
    /// Display form of the new value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_display: Option<String>,
}

/// Changes sharing one top-level field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSection {
    /// Top-level field name
    pub field: String,
    /// Humanized field name
    pub title: String,
    /// Changes in first-seen order
    pub entries: Vec<DiffEntry>,
}

/// Turn `maxHealth`, `max_health` or `max-health` into `Max Health`
pub fn humanize(segment: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for ch in segment.chars() {
        if ch == '_' || ch == '-' || ch == ' ' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        current.push(ch);
    }
    if !current.is_empty() {
        words.push(current);
    }

    words
        .iter()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Humanize every segment of a dot path, joined with `›`
pub fn humanize_path(path: &str) -> String {
    if path.is_empty() {
        return "(record)".to_string();
    }
    split_path(path)
        .iter()
        .map(|segment| humanize(segment))
        .collect::<Vec<_>>()
        .join(" › ")
}

/// Compact single-line display of a JSON value
pub fn format_value(value: &Value, max_width: usize) -> String {
    let text = match value {
        Value::Null => "null".to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) if items.is_empty() => "[]".to_string(),
        Value::Object(map) if map.is_empty() => "{}".to_string(),
        other => other.to_string(),
    };

    if text.chars().count() <= max_width {
        return text;
    }
    match value {
        Value::Array(items) => format!("[{} items]", items.len()),
        Value::Object(map) => format!("{{{} fields}}", map.len()),
        _ => {
            let keep = max_width.saturating_sub(1);
            let mut truncated: String = text.chars().take(keep).collect();
            truncated.push('…');
            truncated
        }
    }
}

/// Group changes by their top-level field
pub fn group_changes(changes: &[FieldChange]) -> Vec<DiffSection> {
    let width = FormatOptions::default().max_value_width;
    let mut sections: Vec<DiffSection> = Vec::new();

    for change in changes {
        let field = change.top_level_field();
        let entry = DiffEntry {
            path: change.path.clone(),
            label: humanize(split_path(&change.path).last().map_or("", String::as_str)),
            change_type: change.change_type,
            old_display: change.old_value.as_ref().map(|v| format_value(v, width)),
            new_display: change.new_value.as_ref().map(|v| format_value(v, width)),
        };

        match sections.iter_mut().find(|s| s.field == field) {
            Some(section) => section.entries.push(entry),
            None => sections.push(DiffSection {
                title: humanize(&field),
                field,
                entries: vec![entry],
            }),
        }
    }

    sections
}

/// One-line summary such as `1 added, 2 modified, 0 deleted`
pub fn format_summary(summary: &DiffSummary) -> String {
    if !summary.has_changes() {
        return "No changes".to_string();
    }
    format!(
        "{} added, {} modified, {} deleted",
        summary.added, summary.modified, summary.deleted
    )
}

fn marker(change_type: ChangeType) -> &'static str {
    match change_type {
        ChangeType::Added => "+",
        ChangeType::Modified => "~",
        ChangeType::Deleted => "-",
    }
}

fn paint(text: &str, change_type: ChangeType, options: &FormatOptions) -> String {
    if !options.color {
        return text.to_string();
    }
    match change_type {
        ChangeType::Added => text.green().to_string(),
        ChangeType::Modified => text.yellow().to_string(),
        ChangeType::Deleted => text.red().to_string(),
    }
}

fn heading(text: &str, options: &FormatOptions) -> String {
    if options.color {
        text.bold().to_string()
    } else {
        text.to_string()
    }
}

fn change_line(change: &FieldChange, options: &FormatOptions) -> String {
    let width = options.max_value_width;
    let mut line = format!("{} {}", marker(change.change_type), change.path);
    if options.show_values {
        let old = change.old_value.as_ref().map(|v| format_value(v, width));
        let new = change.new_value.as_ref().map(|v| format_value(v, width));
        match (old, new) {
            (Some(old), Some(new)) => {
                let _ = write!(line, ": {} → {}", old, new);
            }
            (None, Some(new)) => {
                let _ = write!(line, ": {}", new);
            }
            (Some(old), None) => {
                let _ = write!(line, ": {}", old);
            }
            (None, None) => {}
        }
    }
    paint(&line, change.change_type, options)
}

/// Render a field change list grouped by top-level field
pub fn format_changes(changes: &[FieldChange], options: &FormatOptions) -> String {
    if changes.is_empty() {
        return "No changes\n".to_string();
    }

    let mut out = String::new();
    let mut current_field: Option<String> = None;
    let mut ordered: Vec<&FieldChange> = Vec::with_capacity(changes.len());
    for section in group_changes(changes) {
        for entry in &section.entries {
            if let Some(change) = changes.iter().find(|c| c.path == entry.path) {
                ordered.push(change);
            }
        }
    }

    for change in ordered {
        let field = change.top_level_field();
        if current_field.as_deref() != Some(field.as_str()) {
            let _ = writeln!(out, "{}", heading(&humanize(&field), options));
            current_field = Some(field);
        }
        let _ = writeln!(out, "  {}", change_line(change, options));
    }

    let _ = writeln!(out, "{}", format_summary(&DiffSummary::from_changes(changes)));
    out
}

/// Render a snapshot comparison grouped by collection
pub fn format_snapshot_diff(diff: &SnapshotDiff, options: &FormatOptions) -> String {
    let mut out = String::new();
    let mut current_collection: Option<&str> = None;

    for change in &diff.changes {
        if current_collection != Some(change.collection.as_str()) {
            let _ = writeln!(out, "{}", heading(&humanize(&change.collection), options));
            current_collection = Some(change.collection.as_str());
        }
        let label = match &change.entity_name {
            Some(name) => format!("{} ({})", name, change.entity_id),
            None => change.entity_id.clone(),
        };
        let line = format!("{} {}", marker(change.change_type), label);
        let _ = writeln!(out, "  {}", paint(&line, change.change_type, options));
        for field_change in &change.field_changes {
            let _ = writeln!(out, "      {}", change_line(field_change, options));
        }
    }

    let _ = writeln!(out, "{}", format_summary(&diff.summary));
    out
}

/// Render a reconstructed asset timeline, newest first
pub fn format_asset_history(entries: &[AssetHistoryEntry], options: &FormatOptions) -> String {
    if entries.is_empty() {
        return "No history\n".to_string();
    }

    let mut out = String::new();
    for entry in entries {
        let kind = match entry.change_type {
            HistoryChangeType::Added => paint("added", ChangeType::Added, options),
            HistoryChangeType::Modified => paint("modified", ChangeType::Modified, options),
            HistoryChangeType::Deleted => paint("deleted", ChangeType::Deleted, options),
            HistoryChangeType::Unchanged => "unchanged".to_string(),
        };
        let _ = writeln!(
            out,
            "{} {} [{}] {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            kind,
            entry.collection,
            entry.description
        );
        for change in &entry.field_changes {
            let _ = writeln!(out, "    {}", change_line(change, options));
        }
    }
    out
}
