//! Per-entity timelines reconstructed from snapshots
//!
//! Snapshots store whole collections, not entity histories. The timeline of
//! one entity is rebuilt on demand by walking the retained snapshots from
//! oldest to newest and diffing each appearance of the entity against the
//! previous one.

use crate::diff::diff_values;
use crate::error::Result;
use crate::snapshots::SnapshotStore;
use crate::types::{AssetHistoryEntry, HistoryChangeType};
use serde_json::Value;
use tracing::{instrument, warn};

/// Rebuild the history of one entity, newest first
///
/// Entities are looked up in every collection in name order unless
/// `collection_filter` names one. A row is emitted for every snapshot in
/// which the entity exists, plus one `deleted` row when it disappears; a
/// later reappearance starts over as `added`. Snapshots whose bodies can no
/// longer be loaded are skipped.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use vellum::history::asset_history;
/// use vellum::snapshots::SnapshotStore;
/// use vellum::storage::MemoryStorage;
/// use vellum::types::{HistoryChangeType, Manifests, VaultConfig};
/// use serde_json::json;
///
/// # fn example() -> vellum::Result<()> {
/// let store = SnapshotStore::new(Arc::new(MemoryStorage::new()), VaultConfig::default());
/// let mut manifests = Manifests::new();
/// manifests.insert_values("npcs", vec![json!({"id": "guard", "hp": 10})]);
/// store.create_snapshot(manifests.clone(), "spawn")?;
/// manifests.insert_values("npcs", vec![json!({"id": "guard", "hp": 12})]);
/// store.create_snapshot(manifests, "buff")?;
///
/// let history = asset_history(&store, "guard", None)?;
/// assert_eq!(history[0].change_type, HistoryChangeType::Modified);
/// assert_eq!(history[1].change_type, HistoryChangeType::Added);
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
#[instrument(skip(store))]
pub fn asset_history(
    store: &SnapshotStore,
    asset_id: &str,
    collection_filter: Option<&str>,
) -> Result<Vec<AssetHistoryEntry>> {
    let summaries = store.list_snapshots()?;
    let mut entries = Vec::new();
    // Last seen state and the collection it was found in
    let mut previous: Option<(String, Value)> = None;

    for summary in summaries.iter().rev() {
        let snapshot = match store.get_snapshot(&summary.id) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                warn!("Snapshot {} is listed but has no body, skipping", summary.id);
                continue;
            }
            Err(e) if e.is_corruption() => {
                warn!("Snapshot {} is unreadable, skipping: {}", summary.id, e);
                continue;
            }
            Err(e) => return Err(e),
        };

        let found = snapshot.manifests.find_entity(asset_id, collection_filter);
        let row = |collection: &str, change_type, field_changes| AssetHistoryEntry {
            snapshot_id: snapshot.id.clone(),
            timestamp: snapshot.timestamp,
            description: snapshot.description.clone(),
            collection: collection.to_string(),
            change_type,
            field_changes,
        };

        match (found, previous.take()) {
            (Some((collection, entity)), None) => {
                entries.push(row(collection, HistoryChangeType::Added, Vec::new()));
                previous = Some((collection.to_string(), entity.clone()));
            }
            (Some((collection, entity)), Some((_, before))) => {
                let changes = diff_values(&before, entity);
                let change_type = if changes.is_empty() {
                    HistoryChangeType::Unchanged
                } else {
                    HistoryChangeType::Modified
                };
                entries.push(row(collection, change_type, changes));
                previous = Some((collection.to_string(), entity.clone()));
            }
            (None, Some((collection, _))) => {
                entries.push(row(&collection, HistoryChangeType::Deleted, Vec::new()));
            }
            (None, None) => {}
        }
    }

    entries.reverse();
    Ok(entries)
}
