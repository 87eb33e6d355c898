//! Point-in-time snapshots of every managed collection
//!
//! A snapshot stores the full body of every collection together with
//! derived metadata: the entity count, the number of entities that changed
//! relative to the snapshot that was current at creation time, and an
//! order-insensitive content hash. A single index lists the retained
//! snapshots newest first. Once the index exceeds `max_snapshots` the oldest
//! entries are evicted and their bodies deleted.
//!
//! ## Index Recovery
//!
//! An index that cannot be parsed, or carries an unknown format version, is
//! replaced by an empty one. [`SnapshotStore::load_index`] reports this as
//! [`IndexLoad::Reset`], and with `quarantine_corrupt` enabled the rejected
//! blob is kept as `snapshots/index.corrupt`.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use vellum::snapshots::SnapshotStore;
//! use vellum::storage::MemoryStorage;
//! use vellum::types::{Manifests, VaultConfig};
//! use serde_json::json;
//!
//! # fn example() -> vellum::Result<()> {
//! let store = SnapshotStore::new(Arc::new(MemoryStorage::new()), VaultConfig::default());
//!
//! let mut manifests = Manifests::new();
//! manifests.insert_values("items", vec![json!({"id": "a", "name": "A"})]);
//! let s1 = store.create_snapshot(manifests.clone(), "initial")?;
//!
//! manifests.insert_values("items", vec![json!({"id": "a", "name": "A"}), json!({"id": "b", "name": "B"})]);
//! let s2 = store.create_snapshot(manifests, "added b")?;
//!
//! let diff = store.compare_snapshots(&s1.id, &s2.id)?.unwrap();
//! assert_eq!(diff.summary.added, 1);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use crate::diff::diff_keyed;
use crate::error::Result;
use crate::hash::manifests_hash;
use crate::storage::{
    load_state, read_json, snapshot_key, validate_key, write_if_unchanged, write_json, BlobStore,
    SNAPSHOT_INDEX_KEY,
};
use crate::types::{
    entity_name, ChangeType, DiffSummary, EntityChange, IndexLoad, Manifests, Snapshot,
    SnapshotDiff, SnapshotIndex, SnapshotMetadata, SnapshotSummary, VaultConfig,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Entity-level changes between two manifest sets
///
/// Collections are visited in name order; inside a collection added and
/// modified entities follow the new order, deletions the old order.
pub fn diff_manifests(old: &Manifests, new: &Manifests) -> Vec<EntityChange> {
    let names: BTreeSet<&str> = old.collection_names().chain(new.collection_names()).collect();
    let mut changes = Vec::new();

    for name in names {
        let before = old.collection(name).unwrap_or(&[]);
        let after = new.collection(name).unwrap_or(&[]);
        for element in diff_keyed(before, after) {
            let entity_name = element
                .new
                .as_ref()
                .or(element.old.as_ref())
                .and_then(entity_name)
                .map(str::to_string);
            changes.push(EntityChange {
                collection: name.to_string(),
                entity_id: element.id,
                entity_name,
                change_type: element.change_type,
                field_changes: element.field_changes,
            });
        }
    }

    changes
}

/// Store of collection snapshots and their index
pub struct SnapshotStore {
    storage: Arc<dyn BlobStore>,
    config: VaultConfig,
    index: Mutex<Option<SnapshotIndex>>,
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("max_snapshots", &self.config.max_snapshots)
            .field("index_cached", &self.index.lock().is_some())
            .finish()
    }
}

impl SnapshotStore {
    /// Create a store over a blob backend
    pub fn new(storage: Arc<dyn BlobStore>, config: VaultConfig) -> Self {
        Self {
            storage,
            config,
            index: Mutex::new(None),
        }
    }

    /// Load the snapshot index, reporting whether unreadable state was reset
    pub fn load_index(&self) -> Result<IndexLoad<SnapshotIndex>> {
        let mut slot = self.index.lock();
        if let Some(index) = slot.as_ref() {
            return Ok(IndexLoad::Loaded(index.clone()));
        }
        let loaded = self.read_index()?;
        *slot = Some(match &loaded {
            IndexLoad::Loaded(index) | IndexLoad::Fresh(index) => index.clone(),
            IndexLoad::Reset { value, .. } => value.clone(),
        });
        Ok(loaded)
    }

    fn read_index(&self) -> Result<IndexLoad<SnapshotIndex>> {
        load_state(
            self.storage.as_ref(),
            SNAPSHOT_INDEX_KEY,
            self.config.quarantine_corrupt,
            SnapshotIndex::default,
        )
    }

    fn cached_index(&self, slot: &mut Option<SnapshotIndex>) -> Result<SnapshotIndex> {
        if let Some(index) = slot.as_ref() {
            return Ok(index.clone());
        }
        let index = self.read_index()?.into_inner();
        *slot = Some(index.clone());
        Ok(index)
    }

    fn persist_index(&self, slot: &mut Option<SnapshotIndex>, index: SnapshotIndex, base_revision: u64) -> Result<()> {
        match write_if_unchanged(self.storage.as_ref(), SNAPSHOT_INDEX_KEY, base_revision, &index) {
            Ok(()) => {
                *slot = Some(index);
                Ok(())
            }
            Err(e) => {
                *slot = None;
                Err(e)
            }
        }
    }

    fn delete_body(&self, snapshot_id: &str) {
        match self.storage.delete(&snapshot_key(snapshot_id)) {
            Ok(true) => debug!("Deleted snapshot body {}", snapshot_id),
            Ok(false) => debug!("Snapshot body {} already gone", snapshot_id),
            Err(e) => warn!("Failed to delete snapshot body {}: {}", snapshot_id, e),
        }
    }

    /// Record the full state of every collection
    ///
    /// # Arguments
    ///
    /// * `manifests` - Every managed collection
    /// * `description` - Human description of the snapshot
    ///
    /// # Errors
    ///
    /// - [`crate::VellumError::InvalidManifest`] if an entity lacks a string id
    /// - [`crate::VellumError::DuplicateEntityId`] if an id appears twice across collections
    /// - [`crate::VellumError::ConcurrentModification`] if another writer advanced the index
    #[instrument(skip(self, manifests))]
    pub fn create_snapshot(&self, manifests: Manifests, description: &str) -> Result<Snapshot> {
        manifests.validate()?;
        let mut slot = self.index.lock();
        self.create_locked(&mut slot, manifests, description)
    }

    /// Like [`create_snapshot`](Self::create_snapshot), but skip the write
    /// when the content hash equals the current snapshot's
    #[instrument(skip(self, manifests))]
    pub fn create_snapshot_if_changed(&self, manifests: Manifests, description: &str) -> Result<Option<Snapshot>> {
        manifests.validate()?;
        let mut slot = self.index.lock();
        let index = self.cached_index(&mut slot)?;

        let hash = manifests_hash(&manifests);
        let current_hash = index
            .current_snapshot_id
            .as_deref()
            .and_then(|id| index.snapshots.iter().find(|s| s.id == id))
            .map(|s| s.metadata.hash.as_str());
        if current_hash == Some(hash.as_str()) {
            debug!("Manifests unchanged since current snapshot, skipping");
            return Ok(None);
        }

        self.create_locked(&mut slot, manifests, description).map(Some)
    }

    fn create_locked(
        &self,
        slot: &mut Option<SnapshotIndex>,
        manifests: Manifests,
        description: &str,
    ) -> Result<Snapshot> {
        let mut index = self.cached_index(slot)?;

        let previous = match index.current_snapshot_id.as_deref() {
            Some(id) => match self.get_snapshot(id) {
                Ok(previous) => previous,
                Err(e) if e.is_corruption() => {
                    warn!("Current snapshot {} is unreadable, counting from scratch: {}", id, e);
                    None
                }
                Err(e) => return Err(e),
            },
            None => None,
        };
        let changes_from_previous = match &previous {
            Some(previous) => diff_manifests(&previous.manifests, &manifests).len(),
            None => manifests.total_assets(),
        };

        let snapshot = Snapshot {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            description: description.to_string(),
            metadata: SnapshotMetadata {
                total_assets: manifests.total_assets(),
                changes_from_previous,
                hash: manifests_hash(&manifests),
            },
            manifests,
        };

        write_json(self.storage.as_ref(), &snapshot_key(&snapshot.id), &snapshot)
            .inspect_err(|e| error!("Failed to write snapshot {}: {}", snapshot.id, e))?;

        let base_revision = index.revision;
        index.snapshots.insert(0, snapshot.summary());
        index.current_snapshot_id = Some(snapshot.id.clone());
        index.revision += 1;

        let mut evicted = Vec::new();
        while index.snapshots.len() > self.config.max_snapshots {
            if let Some(oldest) = index.snapshots.pop() {
                evicted.push(oldest.id);
            }
        }

        if let Err(e) = self.persist_index(slot, index, base_revision) {
            self.delete_body(&snapshot.id);
            return Err(e);
        }

        for id in &evicted {
            self.delete_body(id);
        }
        if !evicted.is_empty() {
            info!("Evicted {} old snapshots", evicted.len());
        }

        info!(
            "Created snapshot {} ({} assets, {} changes)",
            snapshot.short_id(),
            snapshot.metadata.total_assets,
            snapshot.metadata.changes_from_previous
        );
        Ok(snapshot)
    }

    /// Summaries of every retained snapshot, newest first
    pub fn list_snapshots(&self) -> Result<Vec<SnapshotSummary>> {
        let mut slot = self.index.lock();
        Ok(self.cached_index(&mut slot)?.snapshots)
    }

    /// Load a snapshot body
    ///
    /// Unknown ids yield `None`; a body that exists but does not parse is
    /// reported as [`crate::VellumError::Json`].
    pub fn get_snapshot(&self, snapshot_id: &str) -> Result<Option<Snapshot>> {
        let key = snapshot_key(snapshot_id);
        if key == SNAPSHOT_INDEX_KEY || validate_key(&key).is_err() {
            return Ok(None);
        }
        read_json(self.storage.as_ref(), &key)
            .inspect_err(|e| error!("Failed to load snapshot {}: {}", snapshot_id, e))
    }

    /// The snapshot the index marks as current
    pub fn current_snapshot(&self) -> Result<Option<Snapshot>> {
        let current_id = {
            let mut slot = self.index.lock();
            self.cached_index(&mut slot)?.current_snapshot_id
        };
        match current_id {
            Some(id) => self.get_snapshot(&id),
            None => Ok(None),
        }
    }

    /// Entity-level comparison of two snapshots
    ///
    /// Returns `None` when either snapshot is unknown.
    #[instrument(skip(self))]
    pub fn compare_snapshots(&self, from_id: &str, to_id: &str) -> Result<Option<SnapshotDiff>> {
        let (Some(from), Some(to)) = (self.get_snapshot(from_id)?, self.get_snapshot(to_id)?) else {
            debug!("Cannot compare {} and {}: snapshot not found", from_id, to_id);
            return Ok(None);
        };

        let changes = diff_manifests(&from.manifests, &to.manifests);
        let summary = DiffSummary::from_types(changes.iter().map(|c| c.change_type));
        Ok(Some(SnapshotDiff {
            from_id: from.id,
            to_id: to.id,
            total_changes: changes.len(),
            summary,
            changes,
        }))
    }

    /// Make an older snapshot's content current again
    ///
    /// Creates a new snapshot with the old manifests and returns them.
    #[instrument(skip(self))]
    pub fn restore_snapshot(&self, snapshot_id: &str) -> Result<Option<Manifests>> {
        let Some(snapshot) = self.get_snapshot(snapshot_id)? else {
            debug!("Snapshot {} not found", snapshot_id);
            return Ok(None);
        };

        let description = format!("Restored from snapshot: {}", snapshot.description);
        let restored = self.create_snapshot(snapshot.manifests.clone(), &description)?;
        info!("Restored snapshot {} as {}", snapshot.short_id(), restored.short_id());
        Ok(Some(snapshot.manifests))
    }

    /// Remove a snapshot from the index and delete its body
    ///
    /// When the current snapshot is deleted the next-newest becomes current.
    /// Returns whether the snapshot was in the index.
    #[instrument(skip(self))]
    pub fn delete_snapshot(&self, snapshot_id: &str) -> Result<bool> {
        let mut slot = self.index.lock();
        let mut index = self.cached_index(&mut slot)?;

        let Some(position) = index.snapshots.iter().position(|s| s.id == snapshot_id) else {
            return Ok(false);
        };

        let base_revision = index.revision;
        index.snapshots.remove(position);
        if index.current_snapshot_id.as_deref() == Some(snapshot_id) {
            index.current_snapshot_id = index.snapshots.first().map(|s| s.id.clone());
        }
        index.revision += 1;

        self.persist_index(&mut slot, index, base_revision)?;
        self.delete_body(snapshot_id);

        info!("Deleted snapshot {}", snapshot_id);
        Ok(true)
    }

    /// Drop the cached index
    pub fn invalidate(&self) {
        *self.index.lock() = None;
    }
}
