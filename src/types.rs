//! Core data types used throughout the Vellum library
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Changes**: `FieldChange`, `DiffSummary`, `VersionDiff`, `SnapshotDiff` - structural differences
//! - **Per-asset history**: `AssetVersion`, `VersionChain` - the append-only version chain of one entity
//! - **Collection history**: `Manifests`, `Snapshot`, `SnapshotSummary`, `SnapshotIndex`
//! - **Read models**: `AssetHistoryEntry` - a reconstructed per-entity timeline row
//! - **Configuration**: `VaultConfig`, `SaveOptions`, `HistoryOptions`
//!
//! Every persisted type serializes with camelCase field names.
//!
//! ## Examples
//!
//! ```rust
//! use vellum::types::{Manifests, SaveOptions};
//! use serde_json::json;
//!
//! let mut manifests = Manifests::new();
//! manifests.insert_values("items", vec![json!({"id": "sword-1", "name": "Sword", "damage": 7})]);
//! assert_eq!(manifests.total_assets(), 1);
//!
//! let options = SaveOptions {
//!     description: Some("Buffed damage".to_string()),
//!     ..Default::default()
//! };
//! ```

use crate::error::{Result, VellumError};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A structured record: a JSON object
pub type Record = Map<String, Value>;

/// Current on-disk format version for indexes and chains
pub const FORMAT_VERSION: u32 = 1;

/// Default cap on the number of versions kept per asset
pub const DEFAULT_MAX_VERSIONS_PER_ASSET: usize = 50;

/// Default cap on the number of snapshots kept in the index
pub const DEFAULT_MAX_SNAPSHOTS: usize = 50;

// Keeps an explicit `null` distinct from an absent field.
fn present_value<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Kind of a single field change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Field exists only in the new record
    Added,
    /// Field exists in both records with different values
    Modified,
    /// Field exists only in the old record
    Deleted,
}

impl ChangeType {
    /// The opposite change, used when rolling a diff back
    pub fn inverse(self) -> Self {
        match self {
            ChangeType::Added => ChangeType::Deleted,
            ChangeType::Deleted => ChangeType::Added,
            ChangeType::Modified => ChangeType::Modified,
        }
    }

    /// Lowercase name as used in persisted JSON
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeType::Added => "added",
            ChangeType::Modified => "modified",
            ChangeType::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One path-addressed difference between two records
///
/// `added` carries only `new_value`, `deleted` only `old_value`,
/// `modified` both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    /// Dot-delimited location of the field, e.g. `stats.attack`
    pub path: String,
    /// Kind of change
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    /// Value before the change
    #[serde(default, deserialize_with = "present_value", skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    /// Value after the change
    #[serde(default, deserialize_with = "present_value", skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
}

impl FieldChange {
    /// A field that appeared
    pub fn added(path: impl Into<String>, new_value: Value) -> Self {
        Self {
            path: path.into(),
            change_type: ChangeType::Added,
            old_value: None,
            new_value: Some(new_value),
        }
    }

    /// A field whose value changed
    pub fn modified(path: impl Into<String>, old_value: Value, new_value: Value) -> Self {
        Self {
            path: path.into(),
            change_type: ChangeType::Modified,
            old_value: Some(old_value),
            new_value: Some(new_value),
        }
    }

    /// A field that disappeared
    pub fn deleted(path: impl Into<String>, old_value: Value) -> Self {
        Self {
            path: path.into(),
            change_type: ChangeType::Deleted,
            old_value: Some(old_value),
            new_value: None,
        }
    }

    /// The same change seen from the other side
    pub fn reversed(&self) -> Self {
        Self {
            path: self.path.clone(),
            change_type: self.change_type.inverse(),
            old_value: self.new_value.clone(),
            new_value: self.old_value.clone(),
        }
    }

    /// Top-level key this change falls under
    pub fn top_level_field(&self) -> String {
        crate::diff::split_path(&self.path).swap_remove(0)
    }
}

/// Counts of changes by kind
///
/// Always derived from a change list, never stored on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    /// Number of added fields or entities
    pub added: usize,
    /// Number of modified fields or entities
    pub modified: usize,
    /// Number of deleted fields or entities
    pub deleted: usize,
}

impl DiffSummary {
    /// Tally a list of field changes
    pub fn from_changes(changes: &[FieldChange]) -> Self {
        Self::from_types(changes.iter().map(|c| c.change_type))
    }

    /// Tally any sequence of change kinds
    pub fn from_types(types: impl IntoIterator<Item = ChangeType>) -> Self {
        let mut summary = Self::default();
        for change_type in types {
            match change_type {
                ChangeType::Added => summary.added += 1,
                ChangeType::Modified => summary.modified += 1,
                ChangeType::Deleted => summary.deleted += 1,
            }
        }
        summary
    }

    /// Sum of all counts
    pub fn total(&self) -> usize {
        self.added + self.modified + self.deleted
    }

    /// Whether anything changed
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// Result of comparing two versions of the same asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDiff {
    /// Path-addressed field changes
    pub changes: Vec<FieldChange>,
    /// Counts by kind
    pub summary: DiffSummary,
    /// Whether `changes` is non-empty
    pub has_changes: bool,
    /// Length of `changes`
    pub change_count: usize,
}

impl VersionDiff {
    /// Wrap a change list with its derived counts
    pub fn from_changes(changes: Vec<FieldChange>) -> Self {
        let summary = DiffSummary::from_changes(&changes);
        Self {
            has_changes: !changes.is_empty(),
            change_count: changes.len(),
            summary,
            changes,
        }
    }
}

/// One historical state of a single asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetVersion {
    /// Unique version id (UUID v4)
    pub id: String,
    /// Asset this version belongs to
    pub asset_id: String,
    /// Human label, `v1`, `v2`, ... unless overridden on save
    pub label: String,
    /// Position in the asset's chain, starting at 1
    pub sequence: u64,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Author of the change
    pub created_by: String,
    /// Optional description of the change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Full asset state; `None` in lightweight listings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Content hash of `data`
    pub data_hash: String,
    /// Preceding version in the chain
    pub parent_version_id: Option<String>,
}

impl AssetVersion {
    /// Short form of the id for display
    pub fn short_id(&self) -> &str {
        &self.id[..8.min(self.id.len())]
    }

    /// Deserialize the stored data into a typed entity
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match &self.data {
            Some(data) => Ok(Some(serde_json::from_value(data.clone())?)),
            None => Ok(None),
        }
    }

    /// Copy of this version without its data payload
    pub fn without_data(&self) -> Self {
        Self {
            data: None,
            ..self.clone()
        }
    }
}

/// Persisted version chain of one asset, oldest version first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionChain {
    /// On-disk format version
    pub format_version: u32,
    /// Asset the chain belongs to
    pub asset_id: String,
    /// Id of the newest version
    pub current_version_id: Option<String>,
    /// Sequence number the next version receives
    pub next_sequence: u64,
    /// Write counter for optimistic concurrency
    pub revision: u64,
    /// Versions, oldest first
    pub versions: Vec<AssetVersion>,
}

impl VersionChain {
    /// Empty chain for an asset
    pub fn new(asset_id: impl Into<String>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            asset_id: asset_id.into(),
            current_version_id: None,
            next_sequence: 1,
            revision: 0,
            versions: Vec::new(),
        }
    }

    /// Newest version, if any
    pub fn current(&self) -> Option<&AssetVersion> {
        let current_id = self.current_version_id.as_deref()?;
        self.get(current_id)
    }

    /// Version by id
    pub fn get(&self, version_id: &str) -> Option<&AssetVersion> {
        self.versions.iter().find(|v| v.id == version_id)
    }
}

/// Options for saving a version
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Description of the change
    pub description: Option<String>,
    /// Author; defaults to `system`
    pub created_by: Option<String>,
    /// Label override; defaults to `v<sequence>`
    pub label: Option<String>,
}

/// Options for listing version history
#[derive(Debug, Clone)]
pub struct HistoryOptions {
    /// Maximum number of versions returned (newest first)
    pub limit: Option<usize>,
    /// Whether to include the data payload
    pub include_data: bool,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self {
            limit: None,
            include_data: true,
        }
    }
}

/// Typed access to an entity stored in a manifest collection
///
/// The engines work on plain JSON; this trait lets callers keep their own
/// schema types at the edges.
///
/// ```rust
/// use serde::{Deserialize, Serialize};
/// use vellum::types::Entity;
///
/// #[derive(Serialize, Deserialize)]
/// struct Item {
///     id: String,
///     name: String,
///     value: u32,
/// }
///
/// impl Entity for Item {
///     fn id(&self) -> &str { &self.id }
///     fn name(&self) -> Option<&str> { Some(&self.name) }
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned {
    /// Stable identity across diffs
    fn id(&self) -> &str;

    /// Human-readable name
    fn name(&self) -> Option<&str> {
        None
    }
}

/// Id of a JSON entity, if it has a string `id` field
pub fn entity_id(entity: &Value) -> Option<&str> {
    entity.get("id").and_then(Value::as_str)
}

/// Name of a JSON entity, if it has a string `name` field
pub fn entity_name(entity: &Value) -> Option<&str> {
    entity.get("name").and_then(Value::as_str)
}

/// Every managed collection, keyed by collection name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifests {
    collections: BTreeMap<String, Vec<Value>>,
}

impl Manifests {
    /// Empty manifest set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a collection of typed entities
    pub fn insert_collection<T: Entity>(&mut self, name: impl Into<String>, entities: &[T]) -> Result<()> {
        let values = entities
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.collections.insert(name.into(), values);
        Ok(())
    }

    /// Insert or replace a collection of raw JSON entities
    pub fn insert_values(&mut self, name: impl Into<String>, entities: Vec<Value>) {
        self.collections.insert(name.into(), entities);
    }

    /// Deserialize a collection into typed entities; empty when absent
    pub fn collection_as<T: Entity>(&self, name: &str) -> Result<Vec<T>> {
        match self.collections.get(name) {
            Some(values) => values
                .iter()
                .map(|v| serde_json::from_value(v.clone()).map_err(VellumError::from))
                .collect(),
            None => Ok(Vec::new()),
        }
    }

    /// Raw entities of one collection
    pub fn collection(&self, name: &str) -> Option<&[Value]> {
        self.collections.get(name).map(Vec::as_slice)
    }

    /// Collections in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.collections.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Collection names in order
    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    /// Number of entities across all collections
    pub fn total_assets(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    /// Whether there are no collections
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// Find an entity by id, optionally restricted to one collection
    ///
    /// Collections are searched in name order and the first match wins.
    pub fn find_entity(&self, id: &str, collection: Option<&str>) -> Option<(&str, &Value)> {
        self.iter()
            .filter(|(name, _)| collection.map_or(true, |c| c == *name))
            .find_map(|(name, entities)| {
                entities
                    .iter()
                    .find(|e| entity_id(e) == Some(id))
                    .map(|e| (name, e))
            })
    }

    /// Check that every entity is an object with a non-empty string id and
    /// that ids are unique across all collections
    pub fn validate(&self) -> Result<()> {
        let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
        for (collection, entities) in self.iter() {
            for (position, entity) in entities.iter().enumerate() {
                if !entity.is_object() {
                    return Err(VellumError::invalid_manifest(format!(
                        "entity #{} in '{}' is not an object",
                        position, collection
                    )));
                }
                let id = match entity_id(entity) {
                    Some(id) if !id.is_empty() => id,
                    _ => {
                        return Err(VellumError::invalid_manifest(format!(
                            "entity #{} in '{}' has no string id",
                            position, collection
                        )))
                    }
                };
                if let Some(first_seen_in) = seen.insert(id, collection) {
                    return Err(VellumError::DuplicateEntityId {
                        id: id.to_string(),
                        collection: collection.to_string(),
                        first_seen_in: first_seen_in.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Metadata stored with every snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    /// Number of entities across all collections
    pub total_assets: usize,
    /// Entities added, modified or deleted relative to the previous snapshot
    pub changes_from_previous: usize,
    /// Composite content hash, insensitive to entity order
    pub hash: String,
}

/// Point-in-time copy of every managed collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Unique snapshot id (UUID v4)
    pub id: String,
    /// Creation timestamp
    pub timestamp: DateTime<Utc>,
    /// Human description
    pub description: String,
    /// Full collection bodies
    pub manifests: Manifests,
    /// Derived metadata
    pub metadata: SnapshotMetadata,
}

impl Snapshot {
    /// Index entry for this snapshot
    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            id: self.id.clone(),
            timestamp: self.timestamp,
            description: self.description.clone(),
            metadata: self.metadata.clone(),
        }
    }

    /// Short form of the id for display
    pub fn short_id(&self) -> &str {
        &self.id[..8.min(self.id.len())]
    }
}

/// Snapshot without its manifest bodies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    /// Snapshot id
    pub id: String,
    /// Creation timestamp
    pub timestamp: DateTime<Utc>,
    /// Human description
    pub description: String,
    /// Derived metadata
    pub metadata: SnapshotMetadata,
}

/// Directory of all retained snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotIndex {
    /// On-disk format version
    pub format_version: u32,
    /// Write counter for optimistic concurrency
    pub revision: u64,
    /// Most recently created (or fallen-back-to) snapshot
    pub current_snapshot_id: Option<String>,
    /// Summaries, newest first
    pub snapshots: Vec<SnapshotSummary>,
}

impl Default for SnapshotIndex {
    fn default() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            revision: 0,
            current_snapshot_id: None,
            snapshots: Vec::new(),
        }
    }
}

/// Outcome of loading a persisted index or chain
///
/// Distinguishes a fresh store from one whose unreadable state was
/// discarded, so the recovery is visible to callers and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexLoad<T> {
    /// Persisted state parsed successfully
    Loaded(T),
    /// Nothing persisted yet
    Fresh(T),
    /// Persisted state was unreadable and has been replaced by an empty one
    Reset {
        /// The empty replacement
        value: T,
        /// Why the persisted state was rejected
        reason: String,
    },
}

impl<T> IndexLoad<T> {
    /// The loaded or replacement value
    pub fn into_inner(self) -> T {
        match self {
            IndexLoad::Loaded(value) | IndexLoad::Fresh(value) => value,
            IndexLoad::Reset { value, .. } => value,
        }
    }

    /// Whether a corrupt state was discarded
    pub fn was_reset(&self) -> bool {
        matches!(self, IndexLoad::Reset { .. })
    }
}

/// One entity-level change between two snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityChange {
    /// Collection holding the entity
    pub collection: String,
    /// Entity id
    pub entity_id: String,
    /// Entity name, taken from the newest available state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_name: Option<String>,
    /// Kind of change
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    /// Field-level changes; only populated for modified entities
    #[serde(default)]
    pub field_changes: Vec<FieldChange>,
}

/// Result of comparing two snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDiff {
    /// Older snapshot id
    pub from_id: String,
    /// Newer snapshot id
    pub to_id: String,
    /// Flat list of entity changes across all collections
    pub changes: Vec<EntityChange>,
    /// Counts by kind
    pub summary: DiffSummary,
    /// Total number of entity changes
    pub total_changes: usize,
}

/// Change kind for a reconstructed history row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryChangeType {
    /// Entity appeared in this snapshot
    Added,
    /// Entity fields changed in this snapshot
    Modified,
    /// Entity disappeared in this snapshot
    Deleted,
    /// Entity present and identical to the previous snapshot
    Unchanged,
}

/// One row in a reconstructed per-entity timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetHistoryEntry {
    /// Snapshot this row describes
    pub snapshot_id: String,
    /// Snapshot timestamp
    pub timestamp: DateTime<Utc>,
    /// Snapshot description
    pub description: String,
    /// Collection the entity was found in
    pub collection: String,
    /// What happened to the entity
    pub change_type: HistoryChangeType,
    /// Field-level changes for modified rows
    #[serde(default)]
    pub field_changes: Vec<FieldChange>,
}

/// Configuration for a Vellum instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultConfig {
    /// Versions kept per asset before the oldest are trimmed
    pub max_versions_per_asset: usize,
    /// Snapshots kept before the oldest are evicted
    pub max_snapshots: usize,
    /// Rename unreadable indexes to `<key>.corrupt` before resetting them
    pub quarantine_corrupt: bool,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            max_versions_per_asset: DEFAULT_MAX_VERSIONS_PER_ASSET,
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
            quarantine_corrupt: true,
        }
    }
}

impl VaultConfig {
    /// Reject limits the stores cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.max_versions_per_asset == 0 {
            return Err(VellumError::InvalidConfiguration(
                "max_versions_per_asset must be at least 1".to_string(),
            ));
        }
        if self.max_snapshots == 0 {
            return Err(VellumError::InvalidConfiguration(
                "max_snapshots must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Metadata stored at the root of a filesystem store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageMetadata {
    /// Version of storage format
    pub format_version: u32,
    /// Vellum version that created the storage
    pub vellum_version: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last accessed timestamp
    pub last_accessed: DateTime<Utc>,
    /// Configuration
    pub config: VaultConfig,
}
