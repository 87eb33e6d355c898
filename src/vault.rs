//! The `Vault` facade
//!
//! A [`Vault`] owns one blob backend and the stores layered on it: the
//! per-asset [`VersionStore`] and the collection-wide [`SnapshotStore`].
//! Most callers only need this type.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use vellum::{Vault, VaultBuilder};
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Default configuration
//! let vault = Vault::init(PathBuf::from("./.vellum"))?;
//!
//! // Custom retention limits
//! let vault = VaultBuilder::new()
//!     .max_versions_per_asset(20)
//!     .max_snapshots(100)
//!     .build(PathBuf::from("./.vellum-archive"))?;
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use crate::history::asset_history;
use crate::snapshots::SnapshotStore;
use crate::storage::{BlobStore, FsStorage, MemoryStorage};
use crate::types::*;
use crate::versions::VersionStore;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Versioning facade over one storage backend
///
/// # Examples
///
/// ```rust
/// use vellum::Vault;
/// use vellum::types::{HistoryOptions, Manifests, SaveOptions};
/// use serde_json::json;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let vault = Vault::in_memory()?;
///
/// vault.save_version("sword-1", &json!({"damage": 5}), SaveOptions::default())?;
/// vault.save_version("sword-1", &json!({"damage": 7}), SaveOptions::default())?;
/// assert_eq!(vault.version_history("sword-1", HistoryOptions::default())?.len(), 2);
///
/// let mut manifests = Manifests::new();
/// manifests.insert_values("items", vec![json!({"id": "sword-1", "damage": 7})]);
/// let snapshot = vault.create_snapshot(manifests, "balance pass")?;
/// assert_eq!(snapshot.metadata.total_assets, 1);
/// # Ok(())
/// # }
/// ```
pub struct Vault {
    storage_path: Option<PathBuf>,
    config: VaultConfig,
    versions: VersionStore,
    snapshots: SnapshotStore,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("storage_path", &self.storage_path)
            .field("config", &self.config)
            .field("versions", &self.versions)
            .field("snapshots", &self.snapshots)
            .finish()
    }
}

/// Point-in-time overview of a vault
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultStatus {
    /// Assets with a version chain
    pub asset_count: usize,
    /// Retained snapshots
    pub snapshot_count: usize,
    /// Current snapshot, if any
    pub current_snapshot: Option<SnapshotSummary>,
    /// Why the snapshot index was reset while loading, if it was
    pub index_reset: Option<String>,
    /// Active configuration
    pub config: VaultConfig,
}

impl Vault {
    /// Initialize a new vault directory with the default configuration
    ///
    /// # Errors
    ///
    /// - [`crate::VellumError::StorageAlreadyExists`] if a vault already exists there
    /// - [`crate::VellumError::Io`] if the directory cannot be created
    #[instrument]
    pub fn init(storage_path: PathBuf) -> Result<Self> {
        VaultBuilder::new().init(storage_path)
    }

    /// Open an existing vault directory with its stored configuration
    ///
    /// # Errors
    ///
    /// - [`crate::VellumError::StorageNotInitialized`] if there is no vault at the path
    #[instrument]
    pub fn open(storage_path: PathBuf) -> Result<Self> {
        let storage = FsStorage::open(storage_path.clone())?;
        let config = storage.metadata().config;
        config.validate()?;
        info!("Opened vault at {:?}", storage_path);
        Ok(Self::assemble(Arc::new(storage), config, Some(storage_path)))
    }

    /// Vault kept entirely in memory, with the default configuration
    pub fn in_memory() -> Result<Self> {
        VaultBuilder::new().in_memory()
    }

    /// Vault over a caller-provided backend
    pub fn with_storage(storage: Arc<dyn BlobStore>, config: VaultConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(storage, config, None))
    }

    fn assemble(storage: Arc<dyn BlobStore>, config: VaultConfig, storage_path: Option<PathBuf>) -> Self {
        Self {
            versions: VersionStore::new(storage.clone(), config.clone()),
            snapshots: SnapshotStore::new(storage, config.clone()),
            storage_path,
            config,
        }
    }

    /// Directory of a filesystem-backed vault
    pub fn storage_path(&self) -> Option<&Path> {
        self.storage_path.as_deref()
    }

    /// Active configuration
    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// The per-asset version store
    pub fn versions(&self) -> &VersionStore {
        &self.versions
    }

    /// The snapshot store
    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// See [`VersionStore::save_version`]
    pub fn save_version(&self, asset_id: &str, data: &Value, options: SaveOptions) -> Result<AssetVersion> {
        self.versions.save_version(asset_id, data, options)
    }

    /// See [`VersionStore::version_history`]
    pub fn version_history(&self, asset_id: &str, options: HistoryOptions) -> Result<Vec<AssetVersion>> {
        self.versions.version_history(asset_id, options)
    }

    /// See [`VersionStore::get_version`]
    pub fn get_version(&self, asset_id: &str, version_id: &str) -> Result<Option<AssetVersion>> {
        self.versions.get_version(asset_id, version_id)
    }

    /// See [`VersionStore::current_version`]
    pub fn current_version(&self, asset_id: &str) -> Result<Option<AssetVersion>> {
        self.versions.current_version(asset_id)
    }

    /// See [`VersionStore::diff_versions`]
    pub fn diff_versions(&self, asset_id: &str, from_id: &str, to_id: &str) -> Result<Option<VersionDiff>> {
        self.versions.diff_versions(asset_id, from_id, to_id)
    }

    /// See [`VersionStore::rollback`]
    pub fn rollback(&self, asset_id: &str, target_version_id: &str) -> Result<Option<Value>> {
        self.versions.rollback(asset_id, target_version_id)
    }

    /// See [`VersionStore::delete_asset_versions`]
    pub fn delete_asset_versions(&self, asset_id: &str) -> Result<bool> {
        self.versions.delete_asset_versions(asset_id)
    }

    /// See [`VersionStore::list_assets`]
    pub fn list_assets(&self) -> Result<Vec<String>> {
        self.versions.list_assets()
    }

    /// See [`SnapshotStore::create_snapshot`]
    pub fn create_snapshot(&self, manifests: Manifests, description: &str) -> Result<Snapshot> {
        self.snapshots.create_snapshot(manifests, description)
    }

    /// See [`SnapshotStore::create_snapshot_if_changed`]
    pub fn create_snapshot_if_changed(&self, manifests: Manifests, description: &str) -> Result<Option<Snapshot>> {
        self.snapshots.create_snapshot_if_changed(manifests, description)
    }

    /// See [`SnapshotStore::list_snapshots`]
    pub fn list_snapshots(&self) -> Result<Vec<SnapshotSummary>> {
        self.snapshots.list_snapshots()
    }

    /// See [`SnapshotStore::get_snapshot`]
    pub fn get_snapshot(&self, snapshot_id: &str) -> Result<Option<Snapshot>> {
        self.snapshots.get_snapshot(snapshot_id)
    }

    /// See [`SnapshotStore::current_snapshot`]
    pub fn current_snapshot(&self) -> Result<Option<Snapshot>> {
        self.snapshots.current_snapshot()
    }

    /// See [`SnapshotStore::compare_snapshots`]
    pub fn compare_snapshots(&self, from_id: &str, to_id: &str) -> Result<Option<SnapshotDiff>> {
        self.snapshots.compare_snapshots(from_id, to_id)
    }

    /// See [`SnapshotStore::restore_snapshot`]
    pub fn restore_snapshot(&self, snapshot_id: &str) -> Result<Option<Manifests>> {
        self.snapshots.restore_snapshot(snapshot_id)
    }

    /// See [`SnapshotStore::delete_snapshot`]
    pub fn delete_snapshot(&self, snapshot_id: &str) -> Result<bool> {
        self.snapshots.delete_snapshot(snapshot_id)
    }

    /// See [`asset_history`]
    pub fn asset_history(&self, asset_id: &str, collection_filter: Option<&str>) -> Result<Vec<AssetHistoryEntry>> {
        asset_history(&self.snapshots, asset_id, collection_filter)
    }

    /// Summary of stored assets and snapshots
    pub fn status(&self) -> Result<VaultStatus> {
        let loaded = self.snapshots.load_index()?;
        let index_reset = match &loaded {
            IndexLoad::Reset { reason, .. } => {
                warn!("Snapshot index was reset: {}", reason);
                Some(reason.clone())
            }
            _ => None,
        };
        let index = loaded.into_inner();
        let current_snapshot = index
            .current_snapshot_id
            .as_deref()
            .and_then(|id| index.snapshots.iter().find(|s| s.id == id))
            .cloned();

        Ok(VaultStatus {
            asset_count: self.versions.list_assets()?.len(),
            snapshot_count: index.snapshots.len(),
            current_snapshot,
            index_reset,
            config: self.config.clone(),
        })
    }

    /// Drop every in-memory cache so the next call re-reads storage
    pub fn clear_cache(&self) {
        self.versions.clear();
        self.snapshots.invalidate();
    }
}

/// Builder for [`Vault`] configuration
///
/// # Examples
///
/// ```rust
/// use vellum::VaultBuilder;
///
/// let vault = VaultBuilder::new()
///     .max_versions_per_asset(10)
///     .quarantine_corrupt_index(false)
///     .in_memory()
///     .unwrap();
/// assert_eq!(vault.config().max_versions_per_asset, 10);
/// ```
#[derive(Debug, Clone, Default)]
pub struct VaultBuilder {
    config: VaultConfig,
}

impl VaultBuilder {
    /// Builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how many versions each asset keeps
    ///
    /// Older versions are trimmed once a chain grows past this length.
    pub fn max_versions_per_asset(mut self, count: usize) -> Self {
        self.config.max_versions_per_asset = count;
        self
    }

    /// Set how many snapshots are retained before the oldest are evicted
    pub fn max_snapshots(mut self, count: usize) -> Self {
        self.config.max_snapshots = count;
        self
    }

    /// Set whether unreadable indexes are kept as `<key>.corrupt`
    pub fn quarantine_corrupt_index(mut self, quarantine: bool) -> Self {
        self.config.quarantine_corrupt = quarantine;
        self
    }

    /// Initialize a new vault directory with this configuration
    pub fn init(self, storage_path: PathBuf) -> Result<Vault> {
        self.config.validate()?;
        let storage = FsStorage::init(storage_path.clone(), self.config.clone())?;
        info!("Initialized vault at {:?}", storage_path);
        Ok(Vault::assemble(Arc::new(storage), self.config, Some(storage_path)))
    }

    /// Open the vault at `storage_path`, or initialize it with this configuration
    ///
    /// An existing vault keeps its stored configuration.
    pub fn build(self, storage_path: PathBuf) -> Result<Vault> {
        if storage_path.join("metadata.json").exists() {
            Vault::open(storage_path)
        } else {
            self.init(storage_path)
        }
    }

    /// Build a vault kept entirely in memory
    pub fn in_memory(self) -> Result<Vault> {
        Vault::with_storage(Arc::new(MemoryStorage::new()), self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VellumError;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_builder_validation() {
        let err = VaultBuilder::new().max_versions_per_asset(0).in_memory().unwrap_err();
        assert!(matches!(err, VellumError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_init_and_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vault");

        {
            let vault = VaultBuilder::new().max_snapshots(5).build(path.clone()).unwrap();
            vault.save_version("a", &json!({"x": 1}), SaveOptions::default()).unwrap();
            let mut manifests = Manifests::new();
            manifests.insert_values("items", vec![json!({"id": "a", "x": 1})]);
            vault.create_snapshot(manifests, "first").unwrap();
        }

        // Stored configuration wins over the builder's
        let vault = VaultBuilder::new().max_snapshots(9).build(path.clone()).unwrap();
        assert_eq!(vault.config().max_snapshots, 5);
        assert_eq!(vault.storage_path(), Some(path.as_path()));
        assert_eq!(vault.list_assets().unwrap(), vec!["a".to_string()]);
        assert_eq!(vault.current_snapshot().unwrap().unwrap().description, "first");

        assert!(matches!(Vault::init(path), Err(VellumError::StorageAlreadyExists(_))));
    }

    #[test]
    fn test_status() {
        let vault = Vault::in_memory().unwrap();
        let status = vault.status().unwrap();
        assert_eq!(status.asset_count, 0);
        assert!(status.current_snapshot.is_none());

        vault.save_version("a", &json!({"x": 1}), SaveOptions::default()).unwrap();
        let mut manifests = Manifests::new();
        manifests.insert_values("items", vec![json!({"id": "a"})]);
        let snapshot = vault.create_snapshot(manifests, "one").unwrap();

        let status = vault.status().unwrap();
        assert_eq!(status.asset_count, 1);
        assert_eq!(status.snapshot_count, 1);
        assert_eq!(status.current_snapshot.map(|s| s.id), Some(snapshot.id));
        assert_eq!(status.index_reset, None);
    }

    #[test]
    fn test_clear_cache_rereads_storage() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vault");
        let first = Vault::init(path.clone()).unwrap();
        let second = Vault::open(path).unwrap();

        first.save_version("a", &json!({"x": 1}), SaveOptions::default()).unwrap();
        assert!(second.current_version("a").unwrap().is_some());

        first.save_version("a", &json!({"x": 2}), SaveOptions::default()).unwrap();
        // The second vault still has the old chain cached
        assert_eq!(second.current_version("a").unwrap().unwrap().label, "v1");
        second.clear_cache();
        assert_eq!(second.current_version("a").unwrap().unwrap().label, "v2");
    }
}
