//! Per-asset version chains
//!
//! Every asset keeps an append-only chain of full-state versions, each linked
//! to its predecessor. Saving identical content twice is a no-op, rolling
//! back appends a new version carrying an older state, and chains are
//! trimmed from the oldest end once they exceed the configured length.
//!
//! ## Concurrency
//!
//! Writes to one asset are serialized through a per-asset mutex. Every chain
//! carries a `revision` stamp that is re-checked against storage right
//! before writing, so a chain advanced by another process is reported as
//! [`VellumError::ConcurrentModification`] instead of being overwritten.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use vellum::storage::MemoryStorage;
//! use vellum::types::{SaveOptions, VaultConfig};
//! use vellum::versions::VersionStore;
//! use serde_json::json;
//!
//! # fn example() -> vellum::Result<()> {
//! let store = VersionStore::new(Arc::new(MemoryStorage::new()), VaultConfig::default());
//!
//! let v1 = store.save_version("sword-1", &json!({"damage": 5}), SaveOptions::default())?;
//! let v2 = store.save_version("sword-1", &json!({"damage": 7}), SaveOptions::default())?;
//! assert_eq!(v2.parent_version_id.as_deref(), Some(v1.id.as_str()));
//!
//! let diff = store.diff_versions("sword-1", &v1.id, &v2.id)?.unwrap();
//! assert_eq!(diff.change_count, 1);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use crate::diff::diff_values;
use crate::error::{Result, VellumError};
use crate::hash::content_hash;
use crate::storage::{
    asset_id_from_key, load_state, version_chain_key, write_if_unchanged, BlobStore, CORRUPT_SUFFIX,
    VERSIONS_PREFIX,
};
use crate::types::{
    AssetVersion, HistoryOptions, IndexLoad, SaveOptions, VaultConfig, VersionChain, VersionDiff,
};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, trace};
use uuid::Uuid;

const DEFAULT_AUTHOR: &str = "system";

/// Store of per-asset version chains
pub struct VersionStore {
    storage: Arc<dyn BlobStore>,
    config: VaultConfig,
    locks: DashMap<String, Arc<Mutex<()>>>,
    cache: DashMap<String, VersionChain>,
}

impl std::fmt::Debug for VersionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionStore")
            .field("max_versions_per_asset", &self.config.max_versions_per_asset)
            .field("cached_chains", &self.cache.len())
            .finish()
    }
}

impl VersionStore {
    /// Create a store over a blob backend
    pub fn new(storage: Arc<dyn BlobStore>, config: VaultConfig) -> Self {
        Self {
            storage,
            config,
            locks: DashMap::new(),
            cache: DashMap::new(),
        }
    }

    fn asset_lock(&self, asset_id: &str) -> Arc<Mutex<()>> {
        self.locks.entry(asset_id.to_string()).or_default().clone()
    }

    /// Load an asset's chain, reporting whether unreadable state was reset
    ///
    /// Served from the in-memory cache when possible.
    pub fn load_chain(&self, asset_id: &str) -> Result<IndexLoad<VersionChain>> {
        if let Some(chain) = self.cache.get(asset_id) {
            trace!("Chain cache hit for {}", asset_id);
            return Ok(IndexLoad::Loaded(chain.clone()));
        }

        let key = version_chain_key(asset_id);
        let loaded = load_state(self.storage.as_ref(), &key, self.config.quarantine_corrupt, || {
            VersionChain::new(asset_id)
        })?;
        if let IndexLoad::Loaded(chain) = &loaded {
            self.cache.insert(asset_id.to_string(), chain.clone());
        }
        Ok(loaded)
    }

    fn chain(&self, asset_id: &str) -> Result<VersionChain> {
        Ok(self.load_chain(asset_id)?.into_inner())
    }

    fn persist_chain(&self, chain: &VersionChain, base_revision: u64) -> Result<()> {
        let key = version_chain_key(&chain.asset_id);
        match write_if_unchanged(self.storage.as_ref(), &key, base_revision, chain) {
            Ok(()) => {
                self.cache.insert(chain.asset_id.clone(), chain.clone());
                Ok(())
            }
            Err(e) => {
                // Cached copy may be stale; force the next call to re-read
                self.cache.remove(&chain.asset_id);
                Err(e)
            }
        }
    }

    /// Save a new version of an asset
    ///
    /// When `data` hashes equal to the current version nothing is written and
    /// the current version is returned.
    ///
    /// # Arguments
    ///
    /// * `asset_id` - Stable id of the asset
    /// * `data` - Full asset state, must be a JSON object
    /// * `options` - Description, author and label override
    ///
    /// # Errors
    ///
    /// - [`VellumError::InvalidRecord`] if `data` is not an object
    /// - [`VellumError::ConcurrentModification`] if another writer advanced the chain
    /// - Backend errors from the blob store
    #[instrument(skip(self, data, options))]
    pub fn save_version(&self, asset_id: &str, data: &Value, options: SaveOptions) -> Result<AssetVersion> {
        if !data.is_object() {
            return Err(VellumError::invalid_record(format!(
                "data for asset '{}' must be an object",
                asset_id
            )));
        }

        let lock = self.asset_lock(asset_id);
        let _guard = lock.lock();

        let mut chain = self.chain(asset_id)?;
        let data_hash = content_hash(data);

        if let Some(current) = chain.current() {
            if current.data_hash == data_hash {
                debug!("Content of {} unchanged, keeping {}", asset_id, current.label);
                return Ok(current.clone());
            }
        }

        let sequence = chain.next_sequence;
        let version = AssetVersion {
            id: Uuid::new_v4().to_string(),
            asset_id: asset_id.to_string(),
            label: options.label.unwrap_or_else(|| format!("v{}", sequence)),
            sequence,
            created_at: Utc::now(),
            created_by: options.created_by.unwrap_or_else(|| DEFAULT_AUTHOR.to_string()),
            description: options.description,
            data: Some(data.clone()),
            data_hash,
            parent_version_id: chain.current_version_id.clone(),
        };

        let base_revision = chain.revision;
        chain.versions.push(version.clone());
        chain.current_version_id = Some(version.id.clone());
        chain.next_sequence += 1;
        chain.revision += 1;

        let max = self.config.max_versions_per_asset;
        if chain.versions.len() > max {
            let excess = chain.versions.len() - max;
            chain.versions.drain(..excess);
            debug!("Trimmed {} old versions of {}", excess, asset_id);
        }

        self.persist_chain(&chain, base_revision)?;

        info!("Saved version {} ({}) of {}", version.label, version.short_id(), asset_id);
        Ok(version)
    }

    /// Versions of an asset, newest first
    ///
    /// Unknown assets yield an empty list.
    #[instrument(skip(self))]
    pub fn version_history(&self, asset_id: &str, options: HistoryOptions) -> Result<Vec<AssetVersion>> {
        let chain = self.chain(asset_id)?;
        let limit = options.limit.unwrap_or(usize::MAX);
        Ok(chain
            .versions
            .iter()
            .rev()
            .take(limit)
            .map(|v| if options.include_data { v.clone() } else { v.without_data() })
            .collect())
    }

    /// One version by id
    pub fn get_version(&self, asset_id: &str, version_id: &str) -> Result<Option<AssetVersion>> {
        Ok(self.chain(asset_id)?.get(version_id).cloned())
    }

    /// Newest version of an asset
    pub fn current_version(&self, asset_id: &str) -> Result<Option<AssetVersion>> {
        Ok(self.chain(asset_id)?.current().cloned())
    }

    /// Field-level diff between two versions of the same asset
    ///
    /// Returns `None` when either version is unknown.
    #[instrument(skip(self))]
    pub fn diff_versions(&self, asset_id: &str, from_id: &str, to_id: &str) -> Result<Option<VersionDiff>> {
        let chain = self.chain(asset_id)?;
        let (Some(from), Some(to)) = (chain.get(from_id), chain.get(to_id)) else {
            debug!("Cannot diff {}: version not found", asset_id);
            return Ok(None);
        };

        let empty = Value::Object(Map::new());
        let changes = diff_values(from.data.as_ref().unwrap_or(&empty), to.data.as_ref().unwrap_or(&empty));
        Ok(Some(VersionDiff::from_changes(changes)))
    }

    /// Restore an older state by saving it as a new version
    ///
    /// Returns the restored data, or `None` when the target is unknown.
    #[instrument(skip(self))]
    pub fn rollback(&self, asset_id: &str, target_version_id: &str) -> Result<Option<Value>> {
        let Some(target) = self.get_version(asset_id, target_version_id)? else {
            debug!("Rollback target {} of {} not found", target_version_id, asset_id);
            return Ok(None);
        };
        let Some(data) = target.data else {
            return Ok(None);
        };

        let options = SaveOptions {
            description: Some(format!("Rolled back to {}", target.label)),
            ..Default::default()
        };
        let saved = self.save_version(asset_id, &data, options)?;
        info!("Rolled {} back to {} as {}", asset_id, target.label, saved.label);
        Ok(Some(data))
    }

    /// Drop the whole chain of an asset
    ///
    /// Returns whether a chain existed.
    #[instrument(skip(self))]
    pub fn delete_asset_versions(&self, asset_id: &str) -> Result<bool> {
        let lock = self.asset_lock(asset_id);
        let _guard = lock.lock();

        let key = version_chain_key(asset_id);
        let existed = self
            .storage
            .delete(&key)
            .inspect_err(|e| error!("Failed to delete versions of {}: {}", asset_id, e))?;
        self.cache.remove(asset_id);

        if existed {
            info!("Deleted version history of {}", asset_id);
        }
        Ok(existed)
    }

    /// Ids of every asset with a stored chain, sorted
    pub fn list_assets(&self) -> Result<Vec<String>> {
        let mut assets: Vec<String> = self
            .storage
            .list(VERSIONS_PREFIX)?
            .into_iter()
            .filter(|key| !key.ends_with(CORRUPT_SUFFIX))
            .filter_map(|key| key.strip_prefix(VERSIONS_PREFIX).and_then(asset_id_from_key))
            .collect();
        assets.sort();
        Ok(assets)
    }

    /// Drop the cached chain of one asset
    pub fn invalidate(&self, asset_id: &str) {
        self.cache.remove(asset_id);
    }

    /// Drop every cached chain
    pub fn clear(&self) {
        self.cache.clear();
    }
}
