//! Blob persistence for version chains and snapshots
//!
//! The stores never touch the filesystem directly. They read and write
//! opaque byte blobs addressed by slash-separated string keys through the
//! [`BlobStore`] trait, which keeps the backend swappable.
//!
//! ## Key Layout
//!
//! ```text
//! versions/<asset-key>     # VersionChain of one asset
//! snapshots/index          # SnapshotIndex
//! snapshots/<snapshot_id>  # Snapshot body
//! ```
//!
//! Asset ids containing characters outside `[A-Za-z0-9._-]` are hex encoded
//! by [`asset_key`] so any id maps to a valid key.
//!
//! ## Backends
//!
//! - [`FsStorage`]: one `<key>.json` file per blob below a root directory,
//!   with a `metadata.json` describing the store. Writes go through a
//!   temporary file that is persisted over the target, so readers never
//!   observe a half-written blob.
//! - [`MemoryStorage`]: a map behind a read-write lock, for tests and for
//!   embedding where persistence is handled elsewhere.
//!
//! ## Example
//!
//! ```rust
//! use vellum::storage::{read_json, write_json, BlobStore, MemoryStorage};
//! use serde_json::json;
//!
//! # fn example() -> vellum::Result<()> {
//! let storage = MemoryStorage::new();
//! write_json(&storage, "snapshots/index", &json!({"revision": 1}))?;
//!
//! let value: Option<serde_json::Value> = read_json(&storage, "snapshots/index")?;
//! assert_eq!(value, Some(json!({"revision": 1})));
//! assert_eq!(storage.list("snapshots/")?, vec!["snapshots/index".to_string()]);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use crate::error::{Result, VellumError};
use crate::types::{IndexLoad, SnapshotIndex, StorageMetadata, VaultConfig, VersionChain, FORMAT_VERSION};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Prefix of version chain keys
pub const VERSIONS_PREFIX: &str = "versions/";

/// Prefix of snapshot keys
pub const SNAPSHOTS_PREFIX: &str = "snapshots/";

/// Key of the snapshot index
pub const SNAPSHOT_INDEX_KEY: &str = "snapshots/index";

/// Suffix appended to quarantined blobs
pub const CORRUPT_SUFFIX: &str = ".corrupt";

const METADATA_FILE: &str = "metadata.json";
const BLOB_EXTENSION: &str = ".json";
const LOCK_EXTENSION: &str = ".lock";
const ENCODED_PREFIX: &str = "x-";

/// How long a writer waits for another writer's key lock by default
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(5);
const STALE_LOCK_AGE: Duration = Duration::from_secs(60);

/// Key-addressed byte storage
///
/// Absence is not an error: `read` returns `Ok(None)` and `delete` returns
/// `Ok(false)` for unknown keys. Implementations must be safe to share
/// between threads.
pub trait BlobStore: Send + Sync {
    /// Read a blob
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a blob, replacing any previous content
    fn write(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Delete a blob, returning whether it existed
    fn delete(&self, key: &str) -> Result<bool>;

    /// All keys starting with `prefix`, sorted
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Move a blob to a new key, replacing any blob already there
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Run `f` while holding an exclusive lock on `key`
    ///
    /// Other writers going through `with_lock` on the same key, in this
    /// process or another one sharing the backend, wait until `f` returns.
    fn with_lock(&self, key: &str, f: &mut dyn FnMut() -> Result<()>) -> Result<()>;
}

/// Read and deserialize a JSON blob
///
/// Returns `Ok(None)` when the key is absent and [`VellumError::Json`] when
/// the blob exists but does not parse.
pub fn read_json<T, S>(store: &S, key: &str) -> Result<Option<T>>
where
    T: DeserializeOwned,
    S: BlobStore + ?Sized,
{
    match store.read(key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Serialize and write a JSON blob
pub fn write_json<T, S>(store: &S, key: &str, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
    S: BlobStore + ?Sized,
{
    let bytes = serde_json::to_vec_pretty(value)?;
    store.write(key, &bytes)
}

/// Persisted state stamped with a format version and a write revision
pub trait Versioned: DeserializeOwned {
    /// On-disk format version
    fn format_version(&self) -> u32;

    /// Set the write revision
    fn set_revision(&mut self, revision: u64);
}

impl Versioned for VersionChain {
    fn format_version(&self) -> u32 {
        self.format_version
    }

    fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }
}

impl Versioned for SnapshotIndex {
    fn format_version(&self) -> u32 {
        self.format_version
    }

    fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }
}

/// Load a versioned blob, replacing unreadable state with `empty()`
///
/// Unparseable JSON and unknown format versions yield [`IndexLoad::Reset`].
/// With `quarantine` set the rejected blob is first renamed to
/// `<key>.corrupt` so it can be inspected later. Otherwise the blob stays in
/// place and the reset value inherits whatever revision it still carries, so
/// the next [`write_if_unchanged`] replaces it instead of reporting a
/// concurrent writer.
pub fn load_state<T, S>(store: &S, key: &str, quarantine: bool, empty: impl Fn() -> T) -> Result<IndexLoad<T>>
where
    T: Versioned,
    S: BlobStore + ?Sized,
{
    let bytes = match store
        .read(key)
        .inspect_err(|e| error!("Failed to read {}: {}", key, e))?
    {
        Some(bytes) => bytes,
        None => return Ok(IndexLoad::Fresh(empty())),
    };

    let reason = match serde_json::from_slice::<T>(&bytes) {
        Ok(value) if value.format_version() == FORMAT_VERSION => return Ok(IndexLoad::Loaded(value)),
        Ok(value) => format!("unsupported format version {}", value.format_version()),
        Err(e) => format!("unreadable JSON: {}", e),
    };

    warn!("Resetting {}: {}", key, reason);
    let mut value = empty();
    if quarantine {
        let target = format!("{}{}", key, CORRUPT_SUFFIX);
        store
            .rename(key, &target)
            .inspect_err(|e| error!("Failed to quarantine {}: {}", key, e))?;
        warn!("Quarantined {} as {}", key, target);
    } else if let Some(stamp) = revision_stamp(&bytes) {
        value.set_revision(stamp);
    }

    Ok(IndexLoad::Reset { value, reason })
}

#[derive(Deserialize)]
struct RevisionStamp {
    #[serde(default)]
    revision: u64,
}

fn revision_stamp(bytes: &[u8]) -> Option<u64> {
    serde_json::from_slice::<RevisionStamp>(bytes)
        .ok()
        .map(|stamp| stamp.revision)
}

/// Write a versioned blob unless another writer advanced it since `base_revision`
///
/// The stored revision is re-read and the blob written while holding the
/// backend's lock on `key`, so two writers starting from the same revision
/// cannot both succeed. A blob that is absent or unreadable never blocks the
/// write.
///
/// # Errors
///
/// - [`VellumError::ConcurrentModification`] if the stored revision differs
///   from `base_revision`
/// - [`VellumError::LockTimeout`] if another writer holds the key too long
pub fn write_if_unchanged<T, S>(store: &S, key: &str, base_revision: u64, value: &T) -> Result<()>
where
    T: Serialize,
    S: BlobStore + ?Sized,
{
    let bytes = serde_json::to_vec_pretty(value)?;
    store.with_lock(key, &mut || {
        let stored = store
            .read(key)
            .inspect_err(|e| error!("Failed to read {}: {}", key, e))?
            .and_then(|bytes| revision_stamp(&bytes));

        if let Some(revision) = stored {
            if revision != base_revision {
                warn!(
                    "Refusing to overwrite {}: stored revision {} != expected {}",
                    key, revision, base_revision
                );
                return Err(VellumError::ConcurrentModification(key.to_string()));
            }
        }

        store
            .write(key, &bytes)
            .inspect_err(|e| error!("Failed to write {}: {}", key, e))
    })
}

fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'
}

/// Map an asset id onto a single key segment
///
/// Ids made only of `[A-Za-z0-9._-]` are used as is; anything else, including
/// ids that would collide with the encoded form or with a quarantined
/// `<key>.corrupt` blob, is hex encoded behind an `x-` prefix.
pub fn asset_key(asset_id: &str) -> String {
    let plain = !asset_id.is_empty()
        && asset_id != "."
        && asset_id != ".."
        && !asset_id.starts_with(ENCODED_PREFIX)
        && !asset_id.ends_with(CORRUPT_SUFFIX)
        && asset_id.chars().all(is_safe_char);
    if plain {
        asset_id.to_string()
    } else {
        format!("{}{}", ENCODED_PREFIX, hex::encode(asset_id.as_bytes()))
    }
}

/// Inverse of [`asset_key`]
pub fn asset_id_from_key(segment: &str) -> Option<String> {
    match segment.strip_prefix(ENCODED_PREFIX) {
        Some(encoded) => hex::decode(encoded).ok().and_then(|bytes| String::from_utf8(bytes).ok()),
        None => Some(segment.to_string()),
    }
}

/// Full key of an asset's version chain
pub fn version_chain_key(asset_id: &str) -> String {
    format!("{}{}", VERSIONS_PREFIX, asset_key(asset_id))
}

/// Full key of a snapshot body
pub fn snapshot_key(snapshot_id: &str) -> String {
    format!("{}{}", SNAPSHOTS_PREFIX, snapshot_id)
}

/// Reject keys that cannot be mapped safely onto a path
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(VellumError::InvalidKey("empty key".to_string()));
    }
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." || !segment.chars().all(is_safe_char) {
            return Err(VellumError::InvalidKey(key.to_string()));
        }
    }
    Ok(())
}

/// Filesystem-backed blob store
///
/// ```text
/// storage_root/
/// ├── metadata.json        # StorageMetadata
/// ├── versions/
/// │   └── <asset-key>.json
/// └── snapshots/
///     ├── index.json
///     └── <snapshot_id>.json
/// ```
pub struct FsStorage {
    root: PathBuf,
    metadata: RwLock<StorageMetadata>,
    lock_timeout: Duration,
}

impl std::fmt::Debug for FsStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsStorage")
            .field("root", &self.root)
            .field("format_version", &self.metadata.read().format_version)
            .finish()
    }
}

impl FsStorage {
    /// Initialize a new storage directory
    ///
    /// # Errors
    ///
    /// - [`VellumError::StorageAlreadyExists`] if `root` already holds a store
    /// - [`VellumError::Io`] if the directories cannot be created
    pub fn init(root: PathBuf, config: VaultConfig) -> Result<Self> {
        if root.join(METADATA_FILE).exists() {
            return Err(VellumError::StorageAlreadyExists(root));
        }

        fs::create_dir_all(root.join("versions"))?;
        fs::create_dir_all(root.join("snapshots"))?;

        let metadata = StorageMetadata {
            format_version: FORMAT_VERSION,
            vellum_version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: Utc::now(),
            last_accessed: Utc::now(),
            config,
        };
        let storage = Self {
            root,
            metadata: RwLock::new(metadata),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        };
        storage.persist_metadata(&storage.metadata.read())?;

        info!("Initialized storage at {:?}", storage.root);
        Ok(storage)
    }

    /// Open an existing storage directory
    ///
    /// # Errors
    ///
    /// - [`VellumError::StorageNotInitialized`] if `root` has no `metadata.json`
    /// - [`VellumError::Json`] if the metadata does not parse
    pub fn open(root: PathBuf) -> Result<Self> {
        let metadata_path = root.join(METADATA_FILE);
        let metadata_json = match fs::read_to_string(&metadata_path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(VellumError::StorageNotInitialized(root));
            }
            Err(e) => return Err(e.into()),
        };
        let mut metadata: StorageMetadata = serde_json::from_str(&metadata_json)?;
        metadata.last_accessed = Utc::now();

        info!("Opened storage at {:?}", root);
        Ok(Self {
            root,
            metadata: RwLock::new(metadata),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    /// Open the store at `root`, initializing it first if needed
    pub fn init_or_open(root: PathBuf, config: VaultConfig) -> Result<Self> {
        if root.join(METADATA_FILE).exists() {
            Self::open(root)
        } else {
            Self::init(root, config)
        }
    }

    /// Set how long a writer waits for another writer's key lock
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Storage root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy of the storage metadata
    pub fn metadata(&self) -> StorageMetadata {
        self.metadata.read().clone()
    }

    /// Update and persist the storage metadata
    pub fn update_metadata<F>(&self, updater: F) -> Result<()>
    where
        F: FnOnce(&mut StorageMetadata),
    {
        let mut metadata = self.metadata.write();
        updater(&mut metadata);
        metadata.last_accessed = Utc::now();
        self.persist_metadata(&metadata)
    }

    fn persist_metadata(&self, metadata: &StorageMetadata) -> Result<()> {
        let json = serde_json::to_vec_pretty(metadata)?;
        atomic_write(&self.root.join(METADATA_FILE), &json)
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        let mut path = self.root.clone();
        for segment in key.split('/') {
            path.push(segment);
        }
        let mut file_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        file_name.push(BLOB_EXTENSION);
        path.set_file_name(file_name);
        Ok(path)
    }

    fn collect_keys(&self, dir: &Path, prefix: &str, keys: &mut Vec<String>) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                let nested = format!("{}{}/", prefix, name);
                self.collect_keys(&entry.path(), &nested, keys)?;
            } else if let Some(stem) = name.strip_suffix(BLOB_EXTENSION) {
                if prefix.is_empty() && name == METADATA_FILE {
                    continue;
                }
                keys.push(format!("{}{}", prefix, stem));
            }
        }
        Ok(())
    }
}

/// Exclusive `<blob>.lock` file, removed on drop
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    fn acquire(path: PathBuf, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let deadline = Instant::now() + timeout;
        loop {
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => {
                    trace!("Acquired {:?}", path);
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if lock_is_stale(&path) {
                        warn!("Removing stale lock {:?}", path);
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(VellumError::LockTimeout(path));
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release {:?}: {}", self.path, e);
        }
    }
}

// Left behind by a writer that died mid-write
fn lock_is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > STALE_LOCK_AGE)
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| VellumError::internal(format!("no parent directory for {:?}", path)))?;
    fs::create_dir_all(parent)?;
    let mut file = tempfile::NamedTempFile::new_in(parent)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| VellumError::Io(e.error))?;
    Ok(())
}

impl BlobStore for FsStorage {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.blob_path(key)?;
        match fs::read(&path) {
            Ok(bytes) => {
                trace!("Read {} bytes from {}", bytes.len(), key);
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.blob_path(key)?;
        atomic_write(&path, bytes)?;
        trace!("Wrote {} bytes to {}", bytes.len(), key);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let path = self.blob_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Deleted blob {}", key);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        self.collect_keys(&self.root, "", &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from_path = self.blob_path(from)?;
        let to_path = self.blob_path(to)?;
        if let Some(parent) = to_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&from_path, &to_path)?;
        debug!("Renamed blob {} to {}", from, to);
        Ok(())
    }

    fn with_lock(&self, key: &str, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        let mut lock_path = self.blob_path(key)?.into_os_string();
        lock_path.push(LOCK_EXTENSION);
        let _lock = LockFile::acquire(PathBuf::from(lock_path), self.lock_timeout)?;
        f()
    }
}

/// In-memory blob store
#[derive(Debug, Default)]
pub struct MemoryStorage {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
    // Serializes `with_lock` sections; one lock for all keys
    write_lock: Mutex<()>,
}

impl MemoryStorage {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl BlobStore for MemoryStorage {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        Ok(self.blobs.read().get(key).cloned())
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        validate_key(key)?;
        self.blobs.write().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        Ok(self.blobs.write().remove(key).is_some())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .blobs
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        validate_key(from)?;
        validate_key(to)?;
        let mut blobs = self.blobs.write();
        let bytes = blobs.remove(from).ok_or_else(|| {
            VellumError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("blob {} does not exist", from),
            ))
        })?;
        blobs.insert(to.to_string(), bytes);
        Ok(())
    }

    fn with_lock(&self, key: &str, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        validate_key(key)?;
        let _guard = self.write_lock.lock();
        f()
    }
}
