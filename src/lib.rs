//! # Vellum - Versioning and structural diffs for JSON asset manifests
//!
//! A change-tracking library for collections of structured records, such as
//! the item, character and location manifests of a game.
//!
//! ## Overview
//!
//! Vellum keeps two complementary histories:
//! - **Per-asset versions**: every save of one entity appends a full copy to
//!   an append-only chain, with no-op saves deduplicated by content hash
//! - **Snapshots**: point-in-time copies of every managed collection, with
//!   retention limits and entity-level comparison between any two snapshots
//!
//! On top of these it can:
//! - Compute path-addressed field diffs between any two records
//! - Replay a diff forward or backward onto a record
//! - Rebuild the timeline of one entity from the retained snapshots
//! - Render diffs as text or as structured sections for a UI
//!
//! ## Architecture
//!
//! - **Deep Diff Engine** ([`diff`]): recursive field comparison with numeric
//!   and timestamp-aware equality
//! - **Content Hasher** ([`hash`]): key-order independent FNV-1a hashing used
//!   to skip redundant writes
//! - **Patch Applicator** ([`patch`]): forward and reverse application of
//!   change lists
//! - **Stores** ([`versions`], [`snapshots`]): persistence over a pluggable
//!   [`storage::BlobStore`], with optimistic revision checks against
//!   concurrent writers
//! - **History Reconstructor** ([`history`]) and **Diff Formatter** ([`format`])
//!   for read paths
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vellum::{Vault, VaultBuilder};
//! use vellum::types::{Manifests, SaveOptions};
//! use serde_json::json;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let vault = VaultBuilder::new()
//!     .max_versions_per_asset(25)
//!     .build(PathBuf::from("./.vellum"))?;
//!
//! // Version a single asset
//! let v1 = vault.save_version("sword-1", &json!({"name": "Sword", "damage": 5}), SaveOptions::default())?;
//! let v2 = vault.save_version("sword-1", &json!({"name": "Sword", "damage": 7}), SaveOptions::default())?;
//! let diff = vault.diff_versions("sword-1", &v1.id, &v2.id)?.unwrap();
//! println!("{} change(s)", diff.change_count);
//!
//! // Snapshot every collection
//! let mut manifests = Manifests::new();
//! manifests.insert_values("items", vec![json!({"id": "sword-1", "name": "Sword", "damage": 7})]);
//! let snapshot = vault.create_snapshot(manifests, "Balance pass")?;
//! println!("Snapshot {} holds {} assets", snapshot.id, snapshot.metadata.total_assets);
//!
//! // Undo the buff
//! vault.rollback("sword-1", &v1.id)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Diffing Records Directly
//!
//! ```rust
//! use vellum::diff::diff_values;
//! use vellum::patch::apply_reverse;
//! use serde_json::json;
//!
//! let old = json!({"hp": 10, "stats": {"atk": 3}});
//! let new = json!({"hp": 10, "stats": {"atk": 4}, "tags": ["boss"]});
//!
//! let changes = diff_values(&old, &new);
//! assert_eq!(changes.len(), 2);
//!
//! let back = apply_reverse(new.as_object().unwrap(), &changes);
//! assert_eq!(serde_json::Value::Object(back), old);
//! ```
//!
//! ## Error Handling
//!
//! All operations return `Result<T, VellumError>`. Looking up something that
//! does not exist is not an error: it yields `Ok(None)` or an empty list.
//! Errors are reserved for backend failures, records the engine refuses to
//! store, and writes that lost a race with another writer.
//!
//! ## Module Organization
//!
//! - [`diff`]: Deep diff engine and keyed array diff
//! - [`hash`]: Content hashing
//! - [`patch`]: Forward and reverse patching
//! - [`format`]: Text and structured diff rendering
//! - [`versions`]: Per-asset version chains
//! - [`snapshots`]: Collection snapshots and their index
//! - [`history`]: Per-entity timeline reconstruction
//! - [`storage`]: Blob store trait and backends
//! - [`vault`]: Facade and builder
//! - [`types`]: Common types and data structures
//! - [`error`]: Error types and handling

// Public API modules
pub mod diff;
pub mod error;
pub mod format;
pub mod hash;
pub mod history;
pub mod patch;
pub mod snapshots;
pub mod storage;
pub mod types;
pub mod vault;
pub mod versions;

// Internal modules (not part of public API)
mod collections;

// Re-export main types for convenience
pub use error::{Result, VellumError};
pub use snapshots::SnapshotStore;
pub use storage::{BlobStore, FsStorage, MemoryStorage};
pub use types::*;
pub use vault::{Vault, VaultBuilder, VaultStatus};
pub use versions::VersionStore;
