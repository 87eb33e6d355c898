//! Integration tests for Vellum
//!
//! Exercises on-disk vaults end to end: the documented diff, dedup,
//! rollback and snapshot comparison scenarios, retention, reopening, and
//! two vault handles racing on one directory.

use ::vellum::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::path::PathBuf;
use tempfile::TempDir;
use tracing::info;

/// Test harness around a vault in a temporary directory
pub struct VaultTestHarness {
    pub storage_dir: TempDir,
    pub vault: Vault,
    pub catalog: CatalogGenerator,
}

impl VaultTestHarness {
    /// Create a new test harness with default settings
    pub fn new() -> Self {
        Self::with_builder(VaultBuilder::new())
    }

    /// Create a harness from a configured builder
    pub fn with_builder(builder: VaultBuilder) -> Self {
        let storage_dir = TempDir::new().unwrap();
        let vault = builder.init(storage_dir.path().join("vault")).unwrap();

        Self {
            storage_dir,
            vault,
            catalog: CatalogGenerator::new(42),
        }
    }

    /// Path of the vault directory
    pub fn vault_path(&self) -> PathBuf {
        self.storage_dir.path().join("vault")
    }

    /// Open a second handle on the same directory
    pub fn second_handle(&self) -> Vault {
        Vault::open(self.vault_path()).unwrap()
    }
}

/// Deterministic generator of game-like item catalogs
pub struct CatalogGenerator {
    rng: StdRng,
}

impl CatalogGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// One item record
    pub fn item(&mut self, index: usize) -> Value {
        let rarities = ["common", "rare", "epic"];
        json!({
            "id": format!("item-{}", index),
            "name": format!("Item {}", index),
            "rarity": rarities[self.rng.random_range(0..rarities.len())],
            "stats": {
                "damage": self.rng.random_range(1..100),
                "weight": self.rng.random_range(1..20),
            },
            "tags": ["loot"],
        })
    }

    /// A catalog of `count` items
    pub fn items(&mut self, count: usize) -> Vec<Value> {
        (0..count).map(|i| self.item(i)).collect()
    }

    /// Bump the damage of roughly one in `every` items
    pub fn mutate(&mut self, items: &mut [Value], every: usize) -> usize {
        let mut touched = 0;
        for item in items.iter_mut() {
            if self.rng.random_range(0..every) == 0 {
                let damage = item["stats"]["damage"].as_i64().unwrap_or(0);
                item["stats"]["damage"] = json!(damage + 1);
                touched += 1;
            }
        }
        touched
    }
}

#[test]
fn scenario_nested_diff() {
    let old = json!({"a": 1, "b": {"c": 2}});
    let new = json!({"a": 1, "b": {"c": 3}, "d": 4});

    let changes = diff::diff_values(&old, &new);
    assert_eq!(
        changes,
        vec![
            FieldChange::modified("b.c", json!(2), json!(3)),
            FieldChange::added("d", json!(4)),
        ]
    );

    // Wire shape uses camelCase keys
    let wire = serde_json::to_value(&changes[0]).unwrap();
    assert_eq!(
        wire,
        json!({"path": "b.c", "type": "modified", "oldValue": 2, "newValue": 3})
    );
}

#[test]
fn scenario_version_dedup() {
    let harness = VaultTestHarness::new();
    let vault = &harness.vault;

    vault.save_version("sword-1", &json!({"hp": 10}), SaveOptions::default()).unwrap();
    vault.save_version("sword-1", &json!({"hp": 10}), SaveOptions::default()).unwrap();

    assert_eq!(
        vault.version_history("sword-1", HistoryOptions::default()).unwrap().len(),
        1
    );
}

#[test]
fn scenario_rollback_appends() {
    let harness = VaultTestHarness::new();
    let vault = &harness.vault;

    let v1 = vault.save_version("sword-1", &json!({"hp": 10}), SaveOptions::default()).unwrap();
    let v2 = vault.save_version("sword-1", &json!({"hp": 20}), SaveOptions::default()).unwrap();

    let restored = vault.rollback("sword-1", &v1.id).unwrap();
    assert_eq!(restored, Some(json!({"hp": 10})));

    let history = vault.version_history("sword-1", HistoryOptions::default()).unwrap();
    assert_eq!(history.len(), 3);

    let v3 = &history[0];
    assert_eq!(v3.label, "v3");
    assert_eq!(v3.data, Some(json!({"hp": 10})));
    assert_eq!(v3.parent_version_id.as_deref(), Some(v2.id.as_str()));
    assert_eq!(v3.description.as_deref(), Some("Rolled back to v1"));
}

#[test]
fn scenario_snapshot_comparison() {
    let harness = VaultTestHarness::new();
    let vault = &harness.vault;

    let mut manifests = Manifests::new();
    manifests.insert_values("items", vec![json!({"id": "a", "name": "A", "value": 1})]);
    let s1 = vault.create_snapshot(manifests.clone(), "one").unwrap();

    manifests.insert_values(
        "items",
        vec![
            json!({"id": "a", "name": "A", "value": 2}),
            json!({"id": "b", "name": "B", "value": 5}),
        ],
    );
    let s2 = vault.create_snapshot(manifests, "two").unwrap();

    let diff = vault.compare_snapshots(&s1.id, &s2.id).unwrap().unwrap();
    assert_eq!(diff.total_changes, 2);
    assert_eq!(diff.summary.added, 1);
    assert_eq!(diff.summary.modified, 1);

    let modified = diff
        .changes
        .iter()
        .find(|c| c.change_type == ChangeType::Modified)
        .unwrap();
    assert_eq!(modified.entity_id, "a");
    assert_eq!(modified.entity_name.as_deref(), Some("A"));
    assert_eq!(
        modified.field_changes,
        vec![FieldChange::modified("value", json!(1), json!(2))]
    );

    let added = diff
        .changes
        .iter()
        .find(|c| c.change_type == ChangeType::Added)
        .unwrap();
    assert_eq!(added.entity_id, "b");
    assert!(added.field_changes.is_empty());
}

#[test]
fn test_catalog_balance_passes() {
    let mut harness = VaultTestHarness::with_builder(VaultBuilder::new().max_snapshots(5));
    let mut items = harness.catalog.items(40);

    let mut manifests = Manifests::new();
    manifests.insert_values("items", items.clone());
    let first = harness.vault.create_snapshot(manifests.clone(), "Initial").unwrap();
    assert_eq!(first.metadata.total_assets, 40);
    assert_eq!(first.metadata.changes_from_previous, 40);

    let mut ids = vec![first.id.clone()];
    for pass in 1..=7 {
        let touched = harness.catalog.mutate(&mut items, 4);
        manifests.insert_values("items", items.clone());
        let snapshot = harness
            .vault
            .create_snapshot(manifests.clone(), &format!("Balance pass {}", pass))
            .unwrap();
        assert_eq!(snapshot.metadata.changes_from_previous, touched);
        info!("Pass {} touched {} items", pass, touched);
        ids.push(snapshot.id);
    }

    // Only the newest five survive, bodies included
    let listed = harness.vault.list_snapshots().unwrap();
    assert_eq!(listed.len(), 5);
    assert_eq!(listed[0].id, ids[7]);
    for evicted in &ids[..3] {
        assert!(harness.vault.get_snapshot(evicted).unwrap().is_none());
        assert!(!harness
            .vault_path()
            .join("snapshots")
            .join(format!("{}.json", evicted))
            .exists());
    }

    // History only sees retained snapshots
    let history = harness.vault.asset_history("item-0", Some("items")).unwrap();
    assert_eq!(history.len(), 5);
    assert_eq!(history.last().unwrap().change_type, HistoryChangeType::Added);
}

#[test]
fn test_restore_creates_new_snapshot() {
    let harness = VaultTestHarness::new();
    let vault = &harness.vault;

    let mut manifests = Manifests::new();
    manifests.insert_values("npcs", vec![json!({"id": "guard", "hp": 10})]);
    let original = vault.create_snapshot(manifests.clone(), "Guards").unwrap();

    manifests.insert_values("npcs", vec![json!({"id": "guard", "hp": 99})]);
    vault.create_snapshot(manifests, "Overbuffed").unwrap();

    let restored = vault.restore_snapshot(&original.id).unwrap().unwrap();
    assert_eq!(restored.collection("npcs").unwrap()[0]["hp"], json!(10));

    let current = vault.current_snapshot().unwrap().unwrap();
    assert_ne!(current.id, original.id);
    assert_eq!(current.description, "Restored from snapshot: Guards");
    assert_eq!(current.metadata.hash, original.metadata.hash);
    assert_eq!(current.metadata.changes_from_previous, 1);
    assert_eq!(vault.list_snapshots().unwrap().len(), 3);
}

#[test]
fn test_reopen_keeps_config_and_data() {
    let harness = VaultTestHarness::with_builder(
        VaultBuilder::new()
            .max_versions_per_asset(3)
            .max_snapshots(7),
    );

    for hp in 0..5 {
        harness
            .vault
            .save_version("sword-1", &json!({"hp": hp}), SaveOptions::default())
            .unwrap();
    }

    // Builder settings on an existing vault are ignored
    let reopened = VaultBuilder::new()
        .max_versions_per_asset(50)
        .build(harness.vault_path())
        .unwrap();
    assert_eq!(reopened.config().max_versions_per_asset, 3);
    assert_eq!(reopened.config().max_snapshots, 7);

    let history = reopened.version_history("sword-1", HistoryOptions::default()).unwrap();
    let labels: Vec<&str> = history.iter().map(|v| v.label.as_str()).collect();
    assert_eq!(labels, vec!["v5", "v4", "v3"]);

    // Trimmed history still diffs and rolls back among survivors
    let oldest = history.last().unwrap();
    assert_eq!(reopened.rollback("sword-1", &oldest.id).unwrap(), Some(json!({"hp": 2})));
}

#[test]
fn test_two_handles_detect_lost_update() {
    let harness = VaultTestHarness::new();
    let first = &harness.vault;
    let second = harness.second_handle();

    first.save_version("sword-1", &json!({"hp": 1}), SaveOptions::default()).unwrap();
    // Warm the second handle's cache
    assert_eq!(second.current_version("sword-1").unwrap().unwrap().label, "v1");

    first.save_version("sword-1", &json!({"hp": 2}), SaveOptions::default()).unwrap();

    let err = second
        .save_version("sword-1", &json!({"hp": 3}), SaveOptions::default())
        .unwrap_err();
    assert!(matches!(err, VellumError::ConcurrentModification(_)));
    assert!(err.is_recoverable());

    // The failed write dropped the stale cache, so a retry lands on top
    let retried = second
        .save_version("sword-1", &json!({"hp": 3}), SaveOptions::default())
        .unwrap();
    assert_eq!(retried.label, "v3");
    assert_eq!(
        first.version_history("sword-1", HistoryOptions::default()).unwrap().len(),
        2,
        "first handle still serves its cached chain"
    );
    first.clear_cache();
    assert_eq!(
        first.version_history("sword-1", HistoryOptions::default()).unwrap().len(),
        3
    );
}

#[test]
fn test_two_handles_snapshot_race() {
    let harness = VaultTestHarness::new();
    let first = &harness.vault;
    let second = harness.second_handle();

    let mut manifests = Manifests::new();
    manifests.insert_values("items", vec![json!({"id": "a"})]);
    first.create_snapshot(manifests.clone(), "first").unwrap();
    assert_eq!(second.list_snapshots().unwrap().len(), 1);

    manifests.insert_values("items", vec![json!({"id": "a"}), json!({"id": "b"})]);
    first.create_snapshot(manifests.clone(), "second").unwrap();

    let err = second.create_snapshot(manifests.clone(), "stale").unwrap_err();
    assert!(matches!(err, VellumError::ConcurrentModification(_)));

    // The rejected body is cleaned up and the index is untouched
    second.clear_cache();
    let listed = second.list_snapshots().unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|s| s.description != "stale"));
    let bodies = std::fs::read_dir(harness.vault_path().join("snapshots"))
        .unwrap()
        .count();
    // index.json plus two bodies
    assert_eq!(bodies, 3);
}

#[test]
fn test_typed_entities_round_trip() {
    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Item {
        id: String,
        name: String,
        damage: i64,
    }

    impl Entity for Item {
        fn id(&self) -> &str {
            &self.id
        }
    }

    let harness = VaultTestHarness::new();
    let items = vec![
        Item { id: "sword".into(), name: "Sword".into(), damage: 5 },
        Item { id: "axe".into(), name: "Axe".into(), damage: 8 },
    ];

    let mut manifests = Manifests::new();
    manifests.insert_collection("items", &items).unwrap();
    let snapshot = harness.vault.create_snapshot(manifests, "Typed").unwrap();

    let restored = harness.vault.get_snapshot(&snapshot.id).unwrap().unwrap();
    let back: Vec<Item> = restored.manifests.collection_as("items").unwrap();
    assert_eq!(back, items);
}

#[test]
fn test_cross_collection_duplicate_rejected() {
    let harness = VaultTestHarness::new();

    let mut manifests = Manifests::new();
    manifests.insert_values("items", vec![json!({"id": "shared"})]);
    manifests.insert_values("npcs", vec![json!({"id": "shared"})]);

    let err = harness.vault.create_snapshot(manifests, "dup").unwrap_err();
    match err {
        VellumError::DuplicateEntityId { id, .. } => assert_eq!(id, "shared"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(harness.vault.list_snapshots().unwrap().is_empty());
}
