//! Main test module for Vellum
//!
//! This module includes all test suites:
//! - Integration tests for on-disk workflows and documented scenarios
//! - Property-based tests for diff, patch and hash invariants
//! - Edge cases around ids, keys and odd record shapes

pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::vellum::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_empty_manifests_snapshot() {
        let vault = Vault::in_memory().unwrap();

        let snapshot = vault.create_snapshot(Manifests::new(), "Empty").unwrap();
        assert_eq!(snapshot.metadata.total_assets, 0);
        assert_eq!(snapshot.metadata.changes_from_previous, 0);

        let restored = vault.restore_snapshot(&snapshot.id).unwrap().unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn test_special_asset_ids() {
        let storage_dir = TempDir::new().unwrap();
        let vault = Vault::init(storage_dir.path().join("vault")).unwrap();

        let special_ids = vec![
            "id with spaces",
            "path/like/id",
            "../escape",
            "x-looks-encoded",
            "dots.and.more",
            "UPPER_case-123",
        ];

        for id in &special_ids {
            vault
                .save_version(id, &json!({"id": id, "hp": 1}), SaveOptions::default())
                .unwrap();
        }

        // Nothing escaped the versions directory
        assert!(!storage_dir.path().join("escape").exists());

        let mut assets = vault.list_assets().unwrap();
        assets.sort();
        let mut expected: Vec<String> = special_ids.iter().map(|s| s.to_string()).collect();
        expected.sort();
        assert_eq!(assets, expected);

        for id in &special_ids {
            let current = vault.current_version(id).unwrap().unwrap();
            assert_eq!(current.asset_id, *id);
        }
    }

    #[test]
    fn test_unicode_content() {
        let vault = Vault::in_memory().unwrap();

        let old = json!({"name": "Épée", "lore": "古い剣"});
        let new = json!({"name": "Épée", "lore": "新しい剣 🗡️"});
        let v1 = vault.save_version("epee", &old, SaveOptions::default()).unwrap();
        let v2 = vault.save_version("epee", &new, SaveOptions::default()).unwrap();

        let diff = vault.diff_versions("epee", &v1.id, &v2.id).unwrap().unwrap();
        assert_eq!(diff.change_count, 1);
        assert_eq!(diff.changes[0].path, "lore");
        assert_eq!(diff.changes[0].new_value, Some(json!("新しい剣 🗡️")));
    }

    #[test]
    fn test_non_object_records_rejected() {
        let vault = Vault::in_memory().unwrap();

        for data in [json!([1, 2]), json!("text"), json!(3), json!(null)] {
            let err = vault.save_version("bad", &data, SaveOptions::default()).unwrap_err();
            assert!(matches!(err, VellumError::InvalidRecord(_)));
        }
        assert!(vault.list_assets().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_ids_are_not_errors() {
        let vault = Vault::in_memory().unwrap();

        assert!(vault.version_history("ghost", HistoryOptions::default()).unwrap().is_empty());
        assert!(vault.current_version("ghost").unwrap().is_none());
        assert!(vault.get_version("ghost", "nope").unwrap().is_none());
        assert!(vault.diff_versions("ghost", "a", "b").unwrap().is_none());
        assert!(vault.rollback("ghost", "a").unwrap().is_none());
        assert!(!vault.delete_asset_versions("ghost").unwrap());

        assert!(vault.get_snapshot("missing").unwrap().is_none());
        assert!(vault.get_snapshot("index").unwrap().is_none());
        assert!(vault.compare_snapshots("a", "b").unwrap().is_none());
        assert!(vault.restore_snapshot("missing").unwrap().is_none());
        assert!(!vault.delete_snapshot("missing").unwrap());
        assert!(vault.current_snapshot().unwrap().is_none());
        assert!(vault.asset_history("ghost", None).unwrap().is_empty());
    }

    #[test]
    fn test_open_uninitialized_directory() {
        let storage_dir = TempDir::new().unwrap();
        let err = Vault::open(storage_dir.path().join("nothing")).unwrap_err();
        assert!(matches!(err, VellumError::StorageNotInitialized(_)));
    }

    #[test]
    fn test_init_twice_fails() {
        let storage_dir = TempDir::new().unwrap();
        let path = storage_dir.path().join("vault");
        Vault::init(path.clone()).unwrap();

        let err = Vault::init(path.clone()).unwrap_err();
        assert!(matches!(err, VellumError::StorageAlreadyExists(_)));

        // The builder reopens instead
        assert!(VaultBuilder::new().build(path).is_ok());
    }

    #[test]
    fn test_hand_edited_chain_is_reset() {
        let storage_dir = TempDir::new().unwrap();
        let path = storage_dir.path().join("vault");
        let vault = Vault::init(path.clone()).unwrap();
        vault.save_version("sword-1", &json!({"hp": 10}), SaveOptions::default()).unwrap();

        fs::write(path.join("versions").join("sword-1.json"), "{ truncated").unwrap();
        vault.clear_cache();

        // Fresh chain after the corrupt one is set aside
        assert!(vault.current_version("sword-1").unwrap().is_none());
        let v = vault.save_version("sword-1", &json!({"hp": 11}), SaveOptions::default()).unwrap();
        assert_eq!(v.label, "v1");
        assert!(path.join("versions").join("sword-1.corrupt.json").exists());
        assert_eq!(vault.list_assets().unwrap(), vec!["sword-1".to_string()]);
    }

    #[test]
    fn test_numeric_and_timestamp_equivalence() {
        let vault = Vault::in_memory().unwrap();

        let v1 = vault
            .save_version(
                "event",
                &json!({"at": "2024-01-01T00:00:00Z", "weight": 1}),
                SaveOptions::default(),
            )
            .unwrap();
        let v2 = vault
            .save_version(
                "event",
                &json!({"at": "2024-01-01T00:00:00.000+00:00", "weight": 1.0}),
                SaveOptions::default(),
            )
            .unwrap();

        // Different bytes, same meaning: the save is deduplicated
        assert_eq!(v1.id, v2.id);
        let diff = vault.diff_versions("event", &v1.id, &v2.id).unwrap().unwrap();
        assert!(!diff.has_changes);
    }
}
