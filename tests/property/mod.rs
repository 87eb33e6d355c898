//! Property-based testing for Vellum
//!
//! Uses proptest to verify the diff, patch and hash invariants across
//! randomly generated records, and the version chain invariants across
//! random save and rollback sequences.

use ::vellum::diff::{deep_equal, diff_records, diff_values};
use ::vellum::hash::content_hash;
use ::vellum::patch::{apply_forward, apply_reverse};
use ::vellum::*;
use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};

/// Generate a JSON leaf value
fn leaf_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| json!(n)),
        "[a-z ]{0,12}".prop_map(Value::String),
    ]
}

/// Generate nested JSON values up to a small depth
fn value_strategy() -> impl Strategy<Value = Value> {
    leaf_strategy().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map(key_strategy("[a-e]{1,3}"), inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

/// Generate object keys, including the empty key and keys with dots
fn key_strategy(plain: &'static str) -> impl Strategy<Value = String> {
    prop_oneof![
        6 => plain,
        1 => Just(String::new()),
        1 => "[a-c]\\.[a-c]?",
    ]
}

/// Generate a record (top-level object)
fn record_strategy() -> impl Strategy<Value = Record> {
    prop::collection::btree_map(key_strategy("[a-f]{1,4}"), value_strategy(), 0..6)
        .prop_map(|m| m.into_iter().collect::<Map<String, Value>>())
}

/// Generate JSON numbers across the integer and float representations
///
/// Values cluster around 2^53, where an integer and the nearest float stop
/// agreeing, so equal and unequal pairs both come up.
fn number_strategy() -> impl Strategy<Value = Value> {
    const EDGE: u64 = 9_007_199_254_740_990;
    prop_oneof![
        any::<i64>().prop_map(|n| json!(n)),
        any::<u64>().prop_map(|n| json!(n)),
        (-1e20f64..1e20).prop_map(|f| json!(f)),
        any::<i64>().prop_map(|n| json!(n as f64)),
        (0u64..5).prop_map(|d| json!(EDGE + d)),
        (0u64..5).prop_map(|d| json!((EDGE + d) as f64)),
        (-3i64..3).prop_map(|n| json!(n)),
        (-3i64..3).prop_map(|n| json!(n as f64)),
    ]
}

#[derive(Debug, Clone)]
enum ChainOp {
    Save(i32),
    Rollback(usize),
}

fn chain_op_strategy() -> impl Strategy<Value = ChainOp> {
    prop_oneof![
        3 => (0i32..3).prop_map(ChainOp::Save),
        2 => any::<usize>().prop_map(ChainOp::Rollback),
    ]
}

/// Rebuild an object with its keys in reverse order, recursively
fn reverse_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut reversed = Map::new();
            for (k, v) in map.iter().rev() {
                reversed.insert(k.clone(), reverse_keys(v));
            }
            Value::Object(reversed)
        }
        Value::Array(items) => Value::Array(items.iter().map(reverse_keys).collect()),
        other => other.clone(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_diff_of_identical_records_is_empty(record in record_strategy()) {
        prop_assert!(diff_records(&record, &record).is_empty());
    }

    #[test]
    fn prop_forward_patch_reaches_new(old in record_strategy(), new in record_strategy()) {
        let changes = diff_records(&old, &new);
        let patched = apply_forward(&old, &changes);
        prop_assert!(deep_equal(&Value::Object(patched), &Value::Object(new)));
    }

    #[test]
    fn prop_reverse_patch_reaches_old(old in record_strategy(), new in record_strategy()) {
        let changes = diff_records(&old, &new);
        let reverted = apply_reverse(&new, &changes);
        prop_assert!(deep_equal(&Value::Object(reverted), &Value::Object(old)));
    }

    #[test]
    fn prop_hash_ignores_key_order(value in value_strategy()) {
        prop_assert_eq!(content_hash(&value), content_hash(&reverse_keys(&value)));
    }

    #[test]
    fn prop_hash_survives_json_round_trip(value in value_strategy()) {
        let text = serde_json::to_string(&value).unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        prop_assert_eq!(content_hash(&value), content_hash(&parsed));
    }

    #[test]
    fn prop_no_changes_means_same_hash(old in record_strategy(), new in record_strategy()) {
        let old = Value::Object(old);
        let new = Value::Object(new);
        if diff_values(&old, &new).is_empty() {
            prop_assert_eq!(content_hash(&old), content_hash(&new));
        }
    }

    #[test]
    fn prop_equal_numbers_hash_equal(a in number_strategy(), b in number_strategy()) {
        let (a, b) = (json!({"n": a}), json!({"n": b}));
        let same_hash = content_hash(&a) == content_hash(&b);
        prop_assert_eq!(diff_values(&a, &b).is_empty(), same_hash, "{} vs {}", a, b);
    }

    #[test]
    fn prop_integer_matches_its_float_only_when_exact(n in any::<i64>()) {
        let int = json!({"n": n});
        let float = json!({"n": n as f64});
        let exact = (n as f64) as i128 == i128::from(n);
        prop_assert_eq!(diff_values(&int, &float).is_empty(), exact);
        prop_assert_eq!(content_hash(&int) == content_hash(&float), exact);
    }

    #[test]
    fn prop_change_summary_matches_changes(old in record_strategy(), new in record_strategy()) {
        let changes = diff_records(&old, &new);
        let summary = DiffSummary::from_changes(&changes);
        prop_assert_eq!(summary.total(), changes.len());
        for change in &changes {
            match change.change_type {
                ChangeType::Added => prop_assert!(change.old_value.is_none() && change.new_value.is_some()),
                ChangeType::Deleted => prop_assert!(change.old_value.is_some() && change.new_value.is_none()),
                ChangeType::Modified => prop_assert!(change.old_value.is_some() && change.new_value.is_some()),
            }
        }
    }

    #[test]
    fn prop_repeated_saves_deduplicate(records in prop::collection::vec(record_strategy(), 1..6)) {
        let vault = Vault::in_memory().unwrap();
        let mut distinct_runs = 0;
        let mut last_hash: Option<String> = None;

        for record in &records {
            let data = Value::Object(record.clone());
            vault.save_version("asset", &data, SaveOptions::default()).unwrap();
            vault.save_version("asset", &data, SaveOptions::default()).unwrap();

            let hash = content_hash(&data);
            if last_hash.as_ref() != Some(&hash) {
                distinct_runs += 1;
                last_hash = Some(hash);
            }
        }

        let history = vault.version_history("asset", HistoryOptions::default()).unwrap();
        prop_assert_eq!(history.len(), distinct_runs);
        prop_assert!(history.windows(2).all(|w| w[0].sequence > w[1].sequence));
    }

    #[test]
    fn prop_snapshot_history_tracks_every_change(values in prop::collection::vec(0i32..3, 1..6)) {
        let vault = Vault::in_memory().unwrap();
        for (i, v) in values.iter().enumerate() {
            let mut manifests = Manifests::new();
            manifests.insert_values("items", vec![json!({"id": "x", "v": v})]);
            vault.create_snapshot(manifests, &format!("s{}", i)).unwrap();
        }

        let history = vault.asset_history("x", None).unwrap();
        prop_assert_eq!(history.len(), values.len());
        prop_assert_eq!(history.last().unwrap().change_type, HistoryChangeType::Added);

        // Newest first, so row i compares values[n-1-i] against its predecessor
        let n = values.len();
        for (i, entry) in history.iter().enumerate().take(n - 1) {
            let expected = if values[n - 1 - i] == values[n - 2 - i] {
                HistoryChangeType::Unchanged
            } else {
                HistoryChangeType::Modified
            };
            prop_assert_eq!(entry.change_type, expected);
        }
    }

    #[test]
    fn prop_version_chain_stays_linear(ops in prop::collection::vec(chain_op_strategy(), 1..40)) {
        let vault = Vault::in_memory().unwrap();
        let all = HistoryOptions { limit: None, include_data: true };
        let mut expected: Option<Value> = None;
        let mut expected_len = 0usize;

        for op in &ops {
            match op {
                ChainOp::Save(v) => {
                    let data = json!({"v": v});
                    vault.save_version("asset", &data, SaveOptions::default()).unwrap();
                    if expected.as_ref() != Some(&data) {
                        expected_len += 1;
                        expected = Some(data);
                    }
                }
                ChainOp::Rollback(pick) => {
                    let history = vault.version_history("asset", all.clone()).unwrap();
                    if history.is_empty() {
                        continue;
                    }
                    let target = &history[pick % history.len()];
                    let data = vault.rollback("asset", &target.id).unwrap().unwrap();
                    prop_assert_eq!(Some(&data), target.data.as_ref());
                    if expected.as_ref() != Some(&data) {
                        expected_len += 1;
                        expected = Some(data);
                    }
                }
            }
        }

        let history = vault.version_history("asset", all).unwrap();
        prop_assert_eq!(history.len(), expected_len);

        // Newest first: each version's parent is the next row
        for pair in history.windows(2) {
            prop_assert_eq!(pair[0].parent_version_id.as_deref(), Some(pair[1].id.as_str()));
            prop_assert!(pair[0].sequence > pair[1].sequence);
        }
        prop_assert_eq!(history.last().unwrap().parent_version_id.as_deref(), None);

        let ids: HashSet<&str> = history.iter().map(|v| v.id.as_str()).collect();
        prop_assert_eq!(ids.len(), history.len());

        // Following parents from the head visits every version once and stops
        let parents: HashMap<&str, Option<&str>> = history
            .iter()
            .map(|v| (v.id.as_str(), v.parent_version_id.as_deref()))
            .collect();
        let current = vault.current_version("asset").unwrap().unwrap();
        prop_assert_eq!(&current.id, &history[0].id);
        let mut visited = HashSet::new();
        let mut cursor = Some(current.id.as_str());
        while let Some(id) = cursor {
            prop_assert!(visited.insert(id), "cycle through {}", id);
            cursor = *parents.get(id).unwrap();
        }
        prop_assert_eq!(visited.len(), history.len());
        prop_assert_eq!(current.data.as_ref(), expected.as_ref());
    }
}
