//! Property-based tests for PersistentIntMap.
//!
//! This module verifies that PersistentIntMap satisfies various laws and
//! invariants using proptest, with `BTreeMap` as the reference model.

use std::collections::BTreeMap;

use intrie::persistent::{PersistentIntMap, TransientIntMap};
use proptest::prelude::*;

// =============================================================================
// Strategy for generating test data
// =============================================================================

fn arbitrary_key() -> impl Strategy<Value = usize> {
    // Mix dense low keys with sparse keys far up the number line so the
    // window grows and shrinks across several trie levels.
    prop_oneof![
        4 => 0usize..64,
        3 => 0usize..4096,
        1 => 0usize..1_000_000_000,
    ]
}

fn arbitrary_value() -> impl Strategy<Value = i32> {
    any::<i32>()
}

fn arbitrary_entries() -> impl Strategy<Value = Vec<(usize, i32)>> {
    prop::collection::vec((arbitrary_key(), arbitrary_value()), 0..64)
}

fn build_map(entries: &[(usize, i32)]) -> PersistentIntMap<i32> {
    entries.iter().copied().collect()
}

fn build_model(entries: &[(usize, i32)]) -> BTreeMap<usize, i32> {
    entries.iter().copied().collect()
}

// =============================================================================
// Get-Insert Law: map.insert_with(k, v).get(k) == Some(&v)
// =============================================================================

proptest! {
    #[test]
    fn prop_get_insert_law(
        entries in arbitrary_entries(),
        key in arbitrary_key(),
        value in arbitrary_value()
    ) {
        let map = build_map(&entries);
        let inserted = map.insert_with(key, value, |_, replacement| *replacement);

        prop_assert_eq!(inserted.get(key), Some(&value));
    }
}

// =============================================================================
// Get-Insert-Other Law: k1 != k2 => insert at k1 does not affect k2
// =============================================================================

proptest! {
    #[test]
    fn prop_get_insert_other_law(
        entries in arbitrary_entries(),
        key1 in arbitrary_key(),
        key2 in arbitrary_key(),
        value in arbitrary_value()
    ) {
        prop_assume!(key1 != key2);

        let map = build_map(&entries);
        let inserted = map.insert_with(key1, value, |_, replacement| *replacement);

        prop_assert_eq!(inserted.get(key2), map.get(key2));
    }
}

// =============================================================================
// Remove-Get Law: map.remove(k).get(k) == None, other keys untouched
// =============================================================================

proptest! {
    #[test]
    fn prop_remove_get_law(entries in arbitrary_entries(), key in arbitrary_key()) {
        let map = build_map(&entries);
        let removed = map.remove(key);

        prop_assert_eq!(removed.get(key), None);
        for (other, value) in map.iter() {
            if other != key {
                prop_assert_eq!(removed.get(other), Some(value));
            }
        }
    }
}

// =============================================================================
// Model Equivalence: the map is a BTreeMap as a key-value relation
// =============================================================================

proptest! {
    #[test]
    fn prop_model_equivalence(entries in arbitrary_entries()) {
        let map = build_map(&entries);
        let model = build_model(&entries);

        prop_assert_eq!(map.len(), model.len());
        let map_entries: Vec<(usize, i32)> = map.iter().map(|(key, value)| (key, *value)).collect();
        let model_entries: Vec<(usize, i32)> = model.into_iter().collect();
        prop_assert_eq!(map_entries, model_entries);
    }
}

// =============================================================================
// Fold Law: fold visits keys in strictly ascending order, once each
// =============================================================================

proptest! {
    #[test]
    fn prop_fold_ascending(entries in arbitrary_entries()) {
        let map = build_map(&entries);

        let keys = map.fold(Vec::new(), |key, _, mut accumulator| {
            accumulator.push(key);
            accumulator
        });
        prop_assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
        prop_assert_eq!(keys.len(), map.len());
    }
}

// =============================================================================
// Ordered Traversal Laws: next/prev round-trips
// =============================================================================

proptest! {
    #[test]
    fn prop_next_prev_round_trip(entries in arbitrary_entries()) {
        let map = build_map(&entries);
        let keys: Vec<usize> = map.keys().collect();

        for window in keys.windows(2) {
            prop_assert_eq!(map.next_key(window[0]), Some(window[1]));
            prop_assert_eq!(map.prev_key(window[1]), Some(window[0]));
        }
        if let (Some(first), Some(last)) = (map.first_key(), map.last_key()) {
            prop_assert_eq!(map.prev_key(first), None);
            prop_assert_eq!(map.next_key(last), None);
            prop_assert_eq!(first, keys[0]);
            prop_assert_eq!(last, keys[keys.len() - 1]);
        }
    }
}

// =============================================================================
// Persistence Law: derived maps never change their source
// =============================================================================

proptest! {
    #[test]
    fn prop_persistence(
        entries in arbitrary_entries(),
        key in arbitrary_key(),
        value in arbitrary_value()
    ) {
        let map = build_map(&entries);
        let snapshot: Vec<(usize, i32)> = map.iter().map(|(key, value)| (key, *value)).collect();

        let _inserted = map.insert_with(key, value, |_, replacement| *replacement);
        let _removed = map.remove(key);

        let after: Vec<(usize, i32)> = map.iter().map(|(key, value)| (key, *value)).collect();
        prop_assert_eq!(snapshot, after);
    }
}

// =============================================================================
// Union Laws: model agreement, identity, commutativity, associativity
// =============================================================================

fn union_model(
    left: &BTreeMap<usize, i32>,
    right: &BTreeMap<usize, i32>,
) -> BTreeMap<usize, i32> {
    let mut combined = left.clone();
    for (&key, &value) in right {
        combined
            .entry(key)
            .and_modify(|existing| *existing = existing.wrapping_add(value))
            .or_insert(value);
    }
    combined
}

proptest! {
    #[test]
    fn prop_union_matches_model(
        left_entries in arbitrary_entries(),
        right_entries in arbitrary_entries()
    ) {
        let left = build_map(&left_entries);
        let right = build_map(&right_entries);
        let merged = left.union_with(&right, |l, r| l.wrapping_add(*r));

        let model = union_model(&build_model(&left_entries), &build_model(&right_entries));
        let merged_entries: Vec<(usize, i32)> =
            merged.iter().map(|(key, value)| (key, *value)).collect();
        let model_entries: Vec<(usize, i32)> = model.into_iter().collect();
        prop_assert_eq!(merged_entries, model_entries);
    }
}

proptest! {
    #[test]
    fn prop_union_empty_identity(entries in arbitrary_entries()) {
        let map = build_map(&entries);
        let empty = PersistentIntMap::new();

        prop_assert!(map.union(&empty).unwrap().ptr_eq(&map));
        prop_assert!(empty.union(&map).unwrap().ptr_eq(&map));
    }
}

proptest! {
    #[test]
    fn prop_union_commutative(
        left_entries in arbitrary_entries(),
        right_entries in arbitrary_entries()
    ) {
        let left = build_map(&left_entries);
        let right = build_map(&right_entries);

        // Commutative meet makes union commutative.
        let forward = left.union_with(&right, |l, r| l.wrapping_add(*r));
        let backward = right.union_with(&left, |l, r| l.wrapping_add(*r));
        prop_assert_eq!(forward, backward);
    }
}

proptest! {
    #[test]
    fn prop_union_associative(
        first_entries in arbitrary_entries(),
        second_entries in arbitrary_entries(),
        third_entries in arbitrary_entries()
    ) {
        let first = build_map(&first_entries);
        let second = build_map(&second_entries);
        let third = build_map(&third_entries);
        let meet = |l: &i32, r: &i32| l.wrapping_add(*r);

        let left_first = first.union_with(&second, meet).union_with(&third, meet);
        let right_first = first.union_with(&second.union_with(&third, meet), meet);
        prop_assert_eq!(left_first, right_first);
    }
}

// =============================================================================
// Intersection Laws: model agreement, idempotence, annihilation
// =============================================================================

proptest! {
    #[test]
    fn prop_intersect_matches_model(
        left_entries in arbitrary_entries(),
        right_entries in arbitrary_entries()
    ) {
        let left = build_map(&left_entries);
        let right = build_map(&right_entries);
        let common = left.intersect_with(&right, |l, r| l.wrapping_add(*r));

        let left_model = build_model(&left_entries);
        let right_model = build_model(&right_entries);
        let model: BTreeMap<usize, i32> = left_model
            .iter()
            .filter_map(|(&key, &value)| {
                right_model
                    .get(&key)
                    .map(|other| (key, value.wrapping_add(*other)))
            })
            .collect();

        let common_entries: Vec<(usize, i32)> =
            common.iter().map(|(key, value)| (key, *value)).collect();
        let model_entries: Vec<(usize, i32)> = model.into_iter().collect();
        prop_assert_eq!(common_entries, model_entries);
    }
}

proptest! {
    #[test]
    fn prop_intersect_self_identity(entries in arbitrary_entries()) {
        let map = build_map(&entries);
        prop_assert!(map.intersect(&map).unwrap().ptr_eq(&map));
    }
}

proptest! {
    #[test]
    fn prop_intersect_empty_annihilates(entries in arbitrary_entries()) {
        let map = build_map(&entries);
        let empty = PersistentIntMap::new();

        prop_assert!(map.intersect(&empty).unwrap().is_empty());
        prop_assert!(empty.intersect(&map).unwrap().is_empty());
    }
}

// =============================================================================
// Transient Laws: agreement with persistent construction, seal isolation
// =============================================================================

proptest! {
    #[test]
    fn prop_transient_build_matches_persistent(entries in arbitrary_entries()) {
        let persistent_built = build_map(&entries);

        let mut transient = TransientIntMap::new();
        for &(key, value) in &entries {
            transient
                .insert_with(key, value, |_, replacement| *replacement)
                .unwrap();
        }
        let transient_built = transient.persistent().unwrap();

        prop_assert_eq!(persistent_built, transient_built);
    }
}

proptest! {
    #[test]
    fn prop_seal_isolates_snapshot(
        entries in arbitrary_entries(),
        extra in arbitrary_entries()
    ) {
        let mut transient = TransientIntMap::new();
        for &(key, value) in &entries {
            transient
                .insert_with(key, value, |_, replacement| *replacement)
                .unwrap();
        }
        let sealed = transient.persistent().unwrap();
        let snapshot: Vec<(usize, i32)> =
            sealed.iter().map(|(key, value)| (key, *value)).collect();

        for &(key, value) in &extra {
            transient
                .insert_with(key, value.wrapping_add(1), |_, replacement| *replacement)
                .unwrap();
        }

        let after: Vec<(usize, i32)> = sealed.iter().map(|(key, value)| (key, *value)).collect();
        prop_assert_eq!(snapshot, after);
    }
}

// =============================================================================
// Insert Identity Law: re-inserting an equal value is a no-op by identity
// =============================================================================

proptest! {
    #[test]
    fn prop_reinsert_equal_value_is_identity(entries in arbitrary_entries()) {
        let map = build_map(&entries);

        for (key, value) in map.iter() {
            let same = map.insert(key, *value).unwrap();
            prop_assert!(same.ptr_eq(&map));
        }
    }
}
