#![cfg(feature = "serde")]
//! Serde round-trip tests for PersistentIntMap.

use intrie::persistent::PersistentIntMap;

#[test]
fn test_serialize_as_json_map() {
    let map: PersistentIntMap<i32> = [(1, 10), (2, 20)].into_iter().collect();
    let serialized = serde_json::to_string(&map).unwrap();
    assert_eq!(serialized, r#"{"1":10,"2":20}"#);
}

#[test]
fn test_round_trip_preserves_entries() {
    let map: PersistentIntMap<String> = (0..100)
        .map(|key| (key * 37, format!("value_{key}")))
        .collect();

    let serialized = serde_json::to_string(&map).unwrap();
    let deserialized: PersistentIntMap<String> = serde_json::from_str(&serialized).unwrap();

    assert_eq!(map, deserialized);
}

#[test]
fn test_deserialize_empty_map() {
    let map: PersistentIntMap<i32> = serde_json::from_str("{}").unwrap();
    assert!(map.is_empty());
}

#[test]
fn test_duplicate_keys_last_wins() {
    let map: PersistentIntMap<i32> = serde_json::from_str(r#"{"7":1,"7":2}"#).unwrap();
    assert_eq!(map.get(7), Some(&2));
    assert_eq!(map.len(), 1);
}
