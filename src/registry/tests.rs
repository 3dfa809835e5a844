//! Tests for registry set-diffing.

use super::*;

fn listing(entries: &[(&str, u64)]) -> Listing {
    entries
        .iter()
        .map(|(name, ino)| (name.to_string(), EntryId::new(1, *ino)))
        .collect()
}

#[test]
fn test_diff_resources_adds_new_entries() {
    let mut registry = Registry::new();

    let diff = registry.diff_resources(&listing(&[("r1", 10), ("r2", 11)]));

    assert_eq!(diff.added, vec!["r1".to_string(), "r2".to_string()]);
    assert!(diff.removed.is_empty());
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.resource("r1").unwrap().id(), EntryId::new(1, 10));
}

#[test]
fn test_diff_resources_unchanged_listing_is_empty() {
    let mut registry = Registry::new();
    registry.diff_resources(&listing(&[("r1", 10)]));

    let diff = registry.diff_resources(&listing(&[("r1", 10)]));

    assert!(diff.is_empty());
    assert!(registry.contains("r1"));
}

#[test]
fn test_diff_resources_removes_vanished_entries() {
    let mut registry = Registry::new();
    registry.diff_resources(&listing(&[("r1", 10), ("r2", 11)]));

    let diff = registry.diff_resources(&listing(&[("r2", 11)]));

    assert!(diff.added.is_empty());
    assert_eq!(diff.removed, vec!["r1".to_string()]);
    assert!(!registry.contains("r1"));
    assert!(registry.contains("r2"));
}

#[test]
fn test_diff_resources_replaced_entry_is_remove_then_add() {
    let mut registry = Registry::new();
    registry.diff_resources(&listing(&[("r1", 10)]));

    let diff = registry.diff_resources(&listing(&[("r1", 99)]));

    assert_eq!(diff.removed, vec!["r1".to_string()]);
    assert_eq!(diff.added, vec!["r1".to_string()]);
    assert_eq!(registry.resource("r1").unwrap().id(), EntryId::new(1, 99));
}

#[test]
fn test_removing_resource_drops_its_consumers() {
    let mut registry = Registry::new();
    registry.diff_resources(&listing(&[("r1", 10)]));
    registry
        .diff_consumers("r1", &listing(&[("c1", 20), ("c2", 21)]))
        .unwrap();

    registry.diff_resources(&listing(&[]));
    registry.diff_resources(&listing(&[("r1", 10)]));

    let resource = registry.resource("r1").unwrap();
    assert_eq!(resource.consumer_names().count(), 0);
}

#[test]
fn test_diff_consumers_adds_and_removes() {
    let mut registry = Registry::new();
    registry.diff_resources(&listing(&[("r1", 10)]));
    registry
        .diff_consumers("r1", &listing(&[("c1", 20), ("c2", 21)]))
        .unwrap();

    let diff = registry
        .diff_consumers("r1", &listing(&[("c2", 21), ("c3", 22)]))
        .unwrap();

    assert_eq!(diff.added, vec!["c3".to_string()]);
    assert_eq!(diff.removed, vec!["c1".to_string()]);
    let names: Vec<_> = registry.resource("r1").unwrap().consumer_names().collect();
    assert_eq!(names, vec!["c2", "c3"]);
}

#[test]
fn test_diff_consumers_replaced_entry_is_remove_then_add() {
    let mut registry = Registry::new();
    registry.diff_resources(&listing(&[("r1", 10)]));
    registry
        .diff_consumers("r1", &listing(&[("c1", 20)]))
        .unwrap();

    let diff = registry
        .diff_consumers("r1", &listing(&[("c1", 30)]))
        .unwrap();

    assert_eq!(diff.removed, vec!["c1".to_string()]);
    assert_eq!(diff.added, vec!["c1".to_string()]);
    assert_eq!(
        registry.resource("r1").unwrap().consumer("c1"),
        Some(EntryId::new(1, 30))
    );
}

#[test]
fn test_diff_consumers_unknown_resource() {
    let mut registry = Registry::new();

    let err = registry
        .diff_consumers("missing", &listing(&[("c1", 20)]))
        .unwrap_err();

    assert!(matches!(err, RegistryError::UnknownResource(name) if name == "missing"));
}

#[test]
fn test_same_inode_on_other_device_is_different_entry() {
    let mut registry = Registry::new();
    registry.diff_resources(&listing(&[("r1", 10)]));

    let mut moved = Listing::new();
    moved.insert("r1".to_string(), EntryId::new(2, 10));
    let diff = registry.diff_resources(&moved);

    assert_eq!(diff.removed, vec!["r1".to_string()]);
    assert_eq!(diff.added, vec!["r1".to_string()]);
}
