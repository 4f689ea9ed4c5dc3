//! Weak value slots, weak maps and weak sets

mod common;

use common::*;
use mmgc::{GcState, MmError};
use std::time::Duration;

#[test]
fn test_weak_map_values_behind_dying_keys() {
    let mut mm = manager();
    let map = mm.alloc_managed(&LEAF);
    mm.register_weak_map(map).unwrap();
    mm.new_persistent(Some(map));

    let live_key = mm.alloc_managed(&LEAF);
    let live_value = mm.alloc_managed(&LEAF);
    mm.new_persistent(Some(live_key));
    mm.weak_map_set(map, live_key, Some(live_value)).unwrap();

    let mut dead_values = Vec::new();
    for _ in 0..5 {
        let key = mm.alloc_managed(&LEAF);
        let value = mm.alloc_managed(&NODE);
        mm.weak_map_set(map, key, Some(value)).unwrap();
        dead_values.push(value);
    }
    assert_eq!(mm.weak_container_len(map).unwrap(), 6);

    mm.run_gc();
    assert!(mm.contains(map));
    assert_eq!(mm.weak_container_len(map).unwrap(), 1);
    assert_eq!(mm.weak_map_get(map, live_key).unwrap(), Some(live_value));

    // Values were held by the map while marking; the next cycle frees them
    mm.run_gc();
    for value in &dead_values {
        assert!(!mm.contains(*value));
    }
    assert!(mm.contains(live_value));
    assert_eq!(mm.heap().object_count(), 3);

    // The map still works after pruning
    let key = mm.alloc_managed(&LEAF);
    mm.new_persistent(Some(key));
    mm.weak_map_set(map, key, None).unwrap();
    assert!(mm.weak_map_has(map, key).unwrap());
    assert_eq!(mm.weak_map_get(map, key).unwrap(), None);
    assert!(mm.weak_map_delete(map, key).unwrap());
    assert!(!mm.weak_map_delete(map, key).unwrap());
}

#[test]
fn test_weak_values_cleared_after_collection() {
    let mut mm = manager();
    let kept = mm.alloc_managed(&LEAF);
    let lost = mm.alloc_managed(&LEAF);
    mm.stack_mut().push(Some(kept));
    let kept_slot = mm.new_weak(Some(kept));
    let lost_slot = mm.new_weak(Some(lost));

    mm.run_gc();
    assert_eq!(mm.get_weak(kept_slot).unwrap(), Some(kept));
    assert_eq!(mm.get_weak(lost_slot).unwrap(), None);
    assert!(!mm.contains(lost));

    mm.free_weak(lost_slot).unwrap();
    assert!(matches!(
        mm.get_weak(lost_slot),
        Err(MmError::InvalidPersistent(..))
    ));
}

#[test]
fn test_keep_alive_weak_values_survive() {
    let mut mm = manager();
    let pinned = mm.alloc_managed(&KEEP_ALIVE);
    mm.write_u64(pinned, 0, 1).unwrap();
    let released = mm.alloc_managed(&KEEP_ALIVE);
    let pinned_slot = mm.new_weak(Some(pinned));
    let released_slot = mm.new_weak(Some(released));

    mm.run_gc();
    assert_eq!(mm.get_weak(pinned_slot).unwrap(), Some(pinned));
    assert_eq!(mm.get_weak(released_slot).unwrap(), None);

    mm.write_u64(pinned, 0, 0).unwrap();
    mm.run_gc();
    assert_eq!(mm.get_weak(pinned_slot).unwrap(), None);
    assert_eq!(mm.heap().object_count(), 0);
}

#[test]
fn test_weak_set_pruned_with_keys() {
    let mut mm = manager();
    let set = mm.alloc_managed(&LEAF);
    mm.register_weak_set(set).unwrap();
    mm.set_global_object(Some(set));

    let kept = mm.alloc_managed(&LEAF);
    mm.new_persistent(Some(kept));
    mm.weak_set_add(set, kept).unwrap();
    for _ in 0..10 {
        let key = mm.alloc_managed(&LEAF);
        mm.weak_set_add(set, key).unwrap();
    }
    assert_eq!(mm.weak_container_len(set).unwrap(), 11);

    mm.run_gc();
    assert_eq!(mm.weak_container_len(set).unwrap(), 1);
    assert!(mm.weak_set_has(set, kept).unwrap());
    assert_eq!(mm.heap().object_count(), 2);

    assert!(mm.weak_set_delete(set, kept).unwrap());
    assert!(!mm.weak_set_has(set, kept).unwrap());
}

#[test]
fn test_weak_container_errors() {
    let mut mm = manager();
    let plain = mm.alloc_managed(&LEAF);
    let key = mm.alloc_managed(&LEAF);

    assert!(matches!(
        mm.weak_map_set(plain, key, None),
        Err(MmError::NotAWeakContainer(r)) if r == plain
    ));
    assert!(matches!(
        mm.weak_container_len(plain),
        Err(MmError::NotAWeakContainer(_))
    ));

    mm.register_weak_map(plain).unwrap();
    assert!(matches!(
        mm.register_weak_set(plain),
        Err(MmError::AlreadyRegistered(_))
    ));
    // A map is not a set
    assert!(matches!(
        mm.weak_set_add(plain, key),
        Err(MmError::NotAWeakContainer(_))
    ));

    mm.run_gc();
    assert!(matches!(
        mm.register_weak_map(key),
        Err(MmError::InvalidHandle(r)) if r == key
    ));
}

#[test]
fn test_unreachable_containers_unlinked() {
    let mut mm = manager();
    let map = mm.alloc_managed(&LEAF);
    let set = mm.alloc_managed(&LEAF);
    mm.register_weak_map(map).unwrap();
    mm.register_weak_set(set).unwrap();
    mm.new_persistent(Some(set));
    assert_eq!(mm.diagnostics()["weak_containers"], "2");

    mm.run_gc();
    assert!(!mm.contains(map));
    assert_eq!(mm.diagnostics()["weak_containers"], "1");
    assert!(matches!(
        mm.weak_container_len(map),
        Err(MmError::NotAWeakContainer(_))
    ));
    assert_eq!(mm.weak_container_len(set).unwrap(), 0);
}

#[test]
fn test_weak_map_store_during_cycle_is_barriered() {
    let mut mm = manager();
    mm.set_gc_time_limit(Some(Duration::ZERO));
    let map = mm.alloc_managed(&LEAF);
    mm.register_weak_map(map).unwrap();
    mm.set_global_object(Some(map));
    let key = mm.alloc_managed(&LEAF);
    mm.new_persistent(Some(key));
    let value = mm.alloc_managed(&LEAF);
    let holder = mm.new_persistent(Some(value));

    // The map is already black when the value moves into it
    mm.step();
    mm.step();
    assert_eq!(mm.gc_state(), GcState::MarkJSStack);
    assert!(mm.is_marked(map));

    mm.weak_map_set(map, key, Some(value)).unwrap();
    mm.set_persistent(holder, None).unwrap();
    finish_incrementally(&mut mm);

    assert!(mm.contains(value));
    assert_eq!(mm.weak_map_get(map, key).unwrap(), Some(value));
}
