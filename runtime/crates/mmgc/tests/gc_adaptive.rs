//! Adaptive unmanaged limit, overallocation heuristic and statistics

mod common;

use common::*;
use mmgc::heap::{AVAILABLE_SLOTS, NUM_BINS};
use mmgc::{GcEvent, MmConfig};

fn limit_events(mm: &mmgc::MemoryManager) -> Vec<(usize, usize)> {
    mm.logger()
        .events()
        .into_iter()
        .filter_map(|(_, e)| match e {
            GcEvent::LimitAdjusted {
                old_limit,
                new_limit,
                ..
            } => Some((old_limit, new_limit)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_unmanaged_limit_grows_then_shrinks() {
    let mut mm = manager();
    assert_eq!(mm.unmanaged_heap_size_gc_limit(), 131_072);

    let s1 = mm.alloc_with_string_data(&STRING, 1_000_000);
    mm.write_u64(s1, 0, 1_000_000).unwrap();
    assert_eq!(mm.cycle_count(), 1);
    assert_eq!(mm.unmanaged_heap_size_gc_limit(), 2_000_000);

    let s2 = mm.alloc_with_string_data(&STRING, 900_000);
    mm.write_u64(s2, 0, 900_000).unwrap();
    assert_eq!(mm.cycle_count(), 1);

    // Unmanaged memory not owned by any object keeps the usage above 25%
    // until both strings die
    mm.change_unmanaged_heap_size_usage(200_000);
    mm.alloc_managed(&LEAF);
    assert_eq!(mm.cycle_count(), 2);
    assert_eq!(mm.unmanaged_heap_size(), 200_000);
    assert_eq!(mm.unmanaged_heap_size_gc_limit(), 1_000_000);

    assert_eq!(
        limit_events(&mm),
        vec![(131_072, 2_000_000), (2_000_000, 1_000_000)]
    );
}

#[test]
fn test_unmanaged_limit_never_below_minimum() {
    let mut mm = manager();
    let s = mm.alloc_with_string_data(&STRING, 0);
    mm.write_u64(s, 0, 140_000).unwrap();
    mm.change_unmanaged_heap_size_usage(140_000);
    assert_eq!(mm.cycle_count(), 0);

    // Usage drops to zero, halving would go below the minimum
    mm.alloc_managed(&LEAF);
    assert_eq!(mm.cycle_count(), 1);
    assert_eq!(mm.unmanaged_heap_size(), 0);
    assert_eq!(mm.unmanaged_heap_size_gc_limit(), 131_072);
    assert!(limit_events(&mm).is_empty());
}

#[test]
fn test_allocation_failure_collects_when_overallocated() {
    let (mut mm, counters) = counted_manager(MmConfig {
        min_slots_gc_limit: AVAILABLE_SLOTS,
        ..test_config()
    });

    // Two full chunks of garbage, the third chunk request collects first
    for _ in 0..2 * AVAILABLE_SLOTS {
        mm.alloc_managed(&LEAF);
    }
    assert_eq!(mm.cycle_count(), 0);
    assert!(mm.should_run_gc());

    mm.alloc_managed(&LEAF);
    assert_eq!(mm.cycle_count(), 1);
    assert_eq!(mm.heap().object_count(), 1);
    assert_eq!(counters.live(), 1);
}

#[test]
fn test_event_loop_drives_incremental_cycle() {
    let mut mm = manager();
    mm.set_gc_blocked(true);
    for _ in 0..3 * AVAILABLE_SLOTS {
        mm.alloc_managed(&LEAF);
    }
    mm.set_gc_blocked(false);

    // Default min_slots_gc_limit is 16 chunks
    mm.on_event_loop();
    assert!(!mm.is_collecting());
    assert!(!mm.should_run_gc());

    let mut mm = mmgc::MemoryManager::new(MmConfig {
        min_slots_gc_limit: AVAILABLE_SLOTS,
        ..test_config()
    })
    .unwrap();
    mm.set_gc_blocked(true);
    for _ in 0..3 * AVAILABLE_SLOTS {
        mm.alloc_managed(&LEAF);
    }
    mm.set_gc_blocked(false);
    assert!(mm.should_run_gc());

    mm.on_event_loop();
    assert!(mm.is_collecting());

    let mut iterations = 1;
    while mm.is_collecting() {
        mm.on_event_loop();
        iterations += 1;
    }
    assert!(iterations >= 2);
    assert_eq!(mm.cycle_count(), 1);
    assert_eq!(mm.heap().object_count(), 0);
    assert!(!mm.should_run_gc());
}

#[test]
fn test_aggressive_gc_collects_before_every_allocation() {
    let mut mm = manager();
    mm.set_aggressive_gc(true);
    let kept = mm.alloc_managed(&LEAF);
    mm.new_persistent(Some(kept));
    for _ in 0..4 {
        mm.alloc_managed(&LEAF);
    }
    assert_eq!(mm.cycle_count(), 5);
    // Only the most recent unrooted leaf is still around
    assert_eq!(mm.heap().object_count(), 2);

    mm.set_aggressive_gc(false);
    mm.alloc_managed(&LEAF);
    assert_eq!(mm.cycle_count(), 5);
}

#[test]
fn test_allocation_statistics_per_bin() {
    let mut mm = manager();
    mm.set_gc_stats(true);
    mm.alloc_managed_sized(&LEAF, 32);
    mm.alloc_managed_sized(&LEAF, 64);
    mm.alloc_managed_sized(&LEAF, 64);
    mm.alloc_managed_sized(&LEAF, 300);
    mm.alloc_ic(&LEAF);
    mm.alloc_managed_sized(&LEAF, 200_000);

    let stats = mm.statistics();
    assert_eq!(stats.allocations_per_bin[1], 1);
    assert_eq!(stats.allocations_per_bin[2], 2);
    assert_eq!(stats.allocations_per_bin[NUM_BINS - 1], 1);
    assert_eq!(stats.ic_allocations_per_bin[1], 1);
    assert_eq!(stats.huge_allocations, 1);
    assert!(stats.max_used_mem >= 200_000);

    mm.run_gc();
    let after = mm.statistics();
    assert_eq!(after.used_mem, 0);
    assert_eq!(after.max_used_mem, stats.max_used_mem);
    assert_eq!(after.freed_objects, 6);

    let json: serde_json::Value = serde_json::from_str(&after.to_json()).unwrap();
    assert_eq!(json["huge_allocations"], 1);
}

#[test]
fn test_diagnostics_and_dump() {
    let mut mm = manager();
    let r = mm.alloc_managed(&LEAF);
    mm.new_persistent(Some(r));
    mm.dump_stats();

    let diagnostics = mm.diagnostics();
    assert_eq!(diagnostics["object_count"], "1");
    assert_eq!(diagnostics["persistent_values"], "1");
    assert_eq!(diagnostics["object_chunks"], "1");
    assert!(mm
        .logger()
        .events()
        .iter()
        .any(|(_, e)| matches!(e, GcEvent::HeapStats { used_bytes: 32, .. })));
}
