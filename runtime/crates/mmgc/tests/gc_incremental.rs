//! Incremental stepping, barriers and resumable root traversal

mod common;

use common::*;
use mmgc::{GcEvent, GcState, MmConfig};
use std::time::Duration;

fn zero_budget_manager(config: MmConfig) -> mmgc::MemoryManager {
    let mut mm = mmgc::MemoryManager::new(config).unwrap();
    mm.set_gc_time_limit(Some(Duration::ZERO));
    mm
}

#[test]
fn test_zero_budget_runs_one_state_per_step() {
    let mut mm = zero_budget_manager(test_config());
    let chain = build_chain(&mut mm, 20);
    let root = mm.new_persistent(chain.first().copied());
    for _ in 0..30 {
        mm.alloc_managed(&LEAF);
    }

    let mut states = Vec::new();
    loop {
        let before = mm.executed_states();
        let state = mm.step();
        assert_eq!(mm.executed_states(), before + 1);
        assert_all_alive(&mm, &chain);
        states.push(state);
        if state == GcState::Invalid {
            break;
        }
    }

    assert_eq!(
        states,
        vec![
            GcState::MarkGlobalObject,
            GcState::MarkJSStack,
            GcState::InitMarkPersistentValues,
            GcState::MarkPersistentValues,
            GcState::InitMarkWeakValues,
            GcState::MarkWeakValues,
            GcState::MarkDrain,
            GcState::MarkReady,
            GcState::Sweep,
            GcState::Invalid,
        ]
    );
    assert_eq!(mm.heap().object_count(), 20);
    mm.free_persistent(root).unwrap();
}

#[test]
fn test_step_breaks_after_stack_scan() {
    let mut mm = manager();
    mm.set_gc_time_limit(Some(Duration::from_secs(60)));
    assert_eq!(mm.step(), GcState::InitMarkPersistentValues);
    assert_eq!(mm.step(), GcState::Invalid);
    assert_eq!(mm.cycle_count(), 1);
}

#[test]
fn test_unlimited_step_completes_cycle() {
    let mut mm = manager();
    mm.set_gc_time_limit(None);
    mm.alloc_managed(&LEAF);
    assert_eq!(mm.step(), GcState::Invalid);
    assert_eq!(mm.heap().object_count(), 0);
}

#[test]
fn test_persistent_pages_resume_across_steps() {
    let mut mm = zero_budget_manager(MmConfig {
        mark_batch_size: 64,
        ..test_config()
    });
    let objects: Vec<_> = (0..2000).map(|_| mm.alloc_managed(&LEAF)).collect();
    for r in &objects {
        mm.new_persistent(Some(*r));
    }

    let mut persistent_steps = 0;
    while mm.gc_state() != GcState::Invalid || persistent_steps == 0 {
        if mm.gc_state() == GcState::MarkPersistentValues {
            persistent_steps += 1;
        }
        mm.step();
    }

    assert!(persistent_steps > 1, "persistent marking never yielded");
    assert_all_alive(&mm, &objects);
    assert_eq!(mm.heap().object_count(), 2000);
}

#[test]
fn test_weak_pages_resume_across_steps() {
    let mut mm = zero_budget_manager(MmConfig {
        mark_batch_size: 64,
        ..test_config()
    });

    // Only reachable through weak slots; every third one opts out of keep-alive
    let mut kept = Vec::new();
    let mut released = Vec::new();
    for i in 0..1500 {
        let r = mm.alloc_managed(&KEEP_ALIVE);
        let pinned = i % 3 != 0;
        if pinned {
            mm.write_u64(r, 0, 1).unwrap();
        }
        let slot = mm.new_weak(Some(r));
        if pinned {
            kept.push((slot, r));
        } else {
            released.push(slot);
        }
    }

    let mut weak_steps = 0;
    loop {
        if mm.gc_state() == GcState::MarkWeakValues {
            weak_steps += 1;
        }
        if mm.step() == GcState::Invalid {
            break;
        }
    }

    assert!(weak_steps > 1, "weak value marking never yielded");
    for (slot, r) in &kept {
        assert!(mm.contains(*r));
        assert_eq!(mm.get_weak(*slot).unwrap(), Some(*r));
    }
    for slot in &released {
        assert_eq!(mm.get_weak(*slot).unwrap(), None);
    }
    assert_eq!(mm.heap().object_count(), kept.len());
}

#[test]
fn test_insertion_barrier_protects_moved_reference() {
    let mut mm = zero_budget_manager(test_config());
    let holder = mm.alloc_managed(&NODE);
    let child = mm.alloc_managed(&LEAF);
    mm.set_global_object(Some(holder));
    let id = mm.new_persistent(Some(child));

    // Global object is black, persistent values not yet visited
    mm.step();
    mm.step();
    assert!(mm.is_marked(holder));
    assert!(!mm.is_marked(child));

    mm.store_ref(holder, 0, Some(child)).unwrap();
    mm.set_persistent(id, None).unwrap();
    finish_incrementally(&mut mm);

    assert!(mm.contains(child));
    assert_eq!(mm.read_ref(holder, 0).unwrap(), Some(child));
}

#[test]
#[should_panic(expected = "incremental marking missed")]
fn test_cross_validation_catches_unbarriered_store() {
    let mut mm = zero_budget_manager(test_config());
    let holder = mm.alloc_managed(&NODE);
    let child = mm.alloc_managed(&LEAF);
    mm.set_global_object(Some(holder));
    let id = mm.new_persistent(Some(child));

    mm.step();
    mm.step();

    // Raw write skips the barrier
    mm.object_mut(holder).unwrap().write_ref(0, Some(child));
    mm.set_persistent(id, None).unwrap();
    finish_incrementally(&mut mm);
}

#[test]
fn test_stack_rescanned_before_sweep() {
    let mut mm = zero_budget_manager(test_config());
    let moved = mm.alloc_managed(&LEAF);
    let id = mm.new_persistent(Some(moved));

    while mm.gc_state() != GcState::InitMarkPersistentValues {
        mm.step();
    }
    mm.stack_mut().push(Some(moved));
    mm.set_persistent(id, None).unwrap();
    finish_incrementally(&mut mm);

    assert!(mm.contains(moved));
    mm.stack_mut().truncate(0);
    mm.run_gc();
    assert!(!mm.contains(moved));
}

#[test]
fn test_objects_allocated_during_cycle_survive_it() {
    let mut mm = zero_budget_manager(test_config());
    let holder = mm.alloc_managed(&NODE);
    mm.set_global_object(Some(holder));
    mm.step();

    let fresh = mm.alloc_managed(&NODE);
    mm.object_mut(holder).unwrap().write_ref(1, Some(fresh));
    let garbage = mm.alloc_managed(&LEAF);
    finish_incrementally(&mut mm);

    assert!(mm.contains(fresh));
    // Floating garbage is reclaimed by the next cycle
    assert!(mm.contains(garbage));
    mm.run_gc();
    assert!(!mm.contains(garbage));
    assert!(mm.contains(fresh));
}

#[test]
fn test_run_gc_finishes_cycle_in_progress() {
    let mut mm = zero_budget_manager(test_config());
    mm.alloc_managed(&LEAF);
    mm.step();
    assert!(mm.is_collecting());

    mm.run_gc();
    assert!(!mm.is_collecting());
    assert_eq!(mm.cycle_count(), 1);

    mm.step();
    mm.run_full_gc();
    assert_eq!(mm.cycle_count(), 3);
}

#[test]
fn test_automatic_triggers_suppressed_while_collecting() {
    let mut mm = zero_budget_manager(MmConfig {
        aggressive_gc: true,
        ..test_config()
    });
    mm.alloc_managed(&LEAF);
    assert_eq!(mm.cycle_count(), 1);

    mm.step();
    for _ in 0..10 {
        mm.alloc_managed(&LEAF);
    }
    assert_eq!(mm.cycle_count(), 1);
    assert!(mm.is_collecting());
}

#[test]
fn test_step_pauses_and_events_recorded() {
    let mut mm = zero_budget_manager(test_config());
    build_chain(&mut mm, 10);
    mm.step();
    let steps = 1 + finish_incrementally(&mut mm);
    mm.run_gc();

    let stats = mm.statistics();
    assert_eq!(stats.step_pauses.count as usize, steps);
    assert_eq!(stats.cycles, 2);

    let events = mm.logger().events();
    let ends: Vec<_> = events
        .iter()
        .filter_map(|(_, e)| match e {
            GcEvent::CycleEnd { freed_objects, .. } => Some(*freed_objects),
            _ => None,
        })
        .collect();
    assert_eq!(ends, vec![10, 0]);
    assert!(events
        .iter()
        .any(|(_, e)| matches!(e, GcEvent::CrossValidation { missing: 0, .. })));
}
