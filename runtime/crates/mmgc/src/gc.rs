//! GC Core Module - Incremental Collection State Machine
//!
//! A collection cycle is an explicit sequence of states, each with an
//! execution function returning the next state:
//!
//! ```text
//! MarkStart → MarkGlobalObject → MarkJSStack* → InitMarkPersistentValues
//!   → MarkPersistentValues ⟲ → InitMarkWeakValues → MarkWeakValues ⟲
//!   → MarkDrain ⟲ → MarkReady → Sweep → Invalid (idle)
//!
//! * break_after: the step returns right after this state
//! ⟲ may return itself when the deadline expires
//! ```
//!
//! `step()` executes states until a `break_after` state completes, the
//! deadline expires, or the cycle ends. At least one state function runs
//! per call, so a zero budget still makes progress. Per-state iterator data
//! ([`ExtraData`]) carries resumable page cursors across steps.
//!
//! Between steps the mutator runs. Objects allocated meanwhile are black
//! (allocation barrier) and references stored through the manager are
//! pushed onto the mark stack (insertion barrier). Sweep re-scans the
//! execution stack and drains the mark stack completely before freeing.

use crate::heap::HeapRef;
use crate::logging::GcEvent;
use crate::marker::{self, DrainState, MarkStack, PersistentCursor};
use crate::memory::MemoryManager;
use crate::object::push_children;
use crate::stats::GcTimer;
use log::{debug, error, info};
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Collector state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GcState {
    MarkStart,
    MarkGlobalObject,
    MarkJSStack,
    InitMarkPersistentValues,
    MarkPersistentValues,
    InitMarkWeakValues,
    MarkWeakValues,
    MarkDrain,
    MarkReady,
    Sweep,
    /// Idle, no collection in progress
    Invalid,
}

impl GcState {
    /// Whether a cycle is in progress
    #[inline]
    pub fn in_progress(self) -> bool {
        self != GcState::Invalid
    }
}

/// Wall-clock limit for one step
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// No limit
    pub fn none() -> Self {
        Self { at: None }
    }

    /// Expire `limit` from now; `None` means no limit
    pub fn after(limit: Option<Duration>) -> Self {
        Self {
            at: limit.map(|limit| Instant::now() + limit),
        }
    }

    #[inline]
    pub fn expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Per-state iterator data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum ExtraData {
    #[default]
    None,
    Cursor(PersistentCursor),
}

type StateFn = fn(&mut MemoryManager, &mut ExtraData) -> GcState;

struct GcStateInfo {
    execute: StateFn,
    break_after: bool,
}

static STATE_TABLE: [GcStateInfo; 10] = [
    GcStateInfo { execute: mark_start, break_after: false },
    GcStateInfo { execute: mark_global_object, break_after: false },
    GcStateInfo { execute: mark_js_stack, break_after: true },
    GcStateInfo { execute: init_mark_persistent_values, break_after: false },
    GcStateInfo { execute: mark_persistent_values, break_after: false },
    GcStateInfo { execute: init_mark_weak_values, break_after: false },
    GcStateInfo { execute: mark_weak_values, break_after: false },
    GcStateInfo { execute: mark_drain, break_after: false },
    GcStateInfo { execute: mark_ready, break_after: false },
    GcStateInfo { execute: sweep, break_after: false },
];

/// State machine bookkeeping owned by a memory manager
#[derive(Debug)]
pub(crate) struct GcStateMachine {
    pub(crate) state: GcState,
    pub(crate) time_limit: Option<Duration>,
    pub(crate) deadline: Deadline,
    pub(crate) state_data: ExtraData,
    pub(crate) cycle: u64,
    pub(crate) cycle_timer: GcTimer,
    /// State functions executed since creation
    pub(crate) executed: u64,
}

impl GcStateMachine {
    pub(crate) fn new(time_limit: Option<Duration>) -> Self {
        Self {
            state: GcState::Invalid,
            time_limit,
            deadline: Deadline::none(),
            state_data: ExtraData::None,
            cycle: 0,
            cycle_timer: GcTimer::new(),
            executed: 0,
        }
    }
}

fn mark_start(mm: &mut MemoryManager, _: &mut ExtraData) -> GcState {
    mm.mark_stack.clear();
    GcState::MarkGlobalObject
}

fn mark_global_object(mm: &mut MemoryManager, _: &mut ExtraData) -> GcState {
    mm.mark_stack.push_opt(mm.global_object);
    mm.drain_mark_stack();
    GcState::MarkJSStack
}

fn mark_js_stack(mm: &mut MemoryManager, _: &mut ExtraData) -> GcState {
    for r in mm.exec_stack.refs() {
        mm.mark_stack.push(r);
    }
    GcState::InitMarkPersistentValues
}

fn init_mark_persistent_values(_: &mut MemoryManager, data: &mut ExtraData) -> GcState {
    *data = ExtraData::Cursor(PersistentCursor::default());
    GcState::MarkPersistentValues
}

fn mark_persistent_values(mm: &mut MemoryManager, data: &mut ExtraData) -> GcState {
    let ExtraData::Cursor(cursor) = data else {
        return GcState::InitMarkPersistentValues;
    };

    let batch = mm.config.mark_batch_size;
    loop {
        let stack = &mut mm.mark_stack;
        let done = mm.persistent_values.visit_batch(cursor, batch, |r| stack.push(r));
        if mm.drain_mark_stack() == DrainState::Incomplete {
            return GcState::MarkPersistentValues;
        }
        if done {
            return GcState::InitMarkWeakValues;
        }
        if mm.gc.deadline.expired() {
            return GcState::MarkPersistentValues;
        }
    }
}

fn init_mark_weak_values(_: &mut MemoryManager, data: &mut ExtraData) -> GcState {
    *data = ExtraData::Cursor(PersistentCursor::default());
    GcState::MarkWeakValues
}

fn mark_weak_values(mm: &mut MemoryManager, data: &mut ExtraData) -> GcState {
    let ExtraData::Cursor(cursor) = data else {
        return GcState::InitMarkWeakValues;
    };

    let batch = mm.config.mark_batch_size;
    loop {
        let heap = &mm.heap;
        let stack = &mut mm.mark_stack;
        let done = mm.weak_values.visit_batch(cursor, batch, |r| {
            if wants_keep_alive(heap, r) {
                stack.push(r);
            }
        });
        if mm.drain_mark_stack() == DrainState::Incomplete {
            return GcState::MarkWeakValues;
        }
        if done {
            return GcState::MarkDrain;
        }
        if mm.gc.deadline.expired() {
            return GcState::MarkWeakValues;
        }
    }
}

fn wants_keep_alive(heap: &crate::heap::Heap, r: HeapRef) -> bool {
    match (heap.vtable(r), heap.object(r)) {
        (Some(vtable), Some(obj)) => vtable.keep_alive.is_some_and(|keep_alive| keep_alive(&obj)),
        _ => false,
    }
}

fn mark_drain(mm: &mut MemoryManager, _: &mut ExtraData) -> GcState {
    match mm.drain_mark_stack() {
        DrainState::Complete => GcState::MarkReady,
        DrainState::Incomplete => GcState::MarkDrain,
    }
}

fn mark_ready(mm: &mut MemoryManager, _: &mut ExtraData) -> GcState {
    if mm.config.gc_collector_stats {
        mm.collector_stats.marked_objects = mm.heap.marked_count();
    }
    GcState::Sweep
}

fn sweep(mm: &mut MemoryManager, _: &mut ExtraData) -> GcState {
    // The stack is not barriered, scan it again before anything is freed
    for r in mm.exec_stack.refs() {
        mm.mark_stack.push(r);
    }
    mm.mark_stack.push_opt(mm.global_object);
    mm.drain_mark_stack_fully();

    if mm.config.cross_validate_incremental_gc {
        mm.cross_validate();
    }

    mm.sweep_heap();
    GcState::Invalid
}

impl MemoryManager {
    /// Reset the state machine to the first state of a new cycle
    pub(crate) fn start_cycle(&mut self, reason: &str) {
        self.gc.state = GcState::MarkStart;
        self.gc.state_data = ExtraData::None;
        self.gc.cycle += 1;
        self.gc.cycle_timer = GcTimer::new();

        let used = self.heap.used_bytes();
        if self.config.gc_collector_stats {
            self.collector_stats.reset(used);
        }
        self.logger.log(GcEvent::CycleStart {
            cycle: self.gc.cycle,
            reason: reason.to_string(),
            used_bytes: used,
        });
    }

    /// Execute states until a break point, the deadline, or the end of the cycle
    pub(crate) fn transition(&mut self) {
        loop {
            let state = self.gc.state;
            if !state.in_progress() {
                return;
            }

            let info = &STATE_TABLE[state as usize];
            let mut data = std::mem::take(&mut self.gc.state_data);
            let next = (info.execute)(self, &mut data);
            self.gc.state_data = data;
            self.gc.state = next;
            self.gc.executed += 1;

            if next != state {
                self.logger.log(GcEvent::StateEntered {
                    cycle: self.gc.cycle,
                    state: next,
                });
            }

            if info.break_after || !next.in_progress() || self.gc.deadline.expired() {
                return;
            }
        }
    }

    /// Drain the mark stack within the current deadline
    pub(crate) fn drain_mark_stack(&mut self) -> DrainState {
        marker::drain(
            &mut self.heap,
            &self.weak_containers,
            &mut self.mark_stack,
            &self.gc.deadline,
            self.config.mark_batch_size,
        )
    }

    /// Drain the mark stack ignoring the deadline
    pub(crate) fn drain_mark_stack_fully(&mut self) {
        marker::drain(
            &mut self.heap,
            &self.weak_containers,
            &mut self.mark_stack,
            &Deadline::none(),
            self.config.mark_batch_size,
        );
    }

    /// Recompute reachability from the roots and compare with mark bits
    ///
    /// # Panics
    ///
    /// Panics if a reachable object is not marked.
    pub(crate) fn cross_validate(&mut self) {
        let mut stack = MarkStack::new();
        stack.push_opt(self.global_object);
        for r in self.exec_stack.refs() {
            stack.push(r);
        }
        for r in self.persistent_values.refs() {
            stack.push(r);
        }
        for r in self.weak_values.refs() {
            if wants_keep_alive(&self.heap, r) {
                stack.push(r);
            }
        }

        let mut reachable: FxHashSet<HeapRef> = FxHashSet::default();
        while let Some(r) = stack.pop() {
            if !self.heap.contains(r) || !reachable.insert(r) {
                continue;
            }
            if let (Some(vtable), Some(obj)) = (self.heap.vtable(r), self.heap.object(r)) {
                push_children(vtable, &obj, &mut stack);
            }
            self.weak_containers.push_values(r, &mut stack);
        }

        let mut missing: Vec<HeapRef> = reachable
            .iter()
            .copied()
            .filter(|&r| !self.heap.is_marked(r))
            .collect();
        missing.sort();

        self.logger.log(GcEvent::CrossValidation {
            checked: reachable.len(),
            missing: missing.len(),
        });

        if !missing.is_empty() {
            for r in &missing {
                let class = self.heap.vtable(*r).map_or("?", |vt| vt.class_name);
                error!(target: "mmgc::gc", "reachable object {} ({}) was not marked", r, class);
            }
            panic!(
                "incremental marking missed {} reachable objects (first: {})",
                missing.len(),
                missing[0]
            );
        }
    }

    /// Free everything left white and finish the cycle
    pub(crate) fn sweep_heap(&mut self) {
        let heap = &self.heap;
        let weak_summary = self.weak_containers.sweep(|r| heap.is_marked(r));
        let cleared_weak = self.weak_values.clear_dead(|r| heap.is_marked(r));

        let count_classes = self.config.gc_collector_stats;
        let collector_stats = &mut self.collector_stats;
        let mut freed_unmanaged = 0usize;
        let used_before = self.heap.used_bytes();
        let summary = self.heap.sweep(self.config.release_empty_chunks, &mut |vtable, obj| {
            if let Some(destroy) = vtable.destroy {
                freed_unmanaged = freed_unmanaged.saturating_add(destroy(obj));
            }
            if count_classes {
                collector_stats.record_destroyed(vtable.class_name);
            }
        });

        self.unmanaged_heap_size = self.unmanaged_heap_size.saturating_sub(freed_unmanaged);
        self.used_slots_after_last_full_sweep = self.heap.used_slots();

        let used_after = self.heap.used_bytes();
        let freed_objects = summary.objects.freed_objects
            + summary.internal_classes.freed_objects
            + summary.huge.freed_objects;
        self.statistics.cycles += 1;
        self.statistics.freed_objects += freed_objects as u64;

        for (space, count) in [
            (crate::heap::Space::Objects, summary.objects.released_chunks),
            (crate::heap::Space::InternalClasses, summary.internal_classes.released_chunks),
        ] {
            if count > 0 {
                self.logger.log(GcEvent::ChunksReleased { space, count });
            }
        }

        debug!(
            target: "mmgc::gc",
            "weak containers: {} unlinked, {} entries pruned; {} weak values cleared",
            weak_summary.containers_removed,
            weak_summary.entries_pruned,
            cleared_weak
        );

        if self.config.gc_collector_stats {
            self.collector_stats.used_after = used_after;
            info!(
                target: "mmgc::gc",
                "cycle {}: used before {} bytes, marked {} objects, used after {} bytes",
                self.gc.cycle,
                self.collector_stats.used_before,
                self.collector_stats.marked_objects,
                used_after
            );
            for (class_name, count) in &self.collector_stats.destroyed_per_class {
                info!(target: "mmgc::gc", "  destroyed {:>8} {}", count, class_name);
            }
        }

        self.logger.log(GcEvent::CycleEnd {
            cycle: self.gc.cycle,
            duration_ms: self.gc.cycle_timer.elapsed_ms(),
            freed_objects,
            freed_bytes: used_before.saturating_sub(used_after),
            used_bytes: used_after,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_table_order() {
        assert_eq!(STATE_TABLE.len(), GcState::Invalid as usize);
        assert!(STATE_TABLE[GcState::MarkJSStack as usize].break_after);
        let breaking = STATE_TABLE.iter().filter(|info| info.break_after).count();
        assert_eq!(breaking, 1);
    }

    #[test]
    fn test_deadline() {
        assert!(!Deadline::none().expired());
        assert!(Deadline::after(Some(Duration::ZERO)).expired());
        assert!(!Deadline::after(Some(Duration::from_secs(60))).expired());
        assert!(!Deadline::after(None).expired());
    }

    #[test]
    fn test_in_progress() {
        assert!(GcState::MarkStart.in_progress());
        assert!(GcState::Sweep.in_progress());
        assert!(!GcState::Invalid.in_progress());
    }
}
