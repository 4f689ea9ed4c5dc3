//! Statistics Module - Memory and Collector Statistics
//!
//! [`MemoryStatistics`] tracks peak memory, allocation counts per free bin
//! and step pauses for the lifetime of a memory manager. [`CollectorStats`]
//! describes the most recent cycle when collector statistics are enabled.

pub mod histogram;
pub mod timer;

pub use histogram::{Histogram, PauseSummary};
pub use timer::GcTimer;

use crate::heap::NUM_BINS;
use indexmap::IndexMap;
use serde::Serialize;

/// Lifetime memory statistics of a memory manager
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryStatistics {
    /// Peak bytes held from the chunk source
    pub max_reserved_mem: usize,
    /// Peak bytes in chunks and huge segments
    pub max_allocated_mem: usize,
    /// Peak bytes covered by live objects
    pub max_used_mem: usize,
    /// Object allocations per free bin (counted only with statistics enabled)
    pub allocations_per_bin: [usize; NUM_BINS],
    /// Internal class allocations per free bin
    pub ic_allocations_per_bin: [usize; NUM_BINS],
    /// Huge item allocations
    pub huge_allocations: usize,
    /// Completed collection cycles
    pub cycles: u64,
    /// Objects destroyed by sweeps
    pub freed_objects: u64,
    /// Current bytes held from the chunk source
    pub reserved_mem: usize,
    /// Current bytes covered by live objects
    pub used_mem: usize,
    /// Current unmanaged bytes
    pub unmanaged_heap_size: usize,
    /// Current unmanaged limit
    pub unmanaged_heap_size_gc_limit: usize,
    /// Incremental step pauses
    pub step_pauses: PauseSummary,
}

impl MemoryStatistics {
    /// Raise the peaks to the current values
    pub fn update_peaks(&mut self, reserved: usize, allocated: usize, used: usize) {
        self.max_reserved_mem = self.max_reserved_mem.max(reserved);
        self.max_allocated_mem = self.max_allocated_mem.max(allocated);
        self.max_used_mem = self.max_used_mem.max(used);
    }

    /// Render as pretty JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Statistics of the most recent collection cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectorStats {
    /// Objects destroyed per class name
    pub destroyed_per_class: IndexMap<&'static str, usize>,
    /// Used bytes when the cycle started
    pub used_before: usize,
    /// Marked objects right before sweep
    pub marked_objects: usize,
    /// Used bytes after sweep
    pub used_after: usize,
}

impl CollectorStats {
    pub fn record_destroyed(&mut self, class_name: &'static str) {
        *self.destroyed_per_class.entry(class_name).or_insert(0) += 1;
    }

    pub fn reset(&mut self, used_before: usize) {
        self.destroyed_per_class.clear();
        self.used_before = used_before;
        self.marked_objects = 0;
        self.used_after = 0;
    }
}
