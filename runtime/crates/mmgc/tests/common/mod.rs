//! Shared fixtures for the mmgc integration tests
//!
//! Test vtables, graph builders, a chunk source that counts segments, and
//! assertion helpers that compare the heap against a reachability model.

#![allow(dead_code)]

use mmgc::{
    ChunkSource, HeapRef, MemoryManager, MemorySegment, MmConfig, MmapChunkSource, ObjectMut,
    ObjectRef, PersistentId, Result, VTable,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Reference fields of a [`NODE`]
pub const NODE_FIELDS: usize = 4;

/// Object without references
pub static LEAF: VTable = VTable::new("Leaf", 32);

/// Object whose four words are all references
pub static NODE: VTable = VTable {
    inline_values: NODE_FIELDS,
    ..VTable::new("Node", 32)
};

/// Object with member data: word 0 is the member data reference
pub static WITH_MEMBERS: VTable = VTable {
    inline_values: 1,
    ..VTable::new("WithMembers", 16)
};

fn release_string_data(obj: &mut ObjectMut<'_>) -> usize {
    obj.read_u64(0) as usize
}

/// Word 0 records the unmanaged bytes released on destruction
pub static STRING: VTable = VTable {
    destroy: Some(release_string_data),
    ..VTable::new("String", 16)
};

fn keep_if_flagged(obj: &ObjectRef<'_>) -> bool {
    obj.read_u64(0) != 0
}

/// Weakly held objects survive while word 0 is non-zero
pub static KEEP_ALIVE: VTable = VTable {
    keep_alive: Some(keep_if_flagged),
    ..VTable::new("KeepAlive", 32)
};

/// Segment counters shared with a [`CountingSource`]
#[derive(Debug, Default)]
pub struct SegmentCounters {
    pub allocated: AtomicUsize,
    pub freed: AtomicUsize,
}

impl SegmentCounters {
    pub fn live(&self) -> usize {
        self.allocated.load(Ordering::Relaxed) - self.freed.load(Ordering::Relaxed)
    }
}

/// Chunk source that counts segments handed out and returned
pub struct CountingSource {
    inner: MmapChunkSource,
    counters: Arc<SegmentCounters>,
}

impl CountingSource {
    pub fn new() -> (Self, Arc<SegmentCounters>) {
        let counters = Arc::new(SegmentCounters::default());
        let source = Self {
            inner: MmapChunkSource::new(),
            counters: counters.clone(),
        };
        (source, counters)
    }
}

impl ChunkSource for CountingSource {
    fn allocate(&mut self, size: usize) -> Result<MemorySegment> {
        let segment = self.inner.allocate(size)?;
        self.counters.allocated.fetch_add(1, Ordering::Relaxed);
        Ok(segment)
    }

    fn free(&mut self, segment: MemorySegment) {
        self.counters.freed.fetch_add(1, Ordering::Relaxed);
        self.inner.free(segment);
    }

    fn reserved_bytes(&self) -> usize {
        self.inner.reserved_bytes()
    }
}

/// Configuration used by most tests
pub fn test_config() -> MmConfig {
    MmConfig {
        cross_validate_incremental_gc: true,
        gc_collector_stats: true,
        ..Default::default()
    }
}

pub fn manager() -> MemoryManager {
    MemoryManager::new(test_config()).expect("valid test config")
}

/// Manager with a counting chunk source
pub fn counted_manager(config: MmConfig) -> (MemoryManager, Arc<SegmentCounters>) {
    let (source, counters) = CountingSource::new();
    let mm = MemoryManager::with_chunk_source(config, Box::new(source)).expect("valid config");
    (mm, counters)
}

/// Allocate `len` nodes linked through field 0, returning them head first
pub fn build_chain(mm: &mut MemoryManager, len: usize) -> Vec<HeapRef> {
    let nodes: Vec<HeapRef> = (0..len).map(|_| mm.alloc_managed(&NODE)).collect();
    for pair in nodes.windows(2) {
        mm.store_ref(pair[0], 0, Some(pair[1])).expect("live node");
    }
    nodes
}

/// Allocate a complete binary tree of `depth` levels using fields 0 and 1
pub fn build_tree(mm: &mut MemoryManager, depth: u32) -> HeapRef {
    let root = mm.alloc_managed(&NODE);
    if depth > 1 {
        // Keep the partially built tree reachable while children allocate
        let mark = mm.stack_mut().push(Some(root));
        let left = build_tree(mm, depth - 1);
        mm.store_ref(root, 0, Some(left)).expect("live node");
        let right = build_tree(mm, depth - 1);
        mm.store_ref(root, 1, Some(right)).expect("live node");
        mm.stack_mut().truncate(mark);
    }
    root
}

/// Finish any cycle in progress with zero-budget steps
pub fn finish_incrementally(mm: &mut MemoryManager) -> usize {
    let mut steps = 0;
    while mm.is_collecting() {
        mm.step();
        steps += 1;
    }
    steps
}

/// Panic if any of `refs` was freed
pub fn assert_all_alive(mm: &MemoryManager, refs: &[HeapRef]) {
    for r in refs {
        assert!(mm.contains(*r), "{} was freed while reachable", r);
    }
}

/// Reachability model of a graph of [`NODE`] objects
#[derive(Debug, Default)]
pub struct GraphModel {
    pub edges: HashMap<HeapRef, [Option<HeapRef>; NODE_FIELDS]>,
    pub roots: HashMap<PersistentId, HeapRef>,
}

impl GraphModel {
    pub fn add_node(&mut self, r: HeapRef) {
        self.edges.insert(r, [None; NODE_FIELDS]);
    }

    pub fn set_edge(&mut self, from: HeapRef, field: usize, to: Option<HeapRef>) {
        if let Some(fields) = self.edges.get_mut(&from) {
            fields[field] = to;
        }
    }

    /// Objects reachable from the roots and `extra`
    pub fn reachable(&self, extra: &[HeapRef]) -> HashSet<HeapRef> {
        let mut seen = HashSet::new();
        let mut work: Vec<HeapRef> = self.roots.values().copied().chain(extra.iter().copied()).collect();
        while let Some(r) = work.pop() {
            if !seen.insert(r) {
                continue;
            }
            if let Some(fields) = self.edges.get(&r) {
                work.extend(fields.iter().flatten().copied());
            }
        }
        seen
    }

    /// Forget objects no longer reachable
    pub fn prune(&mut self, extra: &[HeapRef]) {
        let live = self.reachable(extra);
        self.edges.retain(|r, _| live.contains(r));
    }
}

/// Check the heap against the model after a complete full collection
pub fn assert_matches_model(mm: &MemoryManager, model: &GraphModel, extra: &[HeapRef]) {
    let live = model.reachable(extra);
    for r in &live {
        assert!(mm.contains(*r), "reachable {} was freed", r);
    }
    assert_eq!(
        mm.heap().object_count(),
        live.len(),
        "unreachable objects survived a full collection"
    );
}
