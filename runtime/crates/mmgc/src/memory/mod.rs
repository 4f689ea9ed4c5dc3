//! Memory Manager - Allocation, Roots and Collection Entry Points
//!
//! [`MemoryManager`] owns everything a script engine instance needs from the
//! collector: the heap, the root sets, the weak container registry, the
//! incremental state machine and the statistics. There are no process-wide
//! singletons; two managers never share state.
//!
//! # Allocation policy
//!
//! ```text
//! allocate(space, size)
//!   ├─ collection in progress or blocked?  → no automatic collection below
//!   ├─ aggressive GC                        → full collection
//!   ├─ unmanaged usage > limit              → collection, then adjust limit
//!   ├─ size > DATA_SIZE                     → huge item allocator
//!   └─ block allocator (no growth)
//!        └─ nothing fits → collection (once, if should_run_gc), retry
//!                          with chunk growth
//! ```
//!
//! Allocation never reports an error to the caller. A chunk source failure
//! is logged and aborts with a panic.

pub mod adaptive;

use crate::config::MmConfig;
use crate::error::{MmError, Result};
use crate::gc::{Deadline, GcState, GcStateMachine};
use crate::heap::{ChunkSource, Heap, HeapRef, MmapChunkSource, Space, DATA_SIZE, NUM_BINS};
use crate::logging::{GcEvent, GcLogger, GcLoggerConfig};
use crate::marker::{ExecutionStack, MarkStack, PersistentId, PersistentValueStorage};
use crate::object::{ObjectMut, ObjectRef, VTable, WeakContainerRegistry, WeakKind, MEMBER_DATA_VTABLE, VALUE_SIZE};
use crate::stats::{CollectorStats, GcTimer, Histogram, MemoryStatistics};
use indexmap::IndexMap;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;

/// Per-engine memory manager
///
/// # Examples
///
/// ```rust
/// use mmgc::{MemoryManager, MmConfig, VTable};
///
/// static CELL: VTable = VTable {
///     inline_values: 1,
///     ..VTable::new("Cell", 16)
/// };
///
/// let mut mm = MemoryManager::new(MmConfig::default()).unwrap();
/// let kept = mm.alloc_managed(&CELL);
/// let _garbage = mm.alloc_managed(&CELL);
/// let root = mm.new_persistent(Some(kept));
///
/// mm.run_gc();
/// assert!(mm.contains(kept));
/// assert_eq!(mm.heap().object_count(), 1);
/// mm.free_persistent(root).unwrap();
/// ```
pub struct MemoryManager {
    pub(crate) config: MmConfig,
    pub(crate) heap: Heap,
    pub(crate) gc: GcStateMachine,
    pub(crate) mark_stack: MarkStack,
    pub(crate) exec_stack: ExecutionStack,
    pub(crate) global_object: Option<HeapRef>,
    pub(crate) persistent_values: PersistentValueStorage,
    pub(crate) weak_values: PersistentValueStorage,
    pub(crate) weak_containers: WeakContainerRegistry,
    pub(crate) unmanaged_heap_size: usize,
    pub(crate) unmanaged_heap_size_gc_limit: usize,
    pub(crate) used_slots_after_last_full_sweep: usize,
    gc_blocked: bool,
    pub(crate) statistics: MemoryStatistics,
    pauses: Histogram,
    pub(crate) collector_stats: CollectorStats,
    pub(crate) logger: Arc<GcLogger>,
}

impl MemoryManager {
    /// Create a memory manager backed by anonymous mappings
    ///
    /// # Errors
    /// Returns `Configuration` if `config` does not validate.
    pub fn new(config: MmConfig) -> Result<Self> {
        Self::with_chunk_source(config, Box::new(MmapChunkSource::new()))
    }

    /// Create a memory manager drawing segments from `source`
    pub fn with_chunk_source(config: MmConfig, source: Box<dyn ChunkSource>) -> Result<Self> {
        config.validate()?;

        let mut heap = Heap::new(source);
        heap.blocks.set_stats_enabled(config.gc_stats);
        heap.ic.set_stats_enabled(config.gc_stats);

        let logger = Arc::new(GcLogger::new(GcLoggerConfig {
            verbose: config.verbose,
            ..Default::default()
        }));

        Ok(Self {
            gc: GcStateMachine::new(config.time_limit()),
            heap,
            mark_stack: MarkStack::new(),
            exec_stack: ExecutionStack::new(),
            global_object: None,
            persistent_values: PersistentValueStorage::new(),
            weak_values: PersistentValueStorage::new(),
            weak_containers: WeakContainerRegistry::new(),
            unmanaged_heap_size: 0,
            unmanaged_heap_size_gc_limit: config.min_unmanaged_heap_size_gc_limit,
            used_slots_after_last_full_sweep: 0,
            gc_blocked: false,
            statistics: MemoryStatistics::default(),
            pauses: Histogram::new(),
            collector_stats: CollectorStats::default(),
            logger,
            config,
        })
    }

    pub fn config(&self) -> &MmConfig {
        &self.config
    }

    /// Logger receiving the collector events of this manager
    pub fn logger(&self) -> &Arc<GcLogger> {
        &self.logger
    }

    pub fn set_logger(&mut self, logger: Arc<GcLogger>) {
        self.logger = logger;
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    /// Allocate a zeroed object of `vtable.size` bytes
    pub fn alloc_managed(&mut self, vtable: &'static VTable) -> HeapRef {
        self.allocate(Space::Objects, vtable.size, vtable)
    }

    /// Allocate a zeroed object of `size` bytes
    pub fn alloc_managed_sized(&mut self, vtable: &'static VTable, size: usize) -> HeapRef {
        self.allocate(Space::Objects, size, vtable)
    }

    /// Allocate internal class metadata
    pub fn alloc_ic(&mut self, vtable: &'static VTable) -> HeapRef {
        self.allocate(Space::InternalClasses, vtable.size, vtable)
    }

    /// Allocate an object owning `unmanaged_size` bytes outside the heap
    ///
    /// The unmanaged bytes are accounted before allocating, so the limit
    /// check of this very allocation sees them. The vtable's `destroy`
    /// should report them back when the object dies.
    pub fn alloc_with_string_data(&mut self, vtable: &'static VTable, unmanaged_size: usize) -> HeapRef {
        self.change_unmanaged_heap_size_usage(unmanaged_size as isize);
        self.alloc_managed(vtable)
    }

    /// Allocate an object together with a member data block of `members` values
    ///
    /// Word 0 of the object holds the member data reference, so `vtable`
    /// must mark it (`inline_values >= 1` or a `mark_objects` callback).
    /// Object and members share one run of slots when they fit into a chunk.
    /// Otherwise the member block is allocated on its own first, from the
    /// block allocator while it fits a chunk and from the huge allocator
    /// beyond that.
    pub fn alloc_object_with_member_data(&mut self, vtable: &'static VTable, members: usize) -> HeapRef {
        debug_assert!(vtable.inline_values >= 1 || vtable.mark_objects.is_some());

        let object_size = crate::heap::align(vtable.size.max(VALUE_SIZE));
        let member_size = members * VALUE_SIZE;
        if members == 0 {
            return self.allocate(Space::Objects, object_size, vtable);
        }

        let combined = object_size + crate::heap::align(member_size);
        let (object, member) = if combined <= DATA_SIZE {
            let object = self.allocate(Space::Objects, combined, vtable);
            let at = crate::heap::slots_for(object_size);
            match self.heap.split_object(object, at, &MEMBER_DATA_VTABLE) {
                Some(member) => (object, member),
                None => self.chunk_source_failed(MmError::InvalidHandle(object)),
            }
        } else {
            let member = self.allocate(Space::Objects, member_size, &MEMBER_DATA_VTABLE);
            let mark = self.exec_stack.push(Some(member));
            let object = self.allocate(Space::Objects, object_size, vtable);
            self.exec_stack.truncate(mark);
            (object, member)
        };

        if self.is_collecting() {
            self.heap.mark(member);
        }
        if let Some(mut obj) = self.heap.object_mut(object) {
            obj.write_ref(0, Some(member));
        }
        object
    }

    /// Member data block of an object from `alloc_object_with_member_data`
    pub fn member_data(&self, object: HeapRef) -> Option<HeapRef> {
        self.heap.object(object)?.read_ref(0)
    }

    fn allocate(&mut self, space: Space, size: usize, vtable: &'static VTable) -> HeapRef {
        let suppressed = self.gc_blocked || self.is_collecting();
        let mut did_gc = false;

        if self.config.aggressive_gc && !suppressed {
            self.collect_now("aggressive");
            did_gc = true;
        }

        if self.unmanaged_heap_size > self.unmanaged_heap_size_gc_limit {
            if !did_gc && !suppressed {
                self.collect_now("unmanaged limit");
                did_gc = true;
            }
            self.adjust_unmanaged_limit();
        }

        let chunks_before = self.chunk_count(space);
        let allocated = if size > DATA_SIZE || space == Space::Huge {
            self.heap.allocate_huge(size, vtable)
        } else {
            match self.heap.allocate_block(space, size, vtable, false) {
                Ok(Some(r)) => Ok(r),
                Ok(None) => {
                    if !did_gc && !suppressed && self.should_run_gc() {
                        self.collect_now("allocation failure");
                    }
                    self.heap
                        .allocate_block(space, size, vtable, true)
                        .and_then(|r| {
                            r.ok_or(MmError::ChunkSourceExhausted {
                                requested: size,
                                reason: "forced allocation found no space".to_string(),
                            })
                        })
                },
                Err(err) => Err(err),
            }
        };

        let r = match allocated {
            Ok(r) => r,
            Err(err) => self.chunk_source_failed(err),
        };

        // Allocated black while marking
        if self.is_collecting() {
            self.heap.mark(r);
        }

        let chunks = self.chunk_count(space);
        if chunks > chunks_before {
            self.logger.log(GcEvent::ChunkGrowth { space, chunks });
        }
        if self.config.gc_stats {
            self.statistics.update_peaks(
                self.heap.reserved_bytes(),
                self.heap.allocated_bytes(),
                self.heap.used_bytes(),
            );
        }
        r
    }

    fn chunk_count(&self, space: Space) -> usize {
        match space {
            Space::Objects => self.heap.blocks.chunk_count(),
            Space::InternalClasses => self.heap.ic.chunk_count(),
            Space::Huge => self.heap.huge.len(),
        }
    }

    fn chunk_source_failed(&self, err: MmError) -> ! {
        error!(
            target: "mmgc::alloc",
            "allocation failed: {} (reserved {} bytes)",
            err,
            self.heap.reserved_bytes()
        );
        panic!("mmgc: out of memory: {}", err);
    }

    fn adjust_unmanaged_limit(&mut self) {
        let old_limit = self.unmanaged_heap_size_gc_limit;
        let usage = self.unmanaged_heap_size;
        let new_limit = adaptive::adjust_unmanaged_limit(
            old_limit,
            usage,
            self.config.min_unmanaged_heap_size_gc_limit,
        );
        if new_limit != old_limit {
            self.unmanaged_heap_size_gc_limit = new_limit;
            self.logger.log(GcEvent::LimitAdjusted {
                old_limit,
                new_limit,
                usage,
            });
        }
    }

    /// Account `delta` bytes of memory held outside the heap
    pub fn change_unmanaged_heap_size_usage(&mut self, delta: isize) {
        self.unmanaged_heap_size = if delta >= 0 {
            self.unmanaged_heap_size.saturating_add(delta as usize)
        } else {
            self.unmanaged_heap_size.saturating_sub(delta.unsigned_abs())
        };
    }

    pub fn unmanaged_heap_size(&self) -> usize {
        self.unmanaged_heap_size
    }

    pub fn unmanaged_heap_size_gc_limit(&self) -> usize {
        self.unmanaged_heap_size_gc_limit
    }

    // ------------------------------------------------------------------
    // Object access
    // ------------------------------------------------------------------

    pub fn contains(&self, r: HeapRef) -> bool {
        self.heap.contains(r)
    }

    pub fn vtable(&self, r: HeapRef) -> Option<&'static VTable> {
        self.heap.vtable(r)
    }

    pub fn object(&self, r: HeapRef) -> Option<ObjectRef<'_>> {
        self.heap.object(r)
    }

    /// Raw mutable view; reference writes through it skip the write barrier
    pub fn object_mut(&mut self, r: HeapRef) -> Option<ObjectMut<'_>> {
        self.heap.object_mut(r)
    }

    pub fn is_marked(&self, r: HeapRef) -> bool {
        self.heap.is_marked(r)
    }

    fn checked_word(&self, r: HeapRef, word: usize) -> Result<()> {
        let obj = self.heap.object(r).ok_or(MmError::InvalidHandle(r))?;
        if word >= obj.word_count() {
            return Err(MmError::OutOfBounds {
                handle: r,
                word,
                words: obj.word_count(),
            });
        }
        Ok(())
    }

    pub fn read_u64(&self, r: HeapRef, word: usize) -> Result<u64> {
        self.checked_word(r, word)?;
        self.heap
            .object(r)
            .map(|obj| obj.read_u64(word))
            .ok_or(MmError::InvalidHandle(r))
    }

    pub fn write_u64(&mut self, r: HeapRef, word: usize, value: u64) -> Result<()> {
        self.checked_word(r, word)?;
        let mut obj = self.heap.object_mut(r).ok_or(MmError::InvalidHandle(r))?;
        obj.write_u64(word, value);
        Ok(())
    }

    pub fn read_ref(&self, r: HeapRef, word: usize) -> Result<Option<HeapRef>> {
        self.read_u64(r, word).map(HeapRef::decode)
    }

    /// Store a reference into object memory through the write barrier
    pub fn store_ref(&mut self, r: HeapRef, word: usize, value: Option<HeapRef>) -> Result<()> {
        self.write_u64(r, word, HeapRef::encode_opt(value))?;
        self.write_barrier(value);
        Ok(())
    }

    #[inline]
    fn write_barrier(&mut self, value: Option<HeapRef>) {
        if self.is_collecting() {
            self.mark_stack.push_opt(value);
        }
    }

    // ------------------------------------------------------------------
    // Roots
    // ------------------------------------------------------------------

    pub fn stack(&self) -> &ExecutionStack {
        &self.exec_stack
    }

    /// The execution stack is scanned again before sweep, so it needs no barrier
    pub fn stack_mut(&mut self) -> &mut ExecutionStack {
        &mut self.exec_stack
    }

    pub fn set_global_object(&mut self, global: Option<HeapRef>) {
        self.global_object = global;
        self.write_barrier(global);
    }

    pub fn global_object(&self) -> Option<HeapRef> {
        self.global_object
    }

    /// Root `value` until the returned slot is freed
    pub fn new_persistent(&mut self, value: Option<HeapRef>) -> PersistentId {
        self.write_barrier(value);
        self.persistent_values.allocate(value)
    }

    pub fn set_persistent(&mut self, id: PersistentId, value: Option<HeapRef>) -> Result<()> {
        self.persistent_values.set(id, value)?;
        self.write_barrier(value);
        Ok(())
    }

    pub fn get_persistent(&self, id: PersistentId) -> Result<Option<HeapRef>> {
        self.persistent_values.get(id)
    }

    pub fn free_persistent(&mut self, id: PersistentId) -> Result<()> {
        self.persistent_values.free(id).map(|_| ())
    }

    /// Track `value` without keeping it alive
    pub fn new_weak(&mut self, value: Option<HeapRef>) -> PersistentId {
        self.weak_values.allocate(value)
    }

    pub fn set_weak(&mut self, id: PersistentId, value: Option<HeapRef>) -> Result<()> {
        self.weak_values.set(id, value)
    }

    /// Referent of a weak slot, `None` once it was collected
    pub fn get_weak(&self, id: PersistentId) -> Result<Option<HeapRef>> {
        self.weak_values.get(id)
    }

    pub fn free_weak(&mut self, id: PersistentId) -> Result<()> {
        self.weak_values.free(id).map(|_| ())
    }

    // ------------------------------------------------------------------
    // Weak containers
    // ------------------------------------------------------------------

    fn register_weak_container(&mut self, container: HeapRef, kind: WeakKind) -> Result<()> {
        if !self.heap.contains(container) {
            return Err(MmError::InvalidHandle(container));
        }
        self.weak_containers.register(container, kind)
    }

    /// Register `map` as a weak map
    pub fn register_weak_map(&mut self, map: HeapRef) -> Result<()> {
        self.register_weak_container(map, WeakKind::Map)
    }

    /// Register `set` as a weak set
    pub fn register_weak_set(&mut self, set: HeapRef) -> Result<()> {
        self.register_weak_container(set, WeakKind::Set)
    }

    pub fn weak_map_set(&mut self, map: HeapRef, key: HeapRef, value: Option<HeapRef>) -> Result<()> {
        self.weak_containers.map_set(map, key, value)?;
        self.write_barrier(value);
        Ok(())
    }

    pub fn weak_map_get(&self, map: HeapRef, key: HeapRef) -> Result<Option<HeapRef>> {
        self.weak_containers.map_get(map, key)
    }

    pub fn weak_map_has(&self, map: HeapRef, key: HeapRef) -> Result<bool> {
        self.weak_containers.map_has(map, key)
    }

    pub fn weak_map_delete(&mut self, map: HeapRef, key: HeapRef) -> Result<bool> {
        self.weak_containers.map_delete(map, key)
    }

    pub fn weak_set_add(&mut self, set: HeapRef, key: HeapRef) -> Result<()> {
        self.weak_containers.set_add(set, key)
    }

    pub fn weak_set_has(&self, set: HeapRef, key: HeapRef) -> Result<bool> {
        self.weak_containers.set_has(set, key)
    }

    pub fn weak_set_delete(&mut self, set: HeapRef, key: HeapRef) -> Result<bool> {
        self.weak_containers.set_delete(set, key)
    }

    pub fn weak_container_len(&self, container: HeapRef) -> Result<usize> {
        self.weak_containers.entry_count(container)
    }

    // ------------------------------------------------------------------
    // Collection
    // ------------------------------------------------------------------

    /// Run one incremental slice, starting a cycle if none is in progress
    ///
    /// Returns the state the collector is in afterwards. Without a time
    /// limit the slice runs the whole cycle.
    pub fn step(&mut self) -> GcState {
        self.step_with_reason("incremental")
    }

    fn step_with_reason(&mut self, reason: &str) -> GcState {
        if self.gc_blocked {
            return self.gc.state;
        }

        let timer = GcTimer::new();
        if !self.is_collecting() {
            self.start_cycle(reason);
        }

        self.gc.deadline = Deadline::after(self.gc.time_limit);
        self.transition();
        if self.gc.time_limit.is_none() {
            while self.is_collecting() {
                self.transition();
            }
        }

        let duration_us = timer.elapsed_us();
        self.pauses.record(duration_us);
        self.logger.log(GcEvent::StepSlice {
            cycle: self.gc.cycle,
            duration_us,
            state: self.gc.state,
        });
        self.gc.state
    }

    /// Complete a collection
    ///
    /// Finishes the cycle in progress, or runs a whole new one when idle.
    /// Does nothing while collection is blocked.
    pub fn run_gc(&mut self) {
        if self.gc_blocked {
            return;
        }
        self.collect_now("explicit");
    }

    /// Run a fresh cycle to completion
    ///
    /// An unfinished cycle is completed first; objects it allocated black
    /// are reconsidered by the fresh one.
    pub fn run_full_gc(&mut self) {
        if self.gc_blocked {
            return;
        }
        if self.is_collecting() {
            self.finish_cycle();
        }
        self.collect_now("full");
    }

    fn collect_now(&mut self, reason: &str) {
        if !self.is_collecting() {
            self.start_cycle(reason);
        }
        self.finish_cycle();
    }

    fn finish_cycle(&mut self) {
        self.gc.deadline = Deadline::none();
        while self.is_collecting() {
            self.transition();
        }
    }

    /// Host event loop hook
    ///
    /// Continues a collection in progress, or starts an incremental one
    /// when [`should_run_gc`](Self::should_run_gc) says so.
    pub fn on_event_loop(&mut self) {
        if self.gc_blocked {
            return;
        }
        if self.is_collecting() {
            self.step();
        } else if self.should_run_gc() {
            self.step_with_reason("overallocation");
        }
    }

    /// Whether the block allocators have grown past the overallocation ratio
    pub fn should_run_gc(&self) -> bool {
        adaptive::should_run_gc(
            self.heap.total_slots(),
            self.used_slots_after_last_full_sweep,
            self.config.min_slots_gc_limit,
            self.config.gc_overallocation_percent,
        )
    }

    pub fn is_collecting(&self) -> bool {
        self.gc.state.in_progress()
    }

    pub fn gc_state(&self) -> GcState {
        self.gc.state
    }

    /// Completed cycles
    pub fn cycle_count(&self) -> u64 {
        self.statistics.cycles
    }

    /// State functions executed so far
    pub fn executed_states(&self) -> u64 {
        self.gc.executed
    }

    // ------------------------------------------------------------------
    // Tunables
    // ------------------------------------------------------------------

    /// Per-step time limit; `None` makes every step complete its cycle
    pub fn set_gc_time_limit(&mut self, limit: Option<Duration>) {
        self.gc.time_limit = limit;
    }

    pub fn gc_time_limit(&self) -> Option<Duration> {
        self.gc.time_limit
    }

    pub fn set_aggressive_gc(&mut self, aggressive: bool) {
        self.config.aggressive_gc = aggressive;
    }

    /// Count allocations per bin from now on
    pub fn set_gc_stats(&mut self, enabled: bool) {
        self.config.gc_stats = enabled;
        self.heap.blocks.set_stats_enabled(enabled);
        self.heap.ic.set_stats_enabled(enabled);
    }

    /// Block every automatic and explicit collection
    pub fn set_gc_blocked(&mut self, blocked: bool) {
        self.gc_blocked = blocked;
    }

    pub fn is_gc_blocked(&self) -> bool {
        self.gc_blocked
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn used_mem(&self) -> usize {
        self.heap.used_bytes()
    }

    pub fn allocated_mem(&self) -> usize {
        self.heap.allocated_bytes()
    }

    pub fn reserved_mem(&self) -> usize {
        self.heap.reserved_bytes()
    }

    /// Snapshot of the lifetime statistics
    pub fn statistics(&self) -> MemoryStatistics {
        let mut stats = self.statistics.clone();
        stats.update_peaks(
            self.heap.reserved_bytes(),
            self.heap.allocated_bytes(),
            self.heap.used_bytes(),
        );
        stats.allocations_per_bin = self.heap.blocks.allocations_per_bin();
        stats.ic_allocations_per_bin = self.heap.ic.allocations_per_bin();
        stats.huge_allocations = self.heap.huge.allocations();
        stats.reserved_mem = self.heap.reserved_bytes();
        stats.used_mem = self.heap.used_bytes();
        stats.unmanaged_heap_size = self.unmanaged_heap_size;
        stats.unmanaged_heap_size_gc_limit = self.unmanaged_heap_size_gc_limit;
        stats.step_pauses = self.pauses.summary();
        stats
    }

    /// Statistics of the most recent cycle (filled with `gc_collector_stats`)
    pub fn collector_stats(&self) -> &CollectorStats {
        &self.collector_stats
    }

    /// Log heap statistics at info level
    pub fn dump_stats(&self) {
        self.logger.log(GcEvent::HeapStats {
            reserved_bytes: self.heap.reserved_bytes(),
            allocated_bytes: self.heap.allocated_bytes(),
            used_bytes: self.heap.used_bytes(),
            unmanaged_bytes: self.unmanaged_heap_size,
        });

        let stats = self.statistics();
        info!(
            target: "mmgc::gc",
            "peak: {} reserved / {} allocated / {} used; {} cycles, {} objects freed",
            stats.max_reserved_mem,
            stats.max_allocated_mem,
            stats.max_used_mem,
            stats.cycles,
            stats.freed_objects
        );
        if self.config.gc_stats {
            for bin in 0..NUM_BINS {
                info!(
                    target: "mmgc::gc",
                    "  bin {}: {} allocations, {} ic allocations",
                    bin,
                    stats.allocations_per_bin[bin],
                    stats.ic_allocations_per_bin[bin]
                );
            }
            info!(target: "mmgc::gc", "  huge: {} allocations", stats.huge_allocations);
        }
        info!(
            target: "mmgc::gc",
            "step pauses: {} steps, p50 {} us, p99 {} us, max {} us",
            stats.step_pauses.count,
            stats.step_pauses.p50_us,
            stats.step_pauses.p99_us,
            stats.step_pauses.max_us
        );
    }

    /// Get detailed diagnostic information
    pub fn diagnostics(&self) -> IndexMap<String, String> {
        let mut diagnostics = IndexMap::new();

        diagnostics.insert("state".to_string(), format!("{:?}", self.gc.state));
        diagnostics.insert("cycle_count".to_string(), self.statistics.cycles.to_string());
        diagnostics.insert("gc_blocked".to_string(), self.gc_blocked.to_string());

        diagnostics.insert("reserved_mem".to_string(), self.heap.reserved_bytes().to_string());
        diagnostics.insert("allocated_mem".to_string(), self.heap.allocated_bytes().to_string());
        diagnostics.insert("used_mem".to_string(), self.heap.used_bytes().to_string());
        diagnostics.insert("object_count".to_string(), self.heap.object_count().to_string());
        diagnostics.insert("object_chunks".to_string(), self.heap.blocks.chunk_count().to_string());
        diagnostics.insert("ic_chunks".to_string(), self.heap.ic.chunk_count().to_string());
        diagnostics.insert("huge_items".to_string(), self.heap.huge.len().to_string());

        diagnostics.insert("unmanaged_heap_size".to_string(), self.unmanaged_heap_size.to_string());
        diagnostics.insert(
            "unmanaged_heap_size_gc_limit".to_string(),
            self.unmanaged_heap_size_gc_limit.to_string(),
        );

        diagnostics.insert("persistent_values".to_string(), self.persistent_values.len().to_string());
        diagnostics.insert("weak_values".to_string(), self.weak_values.len().to_string());
        diagnostics.insert("weak_containers".to_string(), self.weak_containers.len().to_string());
        diagnostics.insert("mark_stack".to_string(), self.mark_stack.len().to_string());

        diagnostics
    }
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("state", &self.gc.state)
            .field("heap", &self.heap)
            .field("unmanaged_heap_size", &self.unmanaged_heap_size)
            .field("gc_blocked", &self.gc_blocked)
            .finish()
    }
}

impl Drop for MemoryManager {
    fn drop(&mut self) {
        if self.is_collecting() && !std::thread::panicking() {
            self.finish_cycle();
        }

        self.weak_values.clear_dead(|_| false);
        self.weak_containers.clear();
        self.global_object = None;

        let mut freed_unmanaged = 0usize;
        self.heap.free_all(&mut |vtable, obj| {
            if let Some(destroy) = vtable.destroy {
                freed_unmanaged = freed_unmanaged.saturating_add(destroy(obj));
            }
        });
        self.unmanaged_heap_size = self.unmanaged_heap_size.saturating_sub(freed_unmanaged);
    }
}
