//! Block Allocator - Segregated Bins over Chunks
//!
//! Allocation order:
//! 1. Bump claim from the current chunk's untouched region
//! 2. Exact-size bin (runs of 1..NUM_BINS-2 slots)
//! 3. First fit in the last bin
//! 4. Split a run taken from a larger exact-size bin
//!
//! The remainder of a split run replaces the bump region when it is the
//! larger of the two, so allocation goes back to bumping after a sweep.
//! 5. With `force`: new chunk from the chunk source, else give up
//!
//! Bins are rebuilt from scratch at every sweep, so freed memory only
//! becomes reusable after a collection.

use crate::error::{MmError, Result};
use crate::heap::{
    bin_for_slots, slots_for, Chunk, ChunkSource, DestroyFn, HeapRef, Space, AVAILABLE_SLOTS,
    CHUNK_SIZE, NUM_BINS,
};
use crate::index::Slab;
use crate::object::{ObjectMut, VTable};
use log::{debug, trace};

crate::define_idx!(
    /// Id of a chunk within one block allocator
    ChunkId
);

/// A run of contiguous free slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRun {
    pub chunk: ChunkId,
    pub slot: u32,
    pub len: u32,
}

/// Result of one block allocator sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockSweep {
    pub freed_objects: usize,
    pub freed_slots: usize,
    pub used_slots: usize,
    pub released_chunks: usize,
}

/// Slot allocator for one heap space
pub struct BlockAllocator {
    space: Space,
    chunks: Slab<ChunkId, Chunk>,
    bins: [Vec<FreeRun>; NUM_BINS],
    bump: Option<FreeRun>,
    stats_enabled: bool,
    allocations_per_bin: [usize; NUM_BINS],
}

impl BlockAllocator {
    pub fn new(space: Space) -> Self {
        Self {
            space,
            chunks: Slab::new(),
            bins: Default::default(),
            bump: None,
            stats_enabled: false,
            allocations_per_bin: [0; NUM_BINS],
        }
    }

    /// Count allocations per bin from now on
    pub fn set_stats_enabled(&mut self, enabled: bool) {
        self.stats_enabled = enabled;
    }

    pub fn allocations_per_bin(&self) -> [usize; NUM_BINS] {
        self.allocations_per_bin
    }

    /// Allocate a zeroed object of `size` bytes
    ///
    /// Returns `Ok(None)` when nothing fits and `force` is false. With
    /// `force`, a new chunk is requested; an error means the chunk source
    /// failed.
    pub fn allocate(
        &mut self,
        size: usize,
        vtable: &'static VTable,
        force: bool,
        source: &mut dyn ChunkSource,
    ) -> Result<Option<HeapRef>> {
        let slots = slots_for(size);
        if slots > AVAILABLE_SLOTS {
            return Err(MmError::InvalidState {
                expected: format!("block allocation of at most {} slots", AVAILABLE_SLOTS),
                actual: format!("{} slots", slots),
            });
        }

        let run = match self.find_run(slots) {
            Some(run) => run,
            None if !force => return Ok(None),
            None => {
                self.grow(source)?;
                self.find_run(slots).ok_or_else(|| MmError::InvalidState {
                    expected: "free run in new chunk".to_string(),
                    actual: format!("no run of {} slots", slots),
                })?
            },
        };

        if self.stats_enabled {
            self.allocations_per_bin[bin_for_slots(slots)] += 1;
        }

        let chunk = &mut self.chunks[run.chunk];
        chunk.claim(run.slot as usize, slots, vtable);
        trace!(target: "mmgc::alloc", "{} slots at {}:{}:{}", slots, self.space.name(), run.chunk.0, run.slot);
        Ok(Some(HeapRef::new(self.space, run.chunk.0, run.slot)))
    }

    /// Take exactly `slots` slots from the bump region or the bins
    fn find_run(&mut self, slots: usize) -> Option<FreeRun> {
        let want = slots as u32;

        if let Some(bump) = self.bump.as_mut() {
            if bump.len >= want {
                let run = FreeRun {
                    chunk: bump.chunk,
                    slot: bump.slot,
                    len: want,
                };
                bump.slot += want;
                bump.len -= want;
                if bump.len == 0 {
                    self.bump = None;
                }
                return Some(run);
            }
        }

        let bin = bin_for_slots(slots);
        if bin < NUM_BINS - 1 {
            if let Some(run) = self.bins[bin].pop() {
                return Some(run);
            }
        }

        let last = &mut self.bins[NUM_BINS - 1];
        if let Some(pos) = last.iter().position(|run| run.len >= want) {
            let run = last.swap_remove(pos);
            return Some(self.split_run(run, want));
        }

        for larger in bin + 1..NUM_BINS - 1 {
            if let Some(run) = self.bins[larger].pop() {
                return Some(self.split_run(run, want));
            }
        }

        None
    }

    /// Keep the first `len` slots of `run`
    ///
    /// The rest becomes the bump region when it is larger than the current
    /// one, otherwise it goes back to its bin.
    fn split_run(&mut self, run: FreeRun, len: u32) -> FreeRun {
        if run.len > len {
            let rest = FreeRun {
                chunk: run.chunk,
                slot: run.slot + len,
                len: run.len - len,
            };
            match self.bump {
                Some(bump) if bump.len >= rest.len => self.push_free(rest),
                previous => {
                    self.bump = Some(rest);
                    if let Some(previous) = previous {
                        self.push_free(previous);
                    }
                }
            }
        }
        FreeRun { len, ..run }
    }

    fn push_free(&mut self, run: FreeRun) {
        if run.len > 0 {
            self.bins[bin_for_slots(run.len as usize)].push(run);
        }
    }

    /// Request a new chunk and make it the bump region
    fn grow(&mut self, source: &mut dyn ChunkSource) -> Result<()> {
        if let Some(rest) = self.bump.take() {
            self.push_free(rest);
        }

        let segment = source.allocate(CHUNK_SIZE)?;
        let id = self.chunks.insert(Chunk::new(segment));
        self.bump = Some(FreeRun {
            chunk: id,
            slot: 0,
            len: AVAILABLE_SLOTS as u32,
        });
        debug!(
            target: "mmgc::alloc",
            "{}: new chunk {} ({} chunks)",
            self.space.name(),
            id.0,
            self.chunks.len()
        );
        Ok(())
    }

    /// Split the object `r` so a second object starts `at_slots` slots in
    pub fn split(&mut self, r: HeapRef, at_slots: usize, vtable: &'static VTable) -> Option<HeapRef> {
        let chunk = self.chunks.get_mut(r.chunk_id())?;
        if chunk.split(r.slot as usize, at_slots, vtable) {
            Some(HeapRef::new(self.space, r.segment, r.slot + at_slots as u32))
        } else {
            None
        }
    }

    pub fn contains(&self, r: HeapRef) -> bool {
        self.chunks
            .get(r.chunk_id())
            .is_some_and(|chunk| chunk.is_object_start(r.slot as usize))
    }

    pub fn vtable(&self, r: HeapRef) -> Option<&'static VTable> {
        self.chunks.get(r.chunk_id())?.vtable(r.slot as usize)
    }

    pub fn data(&self, r: HeapRef) -> Option<&[u8]> {
        let chunk = self.chunks.get(r.chunk_id())?;
        let slot = r.slot as usize;
        if chunk.is_object_start(slot) {
            Some(chunk.object_data(slot))
        } else {
            None
        }
    }

    pub fn data_mut(&mut self, r: HeapRef) -> Option<&mut [u8]> {
        let chunk = self.chunks.get_mut(r.chunk_id())?;
        let slot = r.slot as usize;
        if chunk.is_object_start(slot) {
            Some(chunk.object_data_mut(slot))
        } else {
            None
        }
    }

    pub fn mark(&mut self, r: HeapRef) -> bool {
        self.chunks
            .get_mut(r.chunk_id())
            .is_some_and(|chunk| chunk.set_black(r.slot as usize))
    }

    pub fn is_marked(&self, r: HeapRef) -> bool {
        self.chunks
            .get(r.chunk_id())
            .is_some_and(|chunk| chunk.is_black(r.slot as usize))
    }

    /// Destroy unmarked objects, rebuild the bins and clear mark bits
    ///
    /// Chunks left without objects go back to `source` when
    /// `release_empty_chunks` is set.
    pub fn sweep(
        &mut self,
        source: &mut dyn ChunkSource,
        release_empty_chunks: bool,
        on_destroy: &mut DestroyFn<'_>,
    ) -> BlockSweep {
        for bin in self.bins.iter_mut() {
            bin.clear();
        }
        self.bump = None;

        let space = self.space;
        let mut summary = BlockSweep::default();
        for (id, chunk) in self.chunks.iter_mut() {
            let mut freed_objects = 0;
            let freed_slots = chunk.sweep(&mut |slot, vtable, data| {
                let mut object = ObjectMut::new(HeapRef::new(space, id.0, slot as u32), data);
                on_destroy(vtable, &mut object);
                freed_objects += 1;
            });
            summary.freed_objects += freed_objects;
            summary.freed_slots += freed_slots;
        }

        for id in self.chunks.ids() {
            if release_empty_chunks && self.chunks[id].is_empty() {
                if let Some(chunk) = self.chunks.remove(id) {
                    source.free(chunk.into_segment());
                    summary.released_chunks += 1;
                }
                continue;
            }

            let chunk = &self.chunks[id];
            summary.used_slots += chunk.used_slots();
            for (slot, len) in chunk.free_runs() {
                self.bins[bin_for_slots(len)].push(FreeRun {
                    chunk: id,
                    slot: slot as u32,
                    len: len as u32,
                });
            }
        }

        if summary.released_chunks > 0 {
            debug!(
                target: "mmgc::alloc",
                "{}: released {} empty chunks",
                space.name(),
                summary.released_chunks
            );
        }
        summary
    }

    /// Destroy every object and return all chunks to `source`
    pub fn free_all(&mut self, source: &mut dyn ChunkSource, on_destroy: &mut DestroyFn<'_>) {
        for bin in self.bins.iter_mut() {
            bin.clear();
        }
        self.bump = None;

        let space = self.space;
        for id in self.chunks.ids() {
            if let Some(mut chunk) = self.chunks.remove(id) {
                chunk.destroy_all(&mut |slot, vtable, data| {
                    let mut object = ObjectMut::new(HeapRef::new(space, id.0, slot as u32), data);
                    on_destroy(vtable, &mut object);
                });
                source.free(chunk.into_segment());
            }
        }
    }

    pub fn reset_black_bits(&mut self) {
        for (_, chunk) in self.chunks.iter_mut() {
            chunk.clear_black();
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn total_slots(&self) -> usize {
        self.chunks.len() * AVAILABLE_SLOTS
    }

    pub fn used_slots(&self) -> usize {
        self.chunks.iter().map(|(_, chunk)| chunk.used_slots()).sum()
    }

    pub fn allocated_bytes(&self) -> usize {
        self.chunks.len() * CHUNK_SIZE
    }

    /// Slots currently sitting in free bins
    pub fn binned_slots(&self) -> usize {
        self.bins
            .iter()
            .flat_map(|bin| bin.iter())
            .map(|run| run.len as usize)
            .sum()
    }

    pub fn object_count(&self) -> usize {
        self.chunks
            .iter()
            .map(|(_, chunk)| chunk.object_starts().len())
            .sum()
    }

    pub fn marked_count(&self) -> usize {
        self.chunks.iter().map(|(_, chunk)| chunk.black_count()).sum()
    }

    pub fn objects(&self) -> Vec<HeapRef> {
        let mut all = Vec::new();
        for (id, chunk) in self.chunks.iter() {
            all.extend(
                chunk
                    .object_starts()
                    .into_iter()
                    .map(|slot| HeapRef::new(self.space, id.0, slot as u32)),
            );
        }
        all
    }
}

impl std::fmt::Debug for BlockAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockAllocator")
            .field("space", &self.space)
            .field("chunks", &self.chunks.len())
            .field("bump", &self.bump)
            .finish()
    }
}
