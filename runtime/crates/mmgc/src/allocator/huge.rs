//! Huge Item Allocator - One Segment per Object
//!
//! Objects larger than a chunk get a dedicated segment whose size is the
//! request rounded up to the OS page size. Each entry carries its own mark
//! bit; sweeping releases the segment of every unmarked entry.

use crate::error::Result;
use crate::heap::{ChunkSource, DestroyFn, HeapRef, MemorySegment, Space};
use crate::index::Slab;
use crate::object::{ObjectMut, VTable};
use log::debug;

crate::define_idx!(
    /// Id of a huge item
    HugeId
);

/// One huge object and its segment
#[derive(Debug)]
pub struct HugeChunk {
    pub segment: MemorySegment,
    pub size: usize,
    pub marked: bool,
    pub vtable: &'static VTable,
}

/// Result of one huge allocator sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HugeSweep {
    pub freed_objects: usize,
    pub freed_bytes: usize,
}

/// Allocator for objects that do not fit into a chunk
#[derive(Debug, Default)]
pub struct HugeItemAllocator {
    chunks: Slab<HugeId, HugeChunk>,
    allocations: usize,
}

fn round_to_page(size: usize) -> usize {
    let page = page_size::get();
    size.div_ceil(page) * page
}

impl HugeItemAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a zeroed object of `size` bytes in its own segment
    pub fn allocate(
        &mut self,
        size: usize,
        vtable: &'static VTable,
        source: &mut dyn ChunkSource,
    ) -> Result<HeapRef> {
        let segment = source.allocate(round_to_page(size.max(1)))?;
        let id = self.chunks.insert(HugeChunk {
            segment,
            size,
            marked: false,
            vtable,
        });
        self.allocations += 1;
        debug!(target: "mmgc::alloc", "huge item {} of {} bytes", id.0, size);
        Ok(HeapRef::new(Space::Huge, id.0, 0))
    }

    pub fn contains(&self, id: HugeId) -> bool {
        self.chunks.contains(id)
    }

    pub fn vtable(&self, id: HugeId) -> Option<&'static VTable> {
        self.chunks.get(id).map(|chunk| chunk.vtable)
    }

    pub fn data(&self, id: HugeId) -> Option<&[u8]> {
        let chunk = self.chunks.get(id)?;
        Some(&chunk.segment.as_slice()[..chunk.size])
    }

    pub fn data_mut(&mut self, id: HugeId) -> Option<&mut [u8]> {
        let chunk = self.chunks.get_mut(id)?;
        let size = chunk.size;
        Some(&mut chunk.segment.as_mut_slice()[..size])
    }

    pub fn mark(&mut self, id: HugeId) -> bool {
        match self.chunks.get_mut(id) {
            Some(chunk) if !chunk.marked => {
                chunk.marked = true;
                true
            },
            _ => false,
        }
    }

    pub fn is_marked(&self, id: HugeId) -> bool {
        self.chunks.get(id).is_some_and(|chunk| chunk.marked)
    }

    /// Destroy and release unmarked entries, clear the marks of the rest
    pub fn sweep(&mut self, source: &mut dyn ChunkSource, on_destroy: &mut DestroyFn<'_>) -> HugeSweep {
        let mut summary = HugeSweep::default();
        for id in self.chunks.ids() {
            let chunk = &mut self.chunks[id];
            if chunk.marked {
                chunk.marked = false;
                continue;
            }
            if let Some(chunk) = self.chunks.remove(id) {
                summary.freed_objects += 1;
                summary.freed_bytes += chunk.size;
                Self::release(id, chunk, source, on_destroy);
            }
        }
        summary
    }

    fn release(
        id: HugeId,
        mut chunk: HugeChunk,
        source: &mut dyn ChunkSource,
        on_destroy: &mut DestroyFn<'_>,
    ) {
        let size = chunk.size;
        let mut object = ObjectMut::new(
            HeapRef::new(Space::Huge, id.0, 0),
            &mut chunk.segment.as_mut_slice()[..size],
        );
        on_destroy(chunk.vtable, &mut object);
        source.free(chunk.segment);
    }

    /// Destroy and release every entry
    pub fn free_all(&mut self, source: &mut dyn ChunkSource, on_destroy: &mut DestroyFn<'_>) {
        for id in self.chunks.ids() {
            if let Some(chunk) = self.chunks.remove(id) {
                Self::release(id, chunk, source, on_destroy);
            }
        }
    }

    pub fn reset_black_bits(&mut self) {
        for (_, chunk) in self.chunks.iter_mut() {
            chunk.marked = false;
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total huge allocations since creation
    pub fn allocations(&self) -> usize {
        self.allocations
    }

    /// Requested bytes of all live entries
    pub fn used_bytes(&self) -> usize {
        self.chunks.iter().map(|(_, chunk)| chunk.size).sum()
    }

    /// Segment bytes of all live entries
    pub fn allocated_bytes(&self) -> usize {
        self.chunks.iter().map(|(_, chunk)| chunk.segment.len()).sum()
    }

    pub fn marked_count(&self) -> usize {
        self.chunks.iter().filter(|(_, chunk)| chunk.marked).count()
    }

    pub fn objects(&self) -> Vec<HeapRef> {
        self.chunks
            .ids()
            .into_iter()
            .map(|id| HeapRef::new(Space::Huge, id.0, 0))
            .collect()
    }
}
