//! Heap Module - Managed Heap Layout
//!
//! The managed heap consists of:
//! - Two block allocators (ordinary objects, internal class metadata), each
//!   owning a set of 64 KiB chunks of 32-byte slots
//! - One huge item allocator for objects larger than a chunk
//! - The chunk source that supplies memory segments to all three
//!
//! Objects are named by a [`HeapRef`] rather than a raw address:
//!
//! ```text
//! HeapRef { space, segment, slot }
//!
//! packed u64 (as stored in object memory):
//! ┌───────┬──────────────────────┬────────────────────────────┐
//! │ space │ segment              │ slot                       │
//! │ 63-62 │ 61-32                │ 31-0                       │
//! └───────┴──────────────────────┴────────────────────────────┘
//! space codes: 1 = objects, 2 = internal classes, 3 = huge
//! 0 is the null reference
//! ```

pub mod bitmap;
pub mod chunk;
pub mod segment;

pub use bitmap::SlotBitmap;
pub use chunk::Chunk;
pub use segment::{ChunkSource, MemorySegment, MmapChunkSource};

use crate::allocator::block::{BlockAllocator, BlockSweep, ChunkId};
use crate::allocator::huge::{HugeId, HugeItemAllocator, HugeSweep};
use crate::error::Result;
use crate::object::{ObjectMut, ObjectRef, VTable};
use serde::Serialize;
use std::fmt;

/// Size of one chunk in bytes
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Size of one slot in bytes
pub const SLOT_SIZE: usize = 32;

/// Slots per chunk
pub const AVAILABLE_SLOTS: usize = CHUNK_SIZE / SLOT_SIZE;

/// Largest object a chunk can hold; anything bigger is a huge item
pub const DATA_SIZE: usize = AVAILABLE_SLOTS * SLOT_SIZE;

/// Number of free bins; the last one holds runs of `NUM_BINS - 1` slots or more
pub const NUM_BINS: usize = 8;

/// Round `size` up to a whole number of slots
#[inline]
pub const fn align(size: usize) -> usize {
    (size + SLOT_SIZE - 1) & !(SLOT_SIZE - 1)
}

/// Free bin for a run of `slots` slots
#[inline]
pub const fn bin_for_slots(slots: usize) -> usize {
    if slots < NUM_BINS - 1 {
        slots
    } else {
        NUM_BINS - 1
    }
}

/// Slots needed for an object of `size` bytes (at least one)
#[inline]
pub const fn slots_for(size: usize) -> usize {
    let slots = align(size) / SLOT_SIZE;
    if slots == 0 {
        1
    } else {
        slots
    }
}

/// Heap space an object lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Space {
    /// Ordinary managed objects
    Objects,
    /// Internal class and shape metadata
    InternalClasses,
    /// Objects with a dedicated segment
    Huge,
}

impl Space {
    const fn code(self) -> u64 {
        match self {
            Space::Objects => 1,
            Space::InternalClasses => 2,
            Space::Huge => 3,
        }
    }

    const fn from_code(code: u64) -> Option<Space> {
        match code {
            1 => Some(Space::Objects),
            2 => Some(Space::InternalClasses),
            3 => Some(Space::Huge),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Space::Objects => "objects",
            Space::InternalClasses => "ic",
            Space::Huge => "huge",
        }
    }
}

const SEGMENT_BITS: u32 = 30;
const SEGMENT_MASK: u64 = (1 << SEGMENT_BITS) - 1;

/// Handle to a managed object
///
/// Handles are plain values. A handle stays valid as long as the object it
/// names is reachable; after the object is swept the same handle may name a
/// newer object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HeapRef {
    pub space: Space,
    pub segment: u32,
    pub slot: u32,
}

impl HeapRef {
    #[inline]
    pub const fn new(space: Space, segment: u32, slot: u32) -> Self {
        Self {
            space,
            segment,
            slot,
        }
    }

    /// Pack into a non-zero word
    #[inline]
    pub const fn encode(self) -> u64 {
        (self.space.code() << 62)
            | ((self.segment as u64 & SEGMENT_MASK) << 32)
            | self.slot as u64
    }

    /// Unpack a word written by [`HeapRef::encode`]; `None` for null or garbage
    #[inline]
    pub const fn decode(word: u64) -> Option<HeapRef> {
        match Space::from_code(word >> 62) {
            Some(space) => Some(HeapRef {
                space,
                segment: ((word >> 32) & SEGMENT_MASK) as u32,
                slot: word as u32,
            }),
            None => None,
        }
    }

    /// Encode an optional reference, null becoming 0
    #[inline]
    pub const fn encode_opt(value: Option<HeapRef>) -> u64 {
        match value {
            Some(r) => r.encode(),
            None => 0,
        }
    }

    pub(crate) fn chunk_id(self) -> ChunkId {
        ChunkId(self.segment)
    }

    pub(crate) fn huge_id(self) -> HugeId {
        HugeId(self.segment)
    }
}

impl fmt::Display for HeapRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.space.name(), self.segment, self.slot)
    }
}

/// Sweep summary across all allocators
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapSweep {
    pub objects: BlockSweep,
    pub internal_classes: BlockSweep,
    pub huge: HugeSweep,
}

/// Callback invoked for every object about to be freed
pub type DestroyFn<'a> = dyn FnMut(&'static VTable, &mut ObjectMut<'_>) + 'a;

/// The managed heap: allocators plus the chunk source feeding them
pub struct Heap {
    source: Box<dyn ChunkSource>,
    pub(crate) blocks: BlockAllocator,
    pub(crate) ic: BlockAllocator,
    pub(crate) huge: HugeItemAllocator,
}

impl Heap {
    pub fn new(source: Box<dyn ChunkSource>) -> Self {
        Self {
            source,
            blocks: BlockAllocator::new(Space::Objects),
            ic: BlockAllocator::new(Space::InternalClasses),
            huge: HugeItemAllocator::new(),
        }
    }

    /// Allocator of ordinary objects
    pub fn blocks(&self) -> &BlockAllocator {
        &self.blocks
    }

    /// Allocator of internal class metadata
    pub fn internal_classes(&self) -> &BlockAllocator {
        &self.ic
    }

    pub fn huge_items(&self) -> &HugeItemAllocator {
        &self.huge
    }

    fn block_allocator(&self, space: Space) -> Option<&BlockAllocator> {
        match space {
            Space::Objects => Some(&self.blocks),
            Space::InternalClasses => Some(&self.ic),
            Space::Huge => None,
        }
    }

    fn block_allocator_mut(&mut self, space: Space) -> Option<&mut BlockAllocator> {
        match space {
            Space::Objects => Some(&mut self.blocks),
            Space::InternalClasses => Some(&mut self.ic),
            Space::Huge => None,
        }
    }

    /// Allocate `size` bytes from a block allocator
    ///
    /// Returns `Ok(None)` when no free run fits and `force` is false.
    pub fn allocate_block(
        &mut self,
        space: Space,
        size: usize,
        vtable: &'static VTable,
        force: bool,
    ) -> Result<Option<HeapRef>> {
        let allocator = match space {
            Space::Objects => &mut self.blocks,
            Space::InternalClasses => &mut self.ic,
            Space::Huge => return self.allocate_huge(size, vtable).map(Some),
        };
        allocator.allocate(size, vtable, force, self.source.as_mut())
    }

    /// Allocate a dedicated segment for one object
    pub fn allocate_huge(&mut self, size: usize, vtable: &'static VTable) -> Result<HeapRef> {
        self.huge.allocate(size, vtable, self.source.as_mut())
    }

    /// Split a block object so that a second object starts `at_slots` slots in
    pub fn split_object(
        &mut self,
        r: HeapRef,
        at_slots: usize,
        vtable: &'static VTable,
    ) -> Option<HeapRef> {
        self.block_allocator_mut(r.space)?.split(r, at_slots, vtable)
    }

    /// Whether `r` names a live object
    pub fn contains(&self, r: HeapRef) -> bool {
        match r.space {
            Space::Huge => self.huge.contains(r.huge_id()),
            space => self
                .block_allocator(space)
                .is_some_and(|allocator| allocator.contains(r)),
        }
    }

    pub fn vtable(&self, r: HeapRef) -> Option<&'static VTable> {
        match r.space {
            Space::Huge => self.huge.vtable(r.huge_id()),
            space => self.block_allocator(space)?.vtable(r),
        }
    }

    pub fn object(&self, r: HeapRef) -> Option<ObjectRef<'_>> {
        let data = match r.space {
            Space::Huge => self.huge.data(r.huge_id())?,
            space => self.block_allocator(space)?.data(r)?,
        };
        Some(ObjectRef::new(r, data))
    }

    pub fn object_mut(&mut self, r: HeapRef) -> Option<ObjectMut<'_>> {
        let data = match r.space {
            Space::Huge => self.huge.data_mut(r.huge_id())?,
            space => self.block_allocator_mut(space)?.data_mut(r)?,
        };
        Some(ObjectMut::new(r, data))
    }

    /// Set the mark bit of `r`, returning whether it was newly marked
    ///
    /// Handles that do not name a live object are ignored.
    pub fn mark(&mut self, r: HeapRef) -> bool {
        match r.space {
            Space::Huge => self.huge.mark(r.huge_id()),
            space => self
                .block_allocator_mut(space)
                .is_some_and(|allocator| allocator.mark(r)),
        }
    }

    pub fn is_marked(&self, r: HeapRef) -> bool {
        match r.space {
            Space::Huge => self.huge.is_marked(r.huge_id()),
            space => self
                .block_allocator(space)
                .is_some_and(|allocator| allocator.is_marked(r)),
        }
    }

    /// Sweep all allocators
    pub fn sweep(&mut self, release_empty_chunks: bool, on_destroy: &mut DestroyFn<'_>) -> HeapSweep {
        let source = self.source.as_mut();
        HeapSweep {
            objects: self.blocks.sweep(source, release_empty_chunks, on_destroy),
            internal_classes: self.ic.sweep(source, release_empty_chunks, on_destroy),
            huge: self.huge.sweep(source, on_destroy),
        }
    }

    /// Destroy every object and return every segment (teardown)
    pub fn free_all(&mut self, on_destroy: &mut DestroyFn<'_>) {
        let source = self.source.as_mut();
        self.blocks.free_all(source, on_destroy);
        self.ic.free_all(source, on_destroy);
        self.huge.free_all(source, on_destroy);
    }

    /// Clear all mark bits without reclaiming anything
    pub fn reset_black_bits(&mut self) {
        self.blocks.reset_black_bits();
        self.ic.reset_black_bits();
        self.huge.reset_black_bits();
    }

    /// Bytes held from the chunk source
    pub fn reserved_bytes(&self) -> usize {
        self.source.reserved_bytes()
    }

    /// Bytes in chunks and huge segments
    pub fn allocated_bytes(&self) -> usize {
        self.blocks.allocated_bytes() + self.ic.allocated_bytes() + self.huge.allocated_bytes()
    }

    /// Bytes covered by live objects
    pub fn used_bytes(&self) -> usize {
        (self.blocks.used_slots() + self.ic.used_slots()) * SLOT_SIZE + self.huge.used_bytes()
    }

    /// Slots in all chunks of both block allocators
    pub fn total_slots(&self) -> usize {
        self.blocks.total_slots() + self.ic.total_slots()
    }

    /// Used slots in both block allocators
    pub fn used_slots(&self) -> usize {
        self.blocks.used_slots() + self.ic.used_slots()
    }

    /// Number of live objects across all spaces
    pub fn object_count(&self) -> usize {
        self.blocks.object_count() + self.ic.object_count() + self.huge.len()
    }

    /// Number of marked objects across all spaces
    pub fn marked_count(&self) -> usize {
        self.blocks.marked_count() + self.ic.marked_count() + self.huge.marked_count()
    }

    /// Handles of every live object
    pub fn objects(&self) -> Vec<HeapRef> {
        let mut all = self.blocks.objects();
        all.extend(self.ic.objects());
        all.extend(self.huge.objects());
        all
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("blocks", &self.blocks)
            .field("ic", &self.ic)
            .field("huge", &self.huge)
            .field("reserved", &self.source.reserved_bytes())
            .finish()
    }
}
