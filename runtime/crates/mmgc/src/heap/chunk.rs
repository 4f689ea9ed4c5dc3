//! Chunk - Fixed-Size Slot Container
//!
//! A chunk is one `CHUNK_SIZE` memory segment divided into `AVAILABLE_SLOTS`
//! slots of `SLOT_SIZE` bytes. Object layout and mark state live in side
//! bitmaps (see [`SlotBitmap`]) so slot memory is entirely object data.
//! The type descriptor of each object is kept in a per-slot table indexed
//! by the object's first slot.

use super::bitmap::SlotBitmap;
use super::segment::MemorySegment;
use super::{AVAILABLE_SLOTS, CHUNK_SIZE, SLOT_SIZE};
use crate::object::VTable;

/// One chunk owned by a block allocator
pub struct Chunk {
    segment: MemorySegment,
    object: SlotBitmap,
    extends: SlotBitmap,
    black: SlotBitmap,
    vtables: Box<[Option<&'static VTable>]>,
}

impl Chunk {
    /// Wrap a freshly allocated segment
    pub fn new(segment: MemorySegment) -> Self {
        debug_assert!(segment.len() >= CHUNK_SIZE);
        Self {
            segment,
            object: SlotBitmap::new(),
            extends: SlotBitmap::new(),
            black: SlotBitmap::new(),
            vtables: vec![None; AVAILABLE_SLOTS].into_boxed_slice(),
        }
    }

    /// Give the backing segment back, e.g. to return it to the chunk source
    pub fn into_segment(self) -> MemorySegment {
        self.segment
    }

    #[inline]
    pub fn is_object_start(&self, slot: usize) -> bool {
        slot < AVAILABLE_SLOTS && self.object.get(slot)
    }

    /// Number of slots occupied by the object starting at `slot`
    pub fn object_slots(&self, slot: usize) -> usize {
        1 + self.extends.run_length(slot + 1)
    }

    #[inline]
    pub fn vtable(&self, slot: usize) -> Option<&'static VTable> {
        if self.is_object_start(slot) {
            self.vtables[slot]
        } else {
            None
        }
    }

    /// Slots covered by objects, equal to popcount(object | extends)
    pub fn used_slots(&self) -> usize {
        self.object.count_union(&self.extends)
    }

    pub fn is_empty(&self) -> bool {
        self.object.is_clear()
    }

    /// Turn `len` free slots starting at `slot` into one zeroed object
    pub fn claim(&mut self, slot: usize, len: usize, vtable: &'static VTable) {
        debug_assert!(len > 0 && slot + len <= AVAILABLE_SLOTS);
        debug_assert!(!self.object.get(slot) && !self.extends.get(slot));

        self.object.set(slot);
        self.extends.set_range(slot + 1, len - 1);
        self.vtables[slot] = Some(vtable);
        self.bytes_mut(slot, len).fill(0);
    }

    /// Split the object at `slot` so a second object starts `at` slots in
    ///
    /// Returns `false` if `slot` is not an object start or `at` is not
    /// strictly inside the object.
    pub fn split(&mut self, slot: usize, at: usize, vtable: &'static VTable) -> bool {
        if !self.is_object_start(slot) || at == 0 || at >= self.object_slots(slot) {
            return false;
        }

        let second = slot + at;
        self.extends.clear(second);
        self.object.set(second);
        self.vtables[second] = Some(vtable);
        if self.black.get(slot) {
            self.black.set(second);
        }
        true
    }

    /// Set the black bit of an object, returning whether it was white
    #[inline]
    pub fn set_black(&mut self, slot: usize) -> bool {
        if !self.is_object_start(slot) || self.black.get(slot) {
            return false;
        }
        self.black.set(slot);
        true
    }

    #[inline]
    pub fn is_black(&self, slot: usize) -> bool {
        self.is_object_start(slot) && self.black.get(slot)
    }

    pub fn clear_black(&mut self) {
        self.black.clear_all();
    }

    pub fn black_count(&self) -> usize {
        self.black.count_ones()
    }

    /// Object data of the object starting at `slot`
    pub fn object_data(&self, slot: usize) -> &[u8] {
        let len = self.object_slots(slot);
        self.bytes(slot, len)
    }

    pub fn object_data_mut(&mut self, slot: usize) -> &mut [u8] {
        let len = self.object_slots(slot);
        self.bytes_mut(slot, len)
    }

    fn bytes(&self, slot: usize, len: usize) -> &[u8] {
        &self.segment.as_slice()[slot * SLOT_SIZE..(slot + len) * SLOT_SIZE]
    }

    fn bytes_mut(&mut self, slot: usize, len: usize) -> &mut [u8] {
        &mut self.segment.as_mut_slice()[slot * SLOT_SIZE..(slot + len) * SLOT_SIZE]
    }

    /// Object start slots in ascending order
    pub fn object_starts(&self) -> Vec<usize> {
        self.object.iter_ones().collect()
    }

    /// Maximal runs of free slots as `(start, len)`
    pub fn free_runs(&self) -> Vec<(usize, usize)> {
        let mut runs = Vec::new();
        let mut slot = 0;
        while slot < AVAILABLE_SLOTS {
            if self.object.get(slot) || self.extends.get(slot) {
                slot += 1;
                continue;
            }
            let start = slot;
            while slot < AVAILABLE_SLOTS && !self.object.get(slot) && !self.extends.get(slot) {
                slot += 1;
            }
            runs.push((start, slot - start));
        }
        runs
    }

    fn release(&mut self, slot: usize) -> usize {
        let len = self.object_slots(slot);
        self.object.clear(slot);
        self.extends.clear_range(slot + 1, len - 1);
        self.vtables[slot] = None;
        len
    }

    /// Destroy and free every white object, then clear the black bitmap
    ///
    /// `on_destroy` receives each dead object before its slots are freed.
    /// Returns the number of freed slots.
    pub fn sweep(
        &mut self,
        on_destroy: &mut dyn FnMut(usize, &'static VTable, &mut [u8]),
    ) -> usize {
        let mut freed = 0;
        for slot in self.object_starts() {
            if self.black.get(slot) {
                continue;
            }
            if let Some(vtable) = self.vtables[slot] {
                on_destroy(slot, vtable, self.object_data_mut(slot));
            }
            freed += self.release(slot);
        }
        self.black.clear_all();
        freed
    }

    /// Destroy every object regardless of mark state
    pub fn destroy_all(&mut self, on_destroy: &mut dyn FnMut(usize, &'static VTable, &mut [u8])) {
        for slot in self.object_starts() {
            if let Some(vtable) = self.vtables[slot] {
                on_destroy(slot, vtable, self.object_data_mut(slot));
            }
            self.release(slot);
        }
        self.black.clear_all();
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("used_slots", &self.used_slots())
            .field("black", &self.black.count_ones())
            .finish()
    }
}
