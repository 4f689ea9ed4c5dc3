//! Roots - Starting Points for Marking
//!
//! # Root Types
//!
//! 1. **Execution stack** - values of the running script, scanned in one
//!    atomic step and scanned again right before sweep
//! 2. **Global object** - single optional reference held by the manager
//! 3. **Persistent values** - handles held by the host, strong
//! 4. **Weak values** - handles held by the host, nulled when the referent dies
//!
//! Persistent and weak values share [`PersistentValueStorage`]: pages of
//! `PAGE_SLOTS` slots addressed by [`PersistentId`]. Marking walks the pages
//! with a [`PersistentCursor`] that survives across incremental steps.

use crate::error::{MmError, Result};
use crate::heap::HeapRef;

/// Slots per persistent value page
pub const PAGE_SLOTS: usize = 512;

/// Value stack of the running script
#[derive(Debug, Default, Clone)]
pub struct ExecutionStack {
    values: Vec<Option<HeapRef>>,
}

impl ExecutionStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a value, returning its index
    pub fn push(&mut self, value: Option<HeapRef>) -> usize {
        self.values.push(value);
        self.values.len() - 1
    }

    /// Pop the top value; the outer `None` means the stack was empty
    pub fn pop(&mut self) -> Option<Option<HeapRef>> {
        self.values.pop()
    }

    pub fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
    }

    /// Overwrite the value at `index`, returning `false` if out of range
    pub fn set(&mut self, index: usize, value: Option<HeapRef>) -> bool {
        match self.values.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            },
            None => false,
        }
    }

    pub fn get(&self, index: usize) -> Option<HeapRef> {
        self.values.get(index).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Non-null references on the stack, bottom first
    pub fn refs(&self) -> impl Iterator<Item = HeapRef> + '_ {
        self.values.iter().flatten().copied()
    }
}

/// Handle to one persistent or weak value slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PersistentId {
    pub page: u32,
    pub index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Free,
    Used(Option<HeapRef>),
}

#[derive(Debug)]
struct Page {
    slots: Box<[Slot]>,
    free: Vec<u32>,
}

impl Page {
    fn new() -> Self {
        Self {
            slots: vec![Slot::Free; PAGE_SLOTS].into_boxed_slice(),
            free: (0..PAGE_SLOTS as u32).rev().collect(),
        }
    }
}

/// Resumable position within a [`PersistentValueStorage`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistentCursor {
    pub page: usize,
    pub index: usize,
}

/// Paged storage of externally held references
#[derive(Debug, Default)]
pub struct PersistentValueStorage {
    pages: Vec<Page>,
    len: usize,
}

impl PersistentValueStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` in a free slot
    pub fn allocate(&mut self, value: Option<HeapRef>) -> PersistentId {
        let page_idx = match self.pages.iter().position(|page| !page.free.is_empty()) {
            Some(idx) => idx,
            None => {
                self.pages.push(Page::new());
                self.pages.len() - 1
            },
        };

        let page = &mut self.pages[page_idx];
        let index = page.free.pop().unwrap_or_default();
        page.slots[index as usize] = Slot::Used(value);
        self.len += 1;
        PersistentId {
            page: page_idx as u32,
            index,
        }
    }

    fn slot(&self, id: PersistentId) -> Result<&Option<HeapRef>> {
        match self
            .pages
            .get(id.page as usize)
            .and_then(|page| page.slots.get(id.index as usize))
        {
            Some(Slot::Used(value)) => Ok(value),
            _ => Err(MmError::InvalidPersistent(id.page, id.index)),
        }
    }

    fn slot_mut(&mut self, id: PersistentId) -> Result<&mut Option<HeapRef>> {
        match self
            .pages
            .get_mut(id.page as usize)
            .and_then(|page| page.slots.get_mut(id.index as usize))
        {
            Some(Slot::Used(value)) => Ok(value),
            _ => Err(MmError::InvalidPersistent(id.page, id.index)),
        }
    }

    pub fn get(&self, id: PersistentId) -> Result<Option<HeapRef>> {
        self.slot(id).copied()
    }

    pub fn set(&mut self, id: PersistentId, value: Option<HeapRef>) -> Result<()> {
        *self.slot_mut(id)? = value;
        Ok(())
    }

    /// Release a slot, returning the value it held
    pub fn free(&mut self, id: PersistentId) -> Result<Option<HeapRef>> {
        let value = *self.slot(id)?;
        let page = &mut self.pages[id.page as usize];
        page.slots[id.index as usize] = Slot::Free;
        page.free.push(id.index);
        self.len -= 1;
        Ok(value)
    }

    /// Number of allocated slots
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// All non-null references in slot order
    pub fn refs(&self) -> impl Iterator<Item = HeapRef> + '_ {
        self.pages.iter().flat_map(|page| {
            page.slots.iter().filter_map(|slot| match slot {
                Slot::Used(value) => *value,
                Slot::Free => None,
            })
        })
    }

    /// Visit up to `batch` slots starting at `cursor`
    ///
    /// `visit` receives each non-null reference. Returns `true` once the
    /// cursor has passed the last page. Pages added while a walk is in
    /// progress are included.
    pub fn visit_batch(
        &self,
        cursor: &mut PersistentCursor,
        batch: usize,
        mut visit: impl FnMut(HeapRef),
    ) -> bool {
        let mut remaining = batch;
        while cursor.page < self.pages.len() {
            let page = &self.pages[cursor.page];
            while cursor.index < PAGE_SLOTS {
                if remaining == 0 {
                    return false;
                }
                if let Slot::Used(Some(r)) = page.slots[cursor.index] {
                    visit(r);
                }
                cursor.index += 1;
                remaining -= 1;
            }
            cursor.page += 1;
            cursor.index = 0;
        }
        true
    }

    /// Null every reference for which `is_live` is false
    ///
    /// Returns the number of slots cleared.
    pub fn clear_dead(&mut self, is_live: impl Fn(HeapRef) -> bool) -> usize {
        let mut cleared = 0;
        for page in self.pages.iter_mut() {
            for slot in page.slots.iter_mut() {
                if let Slot::Used(Some(r)) = *slot {
                    if !is_live(r) {
                        *slot = Slot::Used(None);
                        cleared += 1;
                    }
                }
            }
        }
        cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Space;

    fn r(slot: u32) -> HeapRef {
        HeapRef::new(Space::Objects, 0, slot)
    }

    #[test]
    fn test_execution_stack() {
        let mut stack = ExecutionStack::new();
        stack.push(Some(r(1)));
        stack.push(None);
        let idx = stack.push(Some(r(3)));

        assert_eq!(stack.refs().collect::<Vec<_>>(), vec![r(1), r(3)]);
        assert!(stack.set(idx, Some(r(4))));
        assert!(!stack.set(10, None));
        assert_eq!(stack.pop(), Some(Some(r(4))));

        stack.truncate(0);
        assert!(stack.is_empty());
        assert_eq!(stack.pop(), None);
    }

    #[test]
    fn test_allocate_and_free_reuse() {
        let mut storage = PersistentValueStorage::new();
        let a = storage.allocate(Some(r(1)));
        let b = storage.allocate(None);

        assert_eq!(storage.get(a).unwrap(), Some(r(1)));
        assert_eq!(storage.free(a).unwrap(), Some(r(1)));
        assert!(storage.get(a).is_err());
        assert!(storage.free(a).is_err());

        let c = storage.allocate(Some(r(2)));
        assert_eq!(c, a);
        storage.set(b, Some(r(5))).unwrap();
        assert_eq!(storage.len(), 2);
    }

    #[test]
    fn test_pages_grow() {
        let mut storage = PersistentValueStorage::new();
        let ids: Vec<_> = (0..PAGE_SLOTS + 1).map(|i| storage.allocate(Some(r(i as u32)))).collect();

        assert_eq!(storage.page_count(), 2);
        assert_eq!(ids[PAGE_SLOTS].page, 1);
        assert_eq!(storage.refs().count(), PAGE_SLOTS + 1);
    }

    #[test]
    fn test_visit_batch_resumes() {
        let mut storage = PersistentValueStorage::new();
        for i in 0..(PAGE_SLOTS + 10) {
            storage.allocate(Some(r(i as u32)));
        }

        let mut cursor = PersistentCursor::default();
        let mut seen = Vec::new();
        let mut rounds = 1;
        while !storage.visit_batch(&mut cursor, 100, |v| seen.push(v)) {
            rounds += 1;
        }

        assert_eq!(seen.len(), PAGE_SLOTS + 10);
        assert_eq!(rounds, 11);
    }

    #[test]
    fn test_visit_batch_sees_pages_added_mid_walk() {
        let mut storage = PersistentValueStorage::new();
        storage.allocate(Some(r(0)));

        let mut cursor = PersistentCursor::default();
        let mut seen = Vec::new();
        assert!(!storage.visit_batch(&mut cursor, 10, |v| seen.push(v)));

        for i in 1..=PAGE_SLOTS {
            storage.allocate(Some(r(i as u32)));
        }
        while !storage.visit_batch(&mut cursor, 100, |v| seen.push(v)) {}

        // slots 1..=9 were filled behind the cursor
        assert_eq!(seen.len(), PAGE_SLOTS + 1 - 9);
    }

    #[test]
    fn test_clear_dead() {
        let mut storage = PersistentValueStorage::new();
        let live = storage.allocate(Some(r(1)));
        let dead = storage.allocate(Some(r(2)));

        let cleared = storage.clear_dead(|x| x == r(1));
        assert_eq!(cleared, 1);
        assert_eq!(storage.get(live).unwrap(), Some(r(1)));
        assert_eq!(storage.get(dead).unwrap(), None);
    }
}
