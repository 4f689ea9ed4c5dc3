//! Object Module - Managed Object Model
//!
//! The memory manager knows nothing about object layouts beyond what the
//! per-type [`VTable`] tells it. Object memory is a zeroed run of slots,
//! accessed in 8-byte words through [`ObjectRef`] and [`ObjectMut`]. Words
//! holding references store a packed [`HeapRef`] (0 for null).

pub mod weak;

pub use weak::{WeakContainerRegistry, WeakKind};

use crate::heap::HeapRef;
use crate::marker::MarkStack;

/// Size of one value word in object memory
pub const VALUE_SIZE: usize = 8;

/// Per-type capability table
///
/// # Examples
///
/// ```rust
/// use mmgc::{MarkStack, ObjectRef, VTable};
///
/// fn mark_second_word(obj: &ObjectRef<'_>, stack: &mut MarkStack) {
///     if let Some(r) = obj.read_ref(1) {
///         stack.push(r);
///     }
/// }
///
/// static PAIR: VTable = VTable {
///     mark_objects: Some(mark_second_word),
///     ..VTable::new("Pair", 16)
/// };
/// assert_eq!(PAIR.class_name, "Pair");
/// ```
#[derive(Debug)]
pub struct VTable {
    /// Name reported in statistics and logs
    pub class_name: &'static str,

    /// Default allocation size in bytes
    pub size: usize,

    /// Leading words holding references, marked automatically
    pub inline_values: usize,

    /// Push further references held by the object
    pub mark_objects: Option<fn(&ObjectRef<'_>, &mut MarkStack)>,

    /// Finalizer, returns the unmanaged bytes it released
    pub destroy: Option<fn(&mut ObjectMut<'_>) -> usize>,

    /// Keep the object alive while it is only weakly referenced
    pub keep_alive: Option<fn(&ObjectRef<'_>) -> bool>,
}

impl VTable {
    /// Table with no references and no callbacks
    pub const fn new(class_name: &'static str, size: usize) -> Self {
        Self {
            class_name,
            size,
            inline_values: 0,
            mark_objects: None,
            destroy: None,
            keep_alive: None,
        }
    }
}

/// Type of member data blocks created by `alloc_object_with_member_data`
///
/// Every word of a member data block is a value slot.
pub static MEMBER_DATA_VTABLE: VTable = VTable {
    mark_objects: Some(mark_all_words),
    ..VTable::new("MemberData", 0)
};

/// Mark callback treating every word as a reference
pub fn mark_all_words(obj: &ObjectRef<'_>, stack: &mut MarkStack) {
    for word in 0..obj.word_count() {
        if let Some(r) = obj.read_ref(word) {
            stack.push(r);
        }
    }
}

/// Push every reference held by `obj` according to its vtable
pub(crate) fn push_children(vtable: &VTable, obj: &ObjectRef<'_>, stack: &mut MarkStack) {
    let inline = vtable.inline_values.min(obj.word_count());
    for word in 0..inline {
        if let Some(r) = obj.read_ref(word) {
            stack.push(r);
        }
    }
    if let Some(mark_objects) = vtable.mark_objects {
        mark_objects(obj, stack);
    }
}

fn word_range(word: usize) -> std::ops::Range<usize> {
    word * VALUE_SIZE..(word + 1) * VALUE_SIZE
}

fn read_word(data: &[u8], word: usize) -> u64 {
    let mut bytes = [0u8; VALUE_SIZE];
    bytes.copy_from_slice(&data[word_range(word)]);
    u64::from_ne_bytes(bytes)
}

/// Shared view of one object's memory
#[derive(Debug, Clone, Copy)]
pub struct ObjectRef<'a> {
    handle: HeapRef,
    data: &'a [u8],
}

impl<'a> ObjectRef<'a> {
    pub(crate) fn new(handle: HeapRef, data: &'a [u8]) -> Self {
        Self { handle, data }
    }

    #[inline]
    pub fn handle(&self) -> HeapRef {
        self.handle
    }

    /// Object size in bytes (slot-rounded for block objects)
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn word_count(&self) -> usize {
        self.data.len() / VALUE_SIZE
    }

    /// Read the value word at `word`
    ///
    /// # Panics
    ///
    /// Panics if `word >= self.word_count()`.
    #[inline]
    pub fn read_u64(&self, word: usize) -> u64 {
        read_word(self.data, word)
    }

    /// Read the reference stored at `word`
    #[inline]
    pub fn read_ref(&self, word: usize) -> Option<HeapRef> {
        HeapRef::decode(self.read_u64(word))
    }

    #[inline]
    pub fn bytes(&self) -> &'a [u8] {
        self.data
    }
}

/// Mutable view of one object's memory
///
/// Writing references through this view bypasses the write barrier; use
/// `MemoryManager::store_ref` while a collection may be in progress.
#[derive(Debug)]
pub struct ObjectMut<'a> {
    handle: HeapRef,
    data: &'a mut [u8],
}

impl<'a> ObjectMut<'a> {
    pub(crate) fn new(handle: HeapRef, data: &'a mut [u8]) -> Self {
        Self { handle, data }
    }

    #[inline]
    pub fn handle(&self) -> HeapRef {
        self.handle
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn word_count(&self) -> usize {
        self.data.len() / VALUE_SIZE
    }

    #[inline]
    pub fn read_u64(&self, word: usize) -> u64 {
        read_word(self.data, word)
    }

    #[inline]
    pub fn read_ref(&self, word: usize) -> Option<HeapRef> {
        HeapRef::decode(self.read_u64(word))
    }

    /// Write the value word at `word`
    ///
    /// # Panics
    ///
    /// Panics if `word >= self.word_count()`.
    #[inline]
    pub fn write_u64(&mut self, word: usize, value: u64) {
        self.data[word_range(word)].copy_from_slice(&value.to_ne_bytes());
    }

    #[inline]
    pub fn write_ref(&mut self, word: usize, value: Option<HeapRef>) {
        self.write_u64(word, HeapRef::encode_opt(value));
    }

    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut *self.data
    }

    /// Shared view of the same object
    pub fn view(&self) -> ObjectRef<'_> {
        ObjectRef::new(self.handle, &*self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Space;

    #[test]
    fn test_word_access() {
        let mut buf = vec![0u8; 32];
        let handle = HeapRef::new(Space::Objects, 0, 4);
        let target = HeapRef::new(Space::Objects, 1, 9);

        let mut obj = ObjectMut::new(handle, &mut buf);
        assert_eq!(obj.word_count(), 4);
        obj.write_u64(0, 42);
        obj.write_ref(1, Some(target));
        obj.write_ref(2, None);

        let view = obj.view();
        assert_eq!(view.read_u64(0), 42);
        assert_eq!(view.read_ref(1), Some(target));
        assert_eq!(view.read_ref(2), None);
    }

    #[test]
    fn test_push_children_uses_inline_values() {
        static TWO_REFS: VTable = VTable {
            inline_values: 2,
            ..VTable::new("TwoRefs", 32)
        };

        let a = HeapRef::new(Space::Objects, 0, 1);
        let b = HeapRef::new(Space::InternalClasses, 0, 2);
        let ignored = HeapRef::new(Space::Objects, 0, 3);

        let mut buf = vec![0u8; 32];
        let mut obj = ObjectMut::new(HeapRef::new(Space::Objects, 0, 0), &mut buf);
        obj.write_ref(0, Some(a));
        obj.write_ref(1, Some(b));
        obj.write_ref(2, Some(ignored));

        let mut stack = MarkStack::new();
        push_children(&TWO_REFS, &obj.view(), &mut stack);
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.pop(), Some(b));
        assert_eq!(stack.pop(), Some(a));
    }

    #[test]
    fn test_member_data_marks_every_word() {
        let refs: Vec<_> = (0..4).map(|i| HeapRef::new(Space::Objects, 2, i)).collect();
        let mut buf = vec![0u8; 64];
        let mut obj = ObjectMut::new(HeapRef::new(Space::Objects, 0, 0), &mut buf);
        for (word, r) in refs.iter().enumerate() {
            obj.write_ref(word * 2, Some(*r));
        }

        let mut stack = MarkStack::new();
        push_children(&MEMBER_DATA_VTABLE, &obj.view(), &mut stack);
        assert_eq!(stack.len(), 4);
    }
}
