//! Marker Module - Incremental Marking
//!
//! Marking is mark-on-pop: the mark stack holds candidate references, and
//! an object is blackened when it is popped. Popping an object that is
//! already black, or a handle that names no live object, is a no-op.
//!
//! ```text
//! roots ──push──▶ [ mark stack ] ──pop──▶ mark bit set?
//!                       ▲                   │ no
//!                       │                   ▼
//!                       └───push children── set black
//! ```
//!
//! Draining is bounded by a [`Deadline`] checked every `batch` items, so a
//! single step never overshoots its budget by more than one batch.

pub mod roots;

pub use roots::{ExecutionStack, PersistentCursor, PersistentId, PersistentValueStorage};

use crate::gc::Deadline;
use crate::heap::{Heap, HeapRef};
use crate::object::{push_children, WeakContainerRegistry};

/// Worklist of references waiting to be marked
#[derive(Debug, Default)]
pub struct MarkStack {
    items: Vec<HeapRef>,
    pushed: u64,
}

impl MarkStack {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, r: HeapRef) {
        self.items.push(r);
        self.pushed += 1;
    }

    /// Push an optional reference, ignoring null
    #[inline]
    pub fn push_opt(&mut self, r: Option<HeapRef>) {
        if let Some(r) = r {
            self.push(r);
        }
    }

    #[inline]
    pub fn pop(&mut self) -> Option<HeapRef> {
        self.items.pop()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Total pushes since creation
    pub fn pushed_total(&self) -> u64 {
        self.pushed
    }
}

/// Outcome of a bounded drain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    /// The mark stack is empty
    Complete,
    /// The deadline expired with work left
    Incomplete,
}

/// Mark one popped reference and push its children
///
/// Returns `true` if the object was newly marked.
pub(crate) fn mark_one(
    heap: &mut Heap,
    weak: &WeakContainerRegistry,
    stack: &mut MarkStack,
    r: HeapRef,
) -> bool {
    if !heap.mark(r) {
        return false;
    }

    let (Some(vtable), Some(obj)) = (heap.vtable(r), heap.object(r)) else {
        return true;
    };
    push_children(vtable, &obj, stack);
    weak.push_values(r, stack);
    true
}

/// Drain the mark stack until it is empty or `deadline` expires
pub(crate) fn drain(
    heap: &mut Heap,
    weak: &WeakContainerRegistry,
    stack: &mut MarkStack,
    deadline: &Deadline,
    batch: usize,
) -> DrainState {
    loop {
        for _ in 0..batch {
            match stack.pop() {
                Some(r) => {
                    mark_one(heap, weak, stack, r);
                },
                None => return DrainState::Complete,
            }
        }

        if stack.is_empty() {
            return DrainState::Complete;
        }
        if deadline.expired() {
            return DrainState::Incomplete;
        }
    }
}
