//! Typed indices and slot arenas.
//!
//! Chunks, huge segments and persistent value pages are all stored in
//! arenas addressed by small integer ids. [`Slab`] is a `Vec` of optional
//! entries with a free list so ids stay stable while entries come and go,
//! and [`define_idx!`] generates the newtype id for each arena.
//!
//! # Example
//!
//! ```
//! use mmgc::index::{Idx, Slab};
//!
//! mmgc::define_idx!(NodeId);
//!
//! let mut nodes: Slab<NodeId, &str> = Slab::new();
//! let a = nodes.insert("a");
//! let b = nodes.insert("b");
//! assert_eq!(nodes.remove(a), Some("a"));
//!
//! // The freed id is reused first
//! let c = nodes.insert("c");
//! assert_eq!(c, a);
//! assert_eq!(nodes.get(b), Some(&"b"));
//! ```

use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// Trait for types that can be used as arena indices
///
/// # Requirements
///
/// - Must be `Copy` for efficient passing
/// - Must implement `from_usize` and `index` for conversion
pub trait Idx: Copy + Eq {
    /// Convert from usize to index type
    ///
    /// # Panics
    ///
    /// Implementations may panic if the value does not fit the index type.
    fn from_usize(idx: usize) -> Self;

    /// Convert index to usize for slot lookup
    fn index(self) -> usize;
}

/// Macro to define index types
///
/// Generates a newtype over `u32` implementing [`Idx`].
#[macro_export]
macro_rules! define_idx {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u32);

        impl $crate::index::Idx for $name {
            fn from_usize(idx: usize) -> Self {
                assert!(idx <= u32::MAX as usize, "Index {} exceeds u32::MAX", idx);
                $name(idx as u32)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

/// Arena with stable ids and slot reuse
#[derive(Debug, Clone)]
pub struct Slab<I, T> {
    entries: Vec<Option<T>>,
    free: Vec<usize>,
    len: usize,
    _marker: PhantomData<fn(&I)>,
}

impl<I: Idx, T> Slab<I, T> {
    /// Create an empty slab
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
            _marker: PhantomData,
        }
    }

    /// Insert a value, reusing the most recently freed id if any
    pub fn insert(&mut self, value: T) -> I {
        self.len += 1;
        match self.free.pop() {
            Some(idx) => {
                self.entries[idx] = Some(value);
                I::from_usize(idx)
            },
            None => {
                self.entries.push(Some(value));
                I::from_usize(self.entries.len() - 1)
            },
        }
    }

    /// Remove and return the value stored under `id`
    pub fn remove(&mut self, id: I) -> Option<T> {
        let value = self.entries.get_mut(id.index())?.take()?;
        self.free.push(id.index());
        self.len -= 1;
        Some(value)
    }

    #[inline]
    pub fn get(&self, id: I) -> Option<&T> {
        self.entries.get(id.index())?.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        self.entries.get_mut(id.index())?.as_mut()
    }

    #[inline]
    pub fn contains(&self, id: I) -> bool {
        self.get(id).is_some()
    }

    /// Number of occupied entries
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate occupied entries in id order
    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| entry.as_ref().map(|value| (I::from_usize(idx), value)))
    }

    /// Iterate occupied entries mutably in id order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (I, &mut T)> {
        self.entries
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, entry)| entry.as_mut().map(|value| (I::from_usize(idx), value)))
    }

    /// Ids of all occupied entries
    pub fn ids(&self) -> Vec<I> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Remove every entry, yielding them in id order
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.free.clear();
        self.len = 0;
        self.entries.drain(..).flatten()
    }
}

impl<I: Idx, T> Default for Slab<I, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Idx, T> Index<I> for Slab<I, T> {
    type Output = T;

    /// # Panics
    ///
    /// Panics if `id` is vacant.
    #[inline]
    fn index(&self, id: I) -> &T {
        match self.get(id) {
            Some(value) => value,
            None => panic!("vacant slab entry {}", id.index()),
        }
    }
}

impl<I: Idx, T> IndexMut<I> for Slab<I, T> {
    #[inline]
    fn index_mut(&mut self, id: I) -> &mut T {
        match self.get_mut(id) {
            Some(value) => value,
            None => panic!("vacant slab entry {}", id.index()),
        }
    }
}
