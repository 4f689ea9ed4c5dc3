//! Weak Containers - Weak Maps and Weak Sets
//!
//! A weak container holds its keys weakly: an entry survives a collection
//! only if its key object was marked. Values of weak maps are held strongly
//! by the container, so marking a container marks its values but not its
//! keys.
//!
//! Sweep is two-phase:
//! 1. Containers that were not marked are unlinked from the registry
//! 2. Surviving containers drop every entry whose key was not marked
//!
//! Both phases must run before the allocators clear mark bits.

use crate::error::{MmError, Result};
use crate::heap::HeapRef;
use crate::marker::MarkStack;
use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHasher};
use serde::Serialize;
use std::hash::BuildHasherDefault;

type EntryMap = IndexMap<HeapRef, Option<HeapRef>, BuildHasherDefault<FxHasher>>;

/// Kind of weak container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WeakKind {
    Map,
    Set,
}

#[derive(Debug)]
struct WeakContainer {
    kind: WeakKind,
    entries: EntryMap,
}

/// Result of a weak container sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeakSweep {
    pub containers_removed: usize,
    pub entries_pruned: usize,
}

/// Registry of all live weak maps and weak sets
#[derive(Debug, Default)]
pub struct WeakContainerRegistry {
    containers: FxHashMap<HeapRef, WeakContainer>,
}

impl WeakContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `container` as a weak container of the given kind
    pub fn register(&mut self, container: HeapRef, kind: WeakKind) -> Result<()> {
        if self.containers.contains_key(&container) {
            return Err(MmError::AlreadyRegistered(container));
        }
        self.containers.insert(
            container,
            WeakContainer {
                kind,
                entries: EntryMap::default(),
            },
        );
        Ok(())
    }

    pub fn kind(&self, container: HeapRef) -> Option<WeakKind> {
        self.containers.get(&container).map(|c| c.kind)
    }

    fn get(&self, container: HeapRef, kind: WeakKind) -> Result<&WeakContainer> {
        match self.containers.get(&container) {
            Some(c) if c.kind == kind => Ok(c),
            _ => Err(MmError::NotAWeakContainer(container)),
        }
    }

    fn get_mut(&mut self, container: HeapRef, kind: WeakKind) -> Result<&mut WeakContainer> {
        match self.containers.get_mut(&container) {
            Some(c) if c.kind == kind => Ok(c),
            _ => Err(MmError::NotAWeakContainer(container)),
        }
    }

    pub fn map_set(&mut self, map: HeapRef, key: HeapRef, value: Option<HeapRef>) -> Result<()> {
        self.get_mut(map, WeakKind::Map)?.entries.insert(key, value);
        Ok(())
    }

    /// Value stored under `key`; `None` if absent or stored as null
    pub fn map_get(&self, map: HeapRef, key: HeapRef) -> Result<Option<HeapRef>> {
        Ok(self
            .get(map, WeakKind::Map)?
            .entries
            .get(&key)
            .copied()
            .flatten())
    }

    pub fn map_has(&self, map: HeapRef, key: HeapRef) -> Result<bool> {
        Ok(self.get(map, WeakKind::Map)?.entries.contains_key(&key))
    }

    pub fn map_delete(&mut self, map: HeapRef, key: HeapRef) -> Result<bool> {
        Ok(self
            .get_mut(map, WeakKind::Map)?
            .entries
            .shift_remove(&key)
            .is_some())
    }

    pub fn set_add(&mut self, set: HeapRef, key: HeapRef) -> Result<()> {
        self.get_mut(set, WeakKind::Set)?.entries.insert(key, None);
        Ok(())
    }

    pub fn set_has(&self, set: HeapRef, key: HeapRef) -> Result<bool> {
        Ok(self.get(set, WeakKind::Set)?.entries.contains_key(&key))
    }

    pub fn set_delete(&mut self, set: HeapRef, key: HeapRef) -> Result<bool> {
        Ok(self
            .get_mut(set, WeakKind::Set)?
            .entries
            .shift_remove(&key)
            .is_some())
    }

    /// Number of entries in a registered container
    pub fn entry_count(&self, container: HeapRef) -> Result<usize> {
        self.containers
            .get(&container)
            .map(|c| c.entries.len())
            .ok_or(MmError::NotAWeakContainer(container))
    }

    /// Push the values of `container` if it is a registered weak map
    pub fn push_values(&self, container: HeapRef, stack: &mut MarkStack) {
        if let Some(c) = self.containers.get(&container) {
            for value in c.entries.values().flatten() {
                stack.push(*value);
            }
        }
    }

    /// Unlink unmarked containers and prune entries with unmarked keys
    pub fn sweep(&mut self, is_marked: impl Fn(HeapRef) -> bool) -> WeakSweep {
        let mut summary = WeakSweep::default();

        let before = self.containers.len();
        self.containers.retain(|container, _| is_marked(*container));
        summary.containers_removed = before - self.containers.len();

        for container in self.containers.values_mut() {
            let before = container.entries.len();
            container.entries.retain(|key, _| is_marked(*key));
            summary.entries_pruned += before - container.entries.len();
        }
        summary
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    pub fn clear(&mut self) {
        self.containers.clear();
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
    fn test_register_twice_fails() {
        let mut registry = WeakContainerRegistry::new();
        registry.register(r(1), WeakKind::Map).unwrap();

        assert!(matches!(
            registry.register(r(1), WeakKind::Set),
            Err(MmError::AlreadyRegistered(_))
        ));
        assert_eq!(registry.kind(r(1)), Some(WeakKind::Map));
    }

    #[test]
    fn test_kind_mismatch_is_rejected() {
        let mut registry = WeakContainerRegistry::new();
        registry.register(r(1), WeakKind::Set).unwrap();

        assert!(registry.map_set(r(1), r(2), Some(r(3))).is_err());
        assert!(registry.set_add(r(9), r(2)).is_err());
        registry.set_add(r(1), r(2)).unwrap();
        assert!(registry.set_has(r(1), r(2)).unwrap());
    }

    #[test]
    fn test_push_values_skips_keys() {
        let mut registry = WeakContainerRegistry::new();
        registry.register(r(1), WeakKind::Map).unwrap();
        registry.map_set(r(1), r(2), Some(r(3))).unwrap();
        registry.map_set(r(1), r(4), None).unwrap();

        let mut stack = MarkStack::new();
        registry.push_values(r(1), &mut stack);
        assert_eq!(stack.pop(), Some(r(3)));
        assert!(stack.is_empty());
    }

    #[test]
    fn test_sweep_two_phases() {
        let mut registry = WeakContainerRegistry::new();
        registry.register(r(1), WeakKind::Map).unwrap();
        registry.register(r(10), WeakKind::Set).unwrap();
        registry.map_set(r(1), r(2), Some(r(3))).unwrap();
        registry.map_set(r(1), r(4), Some(r(5))).unwrap();
        registry.set_add(r(10), r(2)).unwrap();

        // container 1 and key 2 survive
        let marked = [r(1), r(2), r(3), r(5)];
        let summary = registry.sweep(|x| marked.contains(&x));

        assert_eq!(summary.containers_removed, 1);
        assert_eq!(summary.entries_pruned, 1);
        assert_eq!(registry.entry_count(r(1)).unwrap(), 1);
        assert_eq!(registry.map_get(r(1), r(2)).unwrap(), Some(r(3)));
        assert!(registry.entry_count(r(10)).is_err());
    }
}
