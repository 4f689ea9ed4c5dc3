//! Object shapes and the reachability model shared by the commands.

use std::collections::{HashMap, HashSet};

use mmgc::{HeapRef, PersistentId, VTable};

/// Reference fields of a [`NODE`].
pub const NODE_FIELDS: usize = 4;

/// Simulated script object: four reference fields.
pub static NODE: VTable = VTable {
    inline_values: NODE_FIELDS,
    ..VTable::new("Node", 32)
};

/// Simulated primitive payload without references.
pub static BLOB: VTable = VTable::new("Blob", 32);

/// Object graph as the mutator believes it to be.
///
/// Only [`NODE`] objects are tracked. Anything reachable from `roots` must
/// survive every collection.
#[derive(Debug, Default)]
pub struct GraphModel {
    edges: HashMap<HeapRef, [Option<HeapRef>; NODE_FIELDS]>,
    roots: HashMap<PersistentId, HeapRef>,
}

impl GraphModel {
    pub fn add_node(&mut self, node: HeapRef) {
        self.edges.insert(node, [None; NODE_FIELDS]);
    }

    pub fn set_edge(&mut self, from: HeapRef, field: usize, to: Option<HeapRef>) {
        if let Some(fields) = self.edges.get_mut(&from) {
            fields[field] = to;
        }
    }

    pub fn add_root(&mut self, id: PersistentId, node: HeapRef) {
        self.roots.insert(id, node);
    }

    pub fn remove_root(&mut self, id: PersistentId) {
        self.roots.remove(&id);
    }

    /// Root ids in a stable order
    pub fn root_ids(&self) -> Vec<PersistentId> {
        let mut ids: Vec<_> = self.roots.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Reachable nodes in a stable order
    pub fn reachable(&self) -> Vec<HeapRef> {
        let mut seen = HashSet::new();
        let mut work: Vec<HeapRef> = self.roots.values().copied().collect();
        while let Some(node) = work.pop() {
            if !seen.insert(node) {
                continue;
            }
            if let Some(fields) = self.edges.get(&node) {
                work.extend(fields.iter().flatten().copied());
            }
        }
        let mut live: Vec<_> = seen.into_iter().collect();
        live.sort();
        live
    }

    /// Forget nodes that are no longer reachable
    pub fn prune(&mut self) {
        let live: HashSet<HeapRef> = self.reachable().into_iter().collect();
        self.edges.retain(|node, _| live.contains(node));
    }
}
