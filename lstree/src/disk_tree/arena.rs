//! Slot arena owning the in-memory internal nodes of a tree.
//!
//! Handles are plain indices. A released slot is recycled by the next
//! allocation; looking up a released handle is an error, never a stale read.

use super::tree_types::{IndexError, IndexResult, InternalNode, NodeId};

#[derive(Debug, Default)]
pub struct NodeArena {
    slots: Vec<Option<InternalNode>>,
    free: Vec<usize>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, node: InternalNode) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(node);
                NodeId(index)
            }
            None => {
                self.slots.push(Some(node));
                NodeId(self.slots.len() - 1)
            }
        }
    }

    pub fn get(&self, id: NodeId) -> IndexResult<&InternalNode> {
        self.slots
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(IndexError::DanglingNode(id))
    }

    pub fn get_mut(&mut self, id: NodeId) -> IndexResult<&mut InternalNode> {
        self.slots
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(IndexError::DanglingNode(id))
    }

    /// Frees the slot and hands back the node it held.
    pub fn release(&mut self, id: NodeId) -> IndexResult<InternalNode> {
        let node = self
            .slots
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or(IndexError::DanglingNode(id))?;
        self.free.push(id.0);
        Ok(node)
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }

    /// Live nodes with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &InternalNode)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|node| (NodeId(index), node)))
    }
}
