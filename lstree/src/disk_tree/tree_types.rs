//! Core types for the paged Hilbert tree.
//!
//! This module defines:
//! - Error and result types
//! - Page and node identifiers, and the `NodeRef` child slot
//! - Leaf and internal node representations
//! - Statistics and the persisted root metadata

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

use super::tree_constants::{META_MAGIC, META_VERSION};
use crate::record::{HilbertKey, Record};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur in index operations
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupted page {page}: {reason}")]
    CorruptedPage { page: PageId, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Dangling node reference {0}")]
    DanglingNode(NodeId),

    #[error("Sampling error: {0}")]
    Sampling(String),
}

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;

// ============================================================================
// Identifiers
// ============================================================================

/// Page ID - identifies one fixed-size block in a page store
pub type PageId = u64;

/// Handle of an internal node living in the tree's node arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A child slot of an internal node.
///
/// Leaves are always persisted and addressed by page id; internal nodes
/// always live in memory and are addressed by arena handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRef {
    Leaf(PageId),
    Internal(NodeId),
}

impl NodeRef {
    pub fn from_page_id(page_id: PageId) -> Self {
        NodeRef::Leaf(page_id)
    }

    pub fn is_persisted(&self) -> bool {
        matches!(self, NodeRef::Leaf(_))
    }

    pub fn as_page_id(&self) -> Option<PageId> {
        match self {
            NodeRef::Leaf(page_id) => Some(*page_id),
            NodeRef::Internal(_) => None,
        }
    }

    pub fn as_node_id(&self) -> Option<NodeId> {
        match self {
            NodeRef::Internal(id) => Some(*id),
            NodeRef::Leaf(_) => None,
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRef::Leaf(page_id) => write!(f, "page {}", page_id),
            NodeRef::Internal(id) => write!(f, "node {}", id),
        }
    }
}

// ============================================================================
// Node Types
// ============================================================================

/// A leaf: records sorted by Hilbert key plus the link to the next leaf
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeafNode {
    pub records: Vec<Record>,
    pub next_leaf: Option<PageId>,
}

impl LeafNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Inserts keeping key order; equal keys stay in insertion order.
    pub fn insert_sorted(&mut self, record: Record) {
        let key = record.hilbert();
        let mut pos = self.records.len();
        while pos > 0 && self.records[pos - 1].hilbert() > key {
            pos -= 1;
        }
        self.records.insert(pos, record);
    }
}

/// An in-memory internal node.
#[derive(Debug, Clone, Default)]
pub struct InternalNode {
    pub keys: Vec<HilbertKey>,
    pub children: Vec<NodeRef>,
    /// Number of records stored below this node
    pub subtree_size: u64,
    /// Approximate-query sample of the subtree (a cache, may be stale)
    pub samples: Vec<Record>,
    /// Page holding this node in persisted-root mode
    pub page: Option<PageId>,
}

impl InternalNode {
    pub fn new(keys: Vec<HilbertKey>, children: Vec<NodeRef>, subtree_size: u64) -> Self {
        Self {
            keys,
            children,
            subtree_size,
            samples: Vec::new(),
            page: None,
        }
    }

    /// Child slot for inserting `key`: the first separator greater than it.
    pub fn insert_slot(&self, key: HilbertKey) -> usize {
        self.keys.partition_point(|k| *k <= key)
    }

    /// First child slot whose partition could hold `key`.
    pub fn search_slot(&self, key: HilbertKey) -> usize {
        self.keys.partition_point(|k| *k < key)
    }

    /// Key interval `[low, high]` of the child at `slot`, given this node's
    /// own interval. `None` means unbounded.
    pub fn child_bounds(
        &self,
        slot: usize,
        bounds: (Option<HilbertKey>, Option<HilbertKey>),
    ) -> (Option<HilbertKey>, Option<HilbertKey>) {
        let low = if slot == 0 {
            bounds.0
        } else {
            Some(self.keys[slot - 1])
        };
        let high = if slot == self.keys.len() {
            bounds.1
        } else {
            Some(self.keys[slot])
        };
        (low, high)
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Statistics about tree operations
#[derive(Debug, Clone, Default)]
pub struct TreeStats {
    pub total_records: u64,
    pub tree_height: u32,
    pub internal_nodes: u64,
    pub cached_pages: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub page_reads: u64,
    pub page_writes: u64,
}

/// Sample buffer state of one internal node, reported for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleSummary {
    pub subtree_size: u64,
    pub sample_count: usize,
    pub has_sample: bool,
}

// ============================================================================
// Root Metadata
// ============================================================================

/// Header written to `root.meta` in persisted-root mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeMeta {
    pub magic: u32,
    pub version: u32,
    pub root_page: PageId,
    pub first_leaf: PageId,
    pub record_count: u64,
    pub leaf_capacity: u32,
    pub internal_capacity: u32,
}

impl TreeMeta {
    pub fn new(root_page: PageId, first_leaf: PageId, record_count: u64) -> Self {
        Self {
            magic: META_MAGIC,
            version: META_VERSION,
            root_page,
            first_leaf,
            record_count,
            leaf_capacity: 0,
            internal_capacity: 0,
        }
    }

    pub fn validate(&self) -> IndexResult<()> {
        if self.magic != META_MAGIC {
            return Err(IndexError::Serialization(
                "Invalid root metadata (bad magic)".into(),
            ));
        }
        if self.version != META_VERSION {
            return Err(IndexError::Serialization(
                "Unsupported root metadata version".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(key: HilbertKey, id: &str) -> Record {
        Record::new(id, 0.0, 0.0, "", key)
    }

    #[test]
    fn test_node_ref_dispatch() {
        let leaf = NodeRef::from_page_id(7);
        assert!(leaf.is_persisted());
        assert_eq!(leaf.as_page_id(), Some(7));
        assert_eq!(leaf.as_node_id(), None);

        let internal = NodeRef::Internal(NodeId(3));
        assert!(!internal.is_persisted());
        assert_eq!(internal.as_page_id(), None);
        assert_eq!(internal.as_node_id(), Some(NodeId(3)));
    }

    #[test]
    fn test_leaf_insert_sorted_is_stable() {
        let mut leaf = LeafNode::new();
        leaf.insert_sorted(rec(5, "a"));
        leaf.insert_sorted(rec(1, "b"));
        leaf.insert_sorted(rec(5, "c"));
        leaf.insert_sorted(rec(3, "d"));
        let ids: Vec<_> = leaf.records.iter().map(|r| r.id().to_string()).collect();
        assert_eq!(ids, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_internal_slots() {
        let node = InternalNode::new(
            vec![10, 20],
            vec![NodeRef::Leaf(0), NodeRef::Leaf(1), NodeRef::Leaf(2)],
            0,
        );
        assert_eq!(node.insert_slot(5), 0);
        assert_eq!(node.insert_slot(10), 1);
        assert_eq!(node.insert_slot(25), 2);
        assert_eq!(node.search_slot(10), 0);
        assert_eq!(node.search_slot(11), 1);
        assert_eq!(node.search_slot(20), 1);
    }

    #[test]
    fn test_child_bounds() {
        let node = InternalNode::new(
            vec![10, 20],
            vec![NodeRef::Leaf(0), NodeRef::Leaf(1), NodeRef::Leaf(2)],
            0,
        );
        assert_eq!(node.child_bounds(0, (None, None)), (None, Some(10)));
        assert_eq!(node.child_bounds(1, (None, None)), (Some(10), Some(20)));
        assert_eq!(node.child_bounds(2, (Some(1), Some(99))), (Some(20), Some(99)));
    }

    #[test]
    fn test_meta_validate() {
        let meta = TreeMeta::new(3, 0, 10);
        assert!(meta.validate().is_ok());
        let bad = TreeMeta { magic: 1, ..meta };
        assert!(bad.validate().is_err());
    }
}
