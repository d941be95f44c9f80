//! Paged Hilbert tree with hybrid addressing.
//!
//! This module provides an order-preserving B+-tree over Hilbert keys:
//! - Leaves are fixed-size pages read and written one at a time
//! - Internal nodes live in an in-memory arena and route by separator key
//! - An LRU cache keeps hot leaves decoded
//! - Internal nodes optionally carry sample buffers for approximate queries
//!
//! Leaves are never merged or rebalanced on delete; a leaf may drain to zero
//! records and stays in the leaf chain.

pub mod arena;
pub mod node_codec;
pub mod page_cache;
pub mod page_store;
pub mod tree_constants;
pub mod tree_types;
mod samples;
mod tree_impl;

pub use page_store::{DiskPageStore, MemoryPageStore, PageStore};
pub use tree_constants::{DEFAULT_CACHE_PAGES, DEFAULT_SAMPLE_SIZE, PAGE_SIZE};
pub use tree_impl::{InsertMode, Tree};
pub use tree_types::{
    IndexError, IndexResult, InternalNode, LeafNode, NodeId, NodeRef, PageId, SampleSummary,
    TreeMeta, TreeStats,
};
