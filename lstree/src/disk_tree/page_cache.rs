//! LRU cache of decoded leaves.
//!
//! Write-through: the tree always writes a leaf to its page store before
//! refreshing the cached copy, so evictions never lose data.

use std::num::NonZeroUsize;

use lru::LruCache;

use super::tree_types::{LeafNode, PageId};

pub struct LeafCache {
    // None when caching is disabled
    entries: Option<LruCache<PageId, LeafNode>>,
    hits: u64,
    misses: u64,
}

impl LeafCache {
    /// Creates a cache holding up to `capacity` leaves; 0 disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(LruCache::new),
            hits: 0,
            misses: 0,
        }
    }

    /// Looks up a leaf and marks it most recently used.
    pub fn get(&mut self, page_id: PageId) -> Option<LeafNode> {
        let found = self
            .entries
            .as_mut()
            .and_then(|entries| entries.get(&page_id).cloned());
        if found.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        found
    }

    pub fn put(&mut self, page_id: PageId, leaf: LeafNode) {
        if let Some(entries) = self.entries.as_mut() {
            entries.put(page_id, leaf);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |entries| entries.len())
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;

    fn leaf_with(key: u64) -> LeafNode {
        LeafNode {
            records: vec![Record::new("r", 0.0, 0.0, "", key)],
            next_leaf: None,
        }
    }

    #[test]
    fn test_cache_hit_and_miss() {
        let mut cache = LeafCache::new(2);
        assert!(cache.get(1).is_none());
        cache.put(1, leaf_with(10));
        assert_eq!(cache.get(1).unwrap().records[0].hilbert(), 10);
        assert_eq!((cache.hits(), cache.misses()), (1, 1));
    }

    #[test]
    fn test_cache_evicts_least_recently_used() {
        let mut cache = LeafCache::new(2);
        cache.put(1, leaf_with(1));
        cache.put(2, leaf_with(2));
        cache.get(1);
        cache.put(3, leaf_with(3));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(2).is_none());
        assert!(cache.get(1).is_some());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn test_disabled_cache() {
        let mut cache = LeafCache::new(0);
        cache.put(1, leaf_with(1));
        assert_eq!(cache.len(), 0);
        assert!(cache.get(1).is_none());
    }
}
