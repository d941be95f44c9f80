//! Hilbert tree implementation.
//!
//! Leaves are persisted through a [`PageStore`]; internal nodes live in a
//! [`NodeArena`] and are only written to pages in [`RootMode::Persist`].

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::arena::NodeArena;
use super::node_codec::{decode_internal, decode_leaf, encode_internal, encode_leaf};
use super::node_codec::{DiskChild, DiskInternal};
use super::page_cache::LeafCache;
use super::page_store::{DiskPageStore, MemoryPageStore, PageStore};
use super::tree_constants::ROOT_META_FILE;
use super::tree_types::{
    IndexError, IndexResult, InternalNode, LeafNode, NodeId, NodeRef, PageId, TreeMeta,
    TreeStats,
};
use crate::config::{RootMode, TreeConfig};
use crate::record::{HilbertKey, Record};

/// How an insert treats sample buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertMode {
    /// Keep sample buffers current on every insert.
    #[default]
    Incremental,
    /// Skip sample maintenance; call `build_all_samples` once loading is done.
    Bulk,
}

/// Page I/O counters
#[derive(Default)]
struct IoCounters {
    page_reads: AtomicU64,
    page_writes: AtomicU64,
}

/// An order-preserving tree keyed by Hilbert value.
///
/// A fresh tree is one empty leaf (page 0) under a keyless root. Page 0
/// stays the leftmost leaf for the life of the tree, which is what lets a
/// reopened tree rebuild its internal levels from the leaf chain alone.
pub struct Tree {
    pub(super) store: Box<dyn PageStore>,
    pub(super) cache: Mutex<LeafCache>,
    pub(super) arena: NodeArena,
    pub(super) root: NodeId,
    pub(super) config: TreeConfig,
    pub(super) rng: StdRng,
    pub(super) samples_enabled: bool,
    record_count: u64,
    counters: IoCounters,
    /// Set once the tree has a valid root; guards the flush on drop
    ready: bool,
}

impl Tree {
    /// Opens the tree stored in `directory` with default settings, creating
    /// it if the directory holds no pages.
    pub fn create(directory: impl AsRef<Path>) -> IndexResult<Self> {
        Self::open(directory, TreeConfig::default())
    }

    /// Opens (or creates) a persisted tree.
    ///
    /// Nothing but the structure needed to route keys is loaded: in rebuild
    /// mode that is one pass over the leaf chain, in persist mode the
    /// internal pages named by `root.meta`.
    pub fn open(directory: impl AsRef<Path>, config: TreeConfig) -> IndexResult<Self> {
        config.validate()?;
        let store = DiskPageStore::open(directory)?;
        let mut tree = Self::with_store(Box::new(store), config);
        tree.bootstrap()?;
        tree.ready = true;
        Ok(tree)
    }

    /// Creates a tree whose pages never leave memory.
    pub fn in_memory(config: TreeConfig) -> IndexResult<Self> {
        config.validate()?;
        let mut tree = Self::with_store(Box::new(MemoryPageStore::new()), config);
        tree.init_empty()?;
        tree.ready = true;
        Ok(tree)
    }

    fn with_store(store: Box<dyn PageStore>, config: TreeConfig) -> Self {
        let rng = match config.seed() {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            store,
            cache: Mutex::new(LeafCache::new(config.cache_pages())),
            arena: NodeArena::new(),
            root: NodeId(0),
            config,
            rng,
            samples_enabled: false,
            record_count: 0,
            counters: IoCounters::default(),
            ready: false,
        }
    }

    fn bootstrap(&mut self) -> IndexResult<()> {
        let meta_path = self.store.directory().map(|dir| dir.join(ROOT_META_FILE));
        let has_meta = meta_path.as_ref().is_some_and(|path| path.is_file());

        if self.config.root_mode() == RootMode::Persist && has_meta {
            if let Some(path) = meta_path {
                return self.load_persisted(&path);
            }
        }
        if self.store.contains(0) {
            if has_meta {
                log::debug!("Ignoring {} in rebuild mode", ROOT_META_FILE);
            }
            return self.rebuild_from_leaves();
        }
        self.init_empty()
    }

    fn init_empty(&mut self) -> IndexResult<()> {
        let page = self.store.allocate();
        self.write_leaf(page, &LeafNode::new())?;
        self.arena.clear();
        self.root = self
            .arena
            .alloc(InternalNode::new(Vec::new(), vec![NodeRef::Leaf(page)], 0));
        self.record_count = 0;
        Ok(())
    }

    // ========================================================================
    // Page access
    // ========================================================================

    /// Reads a leaf through the cache.
    pub(super) fn read_leaf(&self, page_id: PageId) -> IndexResult<LeafNode> {
        if let Some(leaf) = self.cache.lock().get(page_id) {
            return Ok(leaf);
        }
        let leaf = self.load_leaf(page_id)?;
        self.cache.lock().put(page_id, leaf.clone());
        Ok(leaf)
    }

    /// Reads a leaf straight from the page store, bypassing the cache.
    fn load_leaf(&self, page_id: PageId) -> IndexResult<LeafNode> {
        let bytes = self.store.read(page_id)?;
        self.counters.page_reads.fetch_add(1, Ordering::Relaxed);
        decode_leaf(page_id, &bytes)
    }

    fn write_leaf(&mut self, page_id: PageId, leaf: &LeafNode) -> IndexResult<()> {
        let bytes = encode_leaf(leaf)?;
        self.store.write(page_id, &bytes)?;
        self.counters.page_writes.fetch_add(1, Ordering::Relaxed);
        self.cache.lock().put(page_id, leaf.clone());
        Ok(())
    }

    /// Records stored below a child slot.
    pub(super) fn child_size(&self, child: NodeRef) -> IndexResult<u64> {
        match child {
            NodeRef::Leaf(page) => Ok(self.read_leaf(page)?.len() as u64),
            NodeRef::Internal(id) => Ok(self.arena.get(id)?.subtree_size),
        }
    }

    // ========================================================================
    // Insert
    // ========================================================================

    /// Inserts `record` under `key`, maintaining sample buffers once they
    /// have been built.
    pub fn insert(&mut self, key: HilbertKey, record: Record) -> IndexResult<()> {
        self.insert_with_mode(key, record, InsertMode::Incremental)
    }

    pub fn insert_with_mode(
        &mut self,
        key: HilbertKey,
        record: Record,
        mode: InsertMode,
    ) -> IndexResult<()> {
        if key != record.hilbert() {
            return Err(IndexError::InvalidOperation(format!(
                "Key {} does not match record key {}",
                key,
                record.hilbert()
            )));
        }

        let root = self.root;
        if let Some((separator, right)) = self.insert_into(root, record, mode)? {
            let left_size = self.arena.get(root)?.subtree_size;
            let right_size = self.child_size(right)?;
            let new_root = InternalNode::new(
                vec![separator],
                vec![NodeRef::Internal(root), right],
                left_size + right_size,
            );
            self.root = self.arena.alloc(new_root);
            log::debug!(
                "Root grew to height {} (separator {})",
                self.height()?,
                separator
            );
            if self.samples_enabled {
                self.refresh_samples(self.root)?;
            }
        }
        self.record_count += 1;
        Ok(())
    }

    fn insert_into(
        &mut self,
        node_id: NodeId,
        record: Record,
        mode: InsertMode,
    ) -> IndexResult<Option<(HilbertKey, NodeRef)>> {
        let (slot, child) = {
            let node = self.arena.get_mut(node_id)?;
            node.subtree_size += 1;
            let slot = node.insert_slot(record.hilbert());
            (slot, node.children[slot])
        };

        let maintain = self.samples_enabled && mode == InsertMode::Incremental;
        let sampled = maintain.then(|| record.clone());

        let promoted = match child {
            NodeRef::Leaf(page) => self.insert_into_leaf(page, record)?,
            NodeRef::Internal(child_id) => self.insert_into(child_id, record, mode)?,
        };

        if let Some(record) = sampled {
            self.update_sample_buffer(node_id, &record)?;
        }

        match promoted {
            None => Ok(None),
            Some((separator, right)) => self.insert_separator(node_id, slot, separator, right),
        }
    }

    fn insert_into_leaf(
        &mut self,
        page_id: PageId,
        record: Record,
    ) -> IndexResult<Option<(HilbertKey, NodeRef)>> {
        let mut leaf = self.read_leaf(page_id)?;
        leaf.insert_sorted(record);

        if leaf.len() <= self.config.leaf_capacity() {
            self.write_leaf(page_id, &leaf)?;
            return Ok(None);
        }

        // split by position: low half stays, high half moves to a new page
        let mid = leaf.len() / 2;
        let new_page = self.store.allocate();
        let right = LeafNode {
            records: leaf.records.split_off(mid),
            next_leaf: leaf.next_leaf,
        };
        leaf.next_leaf = Some(new_page);
        let separator = right.records[0].hilbert();

        self.write_leaf(new_page, &right)?;
        self.write_leaf(page_id, &leaf)?;
        log::debug!(
            "Split leaf {} into {} + {} (separator {})",
            page_id,
            page_id,
            new_page,
            separator
        );
        Ok(Some((separator, NodeRef::Leaf(new_page))))
    }

    fn insert_separator(
        &mut self,
        node_id: NodeId,
        slot: usize,
        separator: HilbertKey,
        right: NodeRef,
    ) -> IndexResult<Option<(HilbertKey, NodeRef)>> {
        let capacity = self.config.internal_capacity();
        let node = self.arena.get_mut(node_id)?;
        node.keys.insert(slot, separator);
        node.children.insert(slot + 1, right);
        if node.keys.len() <= capacity {
            return Ok(None);
        }
        self.split_internal(node_id).map(Some)
    }

    fn split_internal(&mut self, node_id: NodeId) -> IndexResult<(HilbertKey, NodeRef)> {
        // equal keys may straddle the promoted key; both halves refill from
        // their own children
        let (promoted, right_keys, right_children) = {
            let node = self.arena.get_mut(node_id)?;
            let mid = node.keys.len() / 2;
            let promoted = node.keys[mid];
            let right_keys = node.keys.split_off(mid + 1);
            node.keys.truncate(mid);
            let right_children = node.children.split_off(mid + 1);
            node.samples.clear();
            (promoted, right_keys, right_children)
        };

        let mut right_size = 0;
        for child in &right_children {
            right_size += self.child_size(*child)?;
        }

        let left_size = {
            let node = self.arena.get_mut(node_id)?;
            node.subtree_size = node.subtree_size.saturating_sub(right_size);
            node.subtree_size
        };
        let right_id = self
            .arena
            .alloc(InternalNode::new(right_keys, right_children, right_size));

        log::debug!(
            "Split internal node {} into {} + {} (promoted {}, sizes {}/{})",
            node_id,
            node_id,
            right_id,
            promoted,
            left_size,
            right_size
        );

        self.refresh_samples(node_id)?;
        self.refresh_samples(right_id)?;
        Ok((promoted, NodeRef::Internal(right_id)))
    }

    // ========================================================================
    // Remove
    // ========================================================================

    /// Removes the first record stored under `key`. Returns false if none.
    pub fn remove(&mut self, key: HilbertKey) -> IndexResult<bool> {
        Ok(self.remove_entry(key, None)?.is_some())
    }

    /// Removes the record matching `record` by key and identifier.
    pub fn remove_record(&mut self, record: &Record) -> IndexResult<bool> {
        Ok(self
            .remove_entry(record.hilbert(), Some(record.id()))?
            .is_some())
    }

    fn remove_entry(&mut self, key: HilbertKey, id: Option<&str>) -> IndexResult<Option<Record>> {
        let root = self.root;
        let removed = self.remove_from(root, key, id)?;
        if removed.is_some() {
            self.record_count = self.record_count.saturating_sub(1);
            self.collapse_root()?;
        }
        Ok(removed)
    }

    fn remove_from(
        &mut self,
        node_id: NodeId,
        key: HilbertKey,
        id: Option<&str>,
    ) -> IndexResult<Option<Record>> {
        let (first, last) = {
            let node = self.arena.get(node_id)?;
            (node.search_slot(key), node.insert_slot(key))
        };

        for slot in first..=last {
            let child = self.arena.get(node_id)?.children[slot];
            let removed = match child {
                NodeRef::Leaf(page) => self.remove_from_leaf(page, key, id)?,
                NodeRef::Internal(child_id) => self.remove_from(child_id, key, id)?,
            };
            let Some(record) = removed else {
                continue;
            };

            if let NodeRef::Internal(child_id) = child {
                self.fold_child(node_id, slot, child_id)?;
            }
            {
                let node = self.arena.get_mut(node_id)?;
                node.subtree_size = node.subtree_size.saturating_sub(1);
            }
            if self.samples_enabled {
                self.remove_sample(node_id, &record)?;
            }
            return Ok(Some(record));
        }
        Ok(None)
    }

    fn remove_from_leaf(
        &mut self,
        page_id: PageId,
        key: HilbertKey,
        id: Option<&str>,
    ) -> IndexResult<Option<Record>> {
        let mut leaf = self.read_leaf(page_id)?;
        let position = leaf
            .records
            .iter()
            .position(|r| r.hilbert() == key && id.map_or(true, |id| r.id() == id));
        match position {
            Some(index) => {
                let record = leaf.records.remove(index);
                self.write_leaf(page_id, &leaf)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Replaces a keyless single-child internal node by its only child.
    fn fold_child(&mut self, parent: NodeId, slot: usize, child: NodeId) -> IndexResult<()> {
        let grandchild = {
            let node = self.arena.get(child)?;
            if !node.keys.is_empty() || node.children.len() != 1 {
                return Ok(());
            }
            node.children[0]
        };
        self.arena.get_mut(parent)?.children[slot] = grandchild;
        self.arena.release(child)?;
        log::debug!("Folded node {} into its parent {}", child, parent);
        Ok(())
    }

    fn collapse_root(&mut self) -> IndexResult<()> {
        loop {
            let only_child = {
                let root = self.arena.get(self.root)?;
                match root.children.as_slice() {
                    [NodeRef::Internal(child)] if root.keys.is_empty() => *child,
                    _ => return Ok(()),
                }
            };
            self.arena.release(self.root)?;
            log::debug!("Root collapsed into node {}", only_child);
            self.root = only_child;
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Returns every live record with key in `[low, high]`, in key order.
    pub fn range_query(&self, low: HilbertKey, high: HilbertKey) -> IndexResult<Vec<Record>> {
        let mut results = Vec::new();
        if low > high {
            return Ok(results);
        }

        let mut page = Some(self.find_leaf(low)?);
        while let Some(page_id) = page {
            let leaf = self.read_leaf(page_id)?;
            for record in &leaf.records {
                if record.hilbert() > high {
                    return Ok(results);
                }
                if record.hilbert() >= low && !record.is_disabled() {
                    results.push(record.clone());
                }
            }
            page = leaf.next_leaf;
        }
        Ok(results)
    }

    /// First leaf whose partition could hold `key`.
    fn find_leaf(&self, key: HilbertKey) -> IndexResult<PageId> {
        let mut node_id = self.root;
        loop {
            let node = self.arena.get(node_id)?;
            match node.children[node.search_slot(key)] {
                NodeRef::Leaf(page) => return Ok(page),
                NodeRef::Internal(child) => node_id = child,
            }
        }
    }

    fn first_leaf(&self) -> IndexResult<PageId> {
        let mut node_id = self.root;
        loop {
            match self.arena.get(node_id)?.children[0] {
                NodeRef::Leaf(page) => return Ok(page),
                NodeRef::Internal(child) => node_id = child,
            }
        }
    }

    /// Reads every stored record (tombstones included) in key order by
    /// walking the leaf chain through the page store.
    pub fn scan_leaves(&self) -> IndexResult<Vec<Record>> {
        let mut records = Vec::with_capacity(self.record_count as usize);
        let mut page = Some(self.first_leaf()?);
        let mut visited = 0;
        while let Some(page_id) = page {
            visited += 1;
            if visited > self.store.next_page_id() {
                return Err(IndexError::CorruptedPage {
                    page: page_id,
                    reason: "leaf chain contains a cycle".into(),
                });
            }
            let leaf = self.load_leaf(page_id)?;
            records.extend(leaf.records);
            page = leaf.next_leaf;
        }
        Ok(records)
    }

    /// Inserts a stream of records in bulk mode, then builds all samples.
    /// Returns the number of records loaded.
    pub fn bulk_load<I>(&mut self, records: I) -> IndexResult<usize>
    where
        I: IntoIterator<Item = Record>,
    {
        let mut loaded = 0;
        let mut out_of_order = 0;
        let mut previous: Option<HilbertKey> = None;

        for record in records {
            let key = record.hilbert();
            if previous.is_some_and(|p| key < p) {
                out_of_order += 1;
            }
            previous = Some(key);
            self.insert_with_mode(key, record, InsertMode::Bulk)?;
            loaded += 1;
        }

        if out_of_order > 0 {
            log::warn!(
                "Bulk load received {} out-of-order keys; input should be sorted by Hilbert key",
                out_of_order
            );
        }
        self.build_all_samples()?;
        log::info!("Bulk loaded {} records (height {})", loaded, self.height()?);
        Ok(loaded)
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Number of records stored, tombstones included.
    pub fn len(&self) -> u64 {
        self.record_count
    }

    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    /// Levels from root to leaves, counting the leaf level.
    pub fn height(&self) -> IndexResult<u32> {
        let mut height = 1;
        let mut node_id = self.root;
        loop {
            height += 1;
            match self.arena.get(node_id)?.children[0] {
                NodeRef::Leaf(_) => return Ok(height),
                NodeRef::Internal(child) => node_id = child,
            }
        }
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Directory holding the pages, `None` for in-memory trees.
    pub fn directory(&self) -> Option<&Path> {
        self.store.directory()
    }

    pub fn stats(&self) -> TreeStats {
        let cache = self.cache.lock();
        TreeStats {
            total_records: self.record_count,
            tree_height: self.height().unwrap_or(0),
            internal_nodes: self.arena.len() as u64,
            cached_pages: cache.len() as u64,
            cache_hits: cache.hits(),
            cache_misses: cache.misses(),
            page_reads: self.counters.page_reads.load(Ordering::Relaxed),
            page_writes: self.counters.page_writes.load(Ordering::Relaxed),
        }
    }

    /// Breadth-first dump of the tree, one line per level.
    pub fn print_tree(&self) -> IndexResult<String> {
        let mut out = String::new();
        let mut queue = VecDeque::from([(NodeRef::Internal(self.root), 0usize)]);
        let mut current_level = usize::MAX;

        while let Some((node, level)) = queue.pop_front() {
            if level != current_level {
                if current_level != usize::MAX {
                    out.push('\n');
                }
                out.push_str(&format!("Level {}:", level));
                current_level = level;
            }
            match node {
                NodeRef::Internal(id) => {
                    let node = self.arena.get(id)?;
                    out.push_str(&format!(" {:?}", node.keys));
                    queue.extend(node.children.iter().map(|c| (*c, level + 1)));
                }
                NodeRef::Leaf(page) => {
                    let leaf = self.read_leaf(page)?;
                    let keys: Vec<HilbertKey> = leaf.records.iter().map(|r| r.hilbert()).collect();
                    out.push_str(&format!(" p{}{:?}", page, keys));
                }
            }
        }
        out.push('\n');
        Ok(out)
    }

    // ========================================================================
    // Reopen
    // ========================================================================

    /// Rebuilds the internal levels bottom-up from the leaf chain at page 0.
    fn rebuild_from_leaves(&mut self) -> IndexResult<()> {
        // (min key, child, records below)
        let mut entries: Vec<(HilbertKey, NodeRef, u64)> = Vec::new();
        let mut record_count = 0;
        let mut page = Some(0);
        let mut visited = 0;

        while let Some(page_id) = page {
            visited += 1;
            if visited > self.store.next_page_id() {
                return Err(IndexError::CorruptedPage {
                    page: page_id,
                    reason: "leaf chain contains a cycle".into(),
                });
            }
            let leaf = self.load_leaf(page_id)?;
            record_count += leaf.len() as u64;
            // empty leaves stay chained but no longer receive inserts
            if page_id == 0 || !leaf.is_empty() {
                let min_key = leaf.records.first().map_or(0, |r| r.hilbert());
                entries.push((min_key, NodeRef::Leaf(page_id), leaf.len() as u64));
            }
            page = leaf.next_leaf;
        }

        let fanout = self.config.internal_capacity() + 1;
        self.arena.clear();
        loop {
            let groups = entries.len().div_ceil(fanout);
            let base = entries.len() / groups;
            let extra = entries.len() % groups;
            let mut remaining = entries.into_iter();
            let mut next = Vec::with_capacity(groups);

            for group in 0..groups {
                let take = base + usize::from(group < extra);
                let chunk: Vec<_> = remaining.by_ref().take(take).collect();
                let min_key = chunk[0].0;
                let keys = chunk[1..].iter().map(|e| e.0).collect();
                let children = chunk.iter().map(|e| e.1).collect();
                let size = chunk.iter().map(|e| e.2).sum();
                let id = self.arena.alloc(InternalNode::new(keys, children, size));
                next.push((min_key, NodeRef::Internal(id), size));
            }

            entries = next;
            if entries.len() == 1 {
                break;
            }
        }

        self.root = entries[0]
            .1
            .as_node_id()
            .ok_or_else(|| IndexError::InvalidOperation("rebuilt root is not internal".into()))?;
        self.record_count = record_count;
        log::debug!(
            "Rebuilt {} internal nodes over {} records (height {})",
            self.arena.len(),
            record_count,
            self.height()?
        );
        Ok(())
    }

    fn load_persisted(&mut self, meta_path: &Path) -> IndexResult<()> {
        let bytes = fs::read(meta_path)?;
        let (meta, _): (TreeMeta, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::legacy())
                .map_err(|e| IndexError::Serialization(e.to_string()))?;
        meta.validate()?;

        if meta.leaf_capacity as usize != self.config.leaf_capacity()
            || meta.internal_capacity as usize != self.config.internal_capacity()
        {
            log::warn!(
                "Tree was written with capacities {}/{}, reopening with {}/{}",
                meta.leaf_capacity,
                meta.internal_capacity,
                self.config.leaf_capacity(),
                self.config.internal_capacity()
            );
        }

        self.arena.clear();
        self.root = self.load_internal(meta.root_page, 0)?;
        self.record_count = meta.record_count;
        log::debug!(
            "Loaded {} persisted internal nodes, root page {}",
            self.arena.len(),
            meta.root_page
        );
        Ok(())
    }

    fn load_internal(&mut self, page_id: PageId, depth: usize) -> IndexResult<NodeId> {
        if depth > 64 {
            return Err(IndexError::CorruptedPage {
                page: page_id,
                reason: "internal nodes nest too deeply".into(),
            });
        }
        let bytes = self.store.read(page_id)?;
        self.counters.page_reads.fetch_add(1, Ordering::Relaxed);
        let disk = decode_internal(page_id, &bytes)?;

        let mut children = Vec::with_capacity(disk.children.len());
        for child in disk.children {
            children.push(match child {
                DiskChild::Leaf(page) => NodeRef::Leaf(page),
                DiskChild::Internal(page) => NodeRef::Internal(self.load_internal(page, depth + 1)?),
            });
        }
        let mut node = InternalNode::new(disk.keys, children, disk.subtree_size);
        node.page = Some(page_id);
        Ok(self.arena.alloc(node))
    }

    // ========================================================================
    // Flush
    // ========================================================================

    /// Writes internal nodes and `root.meta` in persist mode; a no-op otherwise
    /// since leaves are written through on every change.
    pub fn flush(&mut self) -> IndexResult<()> {
        if !self.ready || self.config.root_mode() != RootMode::Persist {
            return Ok(());
        }
        let Some(meta_path) = self.store.directory().map(|dir| dir.join(ROOT_META_FILE)) else {
            return Ok(());
        };

        let root_page = self.persist_internal(self.root)?;
        let mut meta = TreeMeta::new(root_page, self.first_leaf()?, self.record_count);
        meta.leaf_capacity = self.config.leaf_capacity() as u32;
        meta.internal_capacity = self.config.internal_capacity() as u32;

        let bytes = bincode::serde::encode_to_vec(&meta, bincode::config::legacy())
            .map_err(|e| IndexError::Serialization(e.to_string()))?;
        fs::write(meta_path, bytes)?;
        log::debug!("Flushed tree, root page {}", root_page);
        Ok(())
    }

    // children first, so every child page id is known when the parent is encoded
    fn persist_internal(&mut self, node_id: NodeId) -> IndexResult<PageId> {
        let children = self.arena.get(node_id)?.children.clone();
        let mut disk_children = Vec::with_capacity(children.len());
        for child in children {
            disk_children.push(match child {
                NodeRef::Leaf(page) => DiskChild::Leaf(page),
                NodeRef::Internal(id) => DiskChild::Internal(self.persist_internal(id)?),
            });
        }

        let page = match self.arena.get(node_id)?.page {
            Some(page) => page,
            None => {
                let page = self.store.allocate();
                self.arena.get_mut(node_id)?.page = Some(page);
                page
            }
        };

        let node = self.arena.get(node_id)?;
        let bytes = encode_internal(&DiskInternal {
            keys: node.keys.clone(),
            children: disk_children,
            subtree_size: node.subtree_size,
        })?;
        self.store.write(page, &bytes)?;
        self.counters.page_writes.fetch_add(1, Ordering::Relaxed);
        Ok(page)
    }
}

// ============================================================================
// Drop Implementation
// ============================================================================

impl Drop for Tree {
    fn drop(&mut self) {
        // Best effort flush on drop
        if let Err(e) = self.flush() {
            log::warn!("Failed to flush tree on drop: {}", e);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
