//! Per-node sample buffers for approximate range queries.
//!
//! An internal node keeps a sample of its subtree once the subtree holds more
//! than twice the configured sample size. Samples are a cache: they are
//! rebuilt in bulk by [`Tree::build_all_samples`] and kept roughly uniform
//! afterwards by replacement on insert, purge on delete and replenishment
//! when a buffer drains below half its target.

use std::collections::HashSet;

use rand::seq::{index, SliceRandom};
use rand_distr::{Binomial, Distribution};

use super::tree_impl::Tree;
use super::tree_types::{IndexError, IndexResult, NodeId, NodeRef, PageId, SampleSummary};
use crate::record::{HilbertKey, Record};

fn binomial(trials: u64, probability: f64) -> IndexResult<Binomial> {
    Binomial::new(trials, probability).map_err(|e| IndexError::Sampling(e.to_string()))
}

impl Tree {
    fn is_eligible(&self, subtree_size: u64) -> bool {
        subtree_size > 2 * self.config.sample_size() as u64
    }

    /// Builds every sample buffer bottom-up and turns on incremental
    /// maintenance for later inserts and removals.
    pub fn build_all_samples(&mut self) -> IndexResult<()> {
        let root = self.root;
        let wanted = self.config.sample_size();
        self.build_samples(NodeRef::Internal(root), wanted)?;
        self.samples_enabled = true;

        let sampled = self.arena.iter().filter(|(_, n)| !n.samples.is_empty()).count();
        log::info!(
            "Built sample buffers for {} of {} internal nodes",
            sampled,
            self.arena.len()
        );
        Ok(())
    }

    /// Fills the buffers below `node` and returns up to `wanted` leftover
    /// candidates for the caller.
    fn build_samples(&mut self, node: NodeRef, wanted: usize) -> IndexResult<Vec<Record>> {
        let id = match node {
            NodeRef::Leaf(page) => return self.draw_from_leaf(page, wanted),
            NodeRef::Internal(id) => id,
        };

        let sample_size = self.config.sample_size();
        let (children, eligible) = {
            let node = self.arena.get_mut(id)?;
            node.samples.clear();
            (node.children.clone(), node.subtree_size > 2 * sample_size as u64)
        };

        let mut pool = Vec::new();
        for child in children {
            pool.extend(self.build_samples(child, sample_size)?);
        }
        pool.shuffle(&mut self.rng);

        if eligible {
            let keep = pool.len().min(sample_size);
            let node = self.arena.get_mut(id)?;
            node.samples = pool.drain(..keep).collect();
        }
        pool.truncate(wanted);
        Ok(pool)
    }

    /// `wanted` draws with replacement from a leaf's live records, indices
    /// following `Binomial(len - 1, 0.5)`.
    fn draw_from_leaf(&mut self, page: PageId, wanted: usize) -> IndexResult<Vec<Record>> {
        let leaf = self.read_leaf(page)?;
        let live: Vec<&Record> = leaf.records.iter().filter(|r| !r.is_disabled()).collect();
        if live.is_empty() || wanted == 0 {
            return Ok(Vec::new());
        }
        let law = binomial((live.len() - 1) as u64, 0.5)?;
        Ok((0..wanted)
            .map(|_| live[law.sample(&mut self.rng) as usize].clone())
            .collect())
    }

    /// Lets a freshly inserted record replace sample slots of `id`, each with
    /// probability `1 / subtree_size`.
    pub(super) fn update_sample_buffer(&mut self, id: NodeId, record: &Record) -> IndexResult<()> {
        if record.is_disabled() {
            return Ok(());
        }
        let half = self.config.sample_size() / 2;
        let (eligible, count, size) = {
            let node = self.arena.get(id)?;
            (self.is_eligible(node.subtree_size), node.samples.len(), node.subtree_size)
        };
        if !eligible {
            return Ok(());
        }
        if count < half.max(1) {
            return self.replenish(id);
        }

        let replaced = binomial(count as u64, 1.0 / size as f64)?.sample(&mut self.rng) as usize;
        if replaced == 0 {
            return Ok(());
        }
        let slots = index::sample(&mut self.rng, count, replaced.min(count));
        let node = self.arena.get_mut(id)?;
        for slot in slots.iter() {
            node.samples[slot] = record.clone();
        }
        Ok(())
    }

    /// Purges a removed record from the buffer of `id`, refilling or
    /// dropping the buffer as the node's size dictates.
    pub(super) fn remove_sample(&mut self, id: NodeId, record: &Record) -> IndexResult<()> {
        self.arena
            .get_mut(id)?
            .samples
            .retain(|sample| !sample.same_entry(record));
        self.refresh_samples(id)
    }

    /// Clears the buffer of an ineligible node and replenishes an eligible one
    /// that fell below half its target.
    pub(super) fn refresh_samples(&mut self, id: NodeId) -> IndexResult<()> {
        if !self.samples_enabled {
            return Ok(());
        }
        let half = self.config.sample_size() / 2;
        let (eligible, count) = {
            let node = self.arena.get(id)?;
            (self.is_eligible(node.subtree_size), node.samples.len())
        };
        if !eligible {
            self.arena.get_mut(id)?.samples.clear();
        } else if count < half.max(1) {
            self.replenish(id)?;
        }
        Ok(())
    }

    /// Refills the buffer of `id` up to the sample size from its children:
    /// child samples (replenishing drained ones first), all records of
    /// children too small to keep a sample, and all records of leaves.
    fn replenish(&mut self, id: NodeId) -> IndexResult<()> {
        let sample_size = self.config.sample_size();
        let half = sample_size / 2;
        let children = self.arena.get(id)?.children.clone();

        let mut pool = Vec::new();
        for child in children {
            match child {
                NodeRef::Leaf(page) => {
                    let leaf = self.read_leaf(page)?;
                    pool.extend(leaf.records.into_iter().filter(|r| !r.is_disabled()));
                }
                NodeRef::Internal(child_id) => {
                    let (eligible, count) = {
                        let node = self.arena.get(child_id)?;
                        (self.is_eligible(node.subtree_size), node.samples.len())
                    };
                    if eligible {
                        if count < half.max(1) {
                            self.replenish(child_id)?;
                        }
                        pool.extend(self.arena.get(child_id)?.samples.iter().cloned());
                    } else {
                        self.collect_live(child, &mut pool)?;
                    }
                }
            }
        }
        pool.shuffle(&mut self.rng);

        let node = self.arena.get_mut(id)?;
        let missing = sample_size.saturating_sub(node.samples.len());
        node.samples.extend(pool.into_iter().take(missing));
        log::debug!("Replenished samples of node {} to {}", id, node.samples.len());
        Ok(())
    }

    fn collect_live(&self, node: NodeRef, out: &mut Vec<Record>) -> IndexResult<()> {
        match node {
            NodeRef::Leaf(page) => {
                let leaf = self.read_leaf(page)?;
                out.extend(leaf.records.into_iter().filter(|r| !r.is_disabled()));
            }
            NodeRef::Internal(id) => {
                for child in self.arena.get(id)?.children.clone() {
                    self.collect_live(child, out)?;
                }
            }
        }
        Ok(())
    }

    /// Approximate range query: up to `k` distinct live records with key in
    /// `[low, high]`.
    ///
    /// Subtrees lying fully inside the range answer from their sample buffer;
    /// everything else is scanned. When the samples yield fewer than `k`
    /// records the exact range result tops the answer up, so a short answer
    /// means the range holds fewer than `k` records.
    pub fn sample_first_rs(
        &mut self,
        low: HilbertKey,
        high: HilbertKey,
        k: usize,
    ) -> IndexResult<Vec<Record>> {
        if k == 0 || low > high {
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();
        let root = NodeRef::Internal(self.root);
        self.collect_range_samples(root, (None, None), low, high, &mut candidates)?;

        let mut seen = HashSet::new();
        candidates.retain(|r| seen.insert(r.entry_key()));
        candidates.shuffle(&mut self.rng);
        candidates.truncate(k);

        if candidates.len() < k {
            let mut exact = self.range_query(low, high)?;
            exact.shuffle(&mut self.rng);
            for record in exact {
                if candidates.len() >= k {
                    break;
                }
                if seen.insert(record.entry_key()) {
                    candidates.push(record);
                }
            }
        }
        Ok(candidates)
    }

    fn collect_range_samples(
        &self,
        node: NodeRef,
        bounds: (Option<HilbertKey>, Option<HilbertKey>),
        low: HilbertKey,
        high: HilbertKey,
        out: &mut Vec<Record>,
    ) -> IndexResult<()> {
        let in_range = |r: &Record| !r.is_disabled() && r.hilbert() >= low && r.hilbert() <= high;

        let id = match node {
            NodeRef::Leaf(page) => {
                let leaf = self.read_leaf(page)?;
                out.extend(leaf.records.into_iter().filter(|r| in_range(r)));
                return Ok(());
            }
            NodeRef::Internal(id) => id,
        };

        let node = self.arena.get(id)?;
        let covered = bounds.0.map_or(low == HilbertKey::MIN, |b| low <= b)
            && bounds.1.map_or(high == HilbertKey::MAX, |b| b <= high);
        if covered && self.is_eligible(node.subtree_size) && !node.samples.is_empty() {
            out.extend(node.samples.iter().filter(|r| in_range(*r)).cloned());
            return Ok(());
        }

        for slot in node.search_slot(low)..=node.insert_slot(high) {
            let child_bounds = node.child_bounds(slot, bounds);
            self.collect_range_samples(node.children[slot], child_bounds, low, high, out)?;
        }
        Ok(())
    }

    /// Sample buffer of the root, `None` while the tree is too small to keep one.
    pub fn root_sample(&self) -> Option<&[Record]> {
        self.sample(self.root)
    }

    /// Sample buffer of one internal node, `None` if it keeps no sample.
    fn sample(&self, id: NodeId) -> Option<&[Record]> {
        let node = self.arena.get(id).ok()?;
        (self.is_eligible(node.subtree_size) && !node.samples.is_empty())
            .then_some(node.samples.as_slice())
    }

    /// Sample state of every internal node.
    pub fn sample_summaries(&self) -> Vec<SampleSummary> {
        self.arena
            .iter()
            .map(|(_, node)| SampleSummary {
                subtree_size: node.subtree_size,
                sample_count: node.samples.len(),
                has_sample: self.is_eligible(node.subtree_size) && !node.samples.is_empty(),
            })
            .collect()
    }
}
