//! Tuning knobs for trees and the tiered level manager.

use crate::disk_tree::tree_constants::{
    DEFAULT_CACHE_PAGES, DEFAULT_SAMPLE_SIZE, MAX_INTERNAL_KEYS, MAX_LEAF_RECORDS,
};
use crate::disk_tree::tree_types::{IndexError, IndexResult};

/// How a disk tree treats its in-memory internal levels across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RootMode {
    /// Internal nodes are never written. On open the leaf chain starting at
    /// page 0 is walked and the internal levels are rebuilt in memory.
    #[default]
    Rebuild,
    /// `flush` writes every internal node to a page together with a
    /// `root.meta` header; open loads them back.
    Persist,
}

/// Configuration of one tree.
///
/// # Examples
///
/// ```
/// use lstree::{RootMode, TreeConfig};
///
/// let config = TreeConfig::new()
///     .with_leaf_capacity(16)
///     .with_sample_size(8)
///     .with_root_mode(RootMode::Persist)
///     .with_seed(7);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TreeConfig {
    leaf_capacity: usize,
    internal_capacity: usize,
    sample_size: usize,
    cache_pages: usize,
    root_mode: RootMode,
    seed: Option<u64>,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            leaf_capacity: MAX_LEAF_RECORDS,
            internal_capacity: MAX_INTERNAL_KEYS,
            sample_size: DEFAULT_SAMPLE_SIZE,
            cache_pages: DEFAULT_CACHE_PAGES,
            root_mode: RootMode::Rebuild,
            seed: None,
        }
    }
}

impl TreeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records per leaf before it splits (2..=100).
    pub fn with_leaf_capacity(mut self, leaf_capacity: usize) -> Self {
        self.leaf_capacity = leaf_capacity;
        self
    }

    /// Separator keys per internal node before it splits (2..=15).
    pub fn with_internal_capacity(mut self, internal_capacity: usize) -> Self {
        self.internal_capacity = internal_capacity;
        self
    }

    /// Target size of every sample buffer. Nodes keep a sample only once
    /// their subtree exceeds twice this value.
    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    /// Decoded leaves kept in the LRU cache; 0 disables caching.
    pub fn with_cache_pages(mut self, cache_pages: usize) -> Self {
        self.cache_pages = cache_pages;
        self
    }

    pub fn with_root_mode(mut self, root_mode: RootMode) -> Self {
        self.root_mode = root_mode;
        self
    }

    /// Seeds the tree's random source; unseeded trees draw from entropy.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn leaf_capacity(&self) -> usize {
        self.leaf_capacity
    }

    pub fn internal_capacity(&self) -> usize {
        self.internal_capacity
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    pub fn cache_pages(&self) -> usize {
        self.cache_pages
    }

    pub fn root_mode(&self) -> RootMode {
        self.root_mode
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn validate(&self) -> IndexResult<()> {
        if !(2..=MAX_LEAF_RECORDS).contains(&self.leaf_capacity) {
            return Err(IndexError::InvalidConfig(format!(
                "leaf capacity must be in 2..={}, got {}",
                MAX_LEAF_RECORDS, self.leaf_capacity
            )));
        }
        if !(2..=MAX_INTERNAL_KEYS).contains(&self.internal_capacity) {
            return Err(IndexError::InvalidConfig(format!(
                "internal capacity must be in 2..={}, got {}",
                MAX_INTERNAL_KEYS, self.internal_capacity
            )));
        }
        if self.sample_size == 0 {
            return Err(IndexError::InvalidConfig(
                "sample size must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration of an [`LsTree`](crate::LsTree).
#[derive(Debug, Clone, PartialEq)]
pub struct LevelConfig {
    admission_probability: f64,
    max_admission_levels: Option<usize>,
    level_threshold: u64,
    level_prefix: String,
    tree: TreeConfig,
    seed: Option<u64>,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            admission_probability: 0.5,
            max_admission_levels: None,
            level_threshold: 256_000,
            level_prefix: "level".to_string(),
            tree: TreeConfig::default(),
            seed: None,
        }
    }
}

impl LevelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chance that a record admitted to one level is also admitted to the next.
    pub fn with_admission_probability(mut self, probability: f64) -> Self {
        self.admission_probability = probability;
        self
    }

    /// Upper bound on the levels after the first that one record may reach.
    pub fn with_max_admission_levels(mut self, levels: usize) -> Self {
        self.max_admission_levels = Some(levels);
        self
    }

    /// `derive_levels` keeps halving while the last level holds more than this.
    pub fn with_level_threshold(mut self, threshold: u64) -> Self {
        self.level_threshold = threshold;
        self
    }

    pub fn with_level_prefix(mut self, prefix: &str) -> Self {
        self.level_prefix = prefix.to_string();
        self
    }

    /// Configuration applied to every level and to the memory tier.
    pub fn with_tree_config(mut self, tree: TreeConfig) -> Self {
        self.tree = tree;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn admission_probability(&self) -> f64 {
        self.admission_probability
    }

    pub fn max_admission_levels(&self) -> Option<usize> {
        self.max_admission_levels
    }

    pub fn level_threshold(&self) -> u64 {
        self.level_threshold
    }

    pub fn level_prefix(&self) -> &str {
        &self.level_prefix
    }

    pub fn tree_config(&self) -> &TreeConfig {
        &self.tree
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn validate(&self) -> IndexResult<()> {
        if !(0.0..=1.0).contains(&self.admission_probability) {
            return Err(IndexError::InvalidConfig(format!(
                "admission probability must be in [0, 1], got {}",
                self.admission_probability
            )));
        }
        if self.level_prefix.is_empty() {
            return Err(IndexError::InvalidConfig(
                "level prefix must not be empty".into(),
            ));
        }
        self.tree.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_config_defaults() {
        let config = TreeConfig::default();
        assert_eq!(config.leaf_capacity(), MAX_LEAF_RECORDS);
        assert_eq!(config.internal_capacity(), MAX_INTERNAL_KEYS);
        assert_eq!(config.sample_size(), DEFAULT_SAMPLE_SIZE);
        assert_eq!(config.root_mode(), RootMode::Rebuild);
        assert!(config.seed().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tree_config_rejects_bad_capacities() {
        assert!(TreeConfig::new().with_leaf_capacity(1).validate().is_err());
        assert!(TreeConfig::new()
            .with_leaf_capacity(MAX_LEAF_RECORDS + 1)
            .validate()
            .is_err());
        assert!(TreeConfig::new()
            .with_internal_capacity(MAX_INTERNAL_KEYS + 1)
            .validate()
            .is_err());
        assert!(TreeConfig::new().with_sample_size(0).validate().is_err());
    }

    #[test]
    fn test_level_config_builder() {
        let config = LevelConfig::new()
            .with_admission_probability(0.25)
            .with_max_admission_levels(2)
            .with_level_threshold(1000)
            .with_level_prefix("tier")
            .with_seed(3);
        assert_eq!(config.admission_probability(), 0.25);
        assert_eq!(config.max_admission_levels(), Some(2));
        assert_eq!(config.level_threshold(), 1000);
        assert_eq!(config.level_prefix(), "tier");
        assert_eq!(config.seed(), Some(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_level_config_validation() {
        assert!(LevelConfig::new()
            .with_admission_probability(1.5)
            .validate()
            .is_err());
        assert!(LevelConfig::new().with_level_prefix("").validate().is_err());
        assert!(LevelConfig::new()
            .with_tree_config(TreeConfig::new().with_leaf_capacity(0))
            .validate()
            .is_err());
    }
}
