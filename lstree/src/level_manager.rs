//! Tiered collection of Hilbert trees (LS-tree).
//!
//! Levels are independent disk trees kept in creation order. Every record
//! lands in the first level and is copied into later levels by repeated coin
//! flips, so each level is roughly a random subset of the one before. The
//! last level can be promoted wholesale into a memory-resident tier which is
//! probed first on every query.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::config::{LevelConfig, TreeConfig};
use crate::disk_tree::{IndexError, IndexResult, InsertMode, Tree};
use crate::record::{HilbertKey, Record};

/// Smallest and largest key ever inserted into a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange {
    pub min: HilbertKey,
    pub max: HilbertKey,
}

impl KeyRange {
    pub fn new(min: HilbertKey, max: HilbertKey) -> Self {
        Self { min, max }
    }

    fn widen(range: &mut Option<KeyRange>, key: HilbertKey) {
        *range = Some(match *range {
            Some(r) => KeyRange::new(r.min.min(key), r.max.max(key)),
            None => KeyRange::new(key, key),
        });
    }

    pub fn overlaps(&self, low: HilbertKey, high: HilbertKey) -> bool {
        self.min <= high && low <= self.max
    }
}

/// One disk level and its key summary.
pub struct Level {
    tree: Tree,
    range: Option<KeyRange>,
}

impl Level {
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn range(&self) -> Option<KeyRange> {
        self.range
    }
}

enum Stage {
    Disk(String),
    Memory,
}

/// Levels of Hilbert trees under one base directory plus a memory tier.
pub struct LsTree {
    base_directory: PathBuf,
    levels: IndexMap<String, Level>,
    memory: Tree,
    memory_range: Option<KeyRange>,
    memory_populated: bool,
    config: LevelConfig,
    rng: StdRng,
}

impl LsTree {
    /// Opens the level set under `base_directory`, reopening every existing
    /// `<prefix><n>` level in index order. The memory tier always starts empty.
    pub fn open(base_directory: impl AsRef<Path>, config: LevelConfig) -> IndexResult<Self> {
        config.validate()?;
        let base_directory = base_directory.as_ref().to_path_buf();
        fs::create_dir_all(&base_directory)?;

        let rng = match config.seed() {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let memory = Tree::in_memory(config.tree_config().clone())?;

        let mut ls_tree = Self {
            base_directory,
            levels: IndexMap::new(),
            memory,
            memory_range: None,
            memory_populated: false,
            config,
            rng,
        };
        ls_tree.reopen_levels()?;
        Ok(ls_tree)
    }

    fn reopen_levels(&mut self) -> IndexResult<()> {
        let prefix = self.config.level_prefix().to_string();
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.base_directory)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(index) = name
                .strip_prefix(&prefix)
                .and_then(|suffix| suffix.parse::<usize>().ok())
            {
                found.push((index, name));
            }
        }
        found.sort();

        for (_, name) in found {
            self.add_tree(&name)?;
            let level = self.level_mut(&name)?;
            level.range = summarize(&level.tree.scan_leaves()?);
            log::debug!("Reopened level {} with {} records", name, level.tree.len());
        }
        Ok(())
    }

    /// Name of the level at `index` (`level0`, `level1`, ... by default).
    pub fn level_name(&self, index: usize) -> String {
        format!("{}{}", self.config.level_prefix(), index)
    }

    fn level_tree_config(&self) -> TreeConfig {
        let config = self.config.tree_config().clone();
        match config.seed() {
            Some(seed) => {
                let offset = self.levels.len() as u64 + 1;
                config.with_seed(seed.wrapping_add(offset))
            }
            None => config,
        }
    }

    fn level_mut(&mut self, name: &str) -> IndexResult<&mut Level> {
        if !self.levels.contains_key(name) {
            self.add_tree(name)?;
        }
        self.levels
            .get_mut(name)
            .ok_or_else(|| IndexError::InvalidOperation(format!("level {} vanished", name)))
    }

    /// Creates the named level if it does not exist yet.
    pub fn add_tree(&mut self, name: &str) -> IndexResult<&Tree> {
        if !self.levels.contains_key(name) {
            let directory = self.base_directory.join(name);
            let tree = Tree::open(&directory, self.level_tree_config())?;
            log::debug!("Created level {} at {:?}", name, directory);
            self.levels
                .insert(name.to_string(), Level { tree, range: None });
        }
        self.level_mut(name).map(|level| &level.tree)
    }

    /// Inserts into the named level, creating it on first use.
    pub fn add_to_tree(&mut self, name: &str, key: HilbertKey, record: Record) -> IndexResult<()> {
        let level = self.level_mut(name)?;
        level.tree.insert(key, record)?;
        KeyRange::widen(&mut level.range, key);
        Ok(())
    }

    /// Inserts into the first level, then keeps copying the record into the
    /// next stage (later levels, then a populated memory tier) while coin
    /// flips with the admission probability say so. Returns the number of
    /// copies written.
    pub fn insert_more_records(&mut self, record: Record) -> IndexResult<usize> {
        if self.levels.is_empty() {
            let first = self.level_name(0);
            self.add_tree(&first)?;
        }

        let mut stages: Vec<Stage> = self.levels.keys().map(|n| Stage::Disk(n.clone())).collect();
        if self.memory_populated {
            stages.push(Stage::Memory);
        }
        let reach = self.config.max_admission_levels().unwrap_or(usize::MAX);
        let probability = self.config.admission_probability();
        let key = record.hilbert();

        let mut copies = 0;
        for (index, stage) in stages.into_iter().enumerate() {
            if index > reach {
                break;
            }
            if index > 0 && !self.rng.gen_bool(probability) {
                break;
            }
            match stage {
                Stage::Disk(name) => self.add_to_tree(&name, key, record.clone())?,
                Stage::Memory => {
                    self.memory.insert(key, record.clone())?;
                    KeyRange::widen(&mut self.memory_range, key);
                }
            }
            copies += 1;
        }
        Ok(copies)
    }

    /// Moves the last disk level into a fresh memory tier and deletes its
    /// directory. Records of a previously promoted tier carry over into the
    /// new one. Returns the promoted level's name, `None` if there are no disk
    /// levels. On error the level stays in place and the old tier is kept.
    pub fn insert_memory_tree(&mut self) -> IndexResult<Option<String>> {
        let Some((_, last)) = self.levels.last() else {
            return Ok(None);
        };
        let mut records = last.tree.scan_leaves()?;
        let promoted = records.len();
        if self.memory_populated {
            records.extend(self.memory.scan_leaves()?);
            records.sort_by_key(|r| r.hilbert());
        }

        let mut memory = Tree::in_memory(self.config.tree_config().clone())?;
        let mut range = None;
        for record in records {
            let key = record.hilbert();
            memory.insert_with_mode(key, record, InsertMode::Bulk)?;
            KeyRange::widen(&mut range, key);
        }
        memory.build_all_samples()?;

        let Some((name, level)) = self.levels.pop() else {
            return Ok(None);
        };
        let directory = level.tree.directory().map(Path::to_path_buf);
        drop(level);

        self.memory = memory;
        self.memory_range = range;
        self.memory_populated = true;

        if let Some(directory) = directory {
            if let Err(e) = fs::remove_dir_all(&directory) {
                log::error!("Failed to remove promoted level directory {:?}: {}", directory, e);
            }
        }
        log::debug!("Promoted level {} ({} records) into the memory tier", name, promoted);
        Ok(Some(name))
    }

    /// Removes the record by key and identifier from the memory tier and every
    /// disk level. Returns the number of copies removed.
    pub fn remove_hilbert(&mut self, record: &Record) -> IndexResult<usize> {
        let mut removed = 0;
        if self.memory.remove_record(record)? {
            removed += 1;
        }
        for level in self.levels.values_mut() {
            if level.tree.remove_record(record)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Approximate range query across all sources.
    ///
    /// Probes the memory tier first, then disk levels newest to oldest,
    /// skipping any source whose key summary misses `[low, high]`. Returns at
    /// most `k` distinct records, and fewer only when fewer match.
    pub fn querying(
        &mut self,
        low: HilbertKey,
        high: HilbertKey,
        k: usize,
    ) -> IndexResult<Vec<Record>> {
        let mut results = Vec::with_capacity(k);
        if k == 0 || low > high {
            return Ok(results);
        }
        let mut seen = HashSet::new();

        let memory_overlaps = self.memory_populated
            && self.memory_range.is_some_and(|r| r.overlaps(low, high));
        if memory_overlaps {
            let batch = self.memory.sample_first_rs(low, high, k)?;
            Self::absorb(batch, &mut self.rng, &mut seen, &mut results, k);
        }

        for level in self.levels.values_mut().rev() {
            if results.len() >= k {
                break;
            }
            if !level.range.is_some_and(|r| r.overlaps(low, high)) {
                continue;
            }
            let batch = level.tree.sample_first_rs(low, high, k)?;
            Self::absorb(batch, &mut self.rng, &mut seen, &mut results, k);
        }
        Ok(results)
    }

    fn absorb(
        mut batch: Vec<Record>,
        rng: &mut StdRng,
        seen: &mut HashSet<(HilbertKey, String)>,
        results: &mut Vec<Record>,
        k: usize,
    ) {
        batch.shuffle(rng);
        for record in batch {
            if results.len() >= k {
                return;
            }
            if seen.insert(record.entry_key()) {
                results.push(record);
            }
        }
    }

    /// Builds smaller levels by halving: while the last level holds more than
    /// the level threshold, a new level is filled with each of its live
    /// records admitted with the admission probability. Returns the number of
    /// levels created.
    pub fn derive_levels(&mut self) -> IndexResult<usize> {
        let mut created = 0;
        let probability = self.config.admission_probability();

        while let Some((_, last)) = self.levels.last() {
            let size = last.tree.len();
            if size <= self.config.level_threshold() {
                break;
            }
            let records = last.tree.scan_leaves()?;
            let name = self.level_name(self.levels.len());
            self.add_tree(&name)?;

            let mut admitted = Vec::new();
            for record in records.into_iter().filter(|r| !r.is_disabled()) {
                if self.rng.gen_bool(probability) {
                    admitted.push(record);
                }
            }

            let level = self.level_mut(&name)?;
            let derived = admitted.len() as u64;
            for record in admitted {
                KeyRange::widen(&mut level.range, record.hilbert());
                level
                    .tree
                    .insert_with_mode(record.hilbert(), record, InsertMode::Bulk)?;
            }
            level.tree.build_all_samples()?;
            created += 1;
            log::debug!("Derived level {} with {} of {} records", name, derived, size);

            if derived >= size {
                log::warn!("Level {} did not shrink; stopping level derivation", name);
                break;
            }
        }
        Ok(created)
    }

    /// Builds the sample buffers of every disk level.
    pub fn build_level_samples(&mut self) -> IndexResult<()> {
        for level in self.levels.values_mut() {
            level.tree.build_all_samples()?;
        }
        Ok(())
    }

    /// All records stored in a level, in key order.
    pub fn records(&self, name: &str) -> IndexResult<Vec<Record>> {
        match self.levels.get(name) {
            Some(level) => level.tree.scan_leaves(),
            None => Ok(Vec::new()),
        }
    }

    pub fn level(&self, name: &str) -> Option<&Level> {
        self.levels.get(name)
    }

    /// Level names in creation order.
    pub fn level_names(&self) -> Vec<String> {
        self.levels.keys().cloned().collect()
    }

    /// Record count per level, in creation order.
    pub fn level_sizes(&self) -> Vec<(String, u64)> {
        self.levels
            .iter()
            .map(|(name, level)| (name.clone(), level.tree.len()))
            .collect()
    }

    pub fn memory_tree(&self) -> &Tree {
        &self.memory
    }

    pub fn memory_range(&self) -> Option<KeyRange> {
        self.memory_range
    }

    pub fn is_memory_populated(&self) -> bool {
        self.memory_populated
    }

    pub fn base_directory(&self) -> &Path {
        &self.base_directory
    }

    pub fn config(&self) -> &LevelConfig {
        &self.config
    }
}

fn summarize(records: &[Record]) -> Option<KeyRange> {
    let mut range = None;
    for record in records {
        KeyRange::widen(&mut range, record.hilbert());
    }
    range
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn rec(prefix: &str, key: HilbertKey) -> Record {
        Record::new(&format!("{}-{}", prefix, key), 0.0, 0.0, "", key)
    }

    fn config() -> LevelConfig {
        LevelConfig::new()
            .with_seed(11)
            .with_level_threshold(100)
            .with_tree_config(
                TreeConfig::new()
                    .with_leaf_capacity(16)
                    .with_internal_capacity(8)
                    .with_sample_size(8)
                    .with_seed(5),
            )
    }

    #[test]
    fn test_add_to_tree_creates_level_and_tracks_range() {
        let dir = tempdir().unwrap();
        let mut ls = LsTree::open(dir.path(), config()).unwrap();
        ls.add_to_tree("level0", 40, rec("a", 40)).unwrap();
        ls.add_to_tree("level0", 10, rec("a", 10)).unwrap();
        ls.add_to_tree("level0", 25, rec("a", 25)).unwrap();

        assert!(dir.path().join("level0").is_dir());
        let level = ls.level("level0").unwrap();
        assert_eq!(level.range(), Some(KeyRange::new(10, 40)));
        assert_eq!(level.tree().len(), 3);
        assert_eq!(ls.level_names(), vec!["level0".to_string()]);
    }

    #[test]
    fn test_add_tree_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut ls = LsTree::open(dir.path(), config()).unwrap();
        ls.add_to_tree("level0", 1, rec("a", 1)).unwrap();
        assert_eq!(ls.add_tree("level0").unwrap().len(), 1);
        assert_eq!(ls.level_sizes(), vec![("level0".to_string(), 1)]);
    }

    #[test]
    fn test_querying_two_levels() {
        let dir = tempdir().unwrap();
        let mut ls = LsTree::open(dir.path(), config()).unwrap();
        for key in 1..=1000 {
            ls.add_to_tree("level0", key, rec("l0", key)).unwrap();
        }
        for key in 500..=1500 {
            ls.add_to_tree("level1", key, rec("l1", key)).unwrap();
        }
        ls.build_level_samples().unwrap();

        let results = ls.querying(600, 700, 50).unwrap();
        assert_eq!(results.len(), 50);
        assert!(results.iter().all(|r| (600..=700).contains(&r.hilbert())));
        let distinct: HashSet<_> = results.iter().map(|r| r.entry_key()).collect();
        assert_eq!(distinct.len(), 50);

        // only level1 covers this range
        let high = ls.querying(1200, 1300, 20).unwrap();
        assert_eq!(high.len(), 20);
        assert!(high.iter().all(|r| r.id().starts_with("l1-")));
    }

    #[test]
    fn test_querying_returns_all_when_range_is_small() {
        let dir = tempdir().unwrap();
        let mut ls = LsTree::open(dir.path(), config()).unwrap();
        for key in 1..=200 {
            ls.add_to_tree("level0", key, rec("x", key)).unwrap();
        }
        for key in (1..=200).step_by(2) {
            ls.add_to_tree("level1", key, rec("x", key)).unwrap();
        }

        let mut keys: Vec<_> = ls
            .querying(10, 19, 100)
            .unwrap()
            .iter()
            .map(|r| r.hilbert())
            .collect();
        keys.sort_unstable();
        assert_eq!(keys, (10..=19).collect::<Vec<_>>());
        assert!(ls.querying(5000, 6000, 10).unwrap().is_empty());
        assert!(ls.querying(10, 19, 0).unwrap().is_empty());
    }

    #[test]
    fn test_insert_more_records_always_hits_first_level() {
        let dir = tempdir().unwrap();
        let mut ls = LsTree::open(dir.path(), config()).unwrap();
        for index in 0..3 {
            let name = ls.level_name(index);
            ls.add_tree(&name).unwrap();
        }

        let mut copies = 0;
        for key in 0..400 {
            copies += ls.insert_more_records(rec("m", key)).unwrap();
        }
        let sizes = ls.level_sizes();
        assert_eq!(sizes[0].1, 400);
        assert!(sizes[1].1 < 400 && sizes[1].1 > 100, "{:?}", sizes);
        assert!(sizes[2].1 <= sizes[1].1);
        assert_eq!(copies as u64, sizes.iter().map(|s| s.1).sum::<u64>());
    }

    #[test]
    fn test_insert_more_records_respects_reach() {
        let dir = tempdir().unwrap();
        let config = config()
            .with_admission_probability(1.0)
            .with_max_admission_levels(1);
        let mut ls = LsTree::open(dir.path(), config).unwrap();
        for index in 0..3 {
            let name = ls.level_name(index);
            ls.add_tree(&name).unwrap();
        }
        for key in 0..10 {
            assert_eq!(ls.insert_more_records(rec("m", key)).unwrap(), 2);
        }
        let sizes: Vec<u64> = ls.level_sizes().into_iter().map(|s| s.1).collect();
        assert_eq!(sizes, vec![10, 10, 0]);
    }

    #[test]
    fn test_insert_more_records_creates_first_level() {
        let dir = tempdir().unwrap();
        let mut ls = LsTree::open(dir.path(), config()).unwrap();
        assert_eq!(ls.insert_more_records(rec("m", 3)).unwrap(), 1);
        assert_eq!(ls.level_names(), vec!["level0".to_string()]);
    }

    #[test]
    fn test_insert_memory_tree_promotes_last_level() {
        let dir = tempdir().unwrap();
        let mut ls = LsTree::open(dir.path(), config()).unwrap();
        for key in 1..=300 {
            ls.add_to_tree("level0", key, rec("a", key)).unwrap();
        }
        for key in (1..=300).step_by(3) {
            ls.add_to_tree("level1", key, rec("a", key)).unwrap();
        }

        let promoted = ls.insert_memory_tree().unwrap();
        assert_eq!(promoted.as_deref(), Some("level1"));
        assert!(!dir.path().join("level1").exists());
        assert!(ls.is_memory_populated());
        assert_eq!(ls.level_names(), vec!["level0".to_string()]);

        let expected: Vec<_> = (1..=300).step_by(3).collect();
        let memory: Vec<_> = ls
            .memory_tree()
            .range_query(0, u64::MAX)
            .unwrap()
            .iter()
            .map(|r| r.hilbert())
            .collect();
        assert_eq!(memory, expected);
        assert_eq!(ls.memory_range(), Some(KeyRange::new(1, 298)));
        assert!(ls.memory_tree().root_sample().is_some());
    }

    #[test]
    fn test_insert_memory_tree_without_levels() {
        let dir = tempdir().unwrap();
        let mut ls = LsTree::open(dir.path(), config()).unwrap();
        assert_eq!(ls.insert_memory_tree().unwrap(), None);
        assert!(!ls.is_memory_populated());
    }

    #[test]
    fn test_remove_hilbert_hits_every_copy() {
        let dir = tempdir().unwrap();
        let mut ls = LsTree::open(dir.path(), config()).unwrap();
        for key in 1..=50 {
            ls.add_to_tree("level0", key, rec("a", key)).unwrap();
            ls.add_to_tree("level1", key, rec("a", key)).unwrap();
            ls.add_to_tree("level2", key, rec("a", key)).unwrap();
        }
        ls.insert_memory_tree().unwrap();

        let victim = rec("a", 20);
        assert_eq!(ls.remove_hilbert(&victim).unwrap(), 3);
        assert_eq!(ls.remove_hilbert(&victim).unwrap(), 0);
        assert!(ls.querying(20, 20, 5).unwrap().is_empty());
        assert_eq!(ls.remove_hilbert(&rec("other", 21)).unwrap(), 0);
    }

    #[test]
    fn test_memory_tier_is_queried_and_admitted() {
        let dir = tempdir().unwrap();
        let config = config().with_admission_probability(1.0);
        let mut ls = LsTree::open(dir.path(), config).unwrap();
        for key in 1..=100 {
            ls.add_to_tree("level0", key, rec("a", key)).unwrap();
            ls.add_to_tree("level1", key, rec("a", key)).unwrap();
        }
        ls.insert_memory_tree().unwrap();

        assert_eq!(ls.insert_more_records(rec("new", 500)).unwrap(), 2);
        let hit = ls.querying(500, 500, 5).unwrap();
        assert_eq!(hit.len(), 1);
        assert_eq!(ls.memory_tree().range_query(500, 500).unwrap().len(), 1);
    }

    #[test]
    fn test_derive_levels_halves_until_threshold() {
        let dir = tempdir().unwrap();
        let mut ls = LsTree::open(dir.path(), config()).unwrap();
        for key in 0..1000 {
            ls.add_to_tree("level0", key, rec("d", key)).unwrap();
        }

        let created = ls.derive_levels().unwrap();
        assert!(created >= 2, "created {}", created);
        let sizes = ls.level_sizes();
        assert_eq!(sizes.len(), created + 1);
        assert!(sizes.windows(2).all(|w| w[1].1 < w[0].1), "{:?}", sizes);
        assert!(sizes.last().unwrap().1 <= 100);
        assert!(sizes[sizes.len() - 2].1 > 100);

        // each derived level is a subset of the one before
        let parent: HashSet<_> = ls.records("level0").unwrap().iter().map(|r| r.entry_key()).collect();
        assert!(ls
            .records("level1")
            .unwrap()
            .iter()
            .all(|r| parent.contains(&r.entry_key())));
    }

    #[test]
    fn test_reopen_restores_levels() {
        let dir = tempdir().unwrap();
        {
            let mut ls = LsTree::open(dir.path(), config()).unwrap();
            for key in 1..=60 {
                ls.add_to_tree("level0", key, rec("a", key)).unwrap();
            }
            for key in 30..=90 {
                ls.add_to_tree("level1", key, rec("b", key)).unwrap();
            }
        }
        std::fs::create_dir_all(dir.path().join("unrelated")).unwrap();

        let ls = LsTree::open(dir.path(), config()).unwrap();
        assert_eq!(
            ls.level_sizes(),
            vec![("level0".to_string(), 60), ("level1".to_string(), 61)]
        );
        assert_eq!(ls.level("level1").unwrap().range(), Some(KeyRange::new(30, 90)));
        assert!(!ls.is_memory_populated());
    }

    #[test]
    fn test_failed_promotion_keeps_level() {
        let dir = tempdir().unwrap();
        let mut ls = LsTree::open(dir.path(), config()).unwrap();
        for key in 1..=100 {
            ls.add_to_tree("level0", key, rec("a", key)).unwrap();
        }
        for key in 1..=40 {
            ls.add_to_tree("level1", key, rec("a", key)).unwrap();
        }
        std::fs::write(dir.path().join("level1").join("page_0.bin"), [0xFF; 8000]).unwrap();

        assert!(ls.insert_memory_tree().is_err());
        assert_eq!(
            ls.level_names(),
            vec!["level0".to_string(), "level1".to_string()]
        );
        assert!(dir.path().join("level1").is_dir());
        assert!(!ls.is_memory_populated());
        assert!(ls.memory_tree().is_empty());
    }

    #[test]
    fn test_second_promotion_carries_previous_tier() {
        let dir = tempdir().unwrap();
        let mut ls = LsTree::open(dir.path(), config()).unwrap();
        for key in 1..=60 {
            ls.add_to_tree("level0", key, rec("a", key)).unwrap();
        }
        for key in 100..=130 {
            ls.add_to_tree("level1", key, rec("b", key)).unwrap();
        }
        for key in 200..=220 {
            ls.add_to_tree("level2", key, rec("c", key)).unwrap();
        }

        assert_eq!(ls.insert_memory_tree().unwrap().as_deref(), Some("level2"));
        assert_eq!(ls.insert_memory_tree().unwrap().as_deref(), Some("level1"));
        assert_eq!(ls.level_names(), vec!["level0".to_string()]);

        let memory = ls.memory_tree().range_query(0, u64::MAX).unwrap();
        assert_eq!(memory.len(), 31 + 21);
        assert!(memory.windows(2).all(|w| w[0].hilbert() <= w[1].hilbert()));
        assert_eq!(ls.memory_range(), Some(KeyRange::new(100, 220)));
    }
}
