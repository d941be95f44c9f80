//! # LS-tree - Sampled Hilbert Indexing for Trajectory Points
//!
//! This crate stores geo-tagged records keyed by their Hilbert value in a
//! paged B+-tree and answers approximate range queries by sampling.
//!
//! ## Features
//!
//! - **Paged Leaves**: Leaf nodes are fixed-size pages, one file per page
//! - **Arena Internals**: Routing nodes live in memory and are rebuilt on open
//! - **LRU Cache**: Recently used leaves are kept decoded
//! - **Sample Buffers (RS-tree)**: Large subtrees keep a uniform sample of
//!   their records, kept current across inserts and deletes
//! - **Tiered Levels (LS-tree)**: Geometrically shrinking random subsets of
//!   the data plus a memory-resident tier, probed newest first
//!
//! ## Tree API
//!
//! ```rust,no_run
//! use lstree::{Record, Tree, TreeConfig};
//! use tempfile::tempdir;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dir = tempdir()?;
//! let mut tree = Tree::open(dir.path(), TreeConfig::new().with_seed(42))?;
//!
//! for key in 0..1_000u64 {
//!     tree.insert(key, Record::new(&format!("p{}", key), 116.3, 39.9, "", key))?;
//! }
//! tree.build_all_samples()?;
//!
//! let exact = tree.range_query(100, 199)?;
//! assert_eq!(exact.len(), 100);
//!
//! let sampled = tree.sample_first_rs(100, 199, 10)?;
//! assert_eq!(sampled.len(), 10);
//! # Ok(())
//! # }
//! ```
//!
//! ## Level API
//!
//! ```rust,no_run
//! use lstree::{LevelConfig, LsTree, Record};
//! use tempfile::tempdir;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dir = tempdir()?;
//! let mut levels = LsTree::open(dir.path(), LevelConfig::new().with_level_threshold(10_000))?;
//!
//! for key in 0..50_000u64 {
//!     levels.add_to_tree("level0", key, Record::new(&key.to_string(), 0.0, 0.0, "", key))?;
//! }
//! levels.derive_levels()?;
//! levels.insert_memory_tree()?;
//!
//! let answer = levels.querying(1_000, 2_000, 50)?;
//! assert_eq!(answer.len(), 50);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod disk_tree;
pub mod hilbert;
pub mod level_manager;
pub mod record;

pub use config::{LevelConfig, RootMode, TreeConfig};
pub use disk_tree::{
    IndexError, IndexResult, InsertMode, NodeId, PageId, SampleSummary, Tree, TreeStats,
};
pub use hilbert::{hilbert_key, GeoBounds};
pub use level_manager::{KeyRange, Level, LsTree};
pub use record::{HilbertKey, Record};
