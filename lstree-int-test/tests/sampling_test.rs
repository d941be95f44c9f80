//! Integration tests for sample buffers and sample-first range queries.

use lstree::{Tree, TreeConfig};
use lstree_int_test::test_util::{
    cleanup, create_test_context, keyed_records, run_test, sorted_trajectory_records,
};
use std::collections::HashSet;

#[ctor::ctor]
fn init() {
    colog::init();
}

fn sampled_config() -> TreeConfig {
    TreeConfig::new()
        .with_leaf_capacity(25)
        .with_internal_capacity(5)
        .with_sample_size(20)
        .with_seed(99)
}

#[test]
fn test_sample_first_rs_on_trajectories() {
    run_test(
        || create_test_context(),
        |ctx| {
            let records = sorted_trajectory_records(4_000, 8);
            let mut tree = Tree::open(ctx.subdir("tree"), sampled_config())?;
            tree.bulk_load(records.clone())?;

            let low = records[500].hilbert();
            let high = records[3_500].hilbert();
            let answer = tree.sample_first_rs(low, high, 100)?;
            assert_eq!(answer.len(), 100);
            assert!(answer.iter().all(|r| (low..=high).contains(&r.hilbert())));

            let distinct: HashSet<_> = answer.iter().map(|r| r.id().to_string()).collect();
            assert_eq!(distinct.len(), 100);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_sample_first_rs_short_range_is_exact() {
    run_test(
        || create_test_context(),
        |ctx| {
            let mut tree = Tree::open(ctx.subdir("tree"), sampled_config())?;
            tree.bulk_load(keyed_records("s", 1..=3_000))?;

            let mut keys: Vec<u64> = tree
                .sample_first_rs(1_000, 1_029, 500)?
                .iter()
                .map(|r| r.hilbert())
                .collect();
            keys.sort_unstable();
            assert_eq!(keys, (1_000..=1_029).collect::<Vec<_>>());
            assert!(tree.sample_first_rs(5_000, 6_000, 10)?.is_empty());
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_samples_track_inserts_and_deletes() {
    run_test(
        || create_test_context(),
        |ctx| {
            let mut tree = Tree::open(ctx.subdir("tree"), sampled_config())?;
            tree.bulk_load(keyed_records("a", 1..=1_000))?;

            for record in keyed_records("b", 1_001..=2_000) {
                tree.insert(record.hilbert(), record)?;
            }
            for key in (1..=2_000).filter(|k| k % 2 == 0) {
                assert!(tree.remove(key)?);
            }

            let live: HashSet<String> =
                tree.scan_leaves()?.iter().map(|r| r.id().to_string()).collect();
            for summary in tree.sample_summaries() {
                assert!(summary.sample_count <= 20);
                if summary.subtree_size <= 40 {
                    assert!(!summary.has_sample);
                }
            }
            let root = tree.root_sample().unwrap_or_default();
            assert!(!root.is_empty());
            assert!(root.iter().all(|r| live.contains(r.id())));
            assert!(root.iter().all(|r| r.hilbert() % 2 == 1));
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_samples_rebuilt_after_reopen() {
    run_test(
        || create_test_context(),
        |ctx| {
            {
                let mut tree = Tree::open(ctx.subdir("tree"), sampled_config())?;
                tree.bulk_load(keyed_records("r", 1..=1_500))?;
                assert!(tree.root_sample().is_some());
            }

            let mut tree = Tree::open(ctx.subdir("tree"), sampled_config())?;
            assert!(tree.root_sample().is_none());
            tree.build_all_samples()?;
            let root = tree.root_sample().unwrap_or_default();
            assert_eq!(root.len(), 20);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}
