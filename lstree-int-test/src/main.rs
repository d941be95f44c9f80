use lstree::{IndexResult, InsertMode, LevelConfig, LsTree};
use lstree_int_test::test_util::{cleanup, create_test_context, sorted_trajectory_records};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::time::Instant;

fn main() -> IndexResult<()> {
    colog::init();

    let count: usize = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(200_000);
    println!("Starting level experiment with {} records...", count);
    let ctx = create_test_context()?;

    let config = LevelConfig::new()
        .with_seed(7)
        .with_level_threshold((count as u64 / 8).max(1));
    let mut levels = LsTree::open(ctx.path(), config)?;
    let records = sorted_trajectory_records(count, 7);

    let start = Instant::now();
    let first = levels.level_name(0);
    levels.add_tree(&first)?;
    for record in &records {
        levels.add_to_tree(&first, record.hilbert(), record.clone())?;
    }
    let derived = levels.derive_levels()?;
    levels.build_level_samples()?;
    levels.insert_memory_tree()?;
    println!(
        "Index construction ({} derived levels) in {:?}",
        derived,
        start.elapsed()
    );
    for (name, size) in levels.level_sizes() {
        println!("  {}: {} records", name, size);
    }

    let mut rng = rand::rngs::StdRng::seed_from_u64(13);
    let mut updates = records.iter().take(count / 10).cloned().collect::<Vec<_>>();
    updates.shuffle(&mut rng);

    let start = Instant::now();
    for record in &updates {
        levels.insert_more_records(record.clone())?;
    }
    println!("Inserted {} records in {:?}", updates.len(), start.elapsed());

    let start = Instant::now();
    let mut removed = 0;
    for record in &updates {
        removed += levels.remove_hilbert(record)?;
    }
    println!("Removed {} copies in {:?}", removed, start.elapsed());

    let (low, high) = match (records.get(count / 4), records.get(count / 2)) {
        (Some(low), Some(high)) => (low.hilbert(), high.hilbert()),
        _ => (0, u64::MAX),
    };
    let start = Instant::now();
    let answer = levels.querying(low, high, 1000)?;
    println!(
        "Sampled {} records from [{}, {}] in {:?}",
        answer.len(),
        low,
        high,
        start.elapsed()
    );

    let start = Instant::now();
    let mut bulk = lstree::Tree::in_memory(lstree::TreeConfig::new().with_seed(7))?;
    for record in &records {
        bulk.insert_with_mode(record.hilbert(), record.clone(), InsertMode::Bulk)?;
    }
    println!(
        "Bulk inserted {} records into a memory tree in {:?} (height {})",
        bulk.len(),
        start.elapsed(),
        bulk.height()?
    );

    drop(levels);
    cleanup(ctx)
}
