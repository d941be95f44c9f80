use lstree::hilbert::{hilbert_key, GeoBounds};
use lstree::{IndexResult, Record};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use std::{env, fs, thread};

/// Grid order used for generated trajectory points.
pub const TEST_PRECISION: u32 = 16;

/// Runs a test with retry logic and error handling.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    T: Fn(TestContext) -> IndexResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    B: Fn() -> IndexResult<TestContext> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    A: Fn(TestContext) -> IndexResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
{
    const MAX_RETRIES: u32 = 3;
    let mut last_error: Option<String> = None;

    for attempt in 1..=MAX_RETRIES {
        let start_time = Instant::now();

        let result = std::panic::catch_unwind(|| match before() {
            Ok(ctx) => match test(ctx.clone()) {
                Ok(_) => after(ctx).map_err(|e| format!("After run failed: {:?}", e)),
                Err(e) => {
                    let _ = after(ctx);
                    Err(format!("Test failed: {:?}", e))
                }
            },
            Err(e) => Err(format!("Before run failed: {:?}", e)),
        });

        let elapsed = start_time.elapsed();
        let error = match result {
            Ok(Ok(_)) => return,
            Ok(Err(e)) => e,
            Err(panic_err) => {
                let message = if let Some(s) = panic_err.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_err.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                format!("Panic: {}", message)
            }
        };

        if attempt < MAX_RETRIES {
            eprintln!(
                "\n========== Test Attempt {}/{} Failed (took {:?}) ==========",
                attempt, MAX_RETRIES, elapsed
            );
            eprintln!("Error: {}", error);
            thread::sleep(Duration::from_millis(100 * attempt as u64));
        }
        last_error = Some(error);
    }

    panic!(
        "Test failed after {} attempts. Last error: {}",
        MAX_RETRIES,
        last_error.unwrap_or_default()
    );
}

/// Scratch directory owned by one test run.
#[derive(Clone)]
pub struct TestContext {
    path: PathBuf,
}

impl TestContext {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn subdir(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

pub fn random_path() -> PathBuf {
    let id: u64 = rand::random();
    env::temp_dir().join(format!("lstree-it-{:016x}", id))
}

pub fn create_test_context() -> IndexResult<TestContext> {
    let path = random_path();
    if path.exists() {
        fs::remove_dir_all(&path)?;
    }
    fs::create_dir_all(&path)?;
    Ok(TestContext::new(path))
}

pub fn cleanup(ctx: TestContext) -> IndexResult<()> {
    if let Err(e) = fs::remove_dir_all(ctx.path()) {
        if e.kind() != std::io::ErrorKind::NotFound {
            eprintln!(
                "Warning: Failed to remove test directory {:?}: {:?}",
                ctx.path(),
                e
            );
        }
    }
    Ok(())
}

/// Bounding box of the generated points, roughly central Beijing.
pub fn test_bounds() -> GeoBounds {
    GeoBounds::new(39.8, 40.1, 116.2, 116.6)
}

/// `count` GPS-like points following random walks, keyed by their Hilbert
/// value over [`test_bounds`]. Identifiers are unique.
pub fn trajectory_records(count: usize, seed: u64) -> Vec<Record> {
    let bounds = test_bounds();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut records = Vec::with_capacity(count);

    let mut lat = 39.95;
    let mut lon = 116.4;
    for i in 0..count {
        if i % 200 == 0 {
            lat = rng.gen_range(bounds.lat_min..bounds.lat_max);
            lon = rng.gen_range(bounds.lon_min..bounds.lon_max);
        }
        lat = (lat + rng.gen_range(-0.001..0.001)).clamp(bounds.lat_min, bounds.lat_max);
        lon = (lon + rng.gen_range(-0.001..0.001)).clamp(bounds.lon_min, bounds.lon_max);

        let key = hilbert_key(lat, lon, &bounds, TEST_PRECISION);
        let timestamp = format!("2008-10-23 {:02}:{:02}:{:02}", (i / 3600) % 24, (i / 60) % 60, i % 60);
        records.push(Record::new(
            &format!("traj{}-{}", i / 200, i),
            lon as f32,
            lat as f32,
            &timestamp,
            key,
        ));
    }
    records
}

/// Same as [`trajectory_records`], sorted by Hilbert key.
pub fn sorted_trajectory_records(count: usize, seed: u64) -> Vec<Record> {
    let mut records = trajectory_records(count, seed);
    records.sort_by_key(|r| r.hilbert());
    records
}

/// Records with consecutive keys `range`, identified as `<prefix>-<key>`.
pub fn keyed_records(prefix: &str, range: std::ops::RangeInclusive<u64>) -> Vec<Record> {
    range
        .map(|key| Record::new(&format!("{}-{}", prefix, key), 0.0, 0.0, "", key))
        .collect()
}
