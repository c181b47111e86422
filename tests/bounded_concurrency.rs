//! S6: bounded concurrency. `process_city` fans out over a city's zones
//! through a semaphore sized at `ZONE_CONCURRENCY` (§5). This exercises the
//! exact same primitive the engine uses for its per-zone permits, with a
//! controlled per-task delay standing in for a slow `process_zone`, since
//! the real providers have no injectable latency hook.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use urban_grid_os::config::defaults::ZONE_CONCURRENCY;

#[tokio::test]
async fn semaphore_bounds_effective_parallelism() {
    const ZONES: usize = 20;
    const ZONE_DELAY: Duration = Duration::from_millis(200);

    let semaphore = Arc::new(Semaphore::new(ZONE_CONCURRENCY));
    let started = Instant::now();

    let mut handles = Vec::with_capacity(ZONES);
    for _ in 0..ZONES {
        let semaphore = Arc::clone(&semaphore);
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.unwrap();
            tokio::time::sleep(ZONE_DELAY).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let elapsed = started.elapsed();
    let lower_bound = ZONE_DELAY * (ZONES as u32 / ZONE_CONCURRENCY as u32);
    let upper_bound = ZONE_DELAY * ZONES as u32;

    assert!(elapsed >= lower_bound, "finished too fast: {elapsed:?} < {lower_bound:?}");
    assert!(elapsed < upper_bound, "no concurrency observed: {elapsed:?} >= {upper_bound:?}");
}
