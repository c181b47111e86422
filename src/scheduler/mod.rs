//! Background scheduler (C9): a single in-process loop that drives C5 on
//! an interval, with hot-swappable target city and cooperative shutdown
//! (§4.9, §5).
//!
//! Grounded on the teacher's `background/self_healer.rs` (interval loop
//! spawned with `tokio::spawn`, `Arc`-shared state, `tracing` around each
//! cycle) with the current-city pointer reworked to an
//! `arc_swap::ArcSwap<City>` per §4.9/§9.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::cities::City;
use crate::config::defaults::SCHEDULER_SHUTDOWN_GRACE_SECS;
use crate::engine::ZoneProcessingEngine;
use crate::error::SchedulerError;

pub struct BackgroundScheduler {
    engine: Arc<ZoneProcessingEngine>,
    current_city: ArcSwap<City>,
    running: AtomicBool,
    cancel: CancellationToken,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl BackgroundScheduler {
    pub fn new(engine: Arc<ZoneProcessingEngine>, initial_city: City) -> Self {
        Self {
            engine,
            current_city: ArcSwap::from_pointee(initial_city),
            running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn current_city(&self) -> Arc<City> {
        self.current_city.load_full()
    }

    /// Hot-swap the target city; the next tick picks it up (§4.9).
    pub fn update_city(&self, city: City) {
        self.current_city.store(Arc::new(city));
    }

    /// Start the loop if not already running. Idempotent: a second call
    /// while already running is a no-op (§4.9).
    pub async fn start(self: &Arc<Self>, interval: Duration) {
        let mut handle = self.handle.lock().await;
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let scheduler = Arc::clone(self);
        let cancel = self.cancel.clone();
        *handle = Some(tokio::spawn(async move {
            scheduler.run_loop(interval, cancel).await;
        }));
    }

    async fn run_loop(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        tracing::info!(interval_secs = interval.as_secs(), "background scheduler started");
        self.tick().await;

        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("background scheduler stopping");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    async fn tick(&self) {
        let city = self.current_city.load_full();
        let summary = self.engine.process_city(&city).await;
        tracing::info!(
            city_id = %city.id,
            successful = summary.successful,
            failed = summary.failed,
            "scheduler cycle complete"
        );
    }

    /// Cancel the loop, giving an in-flight cycle a grace period before
    /// the task is abandoned (§4.9).
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();

        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            let grace = Duration::from_secs(SCHEDULER_SHUTDOWN_GRACE_SECS);
            if tokio::time::timeout(grace, handle).await.is_err() {
                tracing::warn!("scheduler task did not stop within the grace period");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub fn unknown_city(city_id: &str) -> SchedulerError {
    SchedulerError::UnknownCity(city_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_city(id: &str) -> City {
        crate::cities::find(id).unwrap().clone()
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = crate::storage::StateStore::open(dir.path()).unwrap();
        let engine = Arc::new(ZoneProcessingEngine::new(store));
        let scheduler = Arc::new(BackgroundScheduler::new(engine, test_city("sf")));

        scheduler.start(Duration::from_secs(3600)).await;
        scheduler.start(Duration::from_secs(3600)).await;
        assert!(scheduler.is_running());

        scheduler.stop().await;
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn update_city_swaps_the_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let store = crate::storage::StateStore::open(dir.path()).unwrap();
        let engine = Arc::new(ZoneProcessingEngine::new(store));
        let scheduler = Arc::new(BackgroundScheduler::new(engine, test_city("sf")));

        assert_eq!(scheduler.current_city().id, "sf");
        scheduler.update_city(test_city("nyc"));
        assert_eq!(scheduler.current_city().id, "nyc");
    }
}
