use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::engine::SyncEngine;
use super::error::SyncError;
use crate::storage::Settings;

/// Converts a refresh interval in minutes to a timer period.
pub fn minutes_to_period(minutes: i64) -> Duration {
    Duration::from_secs(u64::try_from(minutes.max(1)).unwrap_or(1).saturating_mul(60))
}

/// Runs an all-source sync pass on a recurring timer.
///
/// Each tick spawns its pass as a separate task, so re-arming the timer and
/// shutting down never wait on network I/O. A tick that lands while a pass
/// is still running is skipped.
pub struct Scheduler {
    engine: Arc<SyncEngine>,
    period_tx: watch::Sender<Duration>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Start with the refresh interval stored in Settings.
    pub async fn start(engine: Arc<SyncEngine>) -> Result<Self, SyncError> {
        let settings = engine.settings().await?;
        Ok(Self::spawn(
            engine,
            minutes_to_period(settings.refresh_interval_minutes),
        ))
    }

    /// Start with an explicit period. The first pass fires one period from now.
    pub fn spawn(engine: Arc<SyncEngine>, period: Duration) -> Self {
        let (period_tx, period_rx) = watch::channel(period);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(engine.clone(), period_rx, cancel.clone()));
        tracing::info!(period_secs = period.as_secs(), "Scheduler started");

        Self {
            engine,
            period_tx,
            cancel,
            handle: Some(handle),
        }
    }

    /// Current timer period.
    pub fn period(&self) -> Duration {
        *self.period_tx.borrow()
    }

    /// Re-arm the timer with `period`, counted from now. A pass already in
    /// flight keeps running.
    pub fn set_period(&self, period: Duration) {
        self.period_tx.send_replace(period);
    }

    /// Persist a new refresh interval to Settings and re-arm the timer.
    pub async fn update_refresh_interval(&self, minutes: i64) -> Result<Settings, SyncError> {
        let mut settings = self.engine.settings().await?;
        settings.refresh_interval_minutes = minutes;
        let updated = self.engine.update_settings(&settings).await?;
        self.set_period(minutes_to_period(updated.refresh_interval_minutes));
        Ok(updated)
    }

    /// Re-read the stored refresh interval and re-arm the timer if it moved.
    ///
    /// Picks up changes written by another process sharing the database.
    /// Returns the period now in effect.
    pub async fn reload_period(&self) -> Result<Duration, SyncError> {
        let settings = self.engine.settings().await?;
        let period = minutes_to_period(settings.refresh_interval_minutes);
        if period != self.period() {
            self.set_period(period);
        }
        Ok(period)
    }

    /// Stop ticking and wait for any in-flight pass to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Scheduler task ended abnormally");
            }
        }
        tracing::info!("Scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn ticker(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn run(
    engine: Arc<SyncEngine>,
    mut period_rx: watch::Receiver<Duration>,
    cancel: CancellationToken,
) {
    let mut period = *period_rx.borrow_and_update();
    let mut interval = ticker(period);
    let mut passes = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = period_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = *period_rx.borrow_and_update();
                if next != period {
                    tracing::info!(
                        from_secs = period.as_secs(),
                        to_secs = next.as_secs(),
                        "Refresh interval changed"
                    );
                    period = next;
                    interval = ticker(period);
                }
            }
            _ = interval.tick() => {
                let engine = engine.clone();
                passes.spawn(async move {
                    match engine.try_sync_all().await {
                        Ok(Some(articles)) => {
                            tracing::debug!(new = articles.len(), "Scheduled sync finished");
                        }
                        Ok(None) => {
                            tracing::debug!("Previous sync still running, tick skipped");
                        }
                        Err(e) => tracing::warn!(error = %e, "Scheduled sync failed"),
                    }
                });
            }
            Some(joined) = passes.join_next(), if !passes.is_empty() => {
                if let Err(e) = joined {
                    tracing::warn!(error = %e, "Sync task panicked");
                }
            }
        }
    }

    // In-flight passes finish; none are started after this point.
    while let Some(joined) = passes.join_next().await {
        if let Err(e) = joined {
            tracing::warn!(error = %e, "Sync task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedFetcher, FetchError};
    use crate::storage::{CandidateItem, Database};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Counts fetches, optionally taking `delay` to answer.
    #[derive(Default)]
    struct CountingFetcher {
        delay: Duration,
        started: AtomicUsize,
        finished: AtomicUsize,
        in_flight: AtomicUsize,
        overlapped: AtomicBool,
    }

    #[async_trait]
    impl FeedFetcher for CountingFetcher {
        async fn fetch(&self, _url: &str) -> Result<Vec<CandidateItem>, FetchError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    async fn engine_with(fetcher: Arc<CountingFetcher>) -> Arc<SyncEngine> {
        let db = Database::open(":memory:").await.unwrap();
        db.insert_source(&crate::storage::NewSource {
            name: "Test".to_string(),
            url: "https://example.com/rss".to_string(),
            category: None,
        })
        .await
        .unwrap();
        Arc::new(SyncEngine::new(db, fetcher))
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[test]
    fn test_minutes_to_period() {
        assert_eq!(minutes_to_period(60), Duration::from_secs(3600));
        assert_eq!(minutes_to_period(0), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_ticks_trigger_passes() {
        let fetcher = Arc::new(CountingFetcher::default());
        let engine = engine_with(fetcher.clone()).await;

        let scheduler = Scheduler::spawn(engine, Duration::from_millis(20));
        wait_until(|| fetcher.finished.load(Ordering::SeqCst) >= 2).await;
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_no_pass_before_first_period() {
        let fetcher = Arc::new(CountingFetcher::default());
        let engine = engine_with(fetcher.clone()).await;

        let scheduler = Scheduler::spawn(engine, Duration::from_secs(3600));
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.shutdown().await;

        assert_eq!(fetcher.started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_set_period_rearms_timer() {
        let fetcher = Arc::new(CountingFetcher::default());
        let engine = engine_with(fetcher.clone()).await;

        let scheduler = Scheduler::spawn(engine, Duration::from_secs(3600));
        scheduler.set_period(Duration::from_millis(20));
        assert_eq!(scheduler.period(), Duration::from_millis(20));

        wait_until(|| fetcher.finished.load(Ordering::SeqCst) >= 1).await;
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_slow_pass_is_not_overlapped() {
        let fetcher = Arc::new(CountingFetcher {
            delay: Duration::from_millis(150),
            ..CountingFetcher::default()
        });
        let engine = engine_with(fetcher.clone()).await;

        let scheduler = Scheduler::spawn(engine, Duration::from_millis(10));
        wait_until(|| fetcher.finished.load(Ordering::SeqCst) >= 2).await;
        scheduler.shutdown().await;

        assert!(!fetcher.overlapped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_pass() {
        let fetcher = Arc::new(CountingFetcher {
            delay: Duration::from_millis(100),
            ..CountingFetcher::default()
        });
        let engine = engine_with(fetcher.clone()).await;

        let scheduler = Scheduler::spawn(engine, Duration::from_millis(10));
        wait_until(|| fetcher.started.load(Ordering::SeqCst) >= 1).await;
        scheduler.shutdown().await;

        let started = fetcher.started.load(Ordering::SeqCst);
        assert_eq!(fetcher.finished.load(Ordering::SeqCst), started);
    }

    #[tokio::test]
    async fn test_update_refresh_interval_persists() {
        let fetcher = Arc::new(CountingFetcher::default());
        let engine = engine_with(fetcher).await;

        let scheduler = Scheduler::start(engine.clone()).await.unwrap();
        assert_eq!(scheduler.period(), Duration::from_secs(3600));

        let settings = scheduler.update_refresh_interval(15).await.unwrap();
        assert_eq!(settings.refresh_interval_minutes, 15);
        assert_eq!(engine.settings().await.unwrap().refresh_interval_minutes, 15);
        assert_eq!(scheduler.period(), Duration::from_secs(900));

        assert!(matches!(
            scheduler.update_refresh_interval(0).await,
            Err(SyncError::InvalidSettings(_))
        ));
        assert_eq!(scheduler.period(), Duration::from_secs(900));
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_reload_period_picks_up_external_change() {
        let fetcher = Arc::new(CountingFetcher::default());
        let engine = engine_with(fetcher).await;

        let scheduler = Scheduler::start(engine.clone()).await.unwrap();
        assert_eq!(scheduler.reload_period().await.unwrap(), Duration::from_secs(3600));

        // Written straight to the store, as another process would
        let mut settings = engine.database().get_settings().await.unwrap();
        settings.refresh_interval_minutes = 5;
        engine.database().update_settings(&settings).await.unwrap();
        assert_eq!(scheduler.period(), Duration::from_secs(3600));

        assert_eq!(scheduler.reload_period().await.unwrap(), Duration::from_secs(300));
        assert_eq!(scheduler.period(), Duration::from_secs(300));
        scheduler.shutdown().await;
    }
}
