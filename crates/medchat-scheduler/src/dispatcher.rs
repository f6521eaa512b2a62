//! Detached background persistence.
//!
//! Chat turns are stored after the reply has already gone back to the
//! caller. Each write is dispatched once onto a bounded task pool; its
//! outcome is logged and counted but never reported to the request and
//! never retried.
//!
//! Writes still in flight when the process exits are lost. `shutdown`
//! narrows that window by waiting a grace period for the pool to drain.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Counters for dispatched work.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

impl DispatchMetrics {
    pub fn snapshot(&self) -> DispatchMetricsSnapshot {
        DispatchMetricsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchMetricsSnapshot {
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Dispatches refused after shutdown began
    pub rejected: u64,
}

impl DispatchMetricsSnapshot {
    /// Tasks that have not finished yet.
    pub fn outstanding(&self) -> u64 {
        self.dispatched
            .saturating_sub(self.succeeded)
            .saturating_sub(self.failed)
    }
}

/// Outcome of draining the pool on shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// All tasks finished within the grace period
    pub drained: bool,
    /// Tasks abandoned when the grace period ran out
    pub pending: usize,
    pub elapsed: Duration,
}

/// Bounded pool for fire-and-forget writes.
#[derive(Clone)]
pub struct BackgroundPersistenceScheduler {
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
    metrics: Arc<DispatchMetrics>,
}

impl BackgroundPersistenceScheduler {
    /// At most `max_concurrent` tasks run at once; the rest wait for a slot.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            tracker: TaskTracker::new(),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            metrics: Arc::new(DispatchMetrics::default()),
        }
    }

    /// Run `task` detached from the caller.
    ///
    /// Returns false (and drops the task) once shutdown has started.
    /// Must be called from within a Tokio runtime.
    pub fn dispatch<F, E>(&self, label: impl Into<String>, task: F) -> bool
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let label = label.into();
        if self.tracker.is_closed() {
            self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(task = %label, "Persistence scheduler is shut down, write dropped");
            return false;
        }

        self.metrics.dispatched.fetch_add(1, Ordering::Relaxed);
        let permits = self.permits.clone();
        let metrics = self.metrics.clone();

        self.tracker.spawn(async move {
            // Only fails if the semaphore is closed, which never happens.
            let _permit = permits.acquire_owned().await.ok();
            let start = Instant::now();

            match task.await {
                Ok(()) => {
                    metrics.succeeded.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        task = %label,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Background write completed"
                    );
                }
                Err(e) => {
                    metrics.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(task = %label, error = %e, "Background write failed");
                }
            }
        });

        true
    }

    /// Tasks spawned and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_closed(&self) -> bool {
        self.tracker.is_closed()
    }

    pub fn metrics(&self) -> DispatchMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stop accepting work and wait up to `grace` for running tasks.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        self.tracker.close();
        let start = Instant::now();

        let drained = tokio::time::timeout(grace, self.tracker.wait())
            .await
            .is_ok();
        let pending = self.tracker.len();

        if drained {
            info!("Background persistence drained");
        } else {
            warn!(
                pending,
                grace_secs = grace.as_secs(),
                "Shutdown grace period elapsed, pending writes will be lost"
            );
        }

        ShutdownReport {
            drained,
            pending,
            elapsed: start.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    async fn settle(scheduler: &BackgroundPersistenceScheduler) {
        for _ in 0..100 {
            if scheduler.in_flight() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_dispatch_runs_detached() {
        let scheduler = BackgroundPersistenceScheduler::new(4);
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        assert!(scheduler.dispatch("store", async move {
            h.fetch_add(1, Ordering::SeqCst);
            Ok::<(), String>(())
        }));

        settle(&scheduler).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let metrics = scheduler.metrics();
        assert_eq!(metrics.dispatched, 1);
        assert_eq!(metrics.succeeded, 1);
        assert_eq!(metrics.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_failure_is_counted_once() {
        let scheduler = BackgroundPersistenceScheduler::new(4);
        let attempts = Arc::new(AtomicUsize::new(0));

        let a = attempts.clone();
        scheduler.dispatch("store", async move {
            a.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("backend unavailable")
        });

        settle(&scheduler).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.metrics().failed, 1);
        assert_eq!(scheduler.metrics().succeeded, 0);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let scheduler = BackgroundPersistenceScheduler::new(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let active = active.clone();
            let peak = peak.clone();
            scheduler.dispatch("store", async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<(), String>(())
            });
        }

        let report = scheduler.shutdown(Duration::from_secs(5)).await;
        assert!(report.drained);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(scheduler.metrics().succeeded, 8);
    }

    #[tokio::test]
    async fn test_dispatch_after_shutdown_is_rejected() {
        let scheduler = BackgroundPersistenceScheduler::new(1);
        let report = scheduler.shutdown(Duration::from_millis(10)).await;
        assert!(report.drained);
        assert!(scheduler.is_closed());

        assert!(!scheduler.dispatch("store", async { Ok::<(), String>(()) }));
        assert_eq!(scheduler.metrics().rejected, 1);
        assert_eq!(scheduler.metrics().dispatched, 0);
    }

    #[tokio::test]
    async fn test_shutdown_reports_pending_work() {
        let scheduler = BackgroundPersistenceScheduler::new(1);
        scheduler.dispatch("slow", async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<(), String>(())
        });

        let report = scheduler.shutdown(Duration::from_millis(20)).await;
        assert!(!report.drained);
        assert_eq!(report.pending, 1);
    }
}
