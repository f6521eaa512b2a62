//! Cron side of the daemon.
//!
//! Wraps a `JobScheduler` so jobs see a shared cancellation token and the
//! daemon can wait for in-flight runs before tearing the scheduler down.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono_tz::Tz;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::overlap::{OverlapGuard, OverlapPolicy};
use crate::{SchedulerConfig, SchedulerError};

const IN_FLIGHT_POLL: Duration = Duration::from_millis(50);

/// Check a six-field cron expression (seconds first).
///
/// ```
/// use medchat_scheduler::validate_cron_expression;
///
/// assert!(validate_cron_expression("0 30 3 * * *").is_ok());
/// assert!(validate_cron_expression("every night").is_err());
/// ```
pub fn validate_cron_expression(expr: &str) -> Result<(), SchedulerError> {
    Job::new_async(expr, |_uuid, _lock| Box::pin(async {}))
        .map(|_| ())
        .map_err(|e| SchedulerError::InvalidCron(format!("'{}': {}", expr, e)))
}

pub struct SchedulerService {
    inner: JobScheduler,
    config: SchedulerConfig,
    cancel: CancellationToken,
    in_flight: Arc<AtomicUsize>,
    started: AtomicBool,
}

impl SchedulerService {
    /// Nothing fires until [`start`](Self::start).
    pub async fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.parse_timezone()?;
        let inner = JobScheduler::new().await?;

        Ok(Self {
            inner,
            config,
            cancel: CancellationToken::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            started: AtomicBool::new(false),
        })
    }

    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }
        self.inner.start().await?;
        info!(timezone = %self.config.default_timezone, "Cron scheduler started");
        Ok(())
    }

    /// Cancel the shared token and wait up to `shutdown_timeout_secs` for
    /// running jobs to return before stopping the scheduler.
    pub async fn shutdown(&mut self) -> Result<(), SchedulerError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(SchedulerError::NotRunning);
        }

        self.cancel.cancel();
        let deadline = Instant::now() + Duration::from_secs(self.config.shutdown_timeout_secs);
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            if Instant::now() >= deadline {
                warn!(
                    in_flight = self.in_flight.load(Ordering::SeqCst),
                    "Cron jobs still running at shutdown deadline"
                );
                break;
            }
            tokio::time::sleep(IN_FLIGHT_POLL).await;
        }

        if let Err(e) = self.inner.shutdown().await {
            warn!(error = %e, "Cron scheduler did not stop cleanly");
        }
        self.started.store(false, Ordering::SeqCst);
        info!("Cron scheduler stopped");
        Ok(())
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Runs currently executing across all jobs.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Schedule `job_fn` on `cron_expr`, in `timezone` or the configured
    /// default. Each run gets a clone of the shutdown token.
    pub async fn register_job<F, Fut>(
        &self,
        name: &str,
        cron_expr: &str,
        timezone: Option<&str>,
        overlap: OverlapPolicy,
        job_fn: F,
    ) -> Result<uuid::Uuid, SchedulerError>
    where
        F: Fn(CancellationToken) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let tz: Tz = match timezone {
            Some(zone) => Self::parse_timezone(zone)?,
            None => self.config.parse_timezone()?,
        };
        validate_cron_expression(cron_expr)?;

        let job_name: Arc<str> = Arc::from(name);
        let cancel = self.cancel.clone();
        let in_flight = self.in_flight.clone();
        let guard = OverlapGuard::new(overlap);

        let job = Job::new_async_tz(cron_expr, tz, move |_uuid, _lock| {
            let job_name = job_name.clone();
            let cancel = cancel.clone();
            let in_flight = in_flight.clone();
            let guard = guard.clone();
            let job_fn = job_fn.clone();

            Box::pin(async move {
                if cancel.is_cancelled() {
                    return;
                }
                let Some(_run) = guard.try_acquire() else {
                    debug!(job = %job_name, "Skipping tick, previous run active");
                    return;
                };

                let _counted = InFlight::enter(&in_flight);
                let started = Instant::now();
                job_fn(cancel).await;

                debug!(
                    job = %job_name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Cron run finished"
                );
            })
        })
        .map_err(|e| SchedulerError::InvalidCron(e.to_string()))?;

        let id = self.inner.add(job).await?;
        info!(job = name, %id, cron = cron_expr, timezone = tz.name(), "Cron job registered");
        Ok(id)
    }

    pub fn parse_timezone(zone: &str) -> Result<Tz, SchedulerError> {
        zone.parse()
            .map_err(|_| SchedulerError::InvalidTimezone(zone.to_string()))
    }
}

/// Counts one run for as long as it lives, panics included.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn short_grace() -> SchedulerConfig {
        SchedulerConfig {
            shutdown_timeout_secs: 1,
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_lifecycle_transitions() {
        let mut scheduler = SchedulerService::new(short_grace()).await.unwrap();
        assert!(!scheduler.is_running());
        assert!(matches!(
            scheduler.shutdown().await,
            Err(SchedulerError::NotRunning)
        ));

        scheduler.start().await.unwrap();
        assert!(scheduler.is_running());
        assert!(matches!(
            scheduler.start().await,
            Err(SchedulerError::AlreadyRunning)
        ));

        let token = scheduler.shutdown_token();
        scheduler.shutdown().await.unwrap();
        assert!(!scheduler.is_running());
        assert!(token.is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_default_zone_checked_at_construction() {
        let config = SchedulerConfig {
            default_timezone: "Atlantis/Capital".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            SchedulerService::new(config).await,
            Err(SchedulerError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn test_cron_validation() {
        for ok in ["0 0 * * * *", "*/10 * * * * *", "0 0 3 * * SUN"] {
            assert!(validate_cron_expression(ok).is_ok(), "{}", ok);
        }
        for bad in ["", "nightly", "* * *"] {
            assert!(validate_cron_expression(bad).is_err(), "{}", bad);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_register_rejects_bad_cron_and_zone() {
        let scheduler = SchedulerService::new(SchedulerConfig::default())
            .await
            .unwrap();

        let bad_cron = scheduler
            .register_job("backfill", "not-cron", None, OverlapPolicy::Skip, |_| async {})
            .await;
        assert!(matches!(bad_cron, Err(SchedulerError::InvalidCron(_))));

        let bad_zone = scheduler
            .register_job(
                "backfill",
                "0 0 * * * *",
                Some("Nowhere/Land"),
                OverlapPolicy::Skip,
                |_| async {},
            )
            .await;
        assert!(matches!(bad_zone, Err(SchedulerError::InvalidTimezone(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_job_fires_every_second() {
        let mut scheduler = SchedulerService::new(short_grace()).await.unwrap();

        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();
        let id = scheduler
            .register_job(
                "tick",
                "* * * * * *",
                Some("Asia/Kolkata"),
                OverlapPolicy::Skip,
                move |_| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                },
            )
            .await
            .unwrap();
        assert!(!id.is_nil());

        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2200)).await;
        scheduler.shutdown().await.unwrap();

        assert!(runs.load(Ordering::SeqCst) >= 1);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_waits_for_cancelled_run() {
        let mut scheduler = SchedulerService::new(short_grace()).await.unwrap();

        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        scheduler
            .register_job("slow", "* * * * * *", None, OverlapPolicy::Skip, move |token| {
                let flag = flag.clone();
                async move {
                    token.cancelled().await;
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    flag.store(true, Ordering::SeqCst);
                }
            })
            .await
            .unwrap();

        scheduler.start().await.unwrap();
        for _ in 0..40 {
            if scheduler.in_flight() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(scheduler.in_flight(), 1);

        scheduler.shutdown().await.unwrap();
        assert!(finished.load(Ordering::SeqCst));
    }
}
