//! Embedding backfill job.
//!
//! Messages are stored without vectors by default and any embedding
//! failure on create leaves a row unembedded. This job periodically picks
//! up a batch of such rows and embeds them.
//!
//! By default runs every 15 minutes.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use medchat_types::BackfillSettings;

use crate::{OverlapPolicy, SchedulerError, SchedulerService};

/// Largest batch a single run may take.
pub const MAX_BATCH_SIZE: usize = 500;

/// Counts from one backfill pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillReport {
    pub messages_processed: usize,
    pub messages_failed: usize,
    pub memories_processed: usize,
    pub memories_failed: usize,
}

impl BackfillReport {
    pub fn total_processed(&self) -> usize {
        self.messages_processed + self.memories_processed
    }

    pub fn total_failed(&self) -> usize {
        self.messages_failed + self.memories_failed
    }
}

/// Something that can run one backfill pass.
#[async_trait]
pub trait BackfillRunner: Send + Sync {
    async fn run_backfill(&self, batch_size: usize) -> Result<BackfillReport, String>;
}

/// Configuration for the backfill job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillJobConfig {
    /// Cron expression (default: "0 */15 * * * *" = every 15 minutes)
    pub cron: String,

    /// Timezone (default: "UTC")
    pub timezone: String,

    /// Rows per table per run (default: 100, max 500)
    pub batch_size: usize,
}

impl Default for BackfillJobConfig {
    fn default() -> Self {
        Self {
            cron: "0 */15 * * * *".to_string(),
            timezone: "UTC".to_string(),
            batch_size: 100,
        }
    }
}

impl BackfillJobConfig {
    pub fn from_settings(settings: &BackfillSettings) -> Self {
        Self {
            cron: settings.schedule.clone(),
            timezone: settings.timezone.clone(),
            batch_size: settings.batch_size,
        }
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        validate_batch_size(self.batch_size)
    }
}

/// Reject batch sizes outside 1..=500.
pub fn validate_batch_size(batch_size: usize) -> Result<(), SchedulerError> {
    if (1..=MAX_BATCH_SIZE).contains(&batch_size) {
        Ok(())
    } else {
        Err(SchedulerError::InvalidParameter {
            name: "batch_size",
            reason: format!("must be between 1 and {}, got {}", MAX_BATCH_SIZE, batch_size),
        })
    }
}

/// Register the backfill job with the scheduler.
///
/// Uses OverlapPolicy::Skip so a slow pass is never doubled up.
///
/// # Errors
///
/// Returns error if the batch size is out of range or job registration
/// fails (invalid cron, invalid timezone).
pub async fn create_backfill_job(
    scheduler: &SchedulerService,
    runner: Arc<dyn BackfillRunner>,
    config: BackfillJobConfig,
) -> Result<(), SchedulerError> {
    config.validate()?;
    let batch_size = config.batch_size;

    scheduler
        .register_job(
            "embedding_backfill",
            &config.cron,
            Some(&config.timezone),
            OverlapPolicy::Skip,
            move |token| {
                let runner = runner.clone();
                async move {
                    if token.is_cancelled() {
                        info!("Backfill skipped, shutdown in progress");
                        return;
                    }
                    match runner.run_backfill(batch_size).await {
                        Ok(report) => info!(
                            messages_processed = report.messages_processed,
                            messages_failed = report.messages_failed,
                            memories_processed = report.memories_processed,
                            memories_failed = report.memories_failed,
                            "Backfill pass finished"
                        ),
                        Err(e) => warn!(error = %e, "Backfill pass failed"),
                    }
                }
            },
        )
        .await?;

    info!(batch_size, "Registered backfill job");
    Ok(())
}
