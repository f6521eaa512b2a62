//! Background work for the medchat pipeline.
//!
//! Two kinds of work run outside the request path:
//!
//! - [`BackgroundPersistenceScheduler`]: detached, bounded, at-most-once
//!   writes dispatched after a chat reply is returned
//! - [`SchedulerService`]: timezone-aware cron jobs with overlap control and
//!   graceful shutdown, used for the periodic embedding backfill
//!
//! # Example
//!
//! ```ignore
//! use medchat_scheduler::{create_backfill_job, BackfillJobConfig, SchedulerConfig, SchedulerService};
//!
//! let scheduler = SchedulerService::new(SchedulerConfig::default()).await?;
//! create_backfill_job(&scheduler, runner, BackfillJobConfig::default()).await?;
//! scheduler.start().await?;
//! ```

mod config;
mod dispatcher;
mod error;
mod overlap;
mod scheduler;

pub mod jobs;

pub use config::SchedulerConfig;
pub use dispatcher::{
    BackgroundPersistenceScheduler, DispatchMetrics, DispatchMetricsSnapshot, ShutdownReport,
};
pub use error::SchedulerError;
pub use jobs::{create_backfill_job, BackfillJobConfig, BackfillReport, BackfillRunner};
pub use overlap::{OverlapGuard, OverlapPolicy, RunGuard};
pub use scheduler::{validate_cron_expression, SchedulerService};

// Re-export for jobs that watch for shutdown
pub use tokio_util::sync::CancellationToken;
