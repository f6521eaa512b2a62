use thiserror::Error;
use tokio_cron_scheduler::JobSchedulerError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Raised by tokio-cron-scheduler itself
    #[error("Cron scheduler failure: {0}")]
    Scheduler(String),

    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Cron scheduler already started")]
    AlreadyRunning,

    #[error("Cron scheduler was never started")]
    NotRunning,

    /// A job setting outside its allowed range
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

impl From<JobSchedulerError> for SchedulerError {
    fn from(err: JobSchedulerError) -> Self {
        Self::Scheduler(err.to_string())
    }
}
