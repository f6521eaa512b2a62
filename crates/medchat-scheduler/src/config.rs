//! Scheduler configuration.

use serde::{Deserialize, Serialize};

use medchat_types::Settings;

use crate::SchedulerError;

/// Settings for the cron side of the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// IANA zone used by jobs that do not name their own
    #[serde(default = "default_timezone")]
    pub default_timezone: String,

    /// How long a cancelled job may keep running before the scheduler
    /// is torn down
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_shutdown_timeout() -> u64 {
    10
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_timezone: default_timezone(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl SchedulerConfig {
    /// Backfill timezone and the persistence grace period.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            default_timezone: settings.backfill.timezone.clone(),
            shutdown_timeout_secs: settings.persistence.shutdown_grace_secs,
        }
    }

    /// Fails with `InvalidTimezone` for anything chrono-tz does not know.
    pub fn parse_timezone(&self) -> Result<chrono_tz::Tz, SchedulerError> {
        self.default_timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| SchedulerError::InvalidTimezone(self.default_timezone.clone()))
    }
}
