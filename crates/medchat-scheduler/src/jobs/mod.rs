//! Predefined periodic jobs.
//!
//! - **backfill**: embeds messages and memories stored without a vector

pub mod backfill;

pub use backfill::{create_backfill_job, BackfillJobConfig, BackfillReport, BackfillRunner};
