//! Scheduler tuning knobs.
//!
//! Defaults here are the product policy; binaries that want env-driven
//! overrides build this struct from their own configuration layer.

use std::time::Duration;

/// How many leaf jobs may run at once
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 3;

/// Scheduling loop tick
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;

/// Delay before a failed job is automatically re-queued
pub const DEFAULT_RETRY_DELAY_MS: u64 = 5000;

/// Terminal jobs older than this are removed by the retention sweep
pub const DEFAULT_RETENTION_DAYS: i64 = 7;

/// How often the retention sweep runs
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;

/// Broadcast buffer for lifecycle events
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Concurrency limit for running leaf jobs; batch parents are
    /// bookkeeping and do not count against it
    pub max_concurrent_jobs: usize,
    /// Fixed tick driving admission
    pub tick_interval: Duration,
    /// Delay before a failed job is re-queued
    pub retry_delay: Duration,
    /// Retention window for terminal jobs
    pub retention_days: i64,
    /// Cadence of the retention sweep
    pub cleanup_interval: Duration,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            retention_days: DEFAULT_RETENTION_DAYS,
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SchedulerConfig {
    /// Oldest `completed_at` the retention sweep keeps, relative to `now`
    pub fn retention_cutoff(&self, now: chrono::DateTime<chrono::Utc>) -> chrono::DateTime<chrono::Utc> {
        now - chrono::Duration::days(self.retention_days)
    }
}
