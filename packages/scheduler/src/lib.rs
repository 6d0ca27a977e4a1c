//! Persistent background job scheduling for Deckhand.
//!
//! Jobs are durable records in SQLite; a single admission loop dispatches
//! them to registered [`JobExecutor`]s in `(priority, created_at)` order,
//! bounded by a concurrency limit. The scheduler supervises each attempt
//! with a per-job timeout, retries failures with a delay, fans batch jobs
//! out into child jobs and aggregates their outcomes, recovers persisted
//! state after a restart, and prunes old terminal records.
//!
//! Construct a [`SqliteJobStore`], register executors in an
//! [`ExecutorRegistry`], build a [`JobScheduler`], and call
//! [`JobScheduler::start`]. Lifecycle notifications are available through
//! [`JobScheduler::subscribe`].

mod config;
mod error;
mod events;
mod executor;
mod job;
mod scheduler;
mod store;

pub use config::{
    SchedulerConfig, DEFAULT_CLEANUP_INTERVAL_SECS, DEFAULT_EVENT_CAPACITY,
    DEFAULT_MAX_CONCURRENT_JOBS, DEFAULT_RETENTION_DAYS, DEFAULT_RETRY_DELAY_MS,
    DEFAULT_TICK_INTERVAL_MS,
};
pub use error::{SchedulerError, SchedulerResult, StoreError, StoreResult};
pub use events::JobEvent;
pub use executor::{ExecutorRegistry, JobExecutor, ProgressHandle};
pub use job::{
    BatchFailure, BatchSummary, CreateJobOptions, Job, JobStatus, JobType, QueueStats,
    DEFAULT_MAX_ATTEMPTS,
};
pub use scheduler::{JobScheduler, RecoveryReport, RESTART_NOTE};
pub use store::{JobUpdate, SqliteJobStore};
