//! Builders and polling helpers for scheduler integration tests

use std::time::Duration;

use deckhand_scheduler::{Job, JobScheduler, JobStatus, SchedulerConfig, SqliteJobStore};
use sqlx::sqlite::SqlitePoolOptions;

/// In-memory job store with the schema applied.
///
/// The pool is capped at a single connection; an in-memory SQLite database
/// is private to its connection, so a second one would see an empty schema.
pub async fn memory_job_store() -> SqliteJobStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory sqlite");
    let store = SqliteJobStore::new(pool);
    store.init_schema().await.expect("Failed to apply job schema");
    store
}

/// Scheduler config with tight timings so integration tests run fast
pub fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        tick_interval: Duration::from_millis(20),
        retry_delay: Duration::from_millis(50),
        ..SchedulerConfig::default()
    }
}

/// Poll until the job reaches `status`, panicking after `timeout` with the
/// job's current state in the message
pub async fn wait_for_status(
    scheduler: &JobScheduler,
    job_id: &str,
    status: JobStatus,
    timeout: Duration,
) -> Job {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = scheduler
            .get_job(job_id)
            .await
            .expect("Failed to fetch job")
            .unwrap_or_else(|| panic!("job {job_id} disappeared while waiting for {status}"));
        if job.status == status {
            return job;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "timed out waiting for job {job_id} to reach {status}; \
                 currently {} (attempts {}, error {:?})",
                job.status, job.attempts, job.error
            );
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll until the job reaches any terminal status
pub async fn wait_for_terminal(scheduler: &JobScheduler, job_id: &str, timeout: Duration) -> Job {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = scheduler
            .get_job(job_id)
            .await
            .expect("Failed to fetch job")
            .unwrap_or_else(|| panic!("job {job_id} disappeared while waiting for a terminal state"));
        if job.is_terminal() {
            return job;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "timed out waiting for job {job_id} to finish; currently {} (progress {})",
                job.status, job.progress
            );
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
