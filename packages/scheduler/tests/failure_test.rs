//! Integration tests for failure handling
//!
//! This test module covers:
//! - Automatic retry of transient executor failures
//! - Attempt exhaustion leaving the job failed
//! - Timeouts as a distinct terminal state, never auto-retried
//! - Cooperative cancellation and discarding of late outcomes
//! - Executor panics contained to the failing job
//! - Unknown job types failing fatally

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use deckhand_scheduler::{CreateJobOptions, ExecutorRegistry, JobEvent, JobStatus, JobType};
use deckhand_test_utils::{
    wait_for_status, FailingExecutor, HangingExecutor, PanickingExecutor, SucceedingExecutor,
};
use serde_json::json;

use common::{start_scheduler, wait_for_event};

// =============================================================================
// Retries
// =============================================================================

#[test_log::test(tokio::test)]
async fn transient_failure_is_retried_and_succeeds() {
    let mut registry = ExecutorRegistry::new();
    registry.register(
        JobType::Analyze,
        FailingExecutor::until(1, "transient io error", json!({"bpm": 128.0})),
    );
    let scheduler = start_scheduler(registry).await;
    let mut events = scheduler.subscribe();

    let job = scheduler
        .create_job(JobType::Analyze, json!({"trackId": "t1"}), CreateJobOptions::default())
        .await
        .expect("Failed to create job");

    let done = wait_for_status(&scheduler, &job.id, JobStatus::Completed, Duration::from_secs(3)).await;
    assert_eq!(done.attempts, 2);
    assert_eq!(done.error, None);
    assert_eq!(done.result, Some(json!({"bpm": 128.0})));

    let seen = wait_for_event(&mut events, Duration::from_secs(1), |event| {
        matches!(event, JobEvent::Completed { .. })
    })
    .await;
    let failed = seen
        .iter()
        .find(|event| matches!(event, JobEvent::Failed { .. }))
        .expect("a failure must have been published before the retry");
    assert_matches!(
        failed,
        JobEvent::Failed { error, will_retry: true, .. } if error == "transient io error"
    );
    let starts = seen
        .iter()
        .filter(|event| matches!(event, JobEvent::Started { .. }))
        .count();
    assert_eq!(starts, 2, "the job must have been dispatched twice");
}

#[tokio::test]
async fn failures_exhaust_attempts_and_stay_failed() {
    let mut registry = ExecutorRegistry::new();
    registry.register(JobType::Analyze, FailingExecutor::always("disk on fire"));
    let scheduler = start_scheduler(registry).await;
    let mut events = scheduler.subscribe();

    let job = scheduler
        .create_job(
            JobType::Analyze,
            json!({"trackId": "t1"}),
            CreateJobOptions {
                max_attempts: Some(2),
                ..Default::default()
            },
        )
        .await
        .expect("Failed to create job");

    // The first failure re-queues; only the second is final
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    let exhausted = loop {
        let current = scheduler
            .get_job(&job.id)
            .await
            .expect("Failed to fetch job")
            .expect("job exists");
        if current.status == JobStatus::Failed && current.attempts == 2 {
            break current;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "attempts never exhausted; currently {} after {} attempts",
            current.status,
            current.attempts
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    assert_eq!(exhausted.error.as_deref(), Some("disk on fire"));
    assert!(exhausted.completed_at.is_some());

    // Well past the retry delay, no further re-queue may happen
    tokio::time::sleep(Duration::from_millis(200)).await;
    let still = scheduler
        .get_job(&job.id)
        .await
        .expect("Failed to fetch job")
        .expect("job exists");
    assert_eq!(still.status, JobStatus::Failed);
    assert_eq!(still.attempts, 2);

    let seen = wait_for_event(&mut events, Duration::from_secs(1), |event| {
        matches!(event, JobEvent::Failed { will_retry: false, .. })
    })
    .await;
    let retry_flags: Vec<bool> = seen
        .iter()
        .filter_map(|event| match event {
            JobEvent::Failed { will_retry, .. } => Some(*will_retry),
            _ => None,
        })
        .collect();
    assert_eq!(retry_flags, vec![true, false]);
}

// =============================================================================
// Timeouts
// =============================================================================

#[tokio::test]
async fn hung_executor_times_out_without_auto_retry() {
    let mut registry = ExecutorRegistry::new();
    registry.register(JobType::Analyze, HangingExecutor);
    let scheduler = start_scheduler(registry).await;

    let job = scheduler
        .create_job(
            JobType::Analyze,
            json!({"trackId": "t1"}),
            CreateJobOptions {
                timeout_seconds: Some(1),
                ..Default::default()
            },
        )
        .await
        .expect("Failed to create job");

    let timed_out = wait_for_status(&scheduler, &job.id, JobStatus::Timeout, Duration::from_secs(3)).await;
    assert_eq!(timed_out.error.as_deref(), Some("job timed out after 1s"));
    assert!(timed_out.completed_at.is_some());
    assert_eq!(timed_out.attempts, 1);

    // Timeout is terminal: the retry delay passing must not re-queue it
    tokio::time::sleep(Duration::from_millis(200)).await;
    let still = scheduler
        .get_job(&job.id)
        .await
        .expect("Failed to fetch job")
        .expect("job exists");
    assert_eq!(still.status, JobStatus::Timeout);

    // But a manual retry is allowed while attempts remain
    let retried = scheduler.retry_job(&job.id).await.expect("Failed to retry");
    assert!(retried);
    scheduler.abort_all_jobs("test teardown").await.expect("Failed to abort");
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn cancelled_job_ignores_the_late_timeout() {
    let mut registry = ExecutorRegistry::new();
    registry.register(JobType::Analyze, HangingExecutor);
    registry.register(JobType::Export, SucceedingExecutor::new(json!({"playlist": "set.m3u8"})));
    let scheduler = start_scheduler(registry).await;

    let job = scheduler
        .create_job(
            JobType::Analyze,
            json!({"trackId": "t1"}),
            CreateJobOptions {
                timeout_seconds: Some(1),
                ..Default::default()
            },
        )
        .await
        .expect("Failed to create job");
    wait_for_status(&scheduler, &job.id, JobStatus::Running, Duration::from_secs(2)).await;

    let cancelled = scheduler
        .cancel_job(&job.id, "stopped from the queue panel")
        .await
        .expect("Failed to cancel");
    assert!(cancelled);
    let job_after = wait_for_status(&scheduler, &job.id, JobStatus::Cancelled, Duration::from_secs(2)).await;
    assert_eq!(job_after.error.as_deref(), Some("stopped from the queue panel"));

    // Outlive the 1s timeout window: its expiry must not move the job
    // out of the terminal state it already reached
    tokio::time::sleep(Duration::from_millis(1300)).await;
    let still = scheduler
        .get_job(&job.id)
        .await
        .expect("Failed to fetch job")
        .expect("job exists");
    assert_eq!(still.status, JobStatus::Cancelled);
    assert_eq!(still.error.as_deref(), Some("stopped from the queue panel"));

    // The worker slot came back: new work still runs
    let export = scheduler
        .create_job(JobType::Export, json!({"playlistId": "p1"}), CreateJobOptions::default())
        .await
        .expect("Failed to create job");
    wait_for_status(&scheduler, &export.id, JobStatus::Completed, Duration::from_secs(2)).await;
}

#[tokio::test]
async fn cancelling_a_terminal_job_is_refused() {
    let mut registry = ExecutorRegistry::new();
    registry.register(JobType::Export, SucceedingExecutor::new(json!(null)));
    let scheduler = start_scheduler(registry).await;

    let job = scheduler
        .create_job(JobType::Export, json!({"playlistId": "p1"}), CreateJobOptions::default())
        .await
        .expect("Failed to create job");
    wait_for_status(&scheduler, &job.id, JobStatus::Completed, Duration::from_secs(2)).await;

    let cancelled = scheduler.cancel_job(&job.id, "too late").await.expect("Failed to cancel");
    assert!(!cancelled);
    assert!(!scheduler.cancel_job("no-such-id", "ghost").await.expect("Failed to cancel"));
}

// =============================================================================
// Panics and unknown types
// =============================================================================

#[test_log::test(tokio::test)]
async fn executor_panic_fails_the_job_but_not_the_scheduler() {
    let mut registry = ExecutorRegistry::new();
    registry.register(JobType::Analyze, PanickingExecutor);
    registry.register(JobType::Export, SucceedingExecutor::new(json!({"ok": true})));
    let scheduler = start_scheduler(registry).await;

    let doomed = scheduler
        .create_job(
            JobType::Analyze,
            json!({"trackId": "t1"}),
            CreateJobOptions {
                max_attempts: Some(1),
                ..Default::default()
            },
        )
        .await
        .expect("Failed to create job");
    let failed = wait_for_status(&scheduler, &doomed.id, JobStatus::Failed, Duration::from_secs(3)).await;
    assert_eq!(failed.error.as_deref(), Some("executor panicked"));

    // The loop survived the panic and keeps dispatching
    let export = scheduler
        .create_job(JobType::Export, json!({"playlistId": "p1"}), CreateJobOptions::default())
        .await
        .expect("Failed to create job");
    wait_for_status(&scheduler, &export.id, JobStatus::Completed, Duration::from_secs(2)).await;
}

#[tokio::test]
async fn unknown_job_type_fails_fatally_without_retry() {
    // Only analyze is registered; export dispatches into a missing executor
    let mut registry = ExecutorRegistry::new();
    registry.register(JobType::Analyze, SucceedingExecutor::new(json!(null)));
    let scheduler = start_scheduler(registry).await;
    let mut events = scheduler.subscribe();

    let job = scheduler
        .create_job(JobType::Export, json!({"playlistId": "p1"}), CreateJobOptions::default())
        .await
        .expect("Failed to create job");

    let failed = wait_for_status(&scheduler, &job.id, JobStatus::Failed, Duration::from_secs(2)).await;
    assert_eq!(
        failed.error.as_deref(),
        Some("no executor registered for job type 'export'")
    );
    assert_eq!(failed.attempts, 1);

    let seen = wait_for_event(&mut events, Duration::from_secs(1), |event| {
        matches!(event, JobEvent::Failed { .. })
    })
    .await;
    assert_matches!(
        seen.last(),
        Some(JobEvent::Failed { will_retry: false, .. }),
        "a missing executor is fatal, never queued for retry"
    );

    // Attempts remained below the ceiling, yet no re-queue happens
    tokio::time::sleep(Duration::from_millis(200)).await;
    let still = scheduler
        .get_job(&job.id)
        .await
        .expect("Failed to fetch job")
        .expect("job exists");
    assert_eq!(still.status, JobStatus::Failed);
    assert_eq!(still.attempts, 1);
}
