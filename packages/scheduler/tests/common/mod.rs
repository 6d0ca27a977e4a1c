//! Common test utilities for scheduler integration tests

#![allow(unused_imports)]
#![allow(dead_code)]

use std::time::Duration;

use deckhand_scheduler::{ExecutorRegistry, JobEvent, JobScheduler, SchedulerConfig};
use deckhand_test_utils::{fast_config, memory_job_store};
use tokio::sync::broadcast;

/// Started scheduler over an in-memory store with fast test timings
pub async fn start_scheduler(registry: ExecutorRegistry) -> JobScheduler {
    start_scheduler_with(registry, fast_config()).await
}

/// Started scheduler over an in-memory store with a custom config
pub async fn start_scheduler_with(
    registry: ExecutorRegistry,
    config: SchedulerConfig,
) -> JobScheduler {
    let store = memory_job_store().await;
    let scheduler = JobScheduler::new(store, registry, config);
    scheduler.start().await.expect("Failed to start scheduler");
    scheduler
}

/// Drain events until the predicate matches, panicking after `timeout`.
/// Returns everything received up to and including the matching event.
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<JobEvent>,
    timeout: Duration,
    mut predicate: F,
) -> Vec<JobEvent>
where
    F: FnMut(&JobEvent) -> bool,
{
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .unwrap_or_else(|| panic!("timed out waiting for event; saw {seen:?}"));
        let event = tokio::time::timeout(remaining, events.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for event; saw {seen:?}"))
            .expect("event channel closed");
        let done = predicate(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}
