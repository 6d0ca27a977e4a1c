//! Executor seam between the scheduler and the code that does real work.
//!
//! The scheduler never knows what a job does; it looks the type up in the
//! [`ExecutorRegistry`] and awaits [`JobExecutor::execute`]. Executors get a
//! [`ProgressHandle`] to report progress through; everything else flows via
//! the opaque payload and result values.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::job::{Job, JobType};
use crate::scheduler::JobScheduler;

/// One attempt's worth of work for a single job type.
///
/// Called exactly once per attempt. Any returned error is treated as a
/// retryable failure; the rendered error chain becomes the job's `error`
/// field.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &Job, progress: ProgressHandle) -> anyhow::Result<Value>;
}

/// Maps leaf job types to their executors. Batch types are aggregated by
/// the scheduler itself and are never registered here.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<JobType, Arc<dyn JobExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the executor for a job type, replacing any previous one
    pub fn register<E>(&mut self, job_type: JobType, executor: E)
    where
        E: JobExecutor + 'static,
    {
        self.executors.insert(job_type, Arc::new(executor));
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobExecutor>> {
        self.executors.get(&job_type).cloned()
    }

    pub fn is_registered(&self, job_type: JobType) -> bool {
        self.executors.contains_key(&job_type)
    }

    pub fn registered_types(&self) -> Vec<JobType> {
        self.executors.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("registered", &self.registered_types())
            .finish()
    }
}

/// Lets an executor report progress for the job it is running.
///
/// Reports are fire-and-forget: the value is clamped to 0..=100, persisted
/// monotonically while the job is `running`, and published as a progress
/// event. A report can never fail the executor.
#[derive(Clone)]
pub struct ProgressHandle {
    job_id: String,
    scheduler: Option<JobScheduler>,
}

impl ProgressHandle {
    pub(crate) fn live(job_id: String, scheduler: JobScheduler) -> Self {
        Self {
            job_id,
            scheduler: Some(scheduler),
        }
    }

    /// A handle that swallows reports; for tests and standalone executor runs
    pub fn noop(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            scheduler: None,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub async fn report(&self, progress: i32) {
        match &self.scheduler {
            Some(scheduler) => scheduler.report_progress(&self.job_id, progress).await,
            None => {
                tracing::trace!(job_id = %self.job_id, progress, "progress report dropped (noop handle)");
            }
        }
    }
}

impl std::fmt::Debug for ProgressHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressHandle")
            .field("job_id", &self.job_id)
            .field("live", &self.scheduler.is_some())
            .finish()
    }
}
