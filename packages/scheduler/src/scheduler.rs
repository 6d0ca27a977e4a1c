//! The scheduler core.
//!
//! A single admission loop drives the queue: every tick (or eager wake
//! after a job is created, retried, or finishes) it dispatches at most one
//! queued job, ordered by ascending priority then creation time, as long
//! as a concurrency slot is free. Each dispatched job gets its own
//! supervisor task that races the executor against the job's timeout
//! window and a cancellation token.
//!
//! The store is the single source of truth. Every state transition is a
//! status-guarded update, so whichever of {completion, failure, timeout,
//! cancellation} lands first wins and the losers are discarded without
//! ever moving a job out of a terminal state.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult, StoreError};
use crate::events::{EventSink, JobEvent};
use crate::executor::{ExecutorRegistry, ProgressHandle};
use crate::job::{
    mean_progress, BatchSummary, CreateJobOptions, Job, JobStatus, JobType, QueueStats,
};
use crate::store::{JobUpdate, SqliteJobStore};

/// Error note set on jobs that were running when the process went down
pub const RESTART_NOTE: &str = "interrupted by restart";

fn timeout_message(timeout_seconds: i64) -> String {
    format!("job timed out after {timeout_seconds}s")
}

/// Counts from a [`JobScheduler::recover_jobs`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub requeued: usize,
    pub timed_out: usize,
}

struct SchedulerInner {
    store: SqliteJobStore,
    registry: ExecutorRegistry,
    config: SchedulerConfig,
    events: EventSink,
    /// Eager wake for the admission loop
    wake: Notify,
    /// Reentrancy guard: at most one admission pass at a time
    dispatching: AtomicBool,
    /// Cancellation tokens for active supervisors, keyed by job id.
    /// Always a subset of the jobs the store reports as running.
    supervisors: DashMap<String, CancellationToken>,
    shutdown: CancellationToken,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the scheduler. Clones share the same core.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

impl fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobScheduler")
            .field("max_concurrent_jobs", &self.inner.config.max_concurrent_jobs)
            .finish_non_exhaustive()
    }
}

impl JobScheduler {
    pub fn new(store: SqliteJobStore, registry: ExecutorRegistry, config: SchedulerConfig) -> Self {
        let events = EventSink::new(config.event_capacity);
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                registry,
                config,
                events,
                wake: Notify::new(),
                dispatching: AtomicBool::new(false),
                supervisors: DashMap::new(),
                shutdown: CancellationToken::new(),
                loop_handle: Mutex::new(None),
            }),
        }
    }

    /// Direct access to the backing store
    pub fn store(&self) -> &SqliteJobStore {
        &self.inner.store
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Subscribe to lifecycle events. Slow consumers miss events rather
    /// than slowing the scheduler down.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Recover persisted state, then spawn the admission loop.
    /// Calling `start` on an already started scheduler is a no-op.
    /// Fails on a configuration the loop cannot run with: a zero tick or
    /// cleanup interval, or a zero concurrency limit.
    pub async fn start(&self) -> SchedulerResult<()> {
        // tokio::time::interval panics on a zero period; catch it here
        // instead of inside the spawned loop task
        if self.inner.config.tick_interval.is_zero() || self.inner.config.cleanup_interval.is_zero()
        {
            return Err(SchedulerError::InvalidConfig(
                "tick_interval and cleanup_interval must be non-zero".to_string(),
            ));
        }
        if self.inner.config.max_concurrent_jobs == 0 {
            return Err(SchedulerError::InvalidConfig(
                "max_concurrent_jobs must be at least 1".to_string(),
            ));
        }
        let mut guard = self.inner.loop_handle.lock().await;
        if guard.is_some() {
            warn!("job scheduler already started");
            return Ok(());
        }
        self.recover_jobs().await?;
        let scheduler = self.clone();
        *guard = Some(tokio::spawn(scheduler.run_loop()));
        info!(
            max_concurrent_jobs = self.inner.config.max_concurrent_jobs,
            tick_ms = self.inner.config.tick_interval.as_millis() as u64,
            "job scheduler started"
        );
        Ok(())
    }

    /// Stop the loop and release all supervisors. Jobs left running in
    /// the store are picked up by [`recover_jobs`](Self::recover_jobs)
    /// on the next start. A stopped scheduler cannot be restarted.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        for entry in self.inner.supervisors.iter() {
            entry.value().cancel();
        }
        self.inner.supervisors.clear();
        let handle = self.inner.loop_handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                if err.is_panic() {
                    error!("scheduler loop panicked during shutdown");
                }
            }
        }
        info!("job scheduler stopped");
    }

    // ----- creation -----

    /// Create a job, queue it, and wake the admission loop. Batch types
    /// fan out one child per entry in the payload's `targets` array
    /// before returning. The call never waits on execution.
    #[tracing::instrument(skip(self, payload, options), fields(job_type = %job_type))]
    pub async fn create_job(
        &self,
        job_type: JobType,
        payload: Value,
        options: CreateJobOptions,
    ) -> SchedulerResult<Job> {
        let targets = if job_type.is_batch() {
            Some(Self::batch_targets(job_type, &payload)?)
        } else {
            None
        };

        let job = Job::new(job_type, payload, &options);
        self.inner.store.insert(&job).await?;
        let mut job = self
            .inner
            .store
            .update(
                &job.id,
                JobUpdate::new()
                    .expect_status(JobStatus::Created)
                    .status(JobStatus::Queued)
                    .queued_at(Utc::now()),
            )
            .await?
            .ok_or_else(|| SchedulerError::JobNotFound(job.id.clone()))?;

        if let Some(targets) = targets {
            job = self.fan_out_batch(job, targets).await?;
        }

        info!(
            job_id = %job.id,
            priority = job.priority,
            user_initiated = job.user_initiated,
            "job created"
        );
        self.inner.events.publish(JobEvent::Queued { job_id: job.id.clone() });
        self.inner.wake.notify_one();
        Ok(job)
    }

    fn batch_targets(job_type: JobType, payload: &Value) -> SchedulerResult<Vec<Value>> {
        let targets = payload
            .get("targets")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| {
                SchedulerError::invalid_payload(job_type, "batch payload requires a 'targets' array")
            })?;
        if targets.is_empty() {
            return Err(SchedulerError::invalid_payload(job_type, "'targets' must not be empty"));
        }
        Ok(targets)
    }

    /// Create one child job per target, inheriting the parent's priority
    /// and attempt ceiling, then record the child ids on the parent.
    async fn fan_out_batch(&self, parent: Job, targets: Vec<Value>) -> SchedulerResult<Job> {
        let Some(child_type) = parent.job_type.child_type() else {
            return Ok(parent);
        };
        let base = Utc::now();
        let mut child_ids = Vec::with_capacity(targets.len());
        for (index, target) in targets.into_iter().enumerate() {
            let options = CreateJobOptions {
                priority: Some(parent.priority),
                user_initiated: parent.user_initiated,
                parent_job_id: Some(parent.id.clone()),
                timeout_seconds: parent.job_type.child_timeout_seconds(),
                max_attempts: Some(parent.max_attempts),
            };
            let mut child = Job::new(child_type, target, &options);
            // Sub-millisecond stagger keeps sibling dispatch order deterministic
            child.created_at = base + ChronoDuration::microseconds(index as i64);
            self.inner.store.insert(&child).await?;
            let queued = self
                .inner
                .store
                .update(
                    &child.id,
                    JobUpdate::new()
                        .expect_status(JobStatus::Created)
                        .status(JobStatus::Queued)
                        .queued_at(Utc::now()),
                )
                .await?
                .ok_or_else(|| SchedulerError::JobNotFound(child.id.clone()))?;
            self.inner.events.publish(JobEvent::Queued { job_id: queued.id.clone() });
            child_ids.push(Value::String(queued.id));
        }
        debug!(job_id = %parent.id, children = child_ids.len(), "batch fanned out");

        // Recorded for the caller's convenience; parent_job_id stays the
        // authoritative relation
        let mut payload = parent.payload.clone();
        if let Some(map) = payload.as_object_mut() {
            map.insert("childJobIds".to_string(), Value::Array(child_ids));
        }
        self.inner
            .store
            .update(&parent.id, JobUpdate::new().payload(payload))
            .await?
            .ok_or_else(|| SchedulerError::JobNotFound(parent.id.clone()))
    }

    // ----- queries -----

    /// Fetch a single job. Non-terminal batch parents report the live
    /// mean of their children's progress.
    pub async fn get_job(&self, id: &str) -> SchedulerResult<Option<Job>> {
        let Some(mut job) = self.inner.store.get(id).await? else {
            return Ok(None);
        };
        if job.job_type.is_batch() && !job.is_terminal() {
            let children = self.inner.store.list_by_parent(id).await?;
            if !children.is_empty() {
                job.progress = mean_progress(&children);
            }
        }
        Ok(Some(job))
    }

    pub async fn get_jobs_by_status(&self, status: JobStatus) -> SchedulerResult<Vec<Job>> {
        Ok(self.inner.store.list_by_status(status).await?)
    }

    pub async fn get_jobs_by_parent(&self, parent_id: &str) -> SchedulerResult<Vec<Job>> {
        Ok(self.inner.store.list_by_parent(parent_id).await?)
    }

    /// Jobs a user started directly, most recent first
    pub async fn get_user_jobs(&self) -> SchedulerResult<Vec<Job>> {
        Ok(self.inner.store.list_user_initiated().await?)
    }

    pub async fn get_queue_stats(&self) -> SchedulerResult<QueueStats> {
        Ok(self.inner.store.count_by_status().await?)
    }

    // ----- control -----

    /// Cancel a queued or running job, recording `reason` as its error.
    /// Cancelling a batch parent also cancels its outstanding children.
    /// Returns false when the job is missing or already terminal.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_job(&self, id: &str, reason: &str) -> SchedulerResult<bool> {
        let Some(job) = self.inner.store.get(id).await? else {
            return Ok(false);
        };
        if !self.cancel_single(id, reason).await? {
            debug!(job_id = id, status = %job.status, "cancel ignored; job not active");
            return Ok(false);
        }
        if job.job_type.is_batch() {
            for child in self.inner.store.list_by_parent(id).await? {
                self.cancel_single(&child.id, reason).await?;
            }
        }
        self.inner.wake.notify_one();
        Ok(true)
    }

    async fn cancel_single(&self, id: &str, reason: &str) -> SchedulerResult<bool> {
        for status in [JobStatus::Queued, JobStatus::Running] {
            let update = JobUpdate::new()
                .expect_status(status)
                .status(JobStatus::Cancelled)
                .error(reason)
                .completed_at(Utc::now());
            if self.inner.store.update(id, update).await?.is_some() {
                if let Some((_, token)) = self.inner.supervisors.remove(id) {
                    token.cancel();
                }
                info!(job_id = id, reason, "job cancelled");
                self.inner.events.publish(JobEvent::Cancelled {
                    job_id: id.to_string(),
                    reason: reason.to_string(),
                });
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Re-queue a failed or timed-out job without resetting its attempt
    /// count. Returns false when the job is missing, not in a retryable
    /// state, or out of attempts.
    #[tracing::instrument(skip(self))]
    pub async fn retry_job(&self, id: &str) -> SchedulerResult<bool> {
        let Some(job) = self.inner.store.get(id).await? else {
            return Ok(false);
        };
        if !job.can_retry() {
            debug!(
                job_id = id,
                status = %job.status,
                attempts = job.attempts,
                max_attempts = job.max_attempts,
                "retry refused"
            );
            return Ok(false);
        }
        let update = JobUpdate::new()
            .expect_status(job.status)
            .status(JobStatus::Queued)
            .queued_at(Utc::now())
            .clear_error()
            .clear_result()
            .clear_completed_at()
            .clear_timeout_at();
        if self.inner.store.update(id, update).await?.is_none() {
            return Ok(false);
        }
        info!(job_id = id, attempts = job.attempts, "job re-queued by retry request");
        self.inner.events.publish(JobEvent::Retried { job_id: id.to_string() });
        self.inner.wake.notify_one();
        Ok(true)
    }

    /// Cancel every queued and running job, e.g. ahead of shutdown.
    /// Returns the number of jobs cancelled.
    #[tracing::instrument(skip(self))]
    pub async fn abort_all_jobs(&self, reason: &str) -> SchedulerResult<u64> {
        let active = self.inner.store.list_active().await?;
        let mut aborted = 0;
        for job in &active {
            if self.cancel_single(&job.id, reason).await? {
                aborted += 1;
            }
        }
        if aborted > 0 {
            info!(aborted, reason, "aborted all active jobs");
        }
        Ok(aborted)
    }

    // ----- recovery & cleanup -----

    /// Reconcile persisted state after a restart. Jobs still marked
    /// running cannot actually be running, so they are re-queued with an
    /// explanatory note and their attempt count untouched; queued jobs
    /// whose previous timeout window elapsed while the process was down
    /// are marked timed out without ever being dispatched. Safe to call
    /// repeatedly.
    pub async fn recover_jobs(&self) -> SchedulerResult<RecoveryReport> {
        let mut report = RecoveryReport::default();

        let orphaned = self.inner.store.list_by_status(JobStatus::Running).await?;
        for job in orphaned {
            let update = JobUpdate::new()
                .expect_status(JobStatus::Running)
                .status(JobStatus::Queued)
                .queued_at(Utc::now())
                .error(RESTART_NOTE);
            if self.inner.store.update(&job.id, update).await?.is_some() {
                warn!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    attempts = job.attempts,
                    "re-queued job that was running at shutdown"
                );
                self.inner.events.publish(JobEvent::Queued { job_id: job.id.clone() });
                report.requeued += 1;
            }
        }

        // Re-queued jobs keep the previous run's timeout_at, so a window
        // that elapsed while the process was down is honored here
        let expired = self.inner.store.list_queued_timed_out(Utc::now()).await?;
        for job in expired {
            let update = JobUpdate::new()
                .expect_status(JobStatus::Queued)
                .status(JobStatus::Timeout)
                .error(timeout_message(job.timeout_seconds))
                .completed_at(Utc::now());
            if self.inner.store.update(&job.id, update).await?.is_some() {
                warn!(job_id = %job.id, "interrupted job's timeout window already elapsed");
                self.inner.events.publish(JobEvent::Timeout { job_id: job.id.clone() });
                report.timed_out += 1;
            }
        }

        if report.requeued > 0 || report.timed_out > 0 {
            info!(
                requeued = report.requeued,
                timed_out = report.timed_out,
                "job recovery complete"
            );
        }
        Ok(report)
    }

    /// Delete terminal jobs older than the retention window. Runs
    /// automatically on the cleanup interval; exposed for manual sweeps.
    pub async fn run_cleanup(&self) -> SchedulerResult<u64> {
        let cutoff = self.inner.config.retention_cutoff(Utc::now());
        let removed = self.inner.store.delete_terminal_older_than(cutoff).await?;
        if removed > 0 {
            info!(
                removed,
                retention_days = self.inner.config.retention_days,
                "cleaned up expired job records"
            );
        }
        Ok(removed)
    }

    // ----- loop internals -----

    async fn run_loop(self) {
        let mut tick = tokio::time::interval(self.inner.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cleanup = tokio::time::interval(self.inner.config.cleanup_interval);
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("scheduler loop running");
        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                _ = tick.tick() => self.run_tick().await,
                _ = self.inner.wake.notified() => self.run_tick().await,
                _ = cleanup.tick() => {
                    if let Err(err) = self.run_cleanup().await {
                        error!(error = %err, "job cleanup failed");
                    }
                }
            }
        }
        debug!("scheduler loop exited");
    }

    /// One admission pass. At most one runs at a time; overlapping
    /// triggers are dropped and the queue is revisited on the next tick.
    async fn run_tick(&self) {
        if self
            .inner
            .dispatching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        if let Err(err) = self.dispatch_next().await {
            error!(error = %err, "admission pass failed");
        }
        self.inner.dispatching.store(false, Ordering::Release);
    }

    /// Dispatch at most one job: the oldest queued job of the highest
    /// priority, if a slot is free.
    async fn dispatch_next(&self) -> SchedulerResult<()> {
        let Some(job) = self.inner.store.next_queued().await? else {
            return Ok(());
        };
        // Batch parents coordinate children rather than occupy a worker
        // slot, so they bypass the concurrency limit
        if !job.job_type.is_batch() {
            let running = self.inner.store.count_running_leaf().await?;
            if running >= self.inner.config.max_concurrent_jobs as i64 {
                return Ok(());
            }
        }
        self.dispatch(job).await
    }

    async fn dispatch(&self, job: Job) -> SchedulerResult<()> {
        let now = Utc::now();
        let attempts = job.attempts + 1;
        let update = JobUpdate::new()
            .expect_status(JobStatus::Queued)
            .status(JobStatus::Running)
            .attempts(attempts)
            .progress(0)
            .clear_error()
            .clear_result()
            .started_at(now)
            .timeout_at(now + ChronoDuration::seconds(job.timeout_seconds));
        let Some(job) = self.inner.store.update(&job.id, update).await? else {
            debug!(job_id = %job.id, "dispatch skipped; job left the queue");
            return Ok(());
        };
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempts,
            priority = job.priority,
            "job started"
        );
        self.inner.events.publish(JobEvent::Started { job_id: job.id.clone(), attempts });
        self.spawn_supervisor(job);
        Ok(())
    }

    fn spawn_supervisor(&self, job: Job) {
        let token = CancellationToken::new();
        self.inner.supervisors.insert(job.id.clone(), token.clone());
        let scheduler = self.clone();
        tokio::spawn(async move {
            let job_id = job.id.clone();
            if job.job_type.is_batch() {
                scheduler.run_batch(job, token).await;
            } else {
                scheduler.run_leaf(job, token).await;
            }
            scheduler.inner.supervisors.remove(&job_id);
        });
    }

    /// Race the executor against the timeout window and the cancellation
    /// token. The executor runs on its own task and is never interrupted;
    /// when timeout or cancellation wins, its eventual outcome is
    /// discarded by the status guards.
    async fn run_leaf(&self, job: Job, cancel: CancellationToken) {
        let Some(executor) = self.inner.registry.get(job.job_type) else {
            error!(job_id = %job.id, job_type = %job.job_type, "no executor registered for job type");
            let reason = format!("no executor registered for job type '{}'", job.job_type);
            self.fail_job(&job.id, reason, false).await;
            return;
        };
        let window = Duration::from_secs(job.timeout_seconds.max(1) as u64);
        let mut work = {
            let job = job.clone();
            let progress = ProgressHandle::live(job.id.clone(), self.clone());
            tokio::spawn(async move { executor.execute(&job, progress).await })
        };
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(job_id = %job.id, "supervisor released");
            }
            _ = tokio::time::sleep(window) => {
                self.timeout_job(&job).await;
            }
            joined = &mut work => {
                match joined {
                    Ok(Ok(result)) => self.complete_job(&job.id, result).await,
                    Ok(Err(err)) => self.fail_job(&job.id, format!("{err:#}"), true).await,
                    Err(join_err) if join_err.is_panic() => {
                        self.fail_job(&job.id, "executor panicked".to_string(), true).await;
                    }
                    Err(_) => {
                        self.fail_job(&job.id, "executor task aborted".to_string(), true).await;
                    }
                }
            }
        }
    }

    /// Batch parents have no executor; their work is watching children
    async fn run_batch(&self, job: Job, cancel: CancellationToken) {
        let window = Duration::from_secs(job.timeout_seconds.max(1) as u64);
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(job_id = %job.id, "batch supervisor released");
            }
            _ = tokio::time::sleep(window) => {
                self.timeout_job(&job).await;
            }
            outcome = self.watch_children(&job) => {
                if let Err(err) = outcome {
                    error!(job_id = %job.id, error = %err, "batch bookkeeping failed");
                    self.fail_job(&job.id, format!("batch bookkeeping failed: {err}"), true).await;
                }
            }
        }
    }

    /// Mirror child progress onto the parent until every child is
    /// terminal, then complete the parent with an aggregated summary.
    /// The parent completes regardless of how its children fared.
    async fn watch_children(&self, parent: &Job) -> SchedulerResult<()> {
        let mut poll = tokio::time::interval(self.inner.config.tick_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_progress = -1;
        loop {
            poll.tick().await;
            let children = self.inner.store.list_by_parent(&parent.id).await?;
            let progress = mean_progress(&children);
            if progress != last_progress {
                // Plain write, not the monotonic path: a retried child
                // resets its progress and can lower the mean
                let mirrored = self
                    .inner
                    .store
                    .update(
                        &parent.id,
                        JobUpdate::new().expect_status(JobStatus::Running).progress(progress),
                    )
                    .await?;
                if mirrored.is_none() {
                    return Ok(());
                }
                self.inner.events.publish(JobEvent::Progress {
                    job_id: parent.id.clone(),
                    progress,
                });
                last_progress = progress;
            }
            if children.iter().all(|child| child.is_terminal()) {
                let summary = BatchSummary::from_children(&children);
                let result = serde_json::to_value(&summary).map_err(StoreError::from)?;
                self.complete_job(&parent.id, result).await;
                return Ok(());
            }
        }
    }

    async fn complete_job(&self, job_id: &str, result: Value) {
        let update = JobUpdate::new()
            .expect_status(JobStatus::Running)
            .status(JobStatus::Completed)
            .progress(100)
            .result(result)
            .completed_at(Utc::now());
        match self.inner.store.update(job_id, update).await {
            Ok(Some(job)) => {
                info!(job_id, job_type = %job.job_type, "job completed");
                self.inner.events.publish(JobEvent::Completed { job_id: job_id.to_string() });
                self.inner.wake.notify_one();
            }
            Ok(None) => debug!(job_id, "completion discarded; job already terminal"),
            Err(err) => error!(job_id, error = %err, "failed to persist completion"),
        }
    }

    /// Record a failed attempt. When attempts remain (and `allow_retry`),
    /// a delayed re-queue is scheduled; otherwise the failure is final.
    async fn fail_job(&self, job_id: &str, error_text: String, allow_retry: bool) {
        let current = match self.inner.store.get(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id, "failure reported for unknown job");
                return;
            }
            Err(err) => {
                error!(job_id, error = %err, "failed to load job for failure handling");
                return;
            }
        };
        if current.status != JobStatus::Running {
            debug!(job_id, status = %current.status, "failure discarded; job already terminal");
            return;
        }
        let will_retry = allow_retry && current.attempts < current.max_attempts;
        let update = JobUpdate::new()
            .expect_status(JobStatus::Running)
            .status(JobStatus::Failed)
            .error(error_text.clone())
            .completed_at(Utc::now());
        match self.inner.store.update(job_id, update).await {
            Ok(Some(_)) => {
                warn!(
                    job_id,
                    error = %error_text,
                    attempts = current.attempts,
                    max_attempts = current.max_attempts,
                    will_retry,
                    "job failed"
                );
                self.inner.events.publish(JobEvent::Failed {
                    job_id: job_id.to_string(),
                    error: error_text,
                    will_retry,
                });
                if will_retry {
                    self.schedule_retry(job_id.to_string());
                } else {
                    self.inner.wake.notify_one();
                }
            }
            Ok(None) => debug!(job_id, "failure discarded; job already terminal"),
            Err(err) => error!(job_id, error = %err, "failed to persist failure"),
        }
    }

    fn schedule_retry(&self, job_id: String) {
        let scheduler = self.clone();
        let delay = scheduler.inner.config.retry_delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = scheduler.inner.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            scheduler.requeue_failed(&job_id).await;
        });
    }

    /// Put a failed job back in the queue for its next attempt
    async fn requeue_failed(&self, job_id: &str) {
        let update = JobUpdate::new()
            .expect_status(JobStatus::Failed)
            .status(JobStatus::Queued)
            .queued_at(Utc::now())
            .clear_error()
            .clear_result()
            .clear_completed_at()
            .clear_timeout_at();
        match self.inner.store.update(job_id, update).await {
            Ok(Some(job)) => {
                info!(
                    job_id,
                    attempts = job.attempts,
                    max_attempts = job.max_attempts,
                    "job re-queued for retry"
                );
                self.inner.events.publish(JobEvent::Queued { job_id: job_id.to_string() });
                self.inner.wake.notify_one();
            }
            Ok(None) => debug!(job_id, "scheduled retry skipped; job no longer failed"),
            Err(err) => error!(job_id, error = %err, "failed to re-queue job for retry"),
        }
    }

    async fn timeout_job(&self, job: &Job) {
        let update = JobUpdate::new()
            .expect_status(JobStatus::Running)
            .status(JobStatus::Timeout)
            .error(timeout_message(job.timeout_seconds))
            .completed_at(Utc::now());
        match self.inner.store.update(&job.id, update).await {
            Ok(Some(_)) => {
                warn!(job_id = %job.id, timeout_seconds = job.timeout_seconds, "job timed out");
                self.inner.events.publish(JobEvent::Timeout { job_id: job.id.clone() });
                self.inner.wake.notify_one();
            }
            Ok(None) => debug!(job_id = %job.id, "timeout lost the race to another transition"),
            Err(err) => error!(job_id = %job.id, error = %err, "failed to persist timeout"),
        }
    }

    pub(crate) async fn report_progress(&self, job_id: &str, progress: i32) {
        match self.inner.store.update_progress(job_id, progress).await {
            Ok(Some(stored)) => {
                self.inner.events.publish(JobEvent::Progress {
                    job_id: job_id.to_string(),
                    progress: stored,
                });
            }
            Ok(None) => debug!(job_id, progress, "progress report ignored; job not running"),
            Err(err) => warn!(job_id, error = %err, "failed to record progress"),
        }
    }
}
