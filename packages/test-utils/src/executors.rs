//! Mock job executors for scheduler tests
//!
//! Each executor exercises one scheduler path: immediate success, scripted
//! failure, work that never finishes (for timeout and cancellation tests),
//! progress reporting, and panics. None of them touch real audio files.
//!
//! # Lock Poisoning Recovery
//!
//! [`ExecutionLog`] uses `unwrap_or_else(|e| e.into_inner())` when acquiring
//! its lock so a panicking test cannot poison the log for subsequent tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use deckhand_scheduler::{Job, JobExecutor, ProgressHandle};
use serde_json::{json, Value};

/// Executor that resolves with a fixed result, optionally after a delay
///
/// # Example
///
/// ```rust,ignore
/// let mut registry = ExecutorRegistry::new();
/// registry.register(JobType::Scan, SucceedingExecutor::new(json!({"tracksFound": 5})));
/// ```
pub struct SucceedingExecutor {
    result: Value,
    delay: Duration,
}

impl SucceedingExecutor {
    pub fn new(result: Value) -> Self {
        Self {
            result,
            delay: Duration::ZERO,
        }
    }

    /// Sleep this long before resolving, to keep the job observable in
    /// its `running` state
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl JobExecutor for SucceedingExecutor {
    async fn execute(&self, _job: &Job, _progress: ProgressHandle) -> anyhow::Result<Value> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.result.clone())
    }
}

/// Executor that fails the first N attempts, then succeeds
///
/// Built with [`FailingExecutor::always`] it fails every attempt, which is
/// what attempts-exhaustion tests want; [`FailingExecutor::until`] models a
/// flaky dependency that recovers.
pub struct FailingExecutor {
    message: String,
    fail_times: usize,
    calls: AtomicUsize,
    result: Value,
}

impl FailingExecutor {
    /// Fail every attempt with `message`
    pub fn always(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fail_times: usize::MAX,
            calls: AtomicUsize::new(0),
            result: Value::Null,
        }
    }

    /// Fail the first `times` attempts with `message`, then resolve with
    /// `result`
    pub fn until(times: usize, message: impl Into<String>, result: Value) -> Self {
        Self {
            message: message.into(),
            fail_times: times,
            calls: AtomicUsize::new(0),
            result,
        }
    }
}

#[async_trait]
impl JobExecutor for FailingExecutor {
    async fn execute(&self, _job: &Job, _progress: ProgressHandle) -> anyhow::Result<Value> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_times {
            anyhow::bail!("{}", self.message);
        }
        Ok(self.result.clone())
    }
}

/// Executor that never resolves; for timeout and cancellation tests
#[derive(Default)]
pub struct HangingExecutor;

#[async_trait]
impl JobExecutor for HangingExecutor {
    async fn execute(&self, _job: &Job, _progress: ProgressHandle) -> anyhow::Result<Value> {
        std::future::pending::<anyhow::Result<Value>>().await
    }
}

/// Executor that panics; the scheduler must contain the panic as a failed
/// attempt rather than letting it take anything else down
#[derive(Default)]
pub struct PanickingExecutor;

#[async_trait]
impl JobExecutor for PanickingExecutor {
    async fn execute(&self, _job: &Job, _progress: ProgressHandle) -> anyhow::Result<Value> {
        panic!("executor blew up");
    }
}

/// Executor that reports a fixed sequence of progress values, then resolves
pub struct ProgressExecutor {
    steps: Vec<i32>,
    step_delay: Duration,
    result: Value,
}

impl ProgressExecutor {
    pub fn new(steps: Vec<i32>, result: Value) -> Self {
        Self {
            steps,
            step_delay: Duration::from_millis(10),
            result,
        }
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }
}

#[async_trait]
impl JobExecutor for ProgressExecutor {
    async fn execute(&self, _job: &Job, progress: ProgressHandle) -> anyhow::Result<Value> {
        for &step in &self.steps {
            progress.report(step).await;
            tokio::time::sleep(self.step_delay).await;
        }
        Ok(self.result.clone())
    }
}

/// Executor whose behavior is scripted by the job payload
///
/// A payload with a string `"fail"` field makes the attempt fail with that
/// message; anything else resolves with `{"processed": <payload>}`. This is
/// how batch tests give sibling children different fates, since all
/// children of one type share a single registered executor.
#[derive(Default)]
pub struct ScriptedExecutor;

#[async_trait]
impl JobExecutor for ScriptedExecutor {
    async fn execute(&self, job: &Job, _progress: ProgressHandle) -> anyhow::Result<Value> {
        if let Some(message) = job.payload.get("fail").and_then(Value::as_str) {
            anyhow::bail!("{message}");
        }
        Ok(json!({ "processed": job.payload }))
    }
}

/// One execution observed by a [`RecordingExecutor`]
#[derive(Debug, Clone)]
pub struct ExecutionEntry {
    pub job_id: String,
    pub priority: i32,
    pub payload: Value,
}

/// Shared record of executions; clone it before registering the executor
/// so the test keeps a handle after the registry takes ownership
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    entries: Arc<Mutex<Vec<ExecutionEntry>>>,
}

impl ExecutionLog {
    pub fn entries(&self) -> Vec<ExecutionEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, entry: ExecutionEntry) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }
}

/// Executor that records every execution, then resolves immediately.
/// Useful for asserting dispatch order.
///
/// # Example
///
/// ```rust,ignore
/// let recorder = RecordingExecutor::new(json!({"ok": true}));
/// let log = recorder.log();
/// registry.register(JobType::Export, recorder);
/// // ... run jobs ...
/// let order: Vec<i32> = log.entries().iter().map(|e| e.priority).collect();
/// ```
pub struct RecordingExecutor {
    log: ExecutionLog,
    result: Value,
}

impl RecordingExecutor {
    pub fn new(result: Value) -> Self {
        Self {
            log: ExecutionLog::default(),
            result,
        }
    }

    /// Handle onto the shared execution log
    pub fn log(&self) -> ExecutionLog {
        self.log.clone()
    }
}

#[async_trait]
impl JobExecutor for RecordingExecutor {
    async fn execute(&self, job: &Job, _progress: ProgressHandle) -> anyhow::Result<Value> {
        self.log.push(ExecutionEntry {
            job_id: job.id.clone(),
            priority: job.priority,
            payload: job.payload.clone(),
        });
        Ok(self.result.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckhand_scheduler::{CreateJobOptions, JobType};

    fn probe_job(payload: Value) -> Job {
        Job::new(JobType::Analyze, payload, &CreateJobOptions::default())
    }

    #[tokio::test]
    async fn failing_executor_recovers_after_the_scripted_failures() {
        let executor = FailingExecutor::until(2, "flaky", json!({"ok": true}));
        let job = probe_job(json!({}));
        for _ in 0..2 {
            let err = executor
                .execute(&job, ProgressHandle::noop(&job.id))
                .await
                .expect_err("scripted failure");
            assert_eq!(err.to_string(), "flaky");
        }
        let value = executor
            .execute(&job, ProgressHandle::noop(&job.id))
            .await
            .expect("third attempt succeeds");
        assert_eq!(value, json!({"ok": true}));
    }

    #[tokio::test]
    async fn scripted_executor_reads_its_fate_from_the_payload() {
        let executor = ScriptedExecutor;

        let ok = probe_job(json!({"trackId": "t1"}));
        let value = executor
            .execute(&ok, ProgressHandle::noop(&ok.id))
            .await
            .expect("clean payload succeeds");
        assert_eq!(value, json!({"processed": {"trackId": "t1"}}));

        let doomed = probe_job(json!({"trackId": "t2", "fail": "corrupt file"}));
        let err = executor
            .execute(&doomed, ProgressHandle::noop(&doomed.id))
            .await
            .expect_err("fail marker must fail");
        assert_eq!(err.to_string(), "corrupt file");
    }

    #[tokio::test]
    async fn recording_executor_logs_in_execution_order() {
        let executor = RecordingExecutor::new(json!(null));
        let log = executor.log();
        for priority in [3, 1, 2] {
            let mut job = probe_job(json!({}));
            job.priority = priority;
            executor
                .execute(&job, ProgressHandle::noop(&job.id))
                .await
                .expect("recording never fails");
        }
        let priorities: Vec<i32> = log.entries().iter().map(|e| e.priority).collect();
        assert_eq!(priorities, vec![3, 1, 2]);
    }
}
