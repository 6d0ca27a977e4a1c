//! Job record model and per-type scheduling policy.
//!
//! A [`Job`] is the only entity the scheduler persists. Payload and result
//! are opaque JSON decoded by the matching executor; the scheduler itself
//! only inspects the `targets` array of batch payloads for fan-out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::SchedulerError;

/// Default number of attempts before a failing job is abandoned
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Timeout applied to children spawned by a batch job, shorter than the
/// parent's own window so one stuck child cannot run out the parent's clock
const BATCH_CHILD_TIMEOUT_SECS: i64 = 600;

/// The kinds of work the scheduler knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Walk the library root and sync the track catalog
    Scan,
    /// Stage one acquired audio file into the library
    FileStage,
    /// Parent job fanning out one `Analyze` child per target
    BatchAnalyze,
    /// BPM / key / energy analysis of a single track
    Analyze,
    /// Parent job fanning out one `Export` child per target
    BatchExport,
    /// Write a playlist (and optionally copies) for DJ software
    Export,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Scan => "scan",
            JobType::FileStage => "file_stage",
            JobType::BatchAnalyze => "batch_analyze",
            JobType::Analyze => "analyze",
            JobType::BatchExport => "batch_export",
            JobType::Export => "export",
        }
    }

    /// Batch types fan out child jobs at creation and aggregate their
    /// progress instead of running a registered executor.
    pub fn is_batch(&self) -> bool {
        matches!(self, JobType::BatchAnalyze | JobType::BatchExport)
    }

    /// The type of the children a batch job spawns
    pub fn child_type(&self) -> Option<JobType> {
        match self {
            JobType::BatchAnalyze => Some(JobType::Analyze),
            JobType::BatchExport => Some(JobType::Export),
            _ => None,
        }
    }

    /// Per-type timeout defaults, overridable per creation
    pub fn default_timeout_seconds(&self) -> i64 {
        match self {
            JobType::Scan => 1800,
            JobType::FileStage => 60,
            JobType::BatchAnalyze => 3600,
            JobType::Analyze => 300,
            JobType::BatchExport => 1800,
            JobType::Export => 600,
        }
    }

    /// Timeout for the children of a batch type
    pub fn child_timeout_seconds(&self) -> Option<i64> {
        self.child_type().map(|_| BATCH_CHILD_TIMEOUT_SECS)
    }

    /// Per-type priority defaults; lower runs earlier. Exports go first so
    /// a DJ waiting on a playlist is never stuck behind a library rescan.
    pub fn default_priority(&self, user_initiated: bool) -> i32 {
        match self {
            JobType::Export | JobType::BatchExport => 1,
            JobType::FileStage => 2,
            JobType::Analyze | JobType::BatchAnalyze => 3,
            JobType::Scan => {
                if user_initiated {
                    5
                } else {
                    7
                }
            }
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scan" => Ok(JobType::Scan),
            "file_stage" => Ok(JobType::FileStage),
            "batch_analyze" => Ok(JobType::BatchAnalyze),
            "analyze" => Ok(JobType::Analyze),
            "batch_export" => Ok(JobType::BatchExport),
            "export" => Ok(JobType::Export),
            other => Err(SchedulerError::UnknownJobType(other.to_string())),
        }
    }
}

/// Lifecycle states of a job; see the scheduler module for the transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Queued,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Timeout => "timeout",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states are subject to retention cleanup and never
    /// transitioned out of by the loop. A `failed` job below its attempts
    /// ceiling can still leave this set through the retry path.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Timeout | JobStatus::Cancelled
        )
    }

    /// Active jobs are the ones `abort_all_jobs` tears down
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(JobStatus::Created),
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "timeout" => Ok(JobStatus::Timeout),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(SchedulerError::UnknownJobStatus(other.to_string())),
        }
    }
}

/// Caller-supplied knobs for job creation; unset fields fall back to the
/// per-type policy above
#[derive(Debug, Clone, Default)]
pub struct CreateJobOptions {
    pub priority: Option<i32>,
    pub user_initiated: bool,
    pub parent_job_id: Option<String>,
    pub timeout_seconds: Option<i64>,
    pub max_attempts: Option<i32>,
}

/// One persisted unit of schedulable work
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: i32,
    pub payload: Value,
    pub progress: i32,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub parent_job_id: Option<String>,
    pub user_initiated: bool,
    pub timeout_seconds: i64,
    pub created_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub timeout_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build a fresh record in `created` status with a generated id and
    /// the per-type defaults applied
    pub fn new(job_type: JobType, payload: Value, options: &CreateJobOptions) -> Self {
        let user_initiated = options.user_initiated;
        Self {
            id: Uuid::new_v4().to_string(),
            job_type,
            status: JobStatus::Created,
            priority: options
                .priority
                .unwrap_or_else(|| job_type.default_priority(user_initiated)),
            payload,
            progress: 0,
            result: None,
            error: None,
            attempts: 0,
            max_attempts: options.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS).max(1),
            parent_job_id: options.parent_job_id.clone(),
            user_initiated,
            timeout_seconds: options
                .timeout_seconds
                .unwrap_or_else(|| job_type.default_timeout_seconds()),
            created_at: Utc::now(),
            queued_at: None,
            started_at: None,
            completed_at: None,
            timeout_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Only failed and timed-out jobs below the attempts ceiling may be
    /// re-queued by `retry_job`
    pub fn can_retry(&self) -> bool {
        matches!(self.status, JobStatus::Failed | JobStatus::Timeout)
            && self.attempts < self.max_attempts
    }
}

/// Per-status job counts returned by `get_queue_stats`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub created: u64,
    pub queued: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub timeout: u64,
    pub cancelled: u64,
    pub total: u64,
}

impl QueueStats {
    pub(crate) fn record(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Created => self.created += count,
            JobStatus::Queued => self.queued += count,
            JobStatus::Running => self.running += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Failed => self.failed += count,
            JobStatus::Timeout => self.timeout += count,
            JobStatus::Cancelled => self.cancelled += count,
        }
        self.total += count;
    }

    /// Jobs the loop still owes work to
    pub fn active(&self) -> u64 {
        self.queued + self.running
    }
}

/// Aggregated outcome a batch parent reports as its result. The parent
/// completes even when children fail; consumers read the damage from here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
    pub failures: Vec<BatchFailure>,
}

/// One non-completed child in a batch summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub job_id: String,
    pub error: Option<String>,
}

impl BatchSummary {
    /// Tally terminal children into a summary. Callers only invoke this
    /// once every child is terminal.
    pub fn from_children(children: &[Job]) -> Self {
        let mut summary = BatchSummary {
            total: children.len(),
            completed: 0,
            failed: 0,
            timed_out: 0,
            cancelled: 0,
            failures: Vec::new(),
        };
        for child in children {
            match child.status {
                JobStatus::Completed => summary.completed += 1,
                JobStatus::Failed => summary.failed += 1,
                JobStatus::Timeout => summary.timed_out += 1,
                JobStatus::Cancelled => summary.cancelled += 1,
                _ => {}
            }
            if child.status.is_terminal() && child.status != JobStatus::Completed {
                summary.failures.push(BatchFailure {
                    job_id: child.id.clone(),
                    error: child.error.clone(),
                });
            }
        }
        summary
    }
}

/// Unweighted mean of the children's progress, rounded to the nearest
/// integer. No children reads as zero.
pub(crate) fn mean_progress(children: &[Job]) -> i32 {
    if children.is_empty() {
        return 0;
    }
    let sum: i64 = children.iter().map(|c| i64::from(c.progress)).sum();
    (sum as f64 / children.len() as f64).round() as i32
}
