//! Error types for the scheduler crate.
//!
//! `StoreError` covers persistence failures; `SchedulerError` is the
//! public error surface of the scheduler API. Store failures are fatal to
//! the operation that triggered them and propagate to the caller; failures
//! inside a single job attempt never surface here, they drive the job's
//! own retry/fail path instead.

/// Result type for job store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for scheduler API operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Errors that can occur in the job store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt job record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

impl StoreError {
    pub fn corrupt(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Errors returned by the scheduler API
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("unknown job type: {0}")]
    UnknownJobType(String),

    #[error("unknown job status: {0}")]
    UnknownJobStatus(String),

    #[error("invalid {job_type} payload: {reason}")]
    InvalidPayload { job_type: String, reason: String },

    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),
}

impl SchedulerError {
    pub fn invalid_payload(job_type: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            job_type: job_type.to_string(),
            reason: reason.into(),
        }
    }
}
