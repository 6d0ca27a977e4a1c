//! Error handling for the Deckhand worker
//!
//! This module provides a unified error type hierarchy using thiserror
//! for job executors, with specific variants for each job type. Errors
//! cross the executor boundary as anyhow chains and end up rendered into
//! the job's `error` field.

use thiserror::Error;

/// Main worker error type covering each executor's failure modes
#[derive(Error, Debug)]
pub enum WorkerError {
    // ========== Payload Errors ==========
    /// Invalid job payload (missing or malformed fields)
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Payload JSON could not be deserialized
    #[error("payload deserialization failed: {0}")]
    PayloadDeserialization(#[from] serde_json::Error),

    // ========== Database Errors ==========
    /// Database query failed
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    // ========== Library Errors ==========
    /// File system access error
    #[error("filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    /// Music library path not found or inaccessible
    #[error("music library path not found: {0}")]
    LibraryNotFound(String),

    /// Failed to read audio file metadata
    #[error("metadata extraction failed for '{path}': {reason}")]
    MetadataExtraction { path: String, reason: String },

    /// Unsupported audio format
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Staged copy does not match the source hash
    #[error("hash mismatch after staging '{path}': expected {expected}, got {actual}")]
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    // ========== Audio Analysis Errors ==========
    /// Audio decoding failed
    #[error("audio decoding failed for '{path}': {reason}")]
    AudioDecoding { path: String, reason: String },

    /// Audio analysis failed
    #[error("audio analysis failed: {0}")]
    AudioAnalysis(String),

    /// Invalid audio data
    #[error("invalid audio data: {0}")]
    InvalidAudioData(String),

    // ========== Internal Errors ==========
    /// Internal worker error (catch-all for unexpected errors)
    #[error("internal worker error: {0}")]
    Internal(String),
}

impl WorkerError {
    /// Check if this error is likely transient
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Filesystem(_) | Self::HashMismatch { .. }
        )
    }

    /// Get a severity level for logging
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            // Integrity failures that should alert operators
            Self::HashMismatch { .. } => ErrorSeverity::Critical,

            // Errors that indicate service issues
            Self::Database(_) | Self::Internal(_) => ErrorSeverity::Error,

            // Warnings for expected per-file failures
            Self::Filesystem(_) | Self::MetadataExtraction { .. } | Self::AudioDecoding { .. } => {
                ErrorSeverity::Warning
            }

            // Info level for normal processing issues
            _ => ErrorSeverity::Info,
        }
    }

    /// Get the job type this error is related to, if applicable
    pub fn job_context(&self) -> Option<&'static str> {
        match self {
            Self::LibraryNotFound(_) | Self::MetadataExtraction { .. } => Some("scan"),
            Self::UnsupportedFormat(_) | Self::HashMismatch { .. } => Some("file_stage"),
            Self::AudioDecoding { .. } | Self::AudioAnalysis(_) | Self::InvalidAudioData(_) => {
                Some("analyze")
            }
            _ => None,
        }
    }

    /// Log the error with appropriate severity
    pub fn log(&self) {
        let context = self.job_context().unwrap_or("general");
        match self.severity() {
            ErrorSeverity::Critical => {
                tracing::error!(
                    error = %self,
                    context = context,
                    retryable = self.is_retryable(),
                    "Critical worker error"
                );
            }
            ErrorSeverity::Error => {
                tracing::error!(
                    error = %self,
                    context = context,
                    retryable = self.is_retryable(),
                    "Worker error"
                );
            }
            ErrorSeverity::Warning => {
                tracing::warn!(
                    error = %self,
                    context = context,
                    retryable = self.is_retryable(),
                    "Worker warning"
                );
            }
            ErrorSeverity::Info => {
                tracing::info!(
                    error = %self,
                    context = context,
                    retryable = self.is_retryable(),
                    "Worker info"
                );
            }
        }
    }

    /// Create a metadata extraction error
    pub fn metadata_extraction(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MetadataExtraction {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an audio decoding error
    pub fn audio_decoding(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AudioDecoding {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a hash mismatch error
    pub fn hash_mismatch(
        path: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::HashMismatch {
            path: path.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Error severity levels for logging and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that should trigger alerts
    Critical,
    /// Standard errors
    Error,
    /// Warnings for expected failures
    Warning,
    /// Informational messages
    Info,
}

/// Result type alias for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;
