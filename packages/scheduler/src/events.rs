//! Lifecycle event fan-out.
//!
//! The scheduler publishes job lifecycle notifications on a broadcast
//! channel. Publishing is fire-and-forget: slow, lagging, or absent
//! subscribers never block the loop, and a lagged subscriber simply loses
//! the oldest events.

use serde::Serialize;
use tokio::sync::broadcast;

/// Lifecycle notifications published by the scheduler
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum JobEvent {
    Queued {
        job_id: String,
    },
    Started {
        job_id: String,
        attempts: i32,
    },
    Progress {
        job_id: String,
        progress: i32,
    },
    Completed {
        job_id: String,
    },
    Failed {
        job_id: String,
        error: String,
        will_retry: bool,
    },
    Timeout {
        job_id: String,
    },
    Cancelled {
        job_id: String,
        reason: String,
    },
    Retried {
        job_id: String,
    },
}

impl JobEvent {
    /// The job this event is about
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Queued { job_id }
            | JobEvent::Started { job_id, .. }
            | JobEvent::Progress { job_id, .. }
            | JobEvent::Completed { job_id }
            | JobEvent::Failed { job_id, .. }
            | JobEvent::Timeout { job_id }
            | JobEvent::Cancelled { job_id, .. }
            | JobEvent::Retried { job_id } => job_id,
        }
    }
}

/// Broadcast-backed sink the scheduler publishes through
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: broadcast::Sender<JobEvent>,
}

impl EventSink {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    /// Send without caring whether anyone is listening
    pub(crate) fn publish(&self, event: JobEvent) {
        tracing::trace!(job_id = %event.job_id(), ?event, "publishing job event");
        let _ = self.tx.send(event);
    }
}
