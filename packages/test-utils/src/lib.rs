//! Shared test utilities for the Deckhand workspace
//!
//! This crate provides mock job executors and fixtures for exercising the
//! scheduler without touching real audio files. The mocks are shared
//! between the scheduler's own integration tests and the worker test suite.
//!
//! # Mock Executors
//!
//! - [`SucceedingExecutor`] - resolves with a fixed result
//! - [`FailingExecutor`] - fails a scripted number of attempts
//! - [`HangingExecutor`] - never resolves; drives timeout and cancel paths
//! - [`PanickingExecutor`] - panics mid-attempt
//! - [`ProgressExecutor`] - reports a sequence of progress values
//! - [`ScriptedExecutor`] - per-job fate driven by the payload
//! - [`RecordingExecutor`] - logs executions for dispatch-order assertions
//!
//! # Example
//!
//! ```rust,ignore
//! use deckhand_test_utils::{fast_config, memory_job_store, SucceedingExecutor};
//!
//! #[tokio::test]
//! async fn test_with_mocks() {
//!     let store = memory_job_store().await;
//!     let mut registry = ExecutorRegistry::new();
//!     registry.register(JobType::Scan, SucceedingExecutor::new(json!({"tracksFound": 5})));
//!     let scheduler = JobScheduler::new(store, registry, fast_config());
//!     scheduler.start().await.unwrap();
//! }
//! ```

mod executors;
mod fixtures;

pub use executors::{
    ExecutionEntry, ExecutionLog, FailingExecutor, HangingExecutor, PanickingExecutor,
    ProgressExecutor, RecordingExecutor, ScriptedExecutor, SucceedingExecutor,
};
pub use fixtures::{fast_config, memory_job_store, wait_for_status, wait_for_terminal};
