//! Deckhand background worker.
//!
//! Hosts the job executors behind the scheduler: library scanning, file
//! staging, track analysis (BPM, key, energy) and playlist export. The
//! binary in `main.rs` wires these executors into a
//! [`deckhand_scheduler::JobScheduler`] and runs until shutdown.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod jobs;
pub mod library;

pub use config::Config;
pub use error::{WorkerError, WorkerResult};
