//! Common test utilities for worker integration tests
//!
//! Shared fixtures for the executor test suites: synthesized WAV files,
//! temp library helpers, and in-memory catalog stores.

#![allow(unused_imports)]
#![allow(dead_code)]

pub mod fixtures;

pub use fixtures::*;
