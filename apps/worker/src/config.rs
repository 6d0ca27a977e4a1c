//! Worker configuration loaded from environment variables
//!
//! This module provides configuration management for the Deckhand worker
//! service. Configuration is loaded from environment variables with sensible
//! defaults for development environments.

use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use deckhand_scheduler::SchedulerConfig;
use deckhand_shared_config::{CommonConfig, DatabaseConfig, Environment};

/// Worker configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Common configuration shared with other services
    pub common: CommonConfig,

    /// Scheduling loop tick in milliseconds
    pub tick_interval_ms: u64,

    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,

    /// Delay before a failed job is re-queued, in milliseconds
    pub retry_delay_ms: u64,

    /// Days a terminal job survives before the retention sweep removes it
    pub retention_days: i64,

    /// How often the retention sweep runs, in seconds
    pub cleanup_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let common = CommonConfig::from_env()
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

        let config = Self {
            common,

            tick_interval_ms: env::var("WORKER_TICK_INTERVAL_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .context("Invalid WORKER_TICK_INTERVAL_MS value")?,

            max_concurrent_jobs: env::var("WORKER_MAX_CONCURRENT_JOBS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("Invalid WORKER_MAX_CONCURRENT_JOBS value")?,

            retry_delay_ms: env::var("WORKER_RETRY_DELAY_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .context("Invalid WORKER_RETRY_DELAY_MS value")?,

            retention_days: env::var("WORKER_RETENTION_DAYS")
                .unwrap_or_else(|_| "7".to_string())
                .parse()
                .context("Invalid WORKER_RETENTION_DAYS value")?,

            cleanup_interval_secs: env::var("WORKER_CLEANUP_INTERVAL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .context("Invalid WORKER_CLEANUP_INTERVAL_SECS value")?,
        };

        // A zero tick or cleanup interval would wedge the scheduler loop,
        // and zero concurrency could never dispatch anything
        ensure!(
            config.tick_interval_ms > 0,
            "WORKER_TICK_INTERVAL_MS must be greater than zero"
        );
        ensure!(
            config.max_concurrent_jobs > 0,
            "WORKER_MAX_CONCURRENT_JOBS must be greater than zero"
        );
        ensure!(
            config.cleanup_interval_secs > 0,
            "WORKER_CLEANUP_INTERVAL_SECS must be greater than zero"
        );

        Ok(config)
    }

    /// Scheduler tuning derived from this configuration
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent_jobs: self.max_concurrent_jobs,
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            retention_days: self.retention_days,
            cleanup_interval: Duration::from_secs(self.cleanup_interval_secs),
            ..SchedulerConfig::default()
        }
    }

    // Convenience accessors for common config fields

    /// Get the database connection URL
    pub fn database_url(&self) -> String {
        self.common.database.url()
    }

    /// Get music library path
    pub fn music_library_path(&self) -> &Path {
        &self.common.music_library_path
    }

    /// Get export path
    pub fn export_path(&self) -> &Path {
        &self.common.export_path
    }

    /// Get database configuration
    pub fn database(&self) -> &DatabaseConfig {
        &self.common.database
    }

    /// Get environment mode
    pub fn environment(&self) -> Environment {
        self.common.environment
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.common.environment.is_production()
    }
}
