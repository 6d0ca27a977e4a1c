//! Database configuration types

use std::path::{Path, PathBuf};

use crate::{get_env_or_default, parse_env, ConfigResult};

/// SQLite database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the database file
    pub path: PathBuf,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// How long a connection waits on a locked database before failing
    pub busy_timeout_secs: u64,
}

impl DatabaseConfig {
    /// Load database configuration from environment variables
    pub fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            path: PathBuf::from(get_env_or_default("DATABASE_PATH", "data/deckhand.db")),
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 5)?,
            busy_timeout_secs: parse_env("DATABASE_BUSY_TIMEOUT", 5)?,
        })
    }

    /// Create a configuration with a custom path (useful for testing)
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_connections: 5,
            busy_timeout_secs: 5,
        }
    }

    /// Connection URL in the form sqlx expects
    pub fn url(&self) -> String {
        format!("sqlite://{}", self.path.display())
    }

    /// Directory the database file lives in, if the path has one
    pub fn parent_dir(&self) -> Option<&Path> {
        self.path.parent().filter(|p| !p.as_os_str().is_empty())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/deckhand.db"),
            max_connections: 5,
            busy_timeout_secs: 5,
        }
    }
}
