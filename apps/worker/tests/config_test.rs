//! Environment wiring tests for the worker configuration
//!
//! These live in their own binary so the env mutations here cannot race
//! the unit tests compiled into the library.

use std::path::Path;
use std::time::Duration;

use deckhand_worker::Config;

#[test]
fn environment_flows_through_to_the_scheduler() {
    temp_env::with_vars(
        [
            ("DATABASE_PATH", Some("/tmp/deckhand/worker.db")),
            ("MUSIC_LIBRARY_PATH", Some("/srv/music")),
            ("EXPORT_PATH", Some("/srv/exports")),
            ("ENVIRONMENT", Some("production")),
            ("WORKER_TICK_INTERVAL_MS", Some("200")),
            ("WORKER_MAX_CONCURRENT_JOBS", Some("5")),
            ("WORKER_RETRY_DELAY_MS", Some("2500")),
        ],
        || {
            let config = Config::from_env().expect("config loads");
            assert_eq!(config.database_url(), "sqlite:///tmp/deckhand/worker.db");
            assert_eq!(
                config.database().parent_dir(),
                Some(Path::new("/tmp/deckhand"))
            );
            assert_eq!(config.music_library_path(), Path::new("/srv/music"));
            assert_eq!(config.export_path(), Path::new("/srv/exports"));
            assert!(config.is_production());

            let scheduler = config.scheduler_config();
            assert_eq!(scheduler.tick_interval, Duration::from_millis(200));
            assert_eq!(scheduler.max_concurrent_jobs, 5);
            assert_eq!(scheduler.retry_delay, Duration::from_millis(2500));
        },
    );
}

#[test]
fn defaults_stand_in_for_missing_variables() {
    temp_env::with_vars_unset(
        ["DATABASE_PATH", "MUSIC_LIBRARY_PATH", "EXPORT_PATH", "ENVIRONMENT"],
        || {
            let config = Config::from_env().expect("config loads");
            assert_eq!(config.database_url(), "sqlite://data/deckhand.db");
            assert_eq!(config.music_library_path(), Path::new("music"));
            assert_eq!(config.export_path(), Path::new("exports"));
            assert!(!config.is_production());
        },
    );
}
