//! Job executors registered with the scheduler
//!
//! One module per leaf job type. Batch types fan out to these and are
//! handled inside the scheduler itself.

pub mod analyze;
pub mod export;
pub mod file_stage;
pub mod scan;

pub use analyze::AnalyzeExecutor;
pub use export::ExportExecutor;
pub use file_stage::FileStageExecutor;
pub use scan::ScanExecutor;

use std::path::PathBuf;

use deckhand_scheduler::{ExecutorRegistry, JobType};

use crate::library::TrackStore;

/// Build the registry the worker hands to the scheduler, with one
/// executor per leaf job type.
pub fn build_registry(
    tracks: TrackStore,
    library_root: PathBuf,
    export_root: PathBuf,
) -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    registry.register(
        JobType::Scan,
        ScanExecutor::new(tracks.clone(), library_root.clone()),
    );
    registry.register(
        JobType::FileStage,
        FileStageExecutor::new(tracks.clone(), library_root),
    );
    registry.register(JobType::Analyze, AnalyzeExecutor::new(tracks));
    registry.register(JobType::Export, ExportExecutor::new(export_root));
    registry
}
