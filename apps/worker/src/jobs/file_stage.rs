//! File staging executor
//!
//! Copies an audio file from outside the library into the managed tree,
//! verifies the copy against the source hash and catalogues the result.

use std::fs;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use deckhand_scheduler::{Job, JobExecutor, ProgressHandle};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{WorkerError, WorkerResult};
use crate::library::{
    collision_free_destination, compute_file_hash, is_audio_file, read_metadata, TrackStore,
};

/// File stage job payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStagePayload {
    /// File to bring into the library
    pub source_path: PathBuf,

    /// Rename the staged copy; defaults to the source file name
    #[serde(default)]
    pub file_name: Option<String>,
}

/// Result of a staging job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageOutcome {
    pub staged_path: String,
    pub file_hash: String,
    pub bytes_copied: u64,
}

/// Copies files into the library with hash verification
pub struct FileStageExecutor {
    tracks: TrackStore,
    library_root: PathBuf,
}

impl FileStageExecutor {
    pub fn new(tracks: TrackStore, library_root: PathBuf) -> Self {
        Self {
            tracks,
            library_root,
        }
    }

    async fn run(
        &self,
        payload: FileStagePayload,
        progress: &ProgressHandle,
    ) -> WorkerResult<StageOutcome> {
        let source = &payload.source_path;
        // A missing source surfaces as a filesystem error
        fs::metadata(source)?;
        if !is_audio_file(source) {
            return Err(WorkerError::UnsupportedFormat(
                source.display().to_string(),
            ));
        }

        let file_name = match payload.file_name {
            Some(name) => validate_file_name(name)?,
            None => source
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .ok_or_else(|| {
                    WorkerError::InvalidPayload(format!(
                        "source path {} has no usable file name",
                        source.display()
                    ))
                })?,
        };

        progress.report(10).await;
        let source_hash = compute_file_hash(source)?;
        progress.report(40).await;

        fs::create_dir_all(&self.library_root)?;
        let destination = collision_free_destination(&self.library_root, &file_name);
        let bytes_copied = fs::copy(source, &destination)?;
        progress.report(70).await;

        // Verify the copy before the catalog learns about it
        let staged_hash = compute_file_hash(&destination)?;
        if staged_hash != source_hash {
            if let Err(e) = fs::remove_file(&destination) {
                warn!(path = %destination.display(), error = %e, "failed to remove bad copy");
            }
            return Err(WorkerError::hash_mismatch(
                destination.display().to_string(),
                source_hash,
                staged_hash,
            ));
        }

        let metadata = read_metadata(&destination, &staged_hash)?;
        self.tracks.upsert(&metadata).await?;
        progress.report(95).await;

        info!(
            source = %source.display(),
            staged = %destination.display(),
            bytes = bytes_copied,
            "staged file into the library"
        );

        Ok(StageOutcome {
            staged_path: destination.display().to_string(),
            file_hash: staged_hash,
            bytes_copied,
        })
    }
}

/// A rename override must be a bare file name
fn validate_file_name(name: String) -> WorkerResult<String> {
    let path = Path::new(&name);
    let mut components = path.components();
    let valid = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !valid {
        return Err(WorkerError::InvalidPayload(format!(
            "file name '{}' must be a bare name without directories",
            name
        )));
    }
    Ok(name)
}

#[async_trait]
impl JobExecutor for FileStageExecutor {
    async fn execute(&self, job: &Job, progress: ProgressHandle) -> anyhow::Result<Value> {
        let payload: FileStagePayload =
            serde_json::from_value(job.payload.clone()).map_err(WorkerError::PayloadDeserialization)?;
        let outcome = self.run(payload, &progress).await?;
        Ok(serde_json::to_value(outcome)?)
    }
}
