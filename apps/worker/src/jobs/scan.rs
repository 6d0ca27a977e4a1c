//! Library scan executor
//!
//! Walks the music library, diffs it against the track catalog by content
//! hash and refreshes the rows for new, changed and removed files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use deckhand_scheduler::{Job, JobExecutor, ProgressHandle};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{WorkerError, WorkerResult};
use crate::library::{compute_file_hash, is_audio_file, read_metadata, TrackStore};

/// Scan job payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanPayload {
    /// Scan only this subdirectory of the library
    pub library_path: Option<PathBuf>,

    /// Reprocess files even when their content hash is unchanged
    pub force_rescan: bool,
}

/// Counters reported as the scan job's result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub tracks_found: usize,
    pub tracks_new: usize,
    pub tracks_updated: usize,
    pub tracks_skipped: usize,
    pub tracks_removed: usize,
    pub error_count: usize,
}

enum FileOutcome {
    New,
    Updated,
    Skipped,
}

/// Reconciles the track catalog with what is on disk
pub struct ScanExecutor {
    tracks: TrackStore,
    library_root: PathBuf,
}

impl ScanExecutor {
    pub fn new(tracks: TrackStore, library_root: PathBuf) -> Self {
        Self {
            tracks,
            library_root,
        }
    }

    async fn run(
        &self,
        payload: ScanPayload,
        progress: &ProgressHandle,
    ) -> WorkerResult<ScanSummary> {
        let scan_path = payload
            .library_path
            .clone()
            .unwrap_or_else(|| self.library_root.clone());

        info!(
            path = %scan_path.display(),
            force_rescan = payload.force_rescan,
            "starting library scan"
        );

        if !scan_path.exists() {
            return Err(WorkerError::LibraryNotFound(
                scan_path.display().to_string(),
            ));
        }

        // Scans must stay inside the configured library
        let canonical_root = self.library_root.canonicalize()?;
        let canonical_scan = scan_path.canonicalize()?;
        if !canonical_scan.starts_with(&canonical_root) {
            return Err(WorkerError::InvalidPayload(format!(
                "scan path {} is outside the music library {}",
                canonical_scan.display(),
                canonical_root.display()
            )));
        }

        let existing = self.tracks.list_paths_with_hashes().await?;
        let mut summary = ScanSummary::default();

        // Collect first so per-file progress has a denominator
        let mut audio_files: Vec<PathBuf> = Vec::new();
        for entry in WalkDir::new(&scan_path).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable directory entry");
                    summary.error_count += 1;
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_file() || !is_audio_file(path) {
                continue;
            }
            // Links resolving outside the library are not catalogued
            match path.canonicalize() {
                Ok(resolved) if resolved.starts_with(&canonical_root) => {
                    audio_files.push(path.to_path_buf());
                }
                Ok(resolved) => {
                    debug!(
                        path = %path.display(),
                        target = %resolved.display(),
                        "skipping link outside the library"
                    );
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to resolve path");
                    summary.error_count += 1;
                }
            }
        }

        summary.tracks_found = audio_files.len();
        let total = audio_files.len();
        let mut found_paths: HashSet<String> = HashSet::with_capacity(total);
        let mut last_percent = 0;

        for (index, path) in audio_files.iter().enumerate() {
            let path_str = path.to_string_lossy().to_string();
            found_paths.insert(path_str.clone());

            let known_hash = existing.get(&path_str);
            match self
                .process_file(path, &path_str, known_hash, payload.force_rescan)
                .await
            {
                Ok(FileOutcome::New) => summary.tracks_new += 1,
                Ok(FileOutcome::Updated) => summary.tracks_updated += 1,
                Ok(FileOutcome::Skipped) => summary.tracks_skipped += 1,
                Err(e) => {
                    e.log();
                    summary.error_count += 1;
                }
            }

            let percent = ((index + 1) * 100 / total) as i32;
            if percent != last_percent {
                progress.report(percent).await;
                last_percent = percent;
            }
        }

        // Rows under the scanned directory whose files are gone
        let removed: Vec<String> = existing
            .keys()
            .filter(|path| Path::new(path).starts_with(&scan_path) && !found_paths.contains(*path))
            .cloned()
            .collect();
        summary.tracks_removed = self.tracks.remove_paths(&removed).await? as usize;

        info!(
            found = summary.tracks_found,
            new = summary.tracks_new,
            updated = summary.tracks_updated,
            skipped = summary.tracks_skipped,
            removed = summary.tracks_removed,
            errors = summary.error_count,
            "library scan completed"
        );

        Ok(summary)
    }

    async fn process_file(
        &self,
        path: &Path,
        path_str: &str,
        known_hash: Option<&String>,
        force_rescan: bool,
    ) -> WorkerResult<FileOutcome> {
        let file_hash = compute_file_hash(path)?;

        if !force_rescan && known_hash == Some(&file_hash) {
            return Ok(FileOutcome::Skipped);
        }

        let metadata = read_metadata(path, &file_hash)?;
        self.tracks.upsert(&metadata).await?;

        match known_hash {
            None => Ok(FileOutcome::New),
            Some(old_hash) => {
                if *old_hash != file_hash {
                    // Content changed, so stored measurements no longer apply
                    self.tracks.clear_analysis(path_str).await?;
                }
                Ok(FileOutcome::Updated)
            }
        }
    }
}

#[async_trait]
impl JobExecutor for ScanExecutor {
    async fn execute(&self, job: &Job, progress: ProgressHandle) -> anyhow::Result<Value> {
        let payload: ScanPayload =
            serde_json::from_value(job.payload.clone()).map_err(WorkerError::PayloadDeserialization)?;
        let summary = self.run(payload, &progress).await?;
        Ok(serde_json::to_value(summary)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_defaults_to_full_scan() {
        let payload: ScanPayload = serde_json::from_value(json!({})).unwrap();
        assert!(payload.library_path.is_none());
        assert!(!payload.force_rescan);
    }

    #[test]
    fn payload_accepts_camel_case_fields() {
        let payload: ScanPayload = serde_json::from_value(json!({
            "libraryPath": "/music/incoming",
            "forceRescan": true,
        }))
        .unwrap();
        assert_eq!(payload.library_path, Some(PathBuf::from("/music/incoming")));
        assert!(payload.force_rescan);
    }

    #[test]
    fn summary_serializes_camel_case() {
        let summary = ScanSummary {
            tracks_found: 10,
            tracks_new: 3,
            tracks_updated: 2,
            tracks_skipped: 4,
            tracks_removed: 1,
            error_count: 1,
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["tracksFound"], 10);
        assert_eq!(value["tracksNew"], 3);
        assert_eq!(value["tracksUpdated"], 2);
        assert_eq!(value["tracksSkipped"], 4);
        assert_eq!(value["tracksRemoved"], 1);
        assert_eq!(value["errorCount"], 1);
    }
}
