//! Playlist export executor
//!
//! Writes an M3U8 playlist under the export directory, optionally copying
//! the referenced audio files into a folder next to it.

use std::fs;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use deckhand_scheduler::{Job, JobExecutor, ProgressHandle};
use lofty::{Accessor, AudioFile, Probe, TaggedFileExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{WorkerError, WorkerResult};
use crate::library::collision_free_destination;

/// Export job payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPayload {
    /// Name of the playlist file to write
    pub playlist_name: String,

    /// Tracks in playback order
    pub track_paths: Vec<PathBuf>,

    /// Copy the audio files next to the playlist instead of referencing
    /// them in place
    #[serde(default)]
    pub copy_files: bool,
}

/// Result of an export job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOutcome {
    pub playlist_path: String,
    pub track_count: usize,
    pub copied_count: usize,
    pub missing_count: usize,
}

/// Writes playlists and their file copies under the export directory
pub struct ExportExecutor {
    export_root: PathBuf,
}

impl ExportExecutor {
    pub fn new(export_root: PathBuf) -> Self {
        Self { export_root }
    }

    async fn run(
        &self,
        payload: ExportPayload,
        progress: &ProgressHandle,
    ) -> WorkerResult<ExportOutcome> {
        let name = validate_playlist_name(&payload.playlist_name)?;

        fs::create_dir_all(&self.export_root)?;
        let playlist_path = self.export_root.join(format!("{}.m3u8", name));

        let copy_dir = if payload.copy_files {
            let dir = self.export_root.join(name);
            fs::create_dir_all(&dir)?;
            Some(dir)
        } else {
            None
        };

        let mut lines = String::from("#EXTM3U\n");
        let mut track_count = 0usize;
        let mut copied_count = 0usize;
        let mut missing_count = 0usize;
        let total = payload.track_paths.len();
        let mut last_percent = 0;

        for (index, source) in payload.track_paths.iter().enumerate() {
            if !source.exists() {
                warn!(path = %source.display(), "skipping missing track in export");
                missing_count += 1;
            } else {
                let (duration, display) = playlist_entry_info(source);

                let entry_path = match &copy_dir {
                    Some(dir) => {
                        let file_name = source
                            .file_name()
                            .and_then(|n| n.to_str())
                            .map(str::to_string)
                            .ok_or_else(|| {
                                WorkerError::InvalidPayload(format!(
                                    "track path {} has no usable file name",
                                    source.display()
                                ))
                            })?;
                        let destination = collision_free_destination(dir, &file_name);
                        fs::copy(source, &destination)?;
                        copied_count += 1;
                        // Entries reference the copies relative to the playlist
                        let copied_name = destination
                            .file_name()
                            .and_then(|n| n.to_str())
                            .unwrap_or(&file_name)
                            .to_string();
                        format!("{}/{}", name, copied_name)
                    }
                    None => source.display().to_string(),
                };

                lines.push_str(&format!("#EXTINF:{},{}\n", duration, display));
                lines.push_str(&entry_path);
                lines.push('\n');
                track_count += 1;
            }

            let percent = ((index + 1) * 100 / total) as i32;
            if percent != last_percent {
                progress.report(percent).await;
                last_percent = percent;
            }
        }

        fs::write(&playlist_path, &lines)?;

        info!(
            playlist = %playlist_path.display(),
            tracks = track_count,
            copied = copied_count,
            missing = missing_count,
            "playlist export completed"
        );

        Ok(ExportOutcome {
            playlist_path: playlist_path.display().to_string(),
            track_count,
            copied_count,
            missing_count,
        })
    }
}

/// Playlist names become file and directory names, so they must be bare
fn validate_playlist_name(name: &str) -> WorkerResult<&str> {
    let trimmed = name.trim();
    let mut components = Path::new(trimmed).components();
    let valid = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !valid {
        return Err(WorkerError::InvalidPayload(format!(
            "playlist name '{}' must be a bare name without directories",
            name
        )));
    }
    Ok(trimmed)
}

/// Duration and display text for an EXTINF line. Tag failures fall back
/// to the file name so an export never dies on one unreadable file.
fn playlist_entry_info(path: &Path) -> (i64, String) {
    let stem = || {
        path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Unknown")
            .to_string()
    };

    let tagged_file = match Probe::open(path).and_then(|probe| probe.read()) {
        Ok(file) => file,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "no tags for playlist entry");
            return (-1, stem());
        }
    };

    let duration = tagged_file.properties().duration().as_secs() as i64;
    let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag());
    let display = match tag {
        Some(tag) => {
            let title = tag.title().map(|s| s.into_owned()).unwrap_or_else(stem);
            match tag.artist() {
                Some(artist) => format!("{} - {}", artist, title),
                None => title,
            }
        }
        None => stem(),
    };

    (duration, display)
}

#[async_trait]
impl JobExecutor for ExportExecutor {
    async fn execute(&self, job: &Job, progress: ProgressHandle) -> anyhow::Result<Value> {
        let payload: ExportPayload =
            serde_json::from_value(job.payload.clone()).map_err(WorkerError::PayloadDeserialization)?;
        let outcome = self.run(payload, &progress).await?;
        Ok(serde_json::to_value(outcome)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_defaults_to_referencing_in_place() {
        let payload: ExportPayload = serde_json::from_value(json!({
            "playlistName": "Friday Set",
            "trackPaths": ["/music/a.flac", "/music/b.mp3"],
        }))
        .unwrap();
        assert_eq!(payload.playlist_name, "Friday Set");
        assert_eq!(payload.track_paths.len(), 2);
        assert!(!payload.copy_files);
    }

    #[test]
    fn playlist_names_must_be_bare() {
        assert_eq!(validate_playlist_name("Friday Set").unwrap(), "Friday Set");
        assert_eq!(validate_playlist_name("  padded  ").unwrap(), "padded");

        for name in ["", "   ", "sets/friday", "../friday", "/friday", ".."] {
            let result = validate_playlist_name(name);
            assert!(
                matches!(result, Err(WorkerError::InvalidPayload(_))),
                "{:?} should be rejected",
                name
            );
        }
    }

    #[test]
    fn entry_info_falls_back_to_the_file_stem() {
        let (duration, display) = playlist_entry_info(Path::new("/nope/Missing Track.mp3"));
        assert_eq!(duration, -1);
        assert_eq!(display, "Missing Track");
    }

    #[test]
    fn outcome_serializes_camel_case() {
        let outcome = ExportOutcome {
            playlist_path: "/exports/Friday Set.m3u8".to_string(),
            track_count: 12,
            copied_count: 12,
            missing_count: 1,
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["playlistPath"], "/exports/Friday Set.m3u8");
        assert_eq!(value["trackCount"], 12);
        assert_eq!(value["copiedCount"], 12);
        assert_eq!(value["missingCount"], 1);
    }
}
