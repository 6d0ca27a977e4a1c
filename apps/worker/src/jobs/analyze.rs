//! Track analysis executor
//!
//! Decodes a track to mono samples and measures tempo, musical key and
//! energy levels. Results land in the job result and, when the track is
//! catalogued, on its row.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use deckhand_scheduler::{Job, JobExecutor, ProgressHandle};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::analysis::{detect_key, detect_tempo, measure_energy};
use crate::audio::decode_to_mono;
use crate::error::{WorkerError, WorkerResult};
use crate::library::{TrackAnalysis, TrackStore};

/// Analyze job payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzePayload {
    /// Audio file to analyze
    pub track_path: PathBuf,
}

/// Measurements reported as the analyze job's result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub bpm: f64,
    pub bpm_confidence: f64,
    pub key: String,
    pub mode: String,
    pub camelot: String,
    pub key_confidence: f64,
    pub peak_db: f64,
    pub rms_db: f64,
    pub clipping: bool,
    pub duration_seconds: f64,
    pub sample_rate: u32,
}

/// Runs the DSP pipeline over a single track
pub struct AnalyzeExecutor {
    tracks: TrackStore,
}

impl AnalyzeExecutor {
    pub fn new(tracks: TrackStore) -> Self {
        Self { tracks }
    }

    async fn run(
        &self,
        payload: AnalyzePayload,
        progress: &ProgressHandle,
    ) -> WorkerResult<AnalysisReport> {
        let path = payload.track_path.clone();
        let path_str = path.to_string_lossy().to_string();

        // Decoding and the DSP stages are CPU bound, so they run off the
        // async runtime
        let decoded = tokio::task::spawn_blocking(move || decode_to_mono(&path))
            .await
            .map_err(|e| WorkerError::Internal(format!("decode task failed: {}", e)))??;
        let decoded = Arc::new(decoded);
        progress.report(25).await;

        let tempo = {
            let audio = Arc::clone(&decoded);
            tokio::task::spawn_blocking(move || detect_tempo(&audio.samples, audio.sample_rate))
                .await
                .map_err(|e| WorkerError::Internal(format!("tempo task failed: {}", e)))?
        };
        progress.report(50).await;

        let key = {
            let audio = Arc::clone(&decoded);
            tokio::task::spawn_blocking(move || detect_key(&audio.samples, audio.sample_rate))
                .await
                .map_err(|e| WorkerError::Internal(format!("key task failed: {}", e)))?
        };
        progress.report(75).await;

        let energy = {
            let audio = Arc::clone(&decoded);
            tokio::task::spawn_blocking(move || measure_energy(&audio.samples))
                .await
                .map_err(|e| WorkerError::Internal(format!("energy task failed: {}", e)))?
        };
        progress.report(90).await;

        let analysis = TrackAnalysis {
            bpm: f64::from(tempo.bpm),
            bpm_confidence: f64::from(tempo.confidence),
            key: key.key.clone(),
            mode: key.mode.clone(),
            camelot: key.camelot.clone(),
            key_confidence: f64::from(key.confidence),
            peak_db: f64::from(energy.peak_db),
            rms_db: f64::from(energy.rms_db),
            clipping: energy.clipping,
        };

        if !self.tracks.write_analysis(&path_str, &analysis).await? {
            warn!(path = %path_str, "track not in catalog; analysis not persisted");
        }

        let report = AnalysisReport {
            bpm: analysis.bpm,
            bpm_confidence: analysis.bpm_confidence,
            key: key.key,
            mode: key.mode,
            camelot: key.camelot,
            key_confidence: analysis.key_confidence,
            peak_db: analysis.peak_db,
            rms_db: analysis.rms_db,
            clipping: analysis.clipping,
            duration_seconds: decoded.duration_seconds(),
            sample_rate: decoded.sample_rate,
        };

        info!(
            path = %path_str,
            bpm = report.bpm,
            camelot = %report.camelot,
            "track analysis completed"
        );

        Ok(report)
    }
}

#[async_trait]
impl JobExecutor for AnalyzeExecutor {
    async fn execute(&self, job: &Job, progress: ProgressHandle) -> anyhow::Result<Value> {
        let payload: AnalyzePayload =
            serde_json::from_value(job.payload.clone()).map_err(WorkerError::PayloadDeserialization)?;
        let report = self.run(payload, &progress).await?;
        Ok(serde_json::to_value(report)?)
    }
}
