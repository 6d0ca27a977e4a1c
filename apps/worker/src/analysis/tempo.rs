//! Tempo estimation from onset periodicity
//!
//! Note onsets are detected as positive spectral flux between frames; the
//! tempo is the strongest autocorrelation lag of that onset signal inside
//! the supported BPM range.

use super::Stft;

const ONSET_FRAME_SIZE: usize = 2048;
const ONSET_HOP_SIZE: usize = 512;

/// Moving-average width applied to the raw onset signal
const SMOOTHING_WINDOW: usize = 5;

pub const MIN_BPM: f32 = 60.0;
pub const MAX_BPM: f32 = 200.0;

/// Estimated tempo with a 0..1 periodicity confidence
#[derive(Debug, Clone, PartialEq)]
pub struct TempoEstimate {
    pub bpm: f32,
    pub confidence: f32,
}

impl TempoEstimate {
    /// Fallback for signals too short or too flat to carry a beat
    fn unknown() -> Self {
        Self {
            bpm: 120.0,
            confidence: 0.0,
        }
    }
}

/// Estimate the tempo of mono samples, clamped to [`MIN_BPM`]..[`MAX_BPM`]
pub fn detect_tempo(samples: &[f32], sample_rate: u32) -> TempoEstimate {
    let onsets = onset_strength(samples);
    estimate_from_onsets(&onsets, sample_rate)
}

/// Per-frame onset strength: the sum of positive magnitude changes since
/// the previous frame, smoothed with a short moving average
fn onset_strength(samples: &[f32]) -> Vec<f32> {
    let mut stft = Stft::new(ONSET_FRAME_SIZE, ONSET_HOP_SIZE);
    let mut onsets: Vec<f32> = Vec::new();
    let mut prev: Vec<f32> = Vec::new();

    stft.for_each_magnitude_frame(samples, |magnitudes| {
        if prev.is_empty() {
            // Nothing to diff against yet
            onsets.push(0.0);
            prev = magnitudes.to_vec();
            return;
        }
        let flux: f32 = magnitudes
            .iter()
            .zip(prev.iter())
            .map(|(&curr, &past)| (curr - past).max(0.0))
            .sum();
        onsets.push(flux);
        prev.copy_from_slice(magnitudes);
    });

    smooth(&onsets, SMOOTHING_WINDOW)
}

/// Centered moving average; bounds saturate at the signal edges
fn smooth(signal: &[f32], window_size: usize) -> Vec<f32> {
    if signal.len() < window_size {
        return signal.to_vec();
    }

    let half_window = window_size / 2;
    let mut filtered = Vec::with_capacity(signal.len());
    for i in 0..signal.len() {
        let start = i.saturating_sub(half_window);
        let end = (i + half_window + 1).min(signal.len());
        let sum: f32 = signal[start..end].iter().sum();
        filtered.push(sum / (end - start) as f32);
    }

    filtered
}

fn estimate_from_onsets(onsets: &[f32], sample_rate: u32) -> TempoEstimate {
    if onsets.is_empty() {
        return TempoEstimate::unknown();
    }

    let autocorr = autocorrelate(onsets);

    // One onset value per hop
    let onset_rate = sample_rate as f32 / ONSET_HOP_SIZE as f32;
    let max_lag = (60.0 / MIN_BPM * onset_rate) as usize;
    let min_lag = (60.0 / MAX_BPM * onset_rate) as usize;

    let search_start = min_lag.max(1);
    let search_end = max_lag.min(autocorr.len());
    if search_start >= search_end {
        return TempoEstimate::unknown();
    }

    let mut best_lag = search_start;
    let mut best_value = autocorr[search_start];
    for (lag, &value) in autocorr
        .iter()
        .enumerate()
        .take(search_end)
        .skip(search_start)
    {
        if value > best_value {
            best_value = value;
            best_lag = lag;
        }
    }

    let bpm = 60.0 * onset_rate / best_lag as f32;

    // Peak-to-average ratio in the searched band measures how periodic
    // the onsets actually are
    let avg: f32 = autocorr[search_start..search_end].iter().sum::<f32>()
        / (search_end - search_start) as f32;
    let confidence = if avg > f32::EPSILON {
        ((best_value / avg) - 1.0).clamp(0.0, 1.0)
    } else {
        0.0
    };

    TempoEstimate {
        bpm: bpm.clamp(MIN_BPM, MAX_BPM),
        confidence,
    }
}

/// Autocorrelation of a mean-subtracted signal, normalized by its variance
fn autocorrelate(signal: &[f32]) -> Vec<f32> {
    let n = signal.len();
    let mean: f32 = signal.iter().sum::<f32>() / n as f32;
    let normalized: Vec<f32> = signal.iter().map(|&x| x - mean).collect();

    let variance: f32 = normalized.iter().map(|&x| x * x).sum::<f32>();
    if variance < f32::EPSILON {
        return vec![0.0; n];
    }

    let mut result = Vec::with_capacity(n);
    for lag in 0..n {
        let mut sum = 0.0f32;
        for i in 0..(n - lag) {
            sum += normalized[i] * normalized[i + lag];
        }
        result.push(sum / variance);
    }

    result
}
