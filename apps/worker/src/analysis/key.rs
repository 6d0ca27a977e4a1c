//! Musical key detection using the Krumhansl-Schmuckler algorithm
//!
//! A chromagram (energy per pitch class, octave-folded) is correlated
//! against the 24 rotated Krumhansl-Kessler profiles; the best match wins.
//! Output includes Camelot wheel notation for harmonic mixing.

use super::Stft;

/// Chromagram window, 4096 samples for ~10.7 Hz resolution at 44.1 kHz
const CHROMA_FRAME_SIZE: usize = 4096;
const CHROMA_HOP_SIZE: usize = CHROMA_FRAME_SIZE / 2;

/// Pitch range considered: A0 to C8
const MIN_FREQ: f32 = 27.5;
const MAX_FREQ: f32 = 4186.0;

/// Krumhansl-Kessler major key profile weights
const MAJOR_PROFILE: [f32; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];

/// Krumhansl-Kessler minor key profile weights
const MINOR_PROFILE: [f32; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

const PITCH_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Camelot wheel notation for major keys, indexed by pitch class
const CAMELOT_MAJOR: [&str; 12] = [
    "8B",  // C major
    "3B",  // C# major
    "10B", // D major
    "5B",  // D# major
    "12B", // E major
    "7B",  // F major
    "2B",  // F# major
    "9B",  // G major
    "4B",  // G# major
    "11B", // A major
    "6B",  // A# major
    "1B",  // B major
];

/// Camelot wheel notation for minor keys, indexed by pitch class
const CAMELOT_MINOR: [&str; 12] = [
    "5A",  // C minor
    "12A", // C# minor
    "7A",  // D minor
    "2A",  // D# minor
    "9A",  // E minor
    "4A",  // F minor
    "11A", // F# minor
    "6A",  // G minor
    "1A",  // G# minor
    "8A",  // A minor
    "3A",  // A# minor
    "10A", // B minor
];

/// Detected key with mode, Camelot notation and a 0..1 confidence
#[derive(Debug, Clone, PartialEq)]
pub struct KeyEstimate {
    pub key: String,
    pub mode: String,
    pub camelot: String,
    pub confidence: f32,
}

/// Detect the musical key of mono samples.
///
/// Silence or tonally ambiguous material still produces an estimate; the
/// confidence reflects how weak the match was.
pub fn detect_key(samples: &[f32], sample_rate: u32) -> KeyEstimate {
    let chromagram = compute_chromagram(samples, sample_rate);
    classify(&chromagram)
}

/// Fold spectral energy into the 12 pitch classes.
///
/// Energy is accumulated as magnitude squared, averaged over windows and
/// normalized to sum to 1.0. Silent input yields all zeros.
pub(crate) fn compute_chromagram(samples: &[f32], sample_rate: u32) -> [f32; 12] {
    let mut stft = Stft::new(CHROMA_FRAME_SIZE, CHROMA_HOP_SIZE);
    let freq_resolution = sample_rate as f32 / stft.frame_size() as f32;

    let mut chromagram = [0.0f32; 12];
    let windows = stft.for_each_magnitude_frame(samples, |magnitudes| {
        for (bin, &magnitude) in magnitudes.iter().enumerate() {
            let freq = bin as f32 * freq_resolution;
            if freq < MIN_FREQ || freq > MAX_FREQ {
                continue;
            }

            // MIDI pitch = 69 + 12 * log2(freq / 440)
            let midi_pitch = 69.0 + 12.0 * (freq / 440.0).log2();
            let pitch_class = ((midi_pitch.round() as i32 % 12) + 12) % 12;
            chromagram[pitch_class as usize] += magnitude * magnitude;
        }
    });

    if windows > 0 {
        for energy in &mut chromagram {
            *energy /= windows as f32;
        }
    }

    let total: f32 = chromagram.iter().sum();
    if total > f32::EPSILON {
        for energy in &mut chromagram {
            *energy /= total;
        }
    }

    chromagram
}

/// Pick the best of the 24 candidate keys by Pearson correlation
fn classify(chromagram: &[f32; 12]) -> KeyEstimate {
    let mut best_correlation = f32::NEG_INFINITY;
    let mut best_pitch_class = 0;
    let mut best_is_major = true;

    for rotation in 0..12 {
        let correlation =
            pearson_correlation(chromagram, &rotate_profile(&MAJOR_PROFILE, rotation));
        if correlation > best_correlation {
            best_correlation = correlation;
            best_pitch_class = rotation;
            best_is_major = true;
        }
    }

    for rotation in 0..12 {
        let correlation =
            pearson_correlation(chromagram, &rotate_profile(&MINOR_PROFILE, rotation));
        if correlation > best_correlation {
            best_correlation = correlation;
            best_pitch_class = rotation;
            best_is_major = false;
        }
    }

    // Map correlation from [-1, 1] into a 0..1 confidence
    let confidence = ((best_correlation + 1.0) / 2.0).clamp(0.0, 1.0);

    let camelot = if best_is_major {
        CAMELOT_MAJOR[best_pitch_class]
    } else {
        CAMELOT_MINOR[best_pitch_class]
    };

    KeyEstimate {
        key: PITCH_NAMES[best_pitch_class].to_string(),
        mode: if best_is_major { "major" } else { "minor" }.to_string(),
        camelot: camelot.to_string(),
        confidence,
    }
}

/// Transpose a profile to a different root by rotating it `semitones` up
fn rotate_profile(profile: &[f32; 12], semitones: usize) -> [f32; 12] {
    let mut rotated = [0.0f32; 12];
    for (i, &value) in profile.iter().enumerate() {
        rotated[(i + semitones) % 12] = value;
    }
    rotated
}

fn pearson_correlation(x: &[f32; 12], y: &[f32; 12]) -> f32 {
    let n = 12.0f32;
    let mean_x: f32 = x.iter().sum::<f32>() / n;
    let mean_y: f32 = y.iter().sum::<f32>() / n;

    let mut covariance = 0.0f32;
    let mut var_x = 0.0f32;
    let mut var_y = 0.0f32;
    for i in 0..12 {
        let dx = x[i] - mean_x;
        let dy = y[i] - mean_y;
        covariance += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let std_x = var_x.sqrt();
    let std_y = var_y.sqrt();
    if std_x < f32::EPSILON || std_y < f32::EPSILON {
        return 0.0;
    }

    covariance / (std_x * std_y)
}
