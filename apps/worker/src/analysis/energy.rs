//! Peak / RMS level measurement and clipping detection
//!
//! Levels are reported in dBFS relative to full scale (1.0). A small floor
//! keeps silence finite at -200 dB instead of negative infinity.

/// Samples at or above this magnitude count as clipped
const CLIPPING_THRESHOLD: f32 = 0.99;

const DB_FLOOR: f32 = 1e-10;

/// Loudness profile of a track in dBFS
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyProfile {
    pub peak_db: f32,
    pub rms_db: f32,
    pub clipping: bool,
}

/// Measure peak level, RMS level and clipping over mono samples
pub fn measure_energy(samples: &[f32]) -> EnergyProfile {
    if samples.is_empty() {
        return EnergyProfile {
            peak_db: amplitude_to_db(0.0),
            rms_db: amplitude_to_db(0.0),
            clipping: false,
        };
    }

    let mut peak = 0.0f32;
    let mut sum_squares = 0.0f64;
    let mut clipping = false;
    for &sample in samples {
        let magnitude = sample.abs();
        if magnitude > peak {
            peak = magnitude;
        }
        if magnitude >= CLIPPING_THRESHOLD {
            clipping = true;
        }
        sum_squares += f64::from(sample) * f64::from(sample);
    }

    let rms = (sum_squares / samples.len() as f64).sqrt() as f32;

    EnergyProfile {
        peak_db: amplitude_to_db(peak),
        rms_db: amplitude_to_db(rms),
        clipping,
    }
}

fn amplitude_to_db(amplitude: f32) -> f32 {
    20.0 * (amplitude + DB_FLOOR).log10()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_signals;

    #[test]
    fn full_scale_square_wave_reads_zero_db_and_clips() {
        let samples: Vec<f32> = (0..1000)
            .map(|i| if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect();
        let profile = measure_energy(&samples);

        assert!(profile.peak_db.abs() < 0.01, "peak {}", profile.peak_db);
        assert!(profile.rms_db.abs() < 0.01, "rms {}", profile.rms_db);
        assert!(profile.clipping);
    }

    #[test]
    fn half_amplitude_sine_levels() {
        let samples: Vec<f32> = test_signals::sine(440.0, 44100, 44100)
            .iter()
            .map(|s| s * 0.5)
            .collect();
        let profile = measure_energy(&samples);

        // Peak 0.5 is about -6.02 dB; sine RMS is peak / sqrt(2), about -9.03 dB
        assert!((profile.peak_db + 6.02).abs() < 0.1, "peak {}", profile.peak_db);
        assert!((profile.rms_db + 9.03).abs() < 0.1, "rms {}", profile.rms_db);
        assert!(!profile.clipping);
    }

    #[test]
    fn silence_sits_at_the_floor() {
        let profile = measure_energy(&vec![0.0f32; 1000]);
        assert!((profile.peak_db + 200.0).abs() < 0.01);
        assert!((profile.rms_db + 200.0).abs() < 0.01);
        assert!(!profile.clipping);
    }

    #[test]
    fn empty_input_matches_silence() {
        let profile = measure_energy(&[]);
        assert!((profile.peak_db + 200.0).abs() < 0.01);
        assert!((profile.rms_db + 200.0).abs() < 0.01);
        assert!(!profile.clipping);
    }

    #[test]
    fn clipping_threshold_is_inclusive() {
        assert!(measure_energy(&[0.99, 0.0]).clipping);
        assert!(measure_energy(&[-0.99, 0.0]).clipping);
        assert!(!measure_energy(&[0.989, -0.989]).clipping);
    }
}
