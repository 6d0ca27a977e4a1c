//! Test fixtures for worker integration tests
//!
//! Real WAV files on disk, synthesized signals, and catalog fixtures
//! shared by the executor test suites.

use std::f32::consts::PI;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use fake::faker::lorem::en::Words;
use fake::faker::name::en::Name;
use fake::Fake;
use once_cell::sync::Lazy;
use sqlx::sqlite::SqlitePoolOptions;

use deckhand_worker::library::{TrackMetadata, TrackStore};

/// 44.1 kHz mono A440 tone, two seconds, shared across tests
pub static SINE_SAMPLES: Lazy<Vec<i16>> = Lazy::new(|| quantize(&sine(440.0, 44100, 2.0)));

/// 44.1 kHz mono click track at 120 BPM, four seconds
pub static CLICK_SAMPLES: Lazy<Vec<i16>> = Lazy::new(|| quantize(&click_track(120.0, 44100, 4.0)));

/// Synthesize a sine wave at half amplitude
pub fn sine(frequency: f32, sample_rate: u32, duration_secs: f32) -> Vec<f32> {
    let num_samples = (sample_rate as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            0.5 * (2.0 * PI * frequency * t).sin()
        })
        .collect()
}

/// Synthesize a click track: short decaying 1 kHz bursts on the beat grid
pub fn click_track(bpm: f32, sample_rate: u32, duration_secs: f32) -> Vec<f32> {
    let num_samples = (sample_rate as f32 * duration_secs) as usize;
    let mut samples = vec![0.0f32; num_samples];
    let beat_period = 60.0 / bpm;
    let click_len = (sample_rate as f32 * 0.01) as usize;

    let mut beat = 0.0f32;
    while beat < duration_secs {
        let start = (beat * sample_rate as f32) as usize;
        for i in 0..click_len {
            let idx = start + i;
            if idx >= num_samples {
                break;
            }
            let t = i as f32 / sample_rate as f32;
            samples[idx] = 0.8 * (-5.0 * t).exp() * (2.0 * PI * 1000.0 * t).sin();
        }
        beat += beat_period;
    }
    samples
}

/// Quantize float samples to PCM16
pub fn quantize(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect()
}

/// Write mono PCM16 samples as a RIFF/WAVE file, creating parent
/// directories as needed
pub fn write_wav(path: &Path, sample_rate: u32, samples: &[i16]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directories");
    }
    let data_len = (samples.len() * 2) as u32;
    let mut out = BufWriter::new(File::create(path).expect("Failed to create wav file"));

    out.write_all(b"RIFF").unwrap();
    out.write_all(&(36 + data_len).to_le_bytes()).unwrap();
    out.write_all(b"WAVE").unwrap();

    out.write_all(b"fmt ").unwrap();
    out.write_all(&16u32.to_le_bytes()).unwrap();
    out.write_all(&1u16.to_le_bytes()).unwrap();
    out.write_all(&1u16.to_le_bytes()).unwrap();
    out.write_all(&sample_rate.to_le_bytes()).unwrap();
    out.write_all(&(sample_rate * 2).to_le_bytes()).unwrap();
    out.write_all(&2u16.to_le_bytes()).unwrap();
    out.write_all(&16u16.to_le_bytes()).unwrap();

    out.write_all(b"data").unwrap();
    out.write_all(&data_len.to_le_bytes()).unwrap();
    for sample in samples {
        out.write_all(&sample.to_le_bytes()).unwrap();
    }
    out.flush().unwrap();
}

/// Write a 440 Hz test tone of the given length
pub fn write_sine_wav(path: &Path, duration_secs: f32) {
    write_wav(path, 44100, &quantize(&sine(440.0, 44100, duration_secs)));
}

/// Helper to create a temporary directory for library roots
pub fn create_temp_music_library() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with specific content, creating parent directories
pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let file_path = dir.join(name);
    if let Some(parent) = file_path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directories");
    }
    std::fs::write(&file_path, content).expect("Failed to create test file");
    file_path
}

/// In-memory track catalog with the schema applied.
///
/// The pool is capped at a single connection; an in-memory SQLite database
/// is private to its connection.
pub async fn memory_track_store() -> TrackStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory sqlite");
    let store = TrackStore::new(pool);
    store
        .init_schema()
        .await
        .expect("Failed to apply track schema");
    store
}

/// Catalog row fixture with random tag data
pub fn fake_metadata(path: &str, file_hash: &str) -> TrackMetadata {
    let title: Vec<String> = Words(2..4).fake();
    TrackMetadata {
        path: path.to_string(),
        title: title.join(" "),
        artist: Some(Name().fake()),
        album: Some(Words(2..4).fake::<Vec<String>>().join(" ")),
        genre: Some("House".to_string()),
        year: Some((1990..2025).fake()),
        duration_seconds: Some((120.0..480.0).fake()),
        bitrate_kbps: Some(320),
        sample_rate: Some(44100),
        channels: Some(2),
        file_size: (1_000_000..20_000_000).fake(),
        file_hash: file_hash.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn written_wavs_decode_back() {
        let dir = create_temp_music_library();
        let path = dir.path().join("tone.wav");
        write_sine_wav(&path, 1.0);

        let decoded = deckhand_worker::audio::decode_to_mono(&path).expect("decode");
        assert_eq!(decoded.sample_rate, 44100);
        assert!((decoded.duration_seconds() - 1.0).abs() < 0.01);
    }

    #[test]
    fn click_track_is_mostly_silence() {
        let samples = click_track(120.0, 44100, 2.0);
        let loud = samples.iter().filter(|s| s.abs() > 0.01).count();
        assert!(loud > 0);
        assert!(loud < samples.len() / 10);
    }

    #[test]
    fn track_store_fixture_applies_the_schema() {
        let store = tokio_test::block_on(memory_track_store());
        let count = tokio_test::block_on(store.count()).expect("count");
        assert_eq!(count, 0);
    }

    #[test]
    fn fake_metadata_fills_every_tag_field() {
        let metadata = fake_metadata("/music/a.flac", "hash");
        assert!(!metadata.title.is_empty());
        assert!(metadata.artist.is_some());
        assert!(metadata.file_size > 0);
    }
}
