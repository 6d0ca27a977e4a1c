//! Audio decoding for analysis jobs
//!
//! Decodes any container/codec symphonia supports into mono f32 samples.
//! Analysis only needs a single channel, so multi-channel audio is downmixed
//! by averaging each frame.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::error::{WorkerError, WorkerResult};

/// Decoded mono PCM ready for analysis
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Decode the file at `path` into mono samples.
///
/// Corrupt packets in the middle of a stream are skipped rather than
/// failing the whole decode; a file that yields no samples at all is an
/// error.
pub fn decode_to_mono(path: &Path) -> WorkerResult<DecodedAudio> {
    let path_str = path.display().to_string();
    let file = File::open(path)?;
    let source = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| WorkerError::audio_decoding(&path_str, e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| WorkerError::audio_decoding(&path_str, "no decodable audio track"))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| WorkerError::audio_decoding(&path_str, e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut sample_rate = 0u32;
    let mut channels = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            // End of stream surfaces as an unexpected EOF from the reader
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(WorkerError::audio_decoding(&path_str, e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                if sample_buf.is_none() {
                    let spec = *decoded.spec();
                    sample_rate = spec.rate;
                    channels = spec.channels.count();
                    if channels == 0 {
                        return Err(WorkerError::InvalidAudioData(format!(
                            "'{path_str}' reports zero channels"
                        )));
                    }
                    sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
                }
                if let Some(buf) = sample_buf.as_mut() {
                    buf.copy_interleaved_ref(decoded);
                    for frame in buf.samples().chunks_exact(channels) {
                        samples.push(frame.iter().sum::<f32>() / channels as f32);
                    }
                }
            }
            Err(SymphoniaError::DecodeError(e)) => {
                debug!(path = %path_str, error = %e, "skipping undecodable packet");
            }
            Err(e) => return Err(WorkerError::audio_decoding(&path_str, e.to_string())),
        }
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(WorkerError::InvalidAudioData(format!(
            "'{path_str}' decoded to no samples"
        )));
    }

    debug!(
        path = %path_str,
        samples = samples.len(),
        sample_rate,
        channels,
        "decoded audio"
    );

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}
