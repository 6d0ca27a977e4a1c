//! Track analysis: tempo, key and energy estimation
//!
//! All three analyses run on the mono samples produced by
//! [`crate::audio::decode_to_mono`]. Tempo and key share the windowed FFT
//! in [`Stft`], with different frame and hop sizes each.

pub mod energy;
pub mod key;
pub mod tempo;

pub use energy::{measure_energy, EnergyProfile};
pub use key::{detect_key, KeyEstimate};
pub use tempo::{detect_tempo, TempoEstimate};

use std::sync::Arc;

use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;

/// Short-time FFT over hop-advanced Hann-windowed frames
pub(crate) struct Stft {
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    frame_size: usize,
    hop_size: usize,
    scratch_input: Vec<f32>,
    scratch_output: Vec<Complex<f32>>,
}

impl Stft {
    /// `frame_size` must be >= 2 and `hop_size` >= 1; the callers in this
    /// module only construct with their compile-time constants
    pub(crate) fn new(frame_size: usize, hop_size: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(frame_size);

        let window: Vec<f32> = apodize::hanning_iter(frame_size)
            .map(|x| x as f32)
            .collect();

        Self {
            fft,
            window,
            frame_size,
            hop_size,
            scratch_input: vec![0.0f32; frame_size],
            scratch_output: vec![Complex::new(0.0f32, 0.0f32); frame_size / 2 + 1],
        }
    }

    pub(crate) fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Visit the magnitude spectrum of every complete frame.
    ///
    /// The slice passed to `visit` holds `frame_size / 2 + 1` magnitudes
    /// and is reused between frames. Returns the number of frames visited;
    /// zero when the signal is shorter than one frame.
    pub(crate) fn for_each_magnitude_frame<F>(&mut self, samples: &[f32], mut visit: F) -> usize
    where
        F: FnMut(&[f32]),
    {
        if samples.len() < self.frame_size {
            return 0;
        }

        let mut magnitudes = vec![0.0f32; self.frame_size / 2 + 1];
        let mut frames = 0usize;

        for start in (0..=samples.len() - self.frame_size).step_by(self.hop_size) {
            let frame = &samples[start..start + self.frame_size];
            for (slot, (&sample, &coef)) in self
                .scratch_input
                .iter_mut()
                .zip(frame.iter().zip(self.window.iter()))
            {
                *slot = sample * coef;
            }

            if self
                .fft
                .process(&mut self.scratch_input, &mut self.scratch_output)
                .is_err()
            {
                continue;
            }

            for (slot, c) in magnitudes.iter_mut().zip(self.scratch_output.iter()) {
                *slot = (c.re * c.re + c.im * c.im).sqrt();
            }
            visit(&magnitudes);

            frames += 1;
        }

        frames
    }
}
