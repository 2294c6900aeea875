//! Microphone level meter.
//!
//! Reads a level the way a browser analyser node does: the newest
//! [`FFT_SIZE`] samples are Blackman-windowed and transformed, every bin
//! magnitude is mapped from decibels onto a byte (`-100 dB → 0`,
//! `-30 dB → 255`), and the level is the mean byte divided by 128.
//!
//! Silence reads 0.0; a broadband signal around -60 dBFS reads roughly 0.3,
//! and loud speech goes past 1.0. No smoothing is carried between calls, so
//! a quiet window reads quiet on the very next poll.

use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};

/// Samples analysed per reading.
pub const FFT_SIZE: usize = 256;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Spectral level meter with its FFT plan and buffers preallocated.
pub struct LevelMeter {
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    input: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl LevelMeter {
    pub fn new() -> Self {
        let fft = RealFftPlanner::<f32>::new().plan_fft_forward(FFT_SIZE);
        let input = fft.make_input_vec();
        let spectrum = fft.make_output_vec();
        let scratch = fft.make_scratch_vec();
        Self {
            fft,
            window: blackman(FFT_SIZE),
            input,
            spectrum,
            scratch,
        }
    }

    /// Level of the newest [`FFT_SIZE`] samples. Shorter windows are
    /// zero-padded at the front.
    #[allow(clippy::cast_precision_loss)]
    pub fn level(&mut self, samples: &[f32]) -> f32 {
        let tail = &samples[samples.len().saturating_sub(FFT_SIZE)..];
        let pad = FFT_SIZE - tail.len();

        self.input[..pad].fill(0.0);
        for ((slot, sample), weight) in self.input[pad..]
            .iter_mut()
            .zip(tail)
            .zip(&self.window[pad..])
        {
            *slot = sample * weight;
        }

        if self
            .fft
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)
            .is_err()
        {
            return 0.0;
        }

        let bins = FFT_SIZE / 2;
        let total: u32 = self.spectrum[..bins]
            .iter()
            .map(|bin| byte_magnitude(bin.norm() / FFT_SIZE as f32))
            .sum();
        total as f32 / bins as f32 / 128.0
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a linear bin magnitude onto the 0–255 decibel scale.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn byte_magnitude(magnitude: f32) -> u32 {
    if magnitude <= 0.0 || !magnitude.is_finite() {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = (db - MIN_DECIBELS) * 255.0 / (MAX_DECIBELS - MIN_DECIBELS);
    scaled.floor().clamp(0.0, 255.0) as u32
}

#[allow(clippy::cast_precision_loss)]
fn blackman(size: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    (0..size)
        .map(|n| {
            let phase = 2.0 * PI * n as f32 / size as f32;
            0.08f32.mul_add((2.0 * phase).cos(), 0.5f32.mul_add(-phase.cos(), 0.42))
        })
        .collect()
}
