//! Spectral level meter for UI feedback.

use crate::{Result, VoiceError};
use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use std::sync::Arc;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Average byte-scaled magnitude over the frequency bins of a short window
pub struct SpectrumMeter {
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    input: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
}

impl SpectrumMeter {
    pub fn new(fft_size: usize) -> Result<Self> {
        if fft_size < 2 || !fft_size.is_power_of_two() {
            return Err(VoiceError::ConfigError(format!(
                "FFT size must be a power of two, got {}",
                fft_size
            )));
        }

        let fft = RealFftPlanner::<f32>::new().plan_fft_forward(fft_size);
        let input = fft.make_input_vec();
        let spectrum = fft.make_output_vec();

        // Hann window
        let window = (0..fft_size)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / fft_size as f32;
                0.5 * (1.0 - phase.cos())
            })
            .collect();

        Ok(Self {
            fft,
            window,
            input,
            spectrum,
        })
    }

    pub fn fft_size(&self) -> usize {
        self.window.len()
    }

    /// Number of frequency bins reported
    pub fn bin_count(&self) -> usize {
        self.window.len() / 2
    }

    /// Per-bin levels in 0..=255 over the newest `fft_size` samples.
    ///
    /// Shorter input is left-padded with silence.
    pub fn byte_spectrum(&mut self, samples: &[f32]) -> Result<Vec<u8>> {
        let n = self.window.len();
        let take = samples.len().min(n);
        let pad = n - take;

        self.input[..pad].fill(0.0);
        for (i, &s) in samples[samples.len() - take..].iter().enumerate() {
            self.input[pad + i] = s * self.window[pad + i];
        }

        self.fft
            .process(&mut self.input, &mut self.spectrum)
            .map_err(|e| VoiceError::DecodeError(format!("FFT failed: {}", e)))?;

        let scale = 1.0 / n as f32;
        let range = MAX_DECIBELS - MIN_DECIBELS;
        Ok(self.spectrum[..self.bin_count()]
            .iter()
            .map(|c| {
                let magnitude = c.norm() * scale;
                let db = if magnitude > 0.0 {
                    20.0 * magnitude.log10()
                } else {
                    MIN_DECIBELS
                };
                (255.0 * (db - MIN_DECIBELS) / range).clamp(0.0, 255.0) as u8
            })
            .collect())
    }

    /// Mean of [`byte_spectrum`](Self::byte_spectrum)
    pub fn average(&mut self, samples: &[f32]) -> Result<f32> {
        let bins = self.byte_spectrum(samples)?;
        if bins.is_empty() {
            return Ok(0.0);
        }
        Ok(bins.iter().map(|&b| b as f32).sum::<f32>() / bins.len() as f32)
    }
}
