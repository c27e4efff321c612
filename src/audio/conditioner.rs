//! Outbound microphone conditioning: noise gate, gain and peak limiting.

use serde::Deserialize;

/// Samples quieter than this are treated as hiss
pub const NOISE_GATE_THRESHOLD: f32 = 0.002;

/// Boost applied to samples that pass the gate
pub const GAIN: f32 = 1.8;

/// Peak limit applied after gain
pub const SOFT_CLIP_LIMIT: f32 = 0.98;

/// Per-sample conditioning parameters
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct SignalConditioner {
    pub noise_gate: f32,
    pub gain: f32,
    pub clip_limit: f32,
}

impl Default for SignalConditioner {
    fn default() -> Self {
        Self {
            noise_gate: NOISE_GATE_THRESHOLD,
            gain: GAIN,
            clip_limit: SOFT_CLIP_LIMIT,
        }
    }
}

impl SignalConditioner {
    /// Condition a single sample
    #[inline]
    pub fn condition_sample(&self, sample: f32) -> f32 {
        let boosted = if sample.abs() < self.noise_gate {
            0.0
        } else {
            sample * self.gain
        };
        boosted.clamp(-self.clip_limit, self.clip_limit)
    }

    /// Condition a block of samples.
    ///
    /// Must run before resampling so gated zeros are not averaged into
    /// their neighbours.
    pub fn condition(&self, input: &[f32]) -> Vec<f32> {
        input.iter().map(|&s| self.condition_sample(s)).collect()
    }
}
