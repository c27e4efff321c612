use crate::{Result, VoiceError};
use rubato::{
    Resampler, SincFixedOut, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::collections::VecDeque;
use tracing::debug;

/// Downsample `input` from `input_rate` to `output_rate` by window averaging.
///
/// Each output sample is the mean of a contiguous window of input samples
/// whose boundaries fall on `floor(i * in / out)`, so the output holds
/// `floor(len * out / in)` samples. This is a crude low-pass and lets some
/// aliasing through; for speech headed to a recogniser that is an accepted
/// trade against latency and CPU. Passes the block through unchanged when
/// `output_rate >= input_rate`.
pub fn downsample(input: &[f32], input_rate: u32, output_rate: u32) -> Vec<f32> {
    if output_rate >= input_rate || input_rate == 0 || output_rate == 0 {
        return input.to_vec();
    }

    let in_rate = input_rate as u64;
    let out_rate = output_rate as u64;
    let out_len = (input.len() as u64 * out_rate / in_rate) as usize;
    let mut output = Vec::with_capacity(out_len);

    // Integer window bounds: floor(i * in / out) avoids float drift on long blocks
    for i in 0..out_len as u64 {
        let start = (i * in_rate / out_rate) as usize;
        let end = (((i + 1) * in_rate / out_rate) as usize).min(input.len());

        let window = &input[start.min(end)..end];
        let value = if window.is_empty() {
            0.0
        } else {
            window.iter().sum::<f32>() / window.len() as f32
        };
        output.push(value);
    }

    output
}

/// Streaming mono converter from the playback timeline rate to a device rate.
///
/// The output side is fixed-size, so the render callback pulls exactly as
/// many timeline frames as the resampler asks for and the timeline clock
/// stays in whole playback-rate frames.
pub struct PlayoutResampler {
    resampler: SincFixedOut<f32>,
    input: Vec<Vec<f32>>,
    output: Vec<Vec<f32>>,
    pending: VecDeque<f32>,
}

impl PlayoutResampler {
    /// `chunk_size` is the number of device frames produced per resampler pass
    pub fn new(input_rate: u32, output_rate: u32, chunk_size: usize) -> Result<Self> {
        if input_rate == 0 || output_rate == 0 {
            return Err(VoiceError::ConfigError(
                "Sample rates must be greater than 0".into(),
            ));
        }
        if chunk_size == 0 {
            return Err(VoiceError::ConfigError(
                "Resampler chunk size must be greater than 0".into(),
            ));
        }

        let resample_ratio = output_rate as f64 / input_rate as f64;

        // Shorter filter than offline work; this runs inside the render callback
        let params = SincInterpolationParameters {
            sinc_len: 64,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };

        let resampler = SincFixedOut::<f32>::new(resample_ratio, 1.0, params, chunk_size, 1)
            .map_err(|e| VoiceError::DeviceError(format!("Failed to create resampler: {}", e)))?;

        let input = vec![Vec::with_capacity(resampler.input_frames_max())];
        let output = vec![vec![0.0; resampler.output_frames_max()]];

        debug!(
            "Created playout resampler: {} Hz -> {} Hz, {} frame chunks",
            input_rate, output_rate, chunk_size
        );

        Ok(Self {
            resampler,
            input,
            output,
            pending: VecDeque::with_capacity(chunk_size * 2),
        })
    }

    /// Fill `out` with device-rate samples, pulling timeline frames through
    /// `pull` whenever the resampler needs more. Returns the number of
    /// timeline frames pulled.
    pub fn render(&mut self, out: &mut [f32], mut pull: impl FnMut(&mut [f32])) -> Result<u64> {
        let mut pulled = 0u64;

        while self.pending.len() < out.len() {
            let needed = self.resampler.input_frames_next();
            let chunk = &mut self.input[0];
            chunk.clear();
            chunk.resize(needed, 0.0);
            pull(chunk);
            pulled += needed as u64;

            let (_, written) = self
                .resampler
                .process_into_buffer(&self.input, &mut self.output, None)
                .map_err(|e| VoiceError::DeviceError(format!("Resampling failed: {}", e)))?;
            self.pending.extend(&self.output[0][..written]);
        }

        let n = out.len();
        for (slot, sample) in out.iter_mut().zip(self.pending.drain(..n)) {
            *slot = sample;
        }
        Ok(pulled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_length_is_floor_of_ratio() {
        let cases = [(48000, 16000, 4096), (44100, 16000, 4096), (22050, 16000, 1001), (16001, 16000, 7)];
        for (fin, fout, len) in cases {
            let out = downsample(&vec![0.1; len], fin, fout);
            assert_eq!(out.len(), (len as u64 * fout as u64 / fin as u64) as usize);
        }
    }

    #[test]
    fn test_constant_block_stays_constant() {
        let out = downsample(&vec![0.37; 4096], 44100, 16000);
        assert!(!out.is_empty());
        for s in out {
            assert!((s - 0.37).abs() < 1e-6);
        }
    }

    #[test]
    fn test_integer_ratio_averages_pairs() {
        let out = downsample(&[1.0, 3.0, -1.0, 1.0], 32000, 16000);
        assert_eq!(out, vec![2.0, 0.0]);
    }

    #[test]
    fn test_upsampling_passes_through() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(downsample(&input, 16000, 24000), input);
        assert_eq!(downsample(&input, 16000, 16000), input);
        assert!(downsample(&[], 48000, 16000).is_empty());
    }

    #[test]
    fn test_invalid_playout_parameters() {
        assert!(PlayoutResampler::new(0, 44100, 441).is_err());
        assert!(PlayoutResampler::new(24000, 0, 441).is_err());
        assert!(PlayoutResampler::new(24000, 44100, 0).is_err());
    }

    #[test]
    fn test_playout_24k_to_44k1_tracks_timeline() {
        let mut r = PlayoutResampler::new(24000, 44100, 441).unwrap();

        // One second of a steady level, rendered in uneven device blocks
        let mut out = Vec::new();
        let mut pulled = 0;
        for block in [512usize, 300, 1024, 441, 2133].iter().cycle().take(20) {
            let mut buf = vec![0.0; *block];
            pulled += r.render(&mut buf, |chunk| chunk.fill(0.5)).unwrap();
            out.extend(buf);
        }

        // Timeline frames consumed follow the rate ratio, give or take one pass
        let expected = out.len() as u64 * 24000 / 44100;
        let slack = r.resampler.input_frames_max() as u64 * 2;
        assert!(pulled + 4 >= expected, "{} < {}", pulled, expected);
        assert!(pulled <= expected + slack, "{} > {}", pulled, expected + slack);

        // Past the filter delay the level comes through intact
        for &s in &out[out.len() - 1000..] {
            assert!((s - 0.5).abs() < 0.02, "{}", s);
        }
    }

    #[test]
    fn test_playout_silence_stays_silent() {
        let mut r = PlayoutResampler::new(24000, 48000, 480).unwrap();
        let mut buf = vec![1.0; 960];
        r.render(&mut buf, |chunk| chunk.fill(0.0)).unwrap();
        assert!(buf.iter().all(|&s| s == 0.0));
    }
}
