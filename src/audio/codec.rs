//! Frame codec
//!
//! Converts between f32 sample blocks and the wire's 16-bit little-endian PCM,
//! and between raw bytes and the base64 text carried in JSON messages.

use crate::{Result, VoiceError};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use std::time::Duration;

/// Whether a frame travels out of the microphone or into the speakers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameRole {
    Capture,
    Playback,
}

/// Immutable block of mono 16-bit PCM at a fixed rate.
///
/// Deliberately not `Clone`: a frame is produced by the codec and handed to
/// exactly one consumer.
#[derive(Debug, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    sample_rate: u32,
    role: FrameRole,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32, role: FrameRole) -> Self {
        Self {
            samples,
            sample_rate,
            role,
        }
    }

    /// Quantize a float block into a frame
    pub fn from_float(samples: &[f32], sample_rate: u32, role: FrameRole) -> Self {
        Self::new(float_to_pcm(samples), sample_rate, role)
    }

    /// Build a frame from little-endian PCM bytes
    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32, role: FrameRole) -> Result<Self> {
        Ok(Self::new(bytes_to_pcm(bytes)?, sample_rate, role))
    }

    /// Build a frame from transport text
    pub fn from_transport(text: &str, sample_rate: u32, role: FrameRole) -> Result<Self> {
        let bytes = decode_transport(text)?;
        Self::from_le_bytes(&bytes, sample_rate, role)
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Always mono on this wire
    pub fn channels(&self) -> u16 {
        1
    }

    pub fn role(&self) -> FrameRole {
        self.role
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    /// MIME type announced on the wire
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    pub fn to_float(&self) -> Vec<f32> {
        pcm_to_float(&self.samples)
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        pcm_to_bytes(&self.samples)
    }

    pub fn to_transport(&self) -> String {
        encode_transport(&self.to_le_bytes())
    }
}

/// Quantize floats in [-1, 1] to i16.
///
/// Negative samples scale by 32768 and positive by 32767, then truncate
/// toward zero.
pub fn float_to_pcm(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let s = s.clamp(-1.0, 1.0);
            if s < 0.0 {
                (s * 32768.0) as i16
            } else {
                (s * 32767.0) as i16
            }
        })
        .collect()
}

/// Expand i16 samples to floats by dividing by 32768
pub fn pcm_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

pub fn pcm_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Parse little-endian PCM.
///
/// An odd byte count is rejected rather than truncated.
pub fn bytes_to_pcm(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(VoiceError::DecodeError(format!(
            "PCM payload has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

pub fn encode_transport(bytes: &[u8]) -> String {
    B64.encode(bytes)
}

pub fn decode_transport(text: &str) -> Result<Vec<u8>> {
    Ok(B64.decode(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_pcm_value_survives_within_one_lsb() {
        let all: Vec<i16> = (i16::MIN..=i16::MAX).collect();
        let back = float_to_pcm(&pcm_to_float(&all));
        for (a, b) in all.iter().zip(back.iter()) {
            assert!((*a as i32 - *b as i32).abs() <= 1, "{} -> {}", a, b);
        }
    }

    #[test]
    fn test_asymmetric_scaling() {
        assert_eq!(float_to_pcm(&[1.0, -1.0, 0.0]), vec![32767, -32768, 0]);
        // Truncation toward zero
        assert_eq!(float_to_pcm(&[0.5, -0.5]), vec![16383, -16384]);
    }

    #[test]
    fn test_out_of_range_floats_are_clamped() {
        assert_eq!(float_to_pcm(&[1.5, -2.0]), vec![32767, -32768]);
    }

    #[test]
    fn test_le_byte_layout() {
        assert_eq!(pcm_to_bytes(&[1, -2]), vec![0x01, 0x00, 0xFE, 0xFF]);
        assert_eq!(bytes_to_pcm(&[0x01, 0x00, 0xFE, 0xFF]).unwrap(), vec![1, -2]);
    }

    #[test]
    fn test_odd_length_is_rejected() {
        assert!(matches!(
            bytes_to_pcm(&[1, 2, 3]),
            Err(VoiceError::DecodeError(_))
        ));
    }

    #[test]
    fn test_transport_text_reversible() {
        let payloads: Vec<Vec<u8>> = vec![
            vec![],
            vec![0],
            vec![0xFF, 0x00],
            (0..=255u8).collect(),
            (0..48_000u32).map(|i| (i % 251) as u8).collect(),
        ];
        for p in payloads {
            assert_eq!(decode_transport(&encode_transport(&p)).unwrap(), p);
        }
    }

    #[test]
    fn test_malformed_transport_text() {
        assert!(matches!(
            decode_transport("not*base64!"),
            Err(VoiceError::DecodeError(_))
        ));
        assert!(decode_transport("QUJD=").is_err());
    }

    #[test]
    fn test_frame_duration_and_mime() {
        let frame = AudioFrame::new(vec![0; 2400], 24000, FrameRole::Playback);
        assert_eq!(frame.duration(), Duration::from_millis(100));
        assert_eq!(frame.mime_type(), "audio/pcm;rate=24000");
        assert_eq!(frame.channels(), 1);
    }

    #[test]
    fn test_frame_from_transport() {
        let text = encode_transport(&pcm_to_bytes(&[100, -100, 7]));
        let frame = AudioFrame::from_transport(&text, 24000, FrameRole::Playback).unwrap();
        assert_eq!(frame.samples(), &[100, -100, 7]);
        assert_eq!(frame.to_transport(), text);
    }
}
