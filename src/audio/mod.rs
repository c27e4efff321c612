pub mod buffer;
pub mod codec;
pub mod conditioner;
#[cfg(feature = "audio-io")]
pub mod input;
pub mod meter;
#[cfg(feature = "audio-io")]
pub mod output;
pub mod resampler;
pub mod scheduler;

pub use buffer::AudioRingBuffer;
pub use codec::{AudioFrame, FrameRole};
pub use conditioner::SignalConditioner;
#[cfg(feature = "audio-io")]
pub use input::CpalCapture;
pub use meter::SpectrumMeter;
#[cfg(feature = "audio-io")]
pub use output::CpalOutput;
pub use resampler::PlayoutResampler;
pub use scheduler::{PlaybackScheduler, ScheduledPlayback};

use crate::Result;
use std::fmt;
use std::sync::Arc;

/// Identifies one scheduled buffer on an output sink
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaybackId(pub u64);

impl fmt::Display for PlaybackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Receives each mono capture block with the device rate it was captured at
pub type CaptureCallback = Box<dyn FnMut(&[f32], u32) + Send + 'static>;

/// Fired by a sink when a buffer plays out naturally
pub type CompletionCallback = Arc<dyn Fn(PlaybackId) + Send + Sync + 'static>;

/// Fired when a device fails or is revoked mid-stream
pub type DeviceErrorCallback = Arc<dyn Fn(String) + Send + Sync + 'static>;

/// A running microphone stream
pub trait CaptureStream {
    fn sample_rate(&self) -> u32;

    /// Stop delivery. No block callback runs after this returns.
    fn stop(&mut self);
}

/// An output device that plays buffers at given positions on its own clock.
///
/// Positions are in frames at [`sample_rate`](OutputSink::sample_rate),
/// counted from when the sink was opened.
pub trait OutputSink {
    fn sample_rate(&self) -> u32;

    /// Current playout position
    fn now(&self) -> u64;

    /// Play `samples` starting exactly at frame `start`
    fn schedule(&mut self, id: PlaybackId, samples: Vec<f32>, start: u64) -> Result<()>;

    /// Silence a buffer immediately. Its completion callback never fires.
    fn stop(&mut self, id: PlaybackId);

    /// Release the device
    fn close(&mut self);
}

/// Opens capture and output devices for a session
pub trait AudioDevices: Send + Sync {
    fn open_capture(
        &self,
        on_block: CaptureCallback,
        on_error: DeviceErrorCallback,
    ) -> Result<Box<dyn CaptureStream>>;

    fn open_output(
        &self,
        sample_rate: u32,
        on_complete: CompletionCallback,
        on_error: DeviceErrorCallback,
    ) -> Result<Box<dyn OutputSink>>;
}

/// Default host microphone and speakers via cpal
#[cfg(feature = "audio-io")]
#[derive(Clone, Copy, Debug, Default)]
pub struct CpalDevices;

#[cfg(feature = "audio-io")]
impl AudioDevices for CpalDevices {
    fn open_capture(
        &self,
        on_block: CaptureCallback,
        on_error: DeviceErrorCallback,
    ) -> Result<Box<dyn CaptureStream>> {
        Ok(Box::new(CpalCapture::open(on_block, on_error)?))
    }

    fn open_output(
        &self,
        sample_rate: u32,
        on_complete: CompletionCallback,
        on_error: DeviceErrorCallback,
    ) -> Result<Box<dyn OutputSink>> {
        Ok(Box::new(CpalOutput::open(sample_rate, on_complete, on_error)?))
    }
}
