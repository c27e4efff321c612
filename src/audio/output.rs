use crate::audio::{
    CompletionCallback, DeviceErrorCallback, OutputSink, PlaybackId, PlayoutResampler,
};
use crate::{Result, VoiceError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, StreamConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

struct Voice {
    id: PlaybackId,
    start: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

/// Scheduled buffers on a frame-counted timeline at the playback rate
struct Timeline {
    /// Next playback-rate frame to render
    position: u64,
    voices: Vec<Voice>,
}

impl Timeline {
    fn frame_value(&self, frame: u64) -> f32 {
        self.voices
            .iter()
            .filter(|v| frame >= v.start && frame < v.end())
            .map(|v| v.samples[(frame - v.start) as usize])
            .sum()
    }

    /// Mix the next `out.len()` timeline frames and advance
    fn render(&mut self, out: &mut [f32]) {
        for (offset, slot) in out.iter_mut().enumerate() {
            *slot = self.frame_value(self.position + offset as u64);
        }
        self.position += out.len() as u64;
    }

    /// A buffer starting here would lose its head
    fn lags(&self, start: u64) -> bool {
        start < self.position
    }

    /// Drop voices that have fully played and report them
    fn retire(&mut self, finished: &mut Vec<PlaybackId>) {
        let now = self.position;
        self.voices.retain(|v| {
            if v.end() <= now {
                finished.push(v.id);
                false
            } else {
                true
            }
        });
    }
}

/// Device blocks per resampler pass, about 10 ms at common rates
const RESAMPLE_CHUNK_MS: u32 = 10;

/// Speaker output on the default device.
///
/// Buffers are placed on a timeline in whole `playback_rate` frames. When
/// the device runs at another rate the render callback pulls timeline frames
/// through a [`PlayoutResampler`]. The rendered-frame counter is the
/// session's only clock.
pub struct CpalOutput {
    config: StreamConfig,
    playback_rate: u32,
    stream: Option<Stream>,
    timeline: Arc<Mutex<Timeline>>,
    clock: Arc<AtomicU64>,
}

impl CpalOutput {
    pub fn open(
        playback_rate: u32,
        on_complete: CompletionCallback,
        on_error: DeviceErrorCallback,
    ) -> Result<Self> {
        if playback_rate == 0 {
            return Err(VoiceError::ConfigError("Playback rate must be greater than 0".into()));
        }

        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| VoiceError::DeviceError("No output device available".into()))?;

        info!(
            "Using output device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let config = Self::pick_config(&device, playback_rate)?;
        let channels = config.channels as usize;
        let device_rate = config.sample_rate.0;

        let mut converter = if device_rate == playback_rate {
            None
        } else {
            let chunk = (device_rate * RESAMPLE_CHUNK_MS / 1000).max(1) as usize;
            Some(PlayoutResampler::new(playback_rate, device_rate, chunk)?)
        };

        let timeline = Arc::new(Mutex::new(Timeline {
            position: 0,
            voices: Vec::new(),
        }));
        let clock = Arc::new(AtomicU64::new(0));

        let render_timeline = Arc::clone(&timeline);
        let render_clock = Arc::clone(&clock);
        let mut mono = Vec::new();
        let mut finished = Vec::new();
        let mut render_failed = false;

        let err_fn = move |err: cpal::StreamError| {
            error!("Audio output stream error: {}", err);
            on_error(err.to_string());
        };

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    mono.clear();
                    mono.resize(data.len() / channels, 0.0);
                    {
                        let mut tl = render_timeline.lock();
                        match converter.as_mut() {
                            None => tl.render(&mut mono),
                            Some(converter) => {
                                if let Err(e) = converter.render(&mut mono, |chunk| tl.render(chunk)) {
                                    if !render_failed {
                                        error!("Playback conversion failed: {}", e);
                                        render_failed = true;
                                    }
                                    mono.fill(0.0);
                                }
                            }
                        }
                        render_clock.store(tl.position, Ordering::Release);
                        tl.retire(&mut finished);
                    }

                    for (frame, value) in data.chunks_mut(channels).zip(mono.iter()) {
                        frame.fill(*value);
                    }

                    // Outside the lock: the callback may take its own locks
                    for id in finished.drain(..) {
                        on_complete(id);
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| VoiceError::DeviceError(format!("Failed to build output stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| VoiceError::DeviceError(format!("Failed to start output stream: {}", e)))?;

        info!(
            "Started audio output at {} Hz (timeline {} Hz)",
            config.sample_rate.0, playback_rate
        );

        Ok(Self {
            config,
            playback_rate,
            stream: Some(stream),
            timeline,
            clock,
        })
    }

    /// Prefer an f32 config at the playback rate, else the device default
    fn pick_config(device: &Device, playback_rate: u32) -> Result<StreamConfig> {
        let exact = device.supported_output_configs().ok().and_then(|mut configs| {
            configs.find(|c| {
                c.sample_format() == SampleFormat::F32
                    && c.min_sample_rate().0 <= playback_rate
                    && c.max_sample_rate().0 >= playback_rate
            })
        });

        if let Some(range) = exact {
            return Ok(range.with_sample_rate(SampleRate(playback_rate)).into());
        }

        debug!("No native {} Hz output config, resampling", playback_rate);
        Ok(device
            .default_output_config()
            .map_err(|e| VoiceError::DeviceError(format!("Failed to get output config: {}", e)))?
            .into())
    }

    pub fn device_sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }
}

impl OutputSink for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.playback_rate
    }

    fn now(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    fn schedule(&mut self, id: PlaybackId, samples: Vec<f32>, start: u64) -> Result<()> {
        if self.stream.is_none() {
            return Err(VoiceError::DeviceError("Output device is closed".into()));
        }
        let mut tl = self.timeline.lock();
        if tl.lags(start) {
            warn!(%id, "Buffer scheduled behind the playout position, head will be clipped");
        }
        tl.voices.push(Voice { id, start, samples });
        Ok(())
    }

    fn stop(&mut self, id: PlaybackId) {
        self.timeline.lock().voices.retain(|v| v.id != id);
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                warn!("Failed to pause output stream: {}", e);
            }
            drop(stream);
            info!("Stopped audio output");
        }
        self.timeline.lock().voices.clear();
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}
