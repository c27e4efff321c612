use crate::audio::{CaptureCallback, CaptureStream, DeviceErrorCallback};
use crate::{Result, VoiceError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Microphone stream on the default input device
pub struct CpalCapture {
    config: StreamConfig,
    stream: Option<Stream>,
    is_recording: Arc<AtomicBool>,
}

impl CpalCapture {
    /// Open the default input device and start delivering mono blocks
    pub fn open(mut on_block: CaptureCallback, on_error: DeviceErrorCallback) -> Result<Self> {
        let host = cpal::default_host();

        let device: Device = host
            .default_input_device()
            .ok_or_else(|| VoiceError::DeviceError("No input device available".into()))?;

        info!(
            "Using input device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let config: StreamConfig = device
            .default_input_config()
            .map_err(|e| VoiceError::DeviceError(format!("Failed to get input config: {}", e)))?
            .into();

        let channels = config.channels as usize;
        let sample_rate = config.sample_rate.0;
        let is_recording = Arc::new(AtomicBool::new(true));
        let gate = Arc::clone(&is_recording);
        let mut mono = Vec::new();

        let err_fn = move |err: cpal::StreamError| {
            error!("Audio input stream error: {}", err);
            on_error(err.to_string());
        };

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if !gate.load(Ordering::Acquire) {
                        return;
                    }

                    if channels == 1 {
                        on_block(data, sample_rate);
                    } else {
                        // Average all channels to create mono
                        mono.clear();
                        mono.extend(
                            data.chunks(channels)
                                .map(|frame| frame.iter().sum::<f32>() / channels as f32),
                        );
                        on_block(&mono, sample_rate);
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| VoiceError::DeviceError(format!("Failed to build input stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| VoiceError::DeviceError(format!("Failed to start input stream: {}", e)))?;

        info!(
            "Started audio capture at {} Hz, {} channels",
            config.sample_rate.0, config.channels
        );

        Ok(Self {
            config,
            stream: Some(stream),
            is_recording,
        })
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    pub fn is_recording(&self) -> bool {
        self.is_recording.load(Ordering::Acquire)
    }
}

impl CaptureStream for CpalCapture {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    fn stop(&mut self) {
        self.is_recording.store(false, Ordering::Release);

        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                warn!("Failed to pause input stream: {}", e);
            }
            drop(stream);
            info!("Stopped audio capture");
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
