//! Periodic level metering for UI feedback

use crate::audio::{AudioRingBuffer, SpectrumMeter};
use crate::session::diagnostics::DiagnosticLog;
use crate::session::state::{SessionUpdate, SharedSessionState, UpdateSender};
use crate::Result;
use crossbeam_channel::{bounded, select, tick, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

/// Recent audio per side, written by the audio paths and read by the meter
#[derive(Clone)]
pub struct MeterTaps {
    pub user: AudioRingBuffer,
    pub model: AudioRingBuffer,
}

impl MeterTaps {
    pub fn new(capacity: usize) -> Self {
        Self {
            user: AudioRingBuffer::new(capacity),
            model: AudioRingBuffer::new(capacity),
        }
    }
}

/// Handle to a running metering thread; stops on drop
pub struct Metering {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Metering {
    /// Every `interval`, measure the model tap while it is speaking and the
    /// user tap otherwise, and publish the level for that side.
    pub fn start(
        taps: MeterTaps,
        fft_size: usize,
        interval: Duration,
        state: SharedSessionState,
        updates: UpdateSender,
        log: DiagnosticLog,
    ) -> Result<Self> {
        let mut meter = SpectrumMeter::new(fft_size)?;
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let thread = thread::Builder::new()
            .name("metering".into())
            .spawn(move || {
                let ticker = tick(interval);
                let mut failing = false;

                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            let speaking = state.is_model_speaking();
                            let tap = if speaking { &taps.model } else { &taps.user };
                            let samples = tap.latest(fft_size);

                            let reading = meter.average(&samples);
                            publish(reading, speaking, &state, &updates, &log, &mut failing);
                        }
                    }
                }
                debug!("Metering thread stopped");
            })
            .map_err(|e| {
                crate::VoiceError::ChannelError(format!("Failed to spawn metering thread: {}", e))
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Store one reading for the active side and announce it.
///
/// A failed reading is logged once per failure streak and never stops the
/// session.
fn publish(
    reading: Result<f32>,
    speaking: bool,
    state: &SharedSessionState,
    updates: &UpdateSender,
    log: &DiagnosticLog,
    failing: &mut bool,
) {
    match reading {
        Ok(level) => {
            *failing = false;
            let levels = {
                let mut s = state.write();
                if speaking {
                    s.volume.model = level;
                } else {
                    s.volume.user = level;
                }
                s.volume
            };
            updates.send(SessionUpdate::Volume(levels));
        }
        Err(e) if !*failing => {
            *failing = true;
            log.warn("Meter", format!("Metering failed: {}", e));
        }
        Err(_) => {}
    }
}

impl Drop for Metering {
    fn drop(&mut self) {
        self.stop();
    }
}
