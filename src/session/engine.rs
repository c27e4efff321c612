//! Session engine
//!
//! One worker thread owns the live connection and applies commands, inbound
//! transport events, playback completions and device failures strictly in
//! arrival order. Callbacks running on device or network threads never touch
//! session state; they post an [`Envelope`] tagged with the generation they
//! were created for, and the worker drops anything from an older generation.

use crate::audio::{
    resampler, AudioDevices, AudioFrame, CaptureCallback, CaptureStream, CompletionCallback,
    DeviceErrorCallback, FrameRole, PlaybackId, PlaybackScheduler,
};
use crate::memory::MemoryStore;
use crate::session::config::SessionConfig;
use crate::session::diagnostics::{DiagnosticLog, LogEntry};
use crate::session::metering::{MeterTaps, Metering};
use crate::session::state::{
    ConnectionStatus, SessionUpdate, SharedSessionState, Transcripts, UpdateSender,
};
use crate::session::tools;
use crate::transport::{
    InboundEvent, InboundHandler, OutboundChannel, OutboundQueue, SessionSetup, ToolCall,
    Transport, TransportLink,
};
use crate::{Result, VoiceError};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

enum Envelope {
    Connect(Sender<Result<()>>),
    Disconnect(Sender<()>),
    SendText(String),
    MuteChanged(bool),
    Inbound { generation: u64, event: InboundEvent },
    PlaybackEnded { generation: u64, id: PlaybackId },
    DeviceFailed { generation: u64, message: String },
    Shutdown,
}

/// Control surface for a running session
pub struct SessionHandle {
    envelopes: Sender<Envelope>,
    updates: Receiver<SessionUpdate>,
    state: SharedSessionState,
    log: DiagnosticLog,
    muted: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Spawn the session worker. Nothing is opened until [`connect`](Self::connect).
    pub fn start(
        config: SessionConfig,
        devices: Arc<dyn AudioDevices>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn MemoryStore>,
    ) -> Result<Self> {
        let (envelope_tx, envelope_rx) = unbounded();
        let (update_tx, update_rx) = bounded(config.event_queue_size.max(1));
        let state = SharedSessionState::new();
        let log = DiagnosticLog::new(config.log_capacity);
        let muted = Arc::new(AtomicBool::new(false));

        let parts = WorkerParts {
            config,
            devices,
            transport,
            store,
            state: state.clone(),
            updates: UpdateSender::new(update_tx),
            log: log.clone(),
            envelopes: envelope_tx.clone(),
            muted: Arc::clone(&muted),
        };

        // Device handles are not Send, so the worker is built on its own thread
        let worker = thread::Builder::new()
            .name("session".into())
            .spawn(move || SessionWorker::new(parts).run(envelope_rx))
            .map_err(|e| VoiceError::ChannelError(format!("Failed to spawn session worker: {}", e)))?;

        Ok(Self {
            envelopes: envelope_tx,
            updates: update_rx,
            state,
            log,
            muted,
            worker: Some(worker),
        })
    }

    fn send(&self, envelope: Envelope) -> Result<()> {
        self.envelopes
            .send(envelope)
            .map_err(|e| VoiceError::ChannelError(format!("Session worker is gone: {}", e)))
    }

    /// Tear down any current connection and start opening a new one.
    ///
    /// Returns once the old pipeline is gone and the new link is underway;
    /// `Connected` follows when the remote side confirms.
    pub fn connect(&self) -> Result<()> {
        let (tx, rx) = bounded(1);
        self.send(Envelope::Connect(tx))?;
        rx.recv()
            .map_err(|e| VoiceError::ChannelError(format!("No connect reply: {}", e)))?
    }

    /// Tear everything down and return to `Disconnected`
    pub fn disconnect(&self) -> Result<()> {
        let (tx, rx) = bounded(1);
        self.send(Envelope::Disconnect(tx))?;
        rx.recv()
            .map_err(|e| VoiceError::ChannelError(format!("No disconnect reply: {}", e)))
    }

    /// Send a typed message into the conversation
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Envelope::SendText(text.into()))
    }

    /// Takes effect on the next capture block; the pipeline is left alone
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
        let _ = self.send(Envelope::MuteChanged(muted));
    }

    /// Flip mute and return the new value
    pub fn toggle_mute(&self) -> bool {
        let muted = !self.muted.fetch_xor(true, Ordering::AcqRel);
        let _ = self.send(Envelope::MuteChanged(muted));
        muted
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    pub fn state(&self) -> &SharedSessionState {
        &self.state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.status()
    }

    pub fn transcripts(&self) -> Transcripts {
        self.state.transcripts()
    }

    pub fn updates(&self) -> &Receiver<SessionUpdate> {
        &self.updates
    }

    pub fn try_recv_update(&self) -> Option<SessionUpdate> {
        self.updates.try_recv().ok()
    }

    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.log
    }

    /// Diagnostic log, newest first
    pub fn logs(&self) -> Vec<LogEntry> {
        self.log.entries()
    }

    /// Tear down and stop the worker. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.envelopes.send(Envelope::Shutdown);
            if worker.join().is_err() {
                error!("Session worker panicked");
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct WorkerParts {
    config: SessionConfig,
    devices: Arc<dyn AudioDevices>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn MemoryStore>,
    state: SharedSessionState,
    updates: UpdateSender,
    log: DiagnosticLog,
    envelopes: Sender<Envelope>,
    muted: Arc<AtomicBool>,
}

/// Everything that lives exactly as long as one link
struct Connection {
    generation: u64,
    link: Arc<dyn TransportLink>,
    outbound: Arc<OutboundQueue>,
    scheduler: PlaybackScheduler,
    capture: Option<Box<dyn CaptureStream>>,
    metering: Option<Metering>,
    taps: MeterTaps,
}

struct SessionWorker {
    config: SessionConfig,
    devices: Arc<dyn AudioDevices>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn MemoryStore>,
    state: SharedSessionState,
    updates: UpdateSender,
    log: DiagnosticLog,
    envelopes: Sender<Envelope>,
    muted: Arc<AtomicBool>,
    /// Current generation, also read by the capture callback
    generation: Arc<AtomicU64>,
    connection: Option<Connection>,
}

impl SessionWorker {
    fn new(parts: WorkerParts) -> Self {
        Self {
            config: parts.config,
            devices: parts.devices,
            transport: parts.transport,
            store: parts.store,
            state: parts.state,
            updates: parts.updates,
            log: parts.log,
            envelopes: parts.envelopes,
            muted: parts.muted,
            generation: Arc::new(AtomicU64::new(0)),
            connection: None,
        }
    }

    fn run(mut self, envelopes: Receiver<Envelope>) {
        info!("Session worker started");

        while let Ok(envelope) = envelopes.recv() {
            match envelope {
                Envelope::Connect(reply) => {
                    let result = self.connect();
                    let _ = reply.send(result);
                }
                Envelope::Disconnect(reply) => {
                    self.disconnect();
                    let _ = reply.send(());
                }
                Envelope::SendText(text) => match &self.connection {
                    Some(conn) => conn.outbound.send_text(&text),
                    None => debug!("No connection, dropping text"),
                },
                Envelope::MuteChanged(muted) => {
                    self.state.write().muted = muted;
                    self.log
                        .info("Audio", if muted { "Microphone muted" } else { "Microphone live" });
                    self.updates.send(SessionUpdate::MuteChanged(muted));
                }
                Envelope::Inbound { generation, event } => {
                    if self.is_current(generation) {
                        self.handle_inbound(event);
                    } else {
                        debug!(generation, "Ignoring stale inbound event");
                    }
                }
                Envelope::PlaybackEnded { generation, id } => {
                    if self.is_current(generation) {
                        self.playback_ended(id);
                    }
                }
                Envelope::DeviceFailed { generation, message } => {
                    if self.is_current(generation) {
                        self.fail(VoiceError::DeviceError(message));
                    } else {
                        debug!(generation, "Ignoring stale device error: {}", message);
                    }
                }
                Envelope::Shutdown => break,
            }
        }

        self.teardown();
        info!("Session worker stopped");
    }

    fn is_current(&self, generation: u64) -> bool {
        self.connection
            .as_ref()
            .map_or(false, |conn| conn.generation == generation)
    }

    // === Lifecycle ===

    fn connect(&mut self) -> Result<()> {
        if self.connection.is_some() {
            self.log.info("Session", "Reconnecting, tearing down the current link");
        }
        self.teardown();
        if self.state.status().is_live() {
            self.set_status(ConnectionStatus::Disconnected);
        }

        self.state.write().clear_error();
        self.set_status(ConnectionStatus::Initializing);

        match self.open_connection() {
            Ok(conn) => {
                self.log.info(
                    "Session",
                    format!("Opening vocal link (generation {})", conn.generation),
                );
                self.connection = Some(conn);
                Ok(())
            }
            Err(e) => {
                self.fail(e.clone());
                Err(e)
            }
        }
    }

    fn disconnect(&mut self) {
        let status = self.state.status();
        self.teardown();
        if status != ConnectionStatus::Disconnected {
            self.state.write().clear_error();
            self.set_status(ConnectionStatus::Disconnected);
            self.log.info("Session", "Disconnected");
        }
    }

    fn open_connection(&mut self) -> Result<Connection> {
        self.config.validate()?;

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.state.write().generation = generation;

        let sink = self.devices.open_output(
            self.config.output_sample_rate,
            self.completion_callback(generation),
            self.device_error_callback(generation),
        )?;
        let scheduler = PlaybackScheduler::new(sink);

        let identity = tools::identity_memory(self.store.as_ref()).unwrap_or_else(|e| {
            self.log.warn("Memory", e.to_string());
            String::new()
        });
        let voice = self.config.voice.as_str();
        let setup = SessionSetup {
            model: self.config.model.clone(),
            voice: voice.to_string(),
            system_instruction: tools::system_instruction(voice, &identity),
            function_declarations: tools::declarations(),
            transcribe_input: true,
            transcribe_output: true,
        };

        // Buffered until the link opens, so it goes out ahead of any microphone audio
        let outbound = Arc::new(OutboundQueue::new());
        if !self.config.greeting.is_empty() {
            outbound.send_text(&self.config.greeting);
        }

        let link = self
            .transport
            .connect(setup, self.inbound_handler(generation))?;

        Ok(Connection {
            generation,
            link,
            outbound,
            scheduler,
            capture: None,
            metering: None,
            taps: MeterTaps::new(self.config.fft_size * 4),
        })
    }

    /// Release everything the current link owns. Safe with no link.
    fn teardown(&mut self) {
        // Stale every callback first so nothing in flight lands on the next link
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        let Some(mut conn) = self.connection.take() else {
            return;
        };

        if let Some(mut capture) = conn.capture.take() {
            capture.stop();
        }
        conn.scheduler.close();
        conn.outbound.close();
        conn.link.close();
        if let Some(mut metering) = conn.metering.take() {
            metering.stop();
        }

        let was_speaking = {
            let mut s = self.state.write();
            let was_speaking = s.model_speaking;
            s.reset_connection();
            s.generation = generation;
            was_speaking
        };
        if was_speaking {
            self.updates.send(SessionUpdate::SpeakingChanged(false));
        }

        debug!(generation = conn.generation, "Connection torn down");
    }

    /// Tear down and park in `Error` with a user-facing message
    fn fail(&mut self, error: VoiceError) {
        let module = match &error {
            VoiceError::TransportError(_) => "Socket",
            VoiceError::DeviceError(_) => "Audio",
            VoiceError::ConfigError(_) => "Config",
            _ => "Session",
        };
        self.log.error(module, error.to_string());

        self.teardown();

        let message = error.user_message();
        self.state.write().error = Some(message.clone());
        self.set_status(ConnectionStatus::Error);
        self.updates.send(SessionUpdate::Error(message));
    }

    fn set_status(&self, next: ConnectionStatus) {
        let previous = {
            let mut s = self.state.write();
            let previous = s.status;
            if previous == next {
                return;
            }
            if !previous.can_transition_to(next) {
                warn!("Refusing status change {} -> {}", previous, next);
                return;
            }
            s.status = next;
            previous
        };

        self.log
            .debug("Session", format!("Status {} -> {}", previous, next));
        self.updates.send(SessionUpdate::StatusChanged(next));
    }

    fn set_speaking(&self, speaking: bool) {
        let changed = {
            let mut s = self.state.write();
            let changed = s.model_speaking != speaking;
            s.model_speaking = speaking;
            changed
        };
        if changed {
            self.updates.send(SessionUpdate::SpeakingChanged(speaking));
        }
    }

    // === Callbacks handed to devices and transport ===

    fn inbound_handler(&self, generation: u64) -> InboundHandler {
        let tx = self.envelopes.clone();
        Arc::new(move |event| {
            let _ = tx.send(Envelope::Inbound { generation, event });
        })
    }

    fn completion_callback(&self, generation: u64) -> CompletionCallback {
        let tx = self.envelopes.clone();
        Arc::new(move |id| {
            let _ = tx.send(Envelope::PlaybackEnded { generation, id });
        })
    }

    fn device_error_callback(&self, generation: u64) -> DeviceErrorCallback {
        let tx = self.envelopes.clone();
        Arc::new(move |message| {
            let _ = tx.send(Envelope::DeviceFailed { generation, message });
        })
    }

    /// Microphone path: tap, mute gate, conditioner, resampler, codec, outbound.
    ///
    /// Runs on the device thread, so it only touches atomics, the tap and the
    /// outbound queue.
    fn open_capture(&self, conn: &Connection) -> Result<Box<dyn CaptureStream>> {
        let generation = conn.generation;
        let current = Arc::clone(&self.generation);
        let muted = Arc::clone(&self.muted);
        let outbound = Arc::clone(&conn.outbound);
        let tap = conn.taps.user.clone();
        let conditioner = self.config.conditioner;
        let target_rate = self.config.input_sample_rate;

        let on_block: CaptureCallback = Box::new(move |block: &[f32], device_rate: u32| {
            if current.load(Ordering::Acquire) != generation || device_rate == 0 {
                return;
            }
            tap.write(block);
            if muted.load(Ordering::Acquire) {
                return;
            }

            let conditioned = conditioner.condition(block);
            let samples = resampler::downsample(&conditioned, device_rate, target_rate);
            if samples.is_empty() {
                return;
            }
            let rate = device_rate.min(target_rate);
            outbound.send_audio(AudioFrame::from_float(&samples, rate, FrameRole::Capture));
        });

        self.devices
            .open_capture(on_block, self.device_error_callback(generation))
    }

    // === Inbound events ===

    fn handle_inbound(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Opened => self.on_opened(),
            InboundEvent::InputTranscript(delta) => {
                self.update_transcripts(|t| t.append_user(&delta))
            }
            InboundEvent::OutputTranscript(delta) => {
                self.update_transcripts(|t| t.append_model(&delta))
            }
            InboundEvent::TurnComplete => {
                self.state.write().transcripts.clear();
                self.updates.send(SessionUpdate::TurnComplete);
            }
            InboundEvent::Audio(data) => self.on_audio(&data),
            InboundEvent::Interrupted => self.on_interrupted(),
            InboundEvent::ToolCall(call) => self.on_tool_call(call),
            InboundEvent::TransportError(message) => {
                self.fail(VoiceError::TransportError(message))
            }
        }
    }

    fn on_opened(&mut self) {
        if self.state.status() != ConnectionStatus::Initializing {
            debug!("Ignoring open notification outside initializing");
            return;
        }

        let capture = match self.connection.as_ref() {
            Some(conn) => self.open_capture(conn),
            None => return,
        };

        // A dead microphone fails the session before anything is flushed
        let capture = match capture {
            Ok(capture) => capture,
            Err(e) => {
                self.fail(e);
                return;
            }
        };

        if let Some(conn) = self.connection.as_mut() {
            let flushed = conn.outbound.open(Arc::clone(&conn.link));
            conn.capture = Some(capture);
            self.log.info(
                "Socket",
                format!("Vocal link established, {} queued message(s) flushed", flushed),
            );
        }

        self.set_status(ConnectionStatus::Connected);
        self.start_metering();
    }

    fn start_metering(&mut self) {
        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        match Metering::start(
            conn.taps.clone(),
            self.config.fft_size,
            Duration::from_millis(self.config.meter_interval_ms),
            self.state.clone(),
            self.updates.clone(),
            self.log.clone(),
        ) {
            Ok(metering) => conn.metering = Some(metering),
            Err(e) => self.log.warn("Meter", format!("Metering disabled: {}", e)),
        }
    }

    fn update_transcripts(&self, apply: impl FnOnce(&mut Transcripts)) {
        let transcripts = {
            let mut s = self.state.write();
            apply(&mut s.transcripts);
            s.transcripts.clone()
        };
        self.updates.send(SessionUpdate::TranscriptChanged(transcripts));
    }

    fn on_audio(&mut self, data: &str) {
        let Some(conn) = self.connection.as_mut() else {
            return;
        };

        let frame = match AudioFrame::from_transport(
            data,
            self.config.output_sample_rate,
            FrameRole::Playback,
        ) {
            Ok(frame) => frame,
            Err(e) => {
                self.log.warn("Codec", format!("Dropping inbound chunk: {}", e));
                return;
            }
        };

        conn.taps.model.write(&frame.to_float());

        match conn.scheduler.enqueue(frame) {
            Ok(Some(_)) => self.set_speaking(true),
            Ok(None) => {}
            Err(e) if e.is_recoverable() => {
                self.log.warn("Codec", format!("Dropping inbound chunk: {}", e));
            }
            Err(e) => self.fail(e),
        }
    }

    fn playback_ended(&mut self, id: PlaybackId) {
        let drained = match self.connection.as_mut() {
            Some(conn) => conn.scheduler.complete(id),
            None => false,
        };
        if drained {
            self.set_speaking(false);
        }
    }

    fn on_interrupted(&mut self) {
        if let Some(conn) = self.connection.as_mut() {
            let stopped = conn.scheduler.interrupt();
            debug!(stopped, "Model interrupted");
        }
        self.set_speaking(false);
        self.log.info("Audio", "Interrupted by user speech");
    }

    fn on_tool_call(&mut self, call: ToolCall) {
        let result = tools::dispatch(&call, self.store.as_ref());
        let ok = !result.is_failure();

        if ok {
            self.log
                .info("Tools", format!("{} handled ({})", call.name, call.id));
        } else {
            self.log.warn(
                "Tools",
                format!("{} failed: {}", call.name, result.response["error"]),
            );
        }

        match &self.connection {
            Some(conn) => conn.outbound.send_tool_result(result),
            None => warn!(id = %call.id, "No connection for tool result"),
        }
        self.updates.send(SessionUpdate::ToolHandled {
            name: call.name,
            ok,
        });
    }
}
