//! In-process stand-ins for the audio devices, the remote service and the
//! memory store.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thursday::audio::{
    AudioDevices, CaptureCallback, CaptureStream, CompletionCallback, DeviceErrorCallback,
    OutputSink, PlaybackId,
};
use thursday::memory::{MemoryNode, MemorySource, MemoryStore};
use thursday::transport::{
    InboundEvent, InboundHandler, SessionSetup, ToolResult, Transport, TransportLink, WireMessage,
};
use thursday::VoiceError;

pub const PLAYBACK_RATE: u32 = 24000;

/// Poll `condition` until it holds or two seconds pass
pub fn wait_for(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

// === Audio devices ===

#[derive(Default)]
struct DeviceInner {
    capture_rate: u32,
    refuse_capture: bool,
    on_block: Option<CaptureCallback>,
    on_capture_error: Option<DeviceErrorCallback>,
    captures_opened: usize,
    captures_live: usize,
    max_captures_live: usize,

    now: u64,
    on_complete: Option<CompletionCallback>,
    on_output_error: Option<DeviceErrorCallback>,
    outputs_opened: usize,
    outputs_closed: usize,
    voices: Vec<(PlaybackId, u64, u64)>,
    scheduled: Vec<(PlaybackId, u64, usize)>,
    stopped: Vec<PlaybackId>,
}

/// Microphone and speaker with a hand-driven clock
#[derive(Clone)]
pub struct FakeDevices {
    inner: Arc<Mutex<DeviceInner>>,
}

impl FakeDevices {
    pub fn new(capture_rate: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DeviceInner {
                capture_rate,
                ..Default::default()
            })),
        }
    }

    /// Deliver one capture block; false when no capture is running
    pub fn feed(&self, block: &[f32]) -> bool {
        let mut inner = self.inner.lock();
        let rate = inner.capture_rate;
        match inner.on_block.as_mut() {
            Some(on_block) => {
                on_block(block, rate);
                true
            }
            None => false,
        }
    }

    /// Move the output clock forward and report buffers that played out
    pub fn advance(&self, frames: u64) {
        let (ended, on_complete) = {
            let mut inner = self.inner.lock();
            inner.now += frames;
            let now = inner.now;
            let ended: Vec<PlaybackId> = inner
                .voices
                .iter()
                .filter(|(_, _, end)| *end <= now)
                .map(|(id, _, _)| *id)
                .collect();
            inner.voices.retain(|(_, _, end)| *end > now);
            (ended, inner.on_complete.clone())
        };
        if let Some(on_complete) = on_complete {
            for id in ended {
                on_complete(id);
            }
        }
    }

    /// Make every later microphone open fail
    pub fn refuse_capture(&self) {
        self.inner.lock().refuse_capture = true;
    }

    pub fn fail_output(&self, message: &str) {
        let on_error = self.inner.lock().on_output_error.clone();
        if let Some(on_error) = on_error {
            on_error(message.to_string());
        }
    }

    pub fn now(&self) -> u64 {
        self.inner.lock().now
    }

    pub fn scheduled(&self) -> Vec<(PlaybackId, u64, usize)> {
        self.inner.lock().scheduled.clone()
    }

    pub fn stopped(&self) -> Vec<PlaybackId> {
        self.inner.lock().stopped.clone()
    }

    pub fn audible(&self) -> usize {
        self.inner.lock().voices.len()
    }

    pub fn captures_opened(&self) -> usize {
        self.inner.lock().captures_opened
    }

    pub fn captures_live(&self) -> usize {
        self.inner.lock().captures_live
    }

    pub fn max_captures_live(&self) -> usize {
        self.inner.lock().max_captures_live
    }

    pub fn outputs_opened(&self) -> usize {
        self.inner.lock().outputs_opened
    }

    pub fn outputs_closed(&self) -> usize {
        self.inner.lock().outputs_closed
    }
}

struct FakeCapture {
    inner: Arc<Mutex<DeviceInner>>,
    running: bool,
}

impl CaptureStream for FakeCapture {
    fn sample_rate(&self) -> u32 {
        self.inner.lock().capture_rate
    }

    fn stop(&mut self) {
        if self.running {
            self.running = false;
            let mut inner = self.inner.lock();
            inner.on_block = None;
            inner.captures_live -= 1;
        }
    }
}

impl Drop for FakeCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

struct FakeSink {
    inner: Arc<Mutex<DeviceInner>>,
    closed: bool,
}

impl OutputSink for FakeSink {
    fn sample_rate(&self) -> u32 {
        PLAYBACK_RATE
    }

    fn now(&self) -> u64 {
        self.inner.lock().now
    }

    fn schedule(&mut self, id: PlaybackId, samples: Vec<f32>, start: u64) -> thursday::Result<()> {
        if self.closed {
            return Err(VoiceError::DeviceError("closed".into()));
        }
        let mut inner = self.inner.lock();
        inner.voices.push((id, start, start + samples.len() as u64));
        inner.scheduled.push((id, start, samples.len()));
        Ok(())
    }

    fn stop(&mut self, id: PlaybackId) {
        let mut inner = self.inner.lock();
        inner.voices.retain(|(v, _, _)| *v != id);
        inner.stopped.push(id);
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let mut inner = self.inner.lock();
            inner.voices.clear();
            inner.outputs_closed += 1;
        }
    }
}

impl AudioDevices for FakeDevices {
    fn open_capture(
        &self,
        on_block: CaptureCallback,
        on_error: DeviceErrorCallback,
    ) -> thursday::Result<Box<dyn CaptureStream>> {
        let mut inner = self.inner.lock();
        if inner.refuse_capture {
            return Err(VoiceError::DeviceError("microphone busy".into()));
        }
        inner.on_block = Some(on_block);
        inner.on_capture_error = Some(on_error);
        inner.captures_opened += 1;
        inner.captures_live += 1;
        inner.max_captures_live = inner.max_captures_live.max(inner.captures_live);
        Ok(Box::new(FakeCapture {
            inner: Arc::clone(&self.inner),
            running: true,
        }))
    }

    fn open_output(
        &self,
        _sample_rate: u32,
        on_complete: CompletionCallback,
        on_error: DeviceErrorCallback,
    ) -> thursday::Result<Box<dyn OutputSink>> {
        let mut inner = self.inner.lock();
        inner.on_complete = Some(on_complete);
        inner.on_output_error = Some(on_error);
        inner.outputs_opened += 1;
        Ok(Box::new(FakeSink {
            inner: Arc::clone(&self.inner),
            closed: false,
        }))
    }
}

// === Remote service ===

/// What a link was asked to send, reduced to comparable values
#[derive(Clone, Debug, PartialEq)]
pub enum Sent {
    Audio { rate: u32, samples: Vec<i16> },
    Text(String),
    ToolResult(ToolResult),
}

#[derive(Default)]
struct TransportInner {
    setups: Vec<SessionSetup>,
    handlers: Vec<InboundHandler>,
    sent: Vec<(usize, Sent)>,
    closed: Vec<usize>,
    refuse: bool,
}

#[derive(Clone, Default)]
pub struct FakeTransport {
    inner: Arc<Mutex<TransportInner>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_connections(&self) {
        self.inner.lock().refuse = true;
    }

    /// Deliver an event on the newest link
    pub fn emit(&self, event: InboundEvent) {
        let handler = self.inner.lock().handlers.last().cloned();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    /// Deliver an event on a specific (possibly closed) link
    pub fn emit_on(&self, link: usize, event: InboundEvent) {
        let handler = self.inner.lock().handlers.get(link).cloned();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    pub fn connects(&self) -> usize {
        self.inner.lock().handlers.len()
    }

    pub fn setups(&self) -> Vec<SessionSetup> {
        self.inner.lock().setups.clone()
    }

    /// Everything sent on any link, in order
    pub fn sent(&self) -> Vec<Sent> {
        self.inner.lock().sent.iter().map(|(_, s)| s.clone()).collect()
    }

    pub fn sent_on(&self, link: usize) -> Vec<Sent> {
        self.inner
            .lock()
            .sent
            .iter()
            .filter(|(l, _)| *l == link)
            .map(|(_, s)| s.clone())
            .collect()
    }

    pub fn tool_results(&self) -> Vec<ToolResult> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::ToolResult(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn audio_sent(&self) -> Vec<(u32, usize)> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Audio { rate, samples } => Some((rate, samples.len())),
                _ => None,
            })
            .collect()
    }

    /// Decoded PCM of every outbound audio frame
    pub fn audio_samples(&self) -> Vec<Vec<i16>> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Audio { samples, .. } => Some(samples),
                _ => None,
            })
            .collect()
    }

    pub fn closed_links(&self) -> Vec<usize> {
        self.inner.lock().closed.clone()
    }
}

struct FakeLink {
    index: usize,
    inner: Arc<Mutex<TransportInner>>,
}

impl TransportLink for FakeLink {
    fn send(&self, message: WireMessage) -> thursday::Result<()> {
        let sent = match message {
            WireMessage::Audio(frame) => Sent::Audio {
                rate: frame.sample_rate(),
                samples: frame.samples().to_vec(),
            },
            WireMessage::Text(text) => Sent::Text(text),
            WireMessage::ToolResult(result) => Sent::ToolResult(result),
        };
        self.inner.lock().sent.push((self.index, sent));
        Ok(())
    }

    fn close(&self) {
        self.inner.lock().closed.push(self.index);
    }
}

impl Transport for FakeTransport {
    fn connect(
        &self,
        setup: SessionSetup,
        inbound: InboundHandler,
    ) -> thursday::Result<Arc<dyn TransportLink>> {
        let mut inner = self.inner.lock();
        if inner.refuse {
            return Err(VoiceError::TransportError("connection refused".into()));
        }
        let index = inner.handlers.len();
        inner.setups.push(setup);
        inner.handlers.push(inbound);
        Ok(Arc::new(FakeLink {
            index,
            inner: Arc::clone(&self.inner),
        }))
    }
}

// === Memory store ===

#[derive(Clone, Default)]
pub struct FakeStore {
    added: Arc<Mutex<Vec<(String, String, String)>>>,
    failing: Arc<Mutex<bool>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self) {
        *self.failing.lock() = true;
    }

    pub fn added(&self) -> Vec<(String, String, String)> {
        self.added.lock().clone()
    }
}

impl MemoryStore for FakeStore {
    fn add_memory(&self, entity: &str, relation: &str, value: &str) -> anyhow::Result<MemoryNode> {
        self.added
            .lock()
            .push((entity.to_string(), relation.to_string(), value.to_string()));
        if *self.failing.lock() {
            anyhow::bail!("storage unavailable");
        }
        Ok(MemoryNode::new(entity, relation, value, MemorySource::Inference))
    }

    fn retrieve_context(&self, _query: &str) -> anyhow::Result<String> {
        Ok(String::new())
    }
}
