//! Bidirectional streaming channel to the remote conversational service
//!
//! - [`Transport`] opens a link and pushes [`InboundEvent`]s back in arrival order
//! - [`OutboundQueue`] is the session's outbound channel; it buffers anything
//!   sent before the link is confirmed open and flushes it in order on open

pub mod live;
pub mod protocol;

pub use live::LiveTransport;

use crate::audio::AudioFrame;
use crate::Result;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// A function call requested by the remote side
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: Map<String, Value>,
}

impl ToolCall {
    /// String argument by name
    pub fn arg_str(&self, name: &str) -> Option<&str> {
        self.args.get(name).and_then(Value::as_str)
    }
}

/// The single response owed for a [`ToolCall`], correlated by id
#[derive(Clone, Debug, PartialEq)]
pub struct ToolResult {
    pub id: String,
    pub name: String,
    pub response: Value,
}

impl ToolResult {
    pub fn success(call: &ToolCall, result: impl Into<Value>) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            response: serde_json::json!({ "result": result.into() }),
        }
    }

    pub fn failure(call: &ToolCall, error: impl std::fmt::Display) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            response: serde_json::json!({ "error": error.to_string() }),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.response.get("error").is_some()
    }
}

/// Messages from this client to the remote side
#[derive(Debug)]
pub enum WireMessage {
    Audio(AudioFrame),
    Text(String),
    ToolResult(ToolResult),
}

/// Everything the remote side can tell us
#[derive(Clone, Debug, PartialEq)]
pub enum InboundEvent {
    /// Remote confirmed setup; sends may flow
    Opened,
    InputTranscript(String),
    OutputTranscript(String),
    TurnComplete,
    /// Base64 PCM at the playback rate
    Audio(String),
    /// User started talking over the model
    Interrupted,
    ToolCall(ToolCall),
    /// The link is gone; terminal for the session
    TransportError(String),
}

/// What the remote side needs to know before the first turn
#[derive(Clone, Debug, Default)]
pub struct SessionSetup {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub function_declarations: Vec<Value>,
    pub transcribe_input: bool,
    pub transcribe_output: bool,
}

pub type InboundHandler = Arc<dyn Fn(InboundEvent) + Send + Sync + 'static>;

/// An open (or opening) link. `send` must never block.
pub trait TransportLink: Send + Sync {
    fn send(&self, message: WireMessage) -> Result<()>;
    fn close(&self);
}

pub trait Transport: Send + Sync {
    /// Start opening a link.
    ///
    /// Returns as soon as the attempt is underway; `Opened` or
    /// `TransportError` arrives later through `inbound`.
    fn connect(&self, setup: SessionSetup, inbound: InboundHandler) -> Result<Arc<dyn TransportLink>>;
}

/// Fire-and-forget outbound surface used by the capture path and tool dispatch
pub trait OutboundChannel: Send + Sync {
    fn send_audio(&self, frame: AudioFrame);
    fn send_text(&self, message: &str);
    fn send_tool_result(&self, result: ToolResult);
}

enum QueueState {
    Pending(Vec<WireMessage>),
    Open(Arc<dyn TransportLink>),
    Closed,
}

pub struct OutboundQueue {
    state: Mutex<QueueState>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::Pending(Vec::new())),
        }
    }

    /// Flush buffered messages into `link` and send directly from now on.
    ///
    /// Returns how many buffered messages were flushed.
    pub fn open(&self, link: Arc<dyn TransportLink>) -> usize {
        let mut state = self.state.lock();
        let pending = match std::mem::replace(&mut *state, QueueState::Closed) {
            QueueState::Pending(pending) => pending,
            QueueState::Open(_) | QueueState::Closed => {
                warn!("Outbound queue opened twice or after close");
                return 0;
            }
        };

        let flushed = pending.len();
        for message in pending {
            if let Err(e) = link.send(message) {
                warn!("Failed to flush outbound message: {}", e);
            }
        }
        *state = QueueState::Open(link);

        if flushed > 0 {
            debug!(flushed, "Flushed queued outbound messages");
        }
        flushed
    }

    /// Drop anything still buffered and refuse further sends
    pub fn close(&self) {
        *self.state.lock() = QueueState::Closed;
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state.lock(), QueueState::Open(_))
    }

    pub fn pending_len(&self) -> usize {
        match &*self.state.lock() {
            QueueState::Pending(pending) => pending.len(),
            _ => 0,
        }
    }

    fn push(&self, message: WireMessage) {
        let mut state = self.state.lock();
        match &mut *state {
            QueueState::Pending(pending) => pending.push(message),
            QueueState::Open(link) => {
                if let Err(e) = link.send(message) {
                    debug!("Outbound send failed: {}", e);
                }
            }
            QueueState::Closed => debug!("Outbound queue closed, dropping message"),
        }
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboundChannel for OutboundQueue {
    fn send_audio(&self, frame: AudioFrame) {
        self.push(WireMessage::Audio(frame));
    }

    fn send_text(&self, message: &str) {
        self.push(WireMessage::Text(message.to_string()));
    }

    fn send_tool_result(&self, result: ToolResult) {
        self.push(WireMessage::ToolResult(result));
    }
}
