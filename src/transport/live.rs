use crate::transport::{
    protocol, InboundEvent, InboundHandler, SessionSetup, Transport, TransportLink, WireMessage,
};
use crate::{Result, VoiceError};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Websocket client for the live conversational API.
///
/// Owns a small tokio runtime so the rest of the crate can stay on plain
/// threads and channels.
pub struct LiveTransport {
    runtime: Arc<Runtime>,
    endpoint: String,
    api_key: String,
}

impl LiveTransport {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("live-transport")
            .enable_all()
            .build()
            .map_err(|e| VoiceError::TransportError(format!("Failed to start runtime: {}", e)))?;

        Ok(Self {
            runtime: Arc::new(runtime),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }
}

impl Transport for LiveTransport {
    fn connect(&self, setup: SessionSetup, inbound: InboundHandler) -> Result<Arc<dyn TransportLink>> {
        let setup_json = protocol::encode_setup(&setup)?;
        let url = format!("{}?key={}", self.endpoint, self.api_key);
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = Arc::new(Notify::new());

        info!(model = %setup.model, voice = %setup.voice, "Opening live link");

        let task_shutdown = Arc::clone(&shutdown);
        self.runtime.spawn(async move {
            match run_link(url, setup_json, rx, task_shutdown, &inbound).await {
                Ok(()) => debug!("Live link closed"),
                Err(e) => {
                    warn!("Live link failed: {}", e);
                    inbound(InboundEvent::TransportError(e.to_string()));
                }
            }
        });

        Ok(Arc::new(LiveLink { tx, shutdown }))
    }
}

struct LiveLink {
    tx: mpsc::UnboundedSender<WireMessage>,
    shutdown: Arc<Notify>,
}

impl TransportLink for LiveLink {
    fn send(&self, message: WireMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| VoiceError::TransportError("Live link is closed".into()))
    }

    fn close(&self) {
        self.shutdown.notify_one();
    }
}

async fn run_link(
    url: String,
    setup_json: String,
    mut outbound: mpsc::UnboundedReceiver<WireMessage>,
    shutdown: Arc<Notify>,
    inbound: &InboundHandler,
) -> Result<()> {
    let (socket, _) = tokio::select! {
        connected = connect_async(url.as_str()) => connected?,
        _ = shutdown.notified() => return Ok(()),
    };
    let (mut write, mut read) = socket.split();

    write.send(Message::Text(setup_json)).await?;

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
            message = outbound.recv() => match message {
                Some(message) => {
                    let text = protocol::encode_client(&message)?;
                    write.send(Message::Text(text)).await?;
                }
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => deliver(&text, inbound),
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => deliver(text, inbound),
                    Err(_) => warn!("Dropping non-UTF-8 binary frame ({} bytes)", bytes.len()),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| format!("{} {}", f.code, f.reason))
                        .unwrap_or_else(|| "no reason".to_string());
                    return Err(VoiceError::TransportError(format!("Closed by remote: {}", reason)));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Err(VoiceError::TransportError("Stream ended".into())),
            },
        }
    }
}

fn deliver(text: &str, inbound: &InboundHandler) {
    match protocol::decode_server(text) {
        Ok(events) => {
            for event in events {
                inbound(event);
            }
        }
        Err(e) => warn!("Dropping malformed server message: {}", e),
    }
}
