//! Read-side session state
//!
//! The session worker is the only writer, except for `volume` which belongs
//! to the metering thread. Everyone else takes read locks or snapshots.

use crossbeam_channel::{Sender, TrySendError};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Connection lifecycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Initializing,
    Connected,
    /// Terminal until the user connects or disconnects again
    Error,
}

impl ConnectionStatus {
    /// A link exists or is being opened
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionStatus::Initializing | ConnectionStatus::Connected)
    }

    pub fn can_transition_to(&self, next: ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        matches!(
            (self, next),
            (Disconnected, Initializing)
                | (Initializing, Connected)
                | (Initializing, Disconnected)
                | (Connected, Disconnected)
                | (Initializing, Error)
                | (Connected, Error)
                | (Error, Initializing)
                | (Error, Disconnected)
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Initializing => write!(f, "initializing"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Error => write!(f, "error"),
        }
    }
}

/// Text of the current turn, one buffer per side
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transcripts {
    pub user: String,
    pub model: String,
}

impl Transcripts {
    pub fn append_user(&mut self, delta: &str) {
        self.user.push_str(delta);
    }

    pub fn append_model(&mut self, delta: &str) {
        self.model.push_str(delta);
    }

    pub fn clear(&mut self) {
        self.user.clear();
        self.model.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.model.is_empty()
    }
}

/// Mean spectral magnitude per side, 0..255
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VolumeLevels {
    pub user: f32,
    pub model: f32,
}

#[derive(Clone, Debug, Default)]
pub struct SessionState {
    pub status: ConnectionStatus,
    /// User-facing message for the last failure
    pub error: Option<String>,
    pub transcripts: Transcripts,
    /// True exactly while scheduled model audio remains
    pub model_speaking: bool,
    pub muted: bool,
    pub volume: VolumeLevels,
    /// Bumped on every teardown; events tagged with older values are stale
    pub generation: u64,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// Forget everything that belonged to one connection
    pub fn reset_connection(&mut self) {
        self.transcripts.clear();
        self.model_speaking = false;
        self.volume = VolumeLevels::default();
    }
}

#[derive(Clone, Default)]
pub struct SharedSessionState {
    inner: Arc<RwLock<SessionState>>,
}

impl SharedSessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, SessionState> {
        self.inner.read()
    }

    pub fn write(&self) -> parking_lot::RwLockWriteGuard<'_, SessionState> {
        self.inner.write()
    }

    /// Copy of the current state (no lock held after return)
    pub fn snapshot(&self) -> SessionState {
        self.inner.read().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.read().status
    }

    pub fn error(&self) -> Option<String> {
        self.inner.read().error.clone()
    }

    pub fn transcripts(&self) -> Transcripts {
        self.inner.read().transcripts.clone()
    }

    pub fn is_model_speaking(&self) -> bool {
        self.inner.read().model_speaking
    }

    pub fn volume(&self) -> VolumeLevels {
        self.inner.read().volume
    }
}

/// Notifications for the UI; state itself should be read from [`SharedSessionState`]
#[derive(Clone, Debug, PartialEq)]
pub enum SessionUpdate {
    StatusChanged(ConnectionStatus),
    TranscriptChanged(Transcripts),
    /// Turn finished; both transcripts were cleared
    TurnComplete,
    SpeakingChanged(bool),
    MuteChanged(bool),
    Volume(VolumeLevels),
    ToolHandled { name: String, ok: bool },
    Error(String),
}

/// Non-blocking publisher for [`SessionUpdate`]s.
///
/// A full queue drops the update; nobody listening is fine too.
#[derive(Clone)]
pub struct UpdateSender {
    tx: Sender<SessionUpdate>,
}

impl UpdateSender {
    pub fn new(tx: Sender<SessionUpdate>) -> Self {
        Self { tx }
    }

    pub fn send(&self, update: SessionUpdate) {
        match self.tx.try_send(update) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(update)) => {
                debug!("Update queue full, dropping {:?}", update);
            }
        }
    }
}
