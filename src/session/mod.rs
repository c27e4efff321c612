//! Live voice session: lifecycle, wiring and shared state
//!
//! - [`SessionHandle`] starts the worker and exposes connect/disconnect/mute
//! - [`SharedSessionState`] is what the UI reads
//! - [`DiagnosticLog`] keeps the last few notable events for display

pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod metering;
pub mod state;
pub mod tools;

pub use config::{SessionConfig, VoiceName};
pub use diagnostics::{DiagnosticLog, LogEntry, LogLevel};
pub use engine::SessionHandle;
pub use metering::{MeterTaps, Metering};
pub use state::{
    ConnectionStatus, SessionState, SessionUpdate, SharedSessionState, Transcripts,
    UpdateSender, VolumeLevels,
};
