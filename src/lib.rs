pub mod audio;
pub mod memory;
pub mod session;
pub mod transport;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum VoiceError {
    #[error("Audio device error: {0}")]
    DeviceError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Tool dispatch error: {0}")]
    ToolDispatchError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl From<std::io::Error> for VoiceError {
    fn from(e: std::io::Error) -> Self {
        VoiceError::DeviceError(e.to_string())
    }
}

impl From<base64::DecodeError> for VoiceError {
    fn from(e: base64::DecodeError) -> Self {
        VoiceError::DecodeError(e.to_string())
    }
}

impl From<serde_json::Error> for VoiceError {
    fn from(e: serde_json::Error) -> Self {
        VoiceError::DecodeError(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for VoiceError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        VoiceError::TransportError(e.to_string())
    }
}

impl VoiceError {
    /// Check if this error is recoverable
    ///
    /// Recoverable errors leave the session running; the rest move it to `error`.
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Microphone or speakers gone, needs the user
            VoiceError::DeviceError(_) => false,
            VoiceError::TransportError(_) => false,
            // A single bad chunk is dropped
            VoiceError::DecodeError(_) => true,
            // A failure result is still sent for the call
            VoiceError::ToolDispatchError(_) => true,
            VoiceError::ConfigError(_) => false,
            VoiceError::ChannelError(_) => false,
        }
    }

    /// Get a user-friendly description
    pub fn user_message(&self) -> String {
        match self {
            VoiceError::DeviceError(_) => {
                "Audio device error. Please check your microphone/speakers.".to_string()
            }
            VoiceError::TransportError(_) => {
                "Vocal link lost. Reconnect to continue.".to_string()
            }
            VoiceError::DecodeError(_) => "Received malformed audio.".to_string(),
            VoiceError::ToolDispatchError(_) => "Memory update failed.".to_string(),
            VoiceError::ConfigError(msg) => format!("Configuration error: {}", msg),
            VoiceError::ChannelError(_) => {
                "Internal communication error. Please restart the application.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, VoiceError>;
