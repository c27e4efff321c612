//! Session configuration
//!
//! Loaded from an optional TOML file, then overlaid from the environment.

use crate::audio::SignalConditioner;
use crate::transport::live::DEFAULT_ENDPOINT;
use crate::{Result, VoiceError};
use serde::Deserialize;
use std::fmt;
use std::path::Path;

pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";
pub const DEFAULT_GREETING: &str = "Introduce yourself and ask for my name, age, location, and bio.";

/// Prebuilt voices offered by the live service
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum VoiceName {
    Puck,
    Charon,
    Kore,
    Fenrir,
    #[default]
    Zephyr,
}

impl VoiceName {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceName::Puck => "Puck",
            VoiceName::Charon => "Charon",
            VoiceName::Kore => "Kore",
            VoiceName::Fenrir => "Fenrir",
            VoiceName::Zephyr => "Zephyr",
        }
    }
}

impl fmt::Display for VoiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub api_key: Option<String>,

    /// Websocket URL of the live service
    pub endpoint: String,

    pub model: String,

    pub voice: VoiceName,

    /// Rate the remote side expects for microphone audio
    pub input_sample_rate: u32,

    /// Rate of the audio the remote side streams back
    pub output_sample_rate: u32,

    pub conditioner: SignalConditioner,

    pub meter_interval_ms: u64,

    pub fft_size: usize,

    /// Sent once per connection to make the companion speak first
    pub greeting: String,

    pub log_capacity: usize,

    /// Capacity of the update channel handed to the UI
    pub event_queue_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: VoiceName::default(),
            input_sample_rate: 16000,
            output_sample_rate: 24000,
            conditioner: SignalConditioner::default(),
            meter_interval_ms: 30,
            fft_size: 256,
            greeting: DEFAULT_GREETING.to_string(),
            log_capacity: 50,
            event_queue_size: 256,
        }
    }
}

impl SessionConfig {
    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| VoiceError::ConfigError(format!("Invalid config: {}", e)))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            VoiceError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Fill the API key from `GEMINI_API_KEY`, then `API_KEY`, when unset
    pub fn with_env(mut self) -> Self {
        if self.api_key.as_deref().map_or(true, str::is_empty) {
            self.api_key = ["GEMINI_API_KEY", "API_KEY"]
                .iter()
                .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()));
        }
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_voice(mut self, voice: VoiceName) -> Self {
        self.voice = voice;
        self
    }

    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = greeting.into();
        self
    }

    pub fn with_meter_interval_ms(mut self, interval: u64) -> Self {
        self.meter_interval_ms = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(VoiceError::ConfigError("Neural key missing".into()));
        }
        if self.input_sample_rate == 0 || self.output_sample_rate == 0 {
            return Err(VoiceError::ConfigError("Sample rates must be greater than 0".into()));
        }
        let c = &self.conditioner;
        if !(c.clip_limit > 0.0 && c.clip_limit < 1.0) {
            return Err(VoiceError::ConfigError(format!(
                "Clip limit must be in (0, 1), got {}",
                c.clip_limit
            )));
        }
        if c.gain <= 1.0 {
            return Err(VoiceError::ConfigError(format!(
                "Gain must be greater than 1, got {}",
                c.gain
            )));
        }
        if !self.fft_size.is_power_of_two() || self.fft_size < 2 {
            return Err(VoiceError::ConfigError(format!(
                "FFT size must be a power of two, got {}",
                self.fft_size
            )));
        }
        if self.meter_interval_ms == 0 {
            return Err(VoiceError::ConfigError("Meter interval must be greater than 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.input_sample_rate, 16000);
        assert_eq!(config.output_sample_rate, 24000);
        assert_eq!(config.voice, VoiceName::Zephyr);
        assert_eq!(config.fft_size, 256);
        assert_eq!(config.log_capacity, 50);
    }

    #[test]
    fn test_missing_key_rejected() {
        let err = SessionConfig::default().validate().unwrap_err();
        assert!(err.user_message().contains("Neural key missing"));
        assert!(SessionConfig::default().with_api_key("k").validate().is_ok());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = SessionConfig::default().with_api_key("k");
        config.fft_size = 300;
        assert!(config.validate().is_err());

        let mut config = SessionConfig::default().with_api_key("k");
        config.conditioner.clip_limit = 1.0;
        assert!(config.validate().is_err());

        let mut config = SessionConfig::default().with_api_key("k");
        config.conditioner.gain = 1.0;
        assert!(config.validate().is_err());

        let mut config = SessionConfig::default().with_api_key("k");
        config.output_sample_rate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_partial() {
        let config = SessionConfig::from_toml_str(
            r#"
            api_key = "abc"
            voice = "Kore"

            [conditioner]
            gain = 2.0
            "#,
        )
        .unwrap();
        assert_eq!(config.voice, VoiceName::Kore);
        assert_eq!(config.conditioner.gain, 2.0);
        assert_eq!(config.conditioner.noise_gate, 0.002);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert!(SessionConfig::from_toml_str("voice = \"Nobody\"").is_err());
    }
}
