//! Capped in-memory diagnostic log, newest entry first

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => f.pad("DEBUG"),
            LogLevel::Info => f.pad("INFO"),
            LogLevel::Warn => f.pad("WARN"),
            LogLevel::Error => f.pad("ERROR"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub module: String,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {:<5} {}: {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.level,
            self.module,
            self.message
        )
    }
}

/// Shared handle; clones append to the same ring
#[derive(Clone)]
pub struct DiagnosticLog {
    entries: Arc<RwLock<VecDeque<LogEntry>>>,
    capacity: usize,
}

impl DiagnosticLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Record an entry and mirror it to tracing
    pub fn log(&self, level: LogLevel, module: &str, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => debug!(module = %module, "{}", message),
            LogLevel::Info => info!(module = %module, "{}", message),
            LogLevel::Warn => warn!(module = %module, "{}", message),
            LogLevel::Error => error!(module = %module, "{}", message),
        }

        let entry = LogEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            level,
            module: module.to_string(),
            message,
        };

        let mut entries = self.entries.write();
        entries.push_front(entry);
        entries.truncate(self.capacity);
    }

    pub fn debug(&self, module: &str, message: impl Into<String>) {
        self.log(LogLevel::Debug, module, message);
    }

    pub fn info(&self, module: &str, message: impl Into<String>) {
        self.log(LogLevel::Info, module, message);
    }

    pub fn warn(&self, module: &str, message: impl Into<String>) {
        self.log(LogLevel::Warn, module, message);
    }

    pub fn error(&self, module: &str, message: impl Into<String>) {
        self.log(LogLevel::Error, module, message);
    }

    /// Snapshot, newest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::new(50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newest_first_and_capped() {
        let log = DiagnosticLog::new(3);
        for i in 0..5 {
            log.info("Test", format!("entry {}", i));
        }
        let entries = log.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "entry 4");
        assert_eq!(entries[2].message, "entry 2");
    }

    #[test]
    fn test_clones_share_ring() {
        let log = DiagnosticLog::default();
        let other = log.clone();
        other.error("Socket", "Vocal link lost.");
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].level, LogLevel::Error);
        assert!(log.entries()[0].to_string().contains("Socket: Vocal link lost."));
    }
}
