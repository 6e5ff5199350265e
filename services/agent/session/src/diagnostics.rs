//! Bounded agent log and mesh error list.
//!
//! Every entry is mirrored to `tracing`; the in-memory copies back the
//! operator-facing log and error queries.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tracing::{error, info};

/// Maximum number of retained log entries
pub const LOG_CAPACITY: usize = 100;

/// Maximum number of retained mesh errors
pub const ERROR_CAPACITY: usize = 100;

/// Severity of an agent log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Informational
    Info,
    /// Error
    Error,
}

/// One agent log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// RFC 3339 timestamp
    pub time: String,
    /// Severity
    #[serde(rename = "type")]
    pub level: LogLevel,
    /// Message text
    pub message: String,
}

/// One connectivity or certificate error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeshErrorEntry {
    /// RFC 3339 timestamp
    pub time: String,
    /// Message text
    pub message: String,
}

/// Shared sink for agent log entries and mesh errors
#[derive(Debug, Default)]
pub struct Diagnostics {
    log: Mutex<VecDeque<LogEntry>>,
    errors: Mutex<VecDeque<MeshErrorEntry>>,
}

impl Diagnostics {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an informational entry
    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.push(LogLevel::Info, message);
    }

    /// Record an error entry
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.push(LogLevel::Error, message);
    }

    /// Record an error entry that also lands in the mesh error list
    pub fn mesh_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.error(message.clone());

        let mut errors = lock(&self.errors);
        while errors.len() >= ERROR_CAPACITY {
            errors.pop_front();
        }
        errors.push_back(MeshErrorEntry {
            time: now(),
            message,
        });
    }

    /// Drop every recorded mesh error
    pub fn clear_errors(&self) {
        lock(&self.errors).clear();
    }

    /// Retained log entries, oldest first
    pub fn log(&self) -> Vec<LogEntry> {
        lock(&self.log).iter().cloned().collect()
    }

    /// Retained mesh errors, oldest first
    pub fn errors(&self) -> Vec<MeshErrorEntry> {
        lock(&self.errors).iter().cloned().collect()
    }

    fn push(&self, level: LogLevel, message: String) {
        let mut log = lock(&self.log);
        while log.len() >= LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(LogEntry {
            time: now(),
            level,
            message,
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_keeps_most_recent_entries() {
        let diagnostics = Diagnostics::new();
        for i in 0..150 {
            diagnostics.info(format!("event {}", i));
        }

        let log = diagnostics.log();
        assert_eq!(log.len(), LOG_CAPACITY);
        assert_eq!(log.first().unwrap().message, "event 50");
        assert_eq!(log.last().unwrap().message, "event 149");
    }

    #[test]
    fn test_mesh_error_is_logged_and_cleared() {
        let diagnostics = Diagnostics::new();
        diagnostics.mesh_error("Missing CA certificate");

        assert_eq!(diagnostics.errors().len(), 1);
        let log = diagnostics.log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].level, LogLevel::Error);

        diagnostics.clear_errors();
        assert!(diagnostics.errors().is_empty());
        assert_eq!(diagnostics.log().len(), 1);
    }

    #[test]
    fn test_entry_serialization() {
        let diagnostics = Diagnostics::new();
        diagnostics.error("boom");

        let value = serde_json::to_value(&diagnostics.log()[0]).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["message"], "boom");
        assert!(value["time"].as_str().unwrap().ends_with('Z'));
    }
}
