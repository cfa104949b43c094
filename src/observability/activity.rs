//! Append-only, capped activity log shown to the user.
//!
//! Purely observational: nothing in the pipeline reads it back for control
//! flow. Every entry is mirrored to `tracing`.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug)]
pub struct ActivityLog {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ActivityLog {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    fn entries_mut(&self) -> MutexGuard<'_, VecDeque<LogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Debug => tracing::debug!(target: "picto_studio::activity", "{message}"),
            Severity::Info => tracing::info!(target: "picto_studio::activity", "{message}"),
            Severity::Warn => tracing::warn!(target: "picto_studio::activity", "{message}"),
            Severity::Error => tracing::error!(target: "picto_studio::activity", "{message}"),
        }

        let mut entries = self.entries_mut();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(LogEntry {
            timestamp: Utc::now(),
            severity,
            message,
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(Severity::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.record(Severity::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record(Severity::Error, message);
    }

    /// Oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries_mut().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries_mut().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries_mut().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
