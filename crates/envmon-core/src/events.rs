//! Bounded event log shared by every pipeline component.
//!
//! Components receive an `Arc<EventLog>` at construction and report state
//! changes and failures through it. Each entry is mirrored to `tracing` at the
//! matching level and kept in a ring of the most recent entries, which the
//! orchestrator flushes to a JSON-lines file on maintenance ticks.

use std::collections::VecDeque;
use std::fmt;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::clock::Clock;

/// Number of entries retained by default.
pub const DEFAULT_LOG_CAPACITY: usize = 100;

/// Severity tier of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Subsystem that reported an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Component {
    Sensor,
    Storage,
    Network,
    Display,
    System,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Sensor => write!(f, "SENSOR"),
            Component::Storage => write!(f, "STORAGE"),
            Component::Network => write!(f, "NETWORK"),
            Component::Display => write!(f, "DISPLAY"),
            Component::System => write!(f, "SYSTEM"),
        }
    }
}

/// Machine-readable failure code attached to warnings and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum EventCode {
    SensorInitFailed,
    SensorReadFailed,
    SensorStatusWarning,
    SubscriptionFailed,
    StorageInitFailed,
    StorageWriteFailed,
    StorageArchiveFailed,
    NetworkConnectFailed,
    NetworkUploadFailed,
    QueueOverflow,
    TimeSyncFailed,
    ConfigLoadFailed,
}

impl EventCode {
    /// Stable string form of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCode::SensorInitFailed => "SENSOR_INIT_FAILED",
            EventCode::SensorReadFailed => "SENSOR_READ_FAILED",
            EventCode::SensorStatusWarning => "SENSOR_STATUS_WARNING",
            EventCode::SubscriptionFailed => "SUBSCRIPTION_FAILED",
            EventCode::StorageInitFailed => "STORAGE_INIT_FAILED",
            EventCode::StorageWriteFailed => "STORAGE_WRITE_FAILED",
            EventCode::StorageArchiveFailed => "STORAGE_ARCHIVE_FAILED",
            EventCode::NetworkConnectFailed => "NETWORK_CONNECT_FAILED",
            EventCode::NetworkUploadFailed => "NETWORK_UPLOAD_FAILED",
            EventCode::QueueOverflow => "QUEUE_OVERFLOW",
            EventCode::TimeSyncFailed => "TIME_SYNC_FAILED",
            EventCode::ConfigLoadFailed => "CONFIG_LOAD_FAILED",
        }
    }
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single recorded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Monotonic sequence number, starting at 1.
    pub seq: u64,
    /// Milliseconds since boot when the event was recorded.
    pub uptime_ms: u64,
    pub severity: Severity,
    pub component: Component,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<EventCode>,
    pub message: String,
}

#[derive(Debug, Default)]
struct Ring {
    entries: VecDeque<LogEntry>,
    total: u64,
    flushed_through: u64,
}

/// Bounded, thread-safe event log.
pub struct EventLog {
    clock: Arc<dyn Clock>,
    capacity: usize,
    ring: Mutex<Ring>,
}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLog")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

impl EventLog {
    /// Create a log holding [`DEFAULT_LOG_CAPACITY`] entries.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(clock, DEFAULT_LOG_CAPACITY)
    }

    /// Create a log holding at most `capacity` entries (minimum 1).
    pub fn with_capacity(clock: Arc<dyn Clock>, capacity: usize) -> Self {
        Self {
            clock,
            capacity: capacity.max(1),
            ring: Mutex::new(Ring::default()),
        }
    }

    fn ring(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an event, evicting the oldest entry when full.
    pub fn record(
        &self,
        severity: Severity,
        component: Component,
        code: Option<EventCode>,
        message: impl Into<String>,
    ) {
        let message = message.into();
        let code_str = code.map_or("", |c| c.as_str());
        match severity {
            Severity::Info => info!(component = %component, "{}", message),
            Severity::Warning => warn!(component = %component, code = code_str, "{}", message),
            Severity::Error => error!(component = %component, code = code_str, "{}", message),
            Severity::Critical => {
                error!(component = %component, code = code_str, critical = true, "{}", message)
            }
        }

        let uptime_ms = self.clock.now_ms();
        let mut ring = self.ring();
        ring.total += 1;
        let entry = LogEntry {
            seq: ring.total,
            uptime_ms,
            severity,
            component,
            code,
            message,
        };
        if ring.entries.len() >= self.capacity {
            ring.entries.pop_front();
        }
        ring.entries.push_back(entry);
    }

    /// Record an informational event.
    pub fn info(&self, component: Component, message: impl Into<String>) {
        self.record(Severity::Info, component, None, message);
    }

    /// Record a warning.
    pub fn warning(&self, component: Component, code: EventCode, message: impl Into<String>) {
        self.record(Severity::Warning, component, Some(code), message);
    }

    /// Record an error.
    pub fn error(&self, component: Component, code: EventCode, message: impl Into<String>) {
        self.record(Severity::Error, component, Some(code), message);
    }

    /// Record a critical error.
    pub fn critical(&self, component: Component, code: EventCode, message: impl Into<String>) {
        self.record(Severity::Critical, component, Some(code), message);
    }

    /// Maximum number of retained entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.ring().entries.len()
    }

    /// Returns true if nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of events recorded since creation, including evicted ones.
    pub fn total_recorded(&self) -> u64 {
        self.ring().total
    }

    /// The `count` most recent entries, newest first.
    pub fn recent(&self, count: usize) -> Vec<LogEntry> {
        self.ring().entries.iter().rev().take(count).cloned().collect()
    }

    /// The most recent entry.
    pub fn latest(&self) -> Option<LogEntry> {
        self.ring().entries.back().cloned()
    }

    /// Retained entries from one component, oldest first.
    pub fn by_component(&self, component: Component) -> Vec<LogEntry> {
        self.ring()
            .entries
            .iter()
            .filter(|e| e.component == component)
            .cloned()
            .collect()
    }

    /// Retained entries at exactly one severity, oldest first.
    pub fn by_severity(&self, severity: Severity) -> Vec<LogEntry> {
        self.ring()
            .entries
            .iter()
            .filter(|e| e.severity == severity)
            .cloned()
            .collect()
    }

    /// Number of retained entries at or above a severity.
    pub fn count_at_least(&self, severity: Severity) -> usize {
        self.ring()
            .entries
            .iter()
            .filter(|e| e.severity >= severity)
            .count()
    }

    /// Drop all retained entries. The total count is kept.
    pub fn clear(&self) {
        let mut ring = self.ring();
        ring.flushed_through = ring.total;
        ring.entries.clear();
    }

    /// Append entries not yet flushed to `path` as JSON lines.
    ///
    /// Returns the number of entries written. Entries evicted before a flush
    /// are lost from the file but still counted in [`Self::total_recorded`].
    pub fn flush_to(&self, path: &Path) -> std::io::Result<usize> {
        let mut ring = self.ring();
        let pending: Vec<&LogEntry> = ring
            .entries
            .iter()
            .filter(|e| e.seq > ring.flushed_through)
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        for entry in &pending {
            serde_json::to_writer(&mut writer, entry)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;

        let written = pending.len();
        ring.flushed_through = ring.total;
        Ok(written)
    }
}
