//! Bounded, shared log of credential resolution attempts.
//!
//! A [`DiagnosticLog`] is a cheap handle to one ring buffer. Construct one per
//! process (or per test), hand clones to the components that append to it, and
//! drop the last handle to dispose of it. Viewers read through [`DiagnosticLog::snapshot`].

#[cfg(feature = "tracing-layer")]
mod layer;

#[cfg(feature = "tracing-layer")]
pub use layer::DiagnosticLayer;

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One human-readable trace line.
#[derive(Clone, Debug, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    /// Component that wrote the entry, usually a credential source name.
    pub context: String,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {:<5} {}: {}",
            self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.level,
            self.context,
            self.message
        )
    }
}

struct LogBuffer {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

/// Append-only ring of [`LogEntry`] values, oldest evicted first.
#[derive(Clone)]
pub struct DiagnosticLog {
    inner: Arc<LogBuffer>,
}

impl DiagnosticLog {
    /// Create a log holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(LogBuffer {
                entries: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn append(&self, context: impl Into<String>, message: impl Into<String>) {
        self.append_with_level(LogLevel::Info, context, message);
    }

    pub fn append_with_level(
        &self,
        level: LogLevel,
        context: impl Into<String>,
        message: impl Into<String>,
    ) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            context: context.into(),
            message: message.into(),
        };

        let mut entries = self.lock();
        if entries.len() == self.inner.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Copy of the current entries in insertion order.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<LogEntry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl fmt::Debug for DiagnosticLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticLog")
            .field("capacity", &self.inner.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_append_and_snapshot_preserve_order() {
        let log = DiagnosticLog::new(8);
        log.append("environment", "first");
        log.append("managed_identity", "second");

        let entries = log.snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "first");
        assert_eq!(entries[1].context, "managed_identity");
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let log = DiagnosticLog::new(3);
        for i in 0..4 {
            log.append("source", format!("entry-{}", i));
        }

        let messages: Vec<_> = log.snapshot().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["entry-1", "entry-2", "entry-3"]);
        assert_eq!(log.len(), log.capacity());
    }

    #[test]
    fn test_clear() {
        let log = DiagnosticLog::new(4);
        log.append("source", "entry");
        log.clear();
        assert!(log.snapshot().is_empty());
        assert!(log.is_empty());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let log = DiagnosticLog::new(4);
        log.append("source", "before");
        let snapshot = log.snapshot();
        log.append("source", "after");
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let log = DiagnosticLog::new(0);
        log.append("a", "1");
        log.append("a", "2");
        assert_eq!(log.capacity(), 1);
        assert_eq!(log.snapshot()[0].message, "2");
    }

    #[test]
    fn test_concurrent_appends_respect_capacity() {
        let log = DiagnosticLog::new(50);
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = log.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        log.append(format!("thread-{}", t), format!("{}", i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(log.len(), 50);

        // Per-thread order survives interleaving.
        let entries = log.snapshot();
        for t in 0..8 {
            let context = format!("thread-{}", t);
            let seq: Vec<u32> = entries
                .iter()
                .filter(|e| e.context == context)
                .map(|e| e.message.parse().unwrap())
                .collect();
            assert!(seq.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_entry_display() {
        let log = DiagnosticLog::new(1);
        log.append_with_level(LogLevel::Warning, "azure_cli", "not installed");
        let line = log.snapshot()[0].to_string();
        assert!(line.contains("WARN"));
        assert!(line.contains("azure_cli: not installed"));
    }
}
