//! Execution log
//!
//! A cloneable handle passed to a graph at construction. Every clone appends
//! to the same entry list, so callers can keep one and read it back after an
//! execution pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// One timestamped log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub run_id: Option<Uuid>,
    pub node: Option<String>,
    pub level: LogLevel,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:<5}", self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"), self.level)?;
        if let Some(node) = &self.node {
            write!(f, " [{}]", node)?;
        }
        write!(f, " {}", self.message)
    }
}

/// Shared, append-only execution log
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, returning a copy of it
    pub fn record(
        &self,
        run_id: Option<Uuid>,
        node: Option<&str>,
        level: LogLevel,
        message: impl Into<String>,
    ) -> LogEntry {
        let entry = LogEntry {
            timestamp: Utc::now(),
            run_id,
            node: node.map(str::to_string),
            level,
            message: message.into(),
        };
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry.clone());
        }
        entry
    }

    /// Snapshot of every entry so far
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Entries that mention a node
    pub fn for_node(&self, node: &str) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.node.as_deref() == Some(node))
            .collect()
    }

    /// Entries from one execution pass
    pub fn for_run(&self, run_id: Uuid) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.run_id == Some(run_id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_entries() {
        let log = ExecutionLog::new();
        let handle = log.clone();
        let run = Uuid::new_v4();

        log.record(Some(run), Some("albums"), LogLevel::Info, "done");
        handle.record(None, None, LogLevel::Warn, "graph warning");

        assert_eq!(handle.len(), 2);
        assert_eq!(log.for_node("albums").len(), 1);
        assert_eq!(log.for_run(run)[0].message, "done");

        handle.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn test_entry_display() {
        let log = ExecutionLog::new();
        let entry = log.record(None, Some("tracks"), LogLevel::Error, "boom");
        let line = entry.to_string();
        assert!(line.contains("ERROR [tracks] boom"));
    }
}
