//! Bounded in-memory log ring.
//!
//! The link keeps its own structured record of protocol activity -- frames,
//! state changes, failures -- separate from process logging, so a UI (or the
//! CLI) can show and export recent history without scraping log files. The
//! ring is append-only with FIFO eviction at a fixed cap.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

/// Severity of one recorded entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// One recorded event.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub id: u64,
    pub level: LogLevel,
    pub source: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Export rendering for [`LogRecorder::export`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
    Csv,
}

/// Append-only ring of [`LogEntry`] values with FIFO eviction.
#[derive(Debug)]
pub struct LogRecorder {
    entries: VecDeque<LogEntry>,
    cap: usize,
    next_id: u64,
}

pub const DEFAULT_LOG_CAP: usize = 1000;

impl LogRecorder {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(cap.min(256)),
            cap: cap.max(1),
            next_id: 1,
        }
    }

    /// Append an entry, evicting the oldest past the cap. Returns a copy of
    /// the stored entry for broadcasting.
    pub fn record(&mut self, level: LogLevel, source: &str, message: impl Into<String>) -> LogEntry {
        let entry = LogEntry {
            id: self.next_id,
            level,
            source: source.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
        };
        self.next_id += 1;
        self.entries.push_back(entry.clone());
        while self.entries.len() > self.cap {
            self.entries.pop_front();
        }
        entry
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<LogEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// Render the current ring contents. Pure formatting; the ring is not
    /// mutated.
    pub fn export(&self, format: LogFormat) -> String {
        match format {
            LogFormat::Text => self
                .entries
                .iter()
                .map(|e| {
                    format!(
                        "{} [{}] {}: {}",
                        e.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                        e.level,
                        e.source,
                        e.message
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
            LogFormat::Json => {
                let all: Vec<&LogEntry> = self.entries.iter().collect();
                serde_json::to_string_pretty(&all).unwrap_or_else(|_| "[]".to_string())
            }
            LogFormat::Csv => {
                let mut out = String::from("id,timestamp,level,source,message\n");
                for e in &self.entries {
                    out.push_str(&format!(
                        "{},{},{},{},{}\n",
                        e.id,
                        csv_quote(&e.timestamp.to_rfc3339()),
                        csv_quote(&e.level.to_string()),
                        csv_quote(&e.source),
                        csv_quote(&e.message),
                    ));
                }
                out
            }
        }
    }
}

/// Quote a CSV field, doubling embedded quotes.
fn csv_quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}
