//! Log entries and severity levels

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Ordered mapping of extra structured fields attached to an entry
pub type Context = Map<String, Value>;

/// Severity level, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Verbose,
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl LogLevel {
    /// Get the display name for this level
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Verbose => "VERBOSE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        }
    }

    /// Single-letter form used by the compact JSON format
    pub fn short(&self) -> &'static str {
        match self {
            LogLevel::Verbose => "V",
            LogLevel::Debug => "D",
            LogLevel::Info => "I",
            LogLevel::Warning => "W",
            LogLevel::Error => "E",
            LogLevel::Fatal => "F",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "verbose" | "trace" => Ok(LogLevel::Verbose),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            "fatal" => Ok(LogLevel::Fatal),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// A single recorded event
///
/// Entries are immutable once created; the logger assigns the session id and
/// the sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Timestamp when the entry was recorded
    pub timestamp: DateTime<Utc>,
    /// Severity level
    pub level: LogLevel,
    /// Short tag naming the area that produced the entry
    pub category: String,
    /// Log message
    pub message: String,
    /// Extra structured fields, in insertion order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
    /// Identifier stable for the lifetime of the process
    pub session_id: String,
    /// Per-session sequence number, strictly increasing
    pub sequence: u64,
}

impl LogEntry {
    /// Create a new entry stamped with the current time
    pub fn new(
        level: LogLevel,
        category: impl Into<String>,
        message: impl Into<String>,
        context: Option<Context>,
        session_id: impl Into<String>,
        sequence: u64,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            category: category.into(),
            message: message.into(),
            context: context.filter(|c| !c.is_empty()),
            session_id: session_id.into(),
            sequence,
        }
    }
}
