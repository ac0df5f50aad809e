//! Line formats for persisted entries
//!
//! Every format yields exactly one line per entry. Built-in formats escape or
//! structurally avoid raw line breaks; the custom format is caller-owned.

use std::fmt;
use std::sync::Arc;

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::logging::{Context, LogEntry};

/// Caller-supplied formatting function
pub type CustomFormatFn = Arc<dyn Fn(&LogEntry) -> String + Send + Sync>;

/// Header written once at the top of every physical CSV file
pub const CSV_HEADER: &str = "timestamp,level,category,message,context,session_id,sequence";

/// Format selector as it appears in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatKind {
    #[default]
    PlainText,
    /// Newline-delimited JSON with full key names
    Json,
    /// Newline-delimited JSON with single-letter keys
    CompactJson,
    Csv,
    Custom,
}

/// Entry-to-line formatter
#[derive(Clone)]
pub enum Formatter {
    PlainText,
    Json,
    CompactJson,
    Csv,
    Custom(CustomFormatFn),
}

impl fmt::Debug for Formatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Formatter::{:?}", self.kind())
    }
}

impl Formatter {
    /// Build a formatter; `Custom` needs the function
    pub fn from_kind(
        kind: FormatKind,
        custom: Option<CustomFormatFn>,
    ) -> Result<Self, ConfigError> {
        Ok(match kind {
            FormatKind::PlainText => Formatter::PlainText,
            FormatKind::Json => Formatter::Json,
            FormatKind::CompactJson => Formatter::CompactJson,
            FormatKind::Csv => Formatter::Csv,
            FormatKind::Custom => {
                Formatter::Custom(custom.ok_or(ConfigError::MissingCustomFormatter)?)
            }
        })
    }

    pub fn kind(&self) -> FormatKind {
        match self {
            Formatter::PlainText => FormatKind::PlainText,
            Formatter::Json => FormatKind::Json,
            Formatter::CompactJson => FormatKind::CompactJson,
            Formatter::Csv => FormatKind::Csv,
            Formatter::Custom(_) => FormatKind::Custom,
        }
    }

    /// Line that must open every new file, if any
    pub fn header(&self) -> Option<&'static str> {
        match self {
            Formatter::Csv => Some(CSV_HEADER),
            _ => None,
        }
    }

    /// Render one entry as one line, without the trailing newline
    pub fn format(&self, entry: &LogEntry) -> String {
        match self {
            Formatter::PlainText => plain_text(entry),
            // Serializing owned strings and JSON values cannot fail
            Formatter::Json => serde_json::to_string(entry).unwrap_or_default(),
            Formatter::CompactJson => {
                serde_json::to_string(&CompactLine::from(entry)).unwrap_or_default()
            }
            Formatter::Csv => csv_row(entry),
            Formatter::Custom(f) => f(entry).trim_end_matches(['\r', '\n']).to_string(),
        }
    }
}

fn timestamp(entry: &LogEntry) -> String {
    entry.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn escape_line_breaks(s: &str) -> String {
    s.replace('\r', "\\r").replace('\n', "\\n")
}

fn context_json(context: &Option<Context>) -> String {
    context
        .as_ref()
        .map(|c| serde_json::to_string(c).unwrap_or_default())
        .unwrap_or_default()
}

fn plain_text(entry: &LogEntry) -> String {
    let mut line = format!(
        "{} [{}] [{}] {}",
        timestamp(entry),
        entry.level,
        escape_line_breaks(&entry.category),
        escape_line_breaks(&entry.message)
    );
    if entry.context.is_some() {
        line.push(' ');
        line.push_str(&context_json(&entry.context));
    }
    line
}

#[derive(Serialize)]
struct CompactLine<'a> {
    t: i64,
    l: &'static str,
    c: &'a str,
    m: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    x: Option<&'a Context>,
    s: &'a str,
    n: u64,
}

impl<'a> From<&'a LogEntry> for CompactLine<'a> {
    fn from(entry: &'a LogEntry) -> Self {
        Self {
            t: entry.timestamp.timestamp_millis(),
            l: entry.level.short(),
            c: &entry.category,
            m: &entry.message,
            x: entry.context.as_ref(),
            s: &entry.session_id,
            n: entry.sequence,
        }
    }
}

/// Quote a CSV field if it holds a comma, quote or line break
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_row(entry: &LogEntry) -> String {
    [
        timestamp(entry),
        entry.level.as_str().to_string(),
        escape_line_breaks(&entry.category),
        escape_line_breaks(&entry.message),
        context_json(&entry.context),
        entry.session_id.clone(),
        entry.sequence.to_string(),
    ]
    .iter()
    .map(|field| csv_field(field))
    .collect::<Vec<_>>()
    .join(",")
}
