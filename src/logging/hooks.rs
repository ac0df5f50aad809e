//! Collaborator contracts: lifecycle hooks, sinks and context providers

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::warn;

use super::entry::{Context, LogEntry, LogLevel};
use crate::error::PipelineError;

pub type OnLog = Arc<dyn Fn(&LogEntry) + Send + Sync>;
pub type OnFlush = Arc<dyn Fn(usize) + Send + Sync>;
pub type OnRotate = Arc<dyn Fn() + Send + Sync>;
pub type OnError = Arc<dyn Fn(&PipelineError) + Send + Sync>;

/// Zero-argument function whose result is merged into every entry's context
pub type ContextProvider = Arc<dyn Fn() -> Context + Send + Sync>;

/// Optional callbacks fired by the pipeline
#[derive(Clone, Default)]
pub struct Hooks {
    on_log: Option<OnLog>,
    on_flush: Option<OnFlush>,
    on_rotate: Option<OnRotate>,
    on_error: Option<OnError>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called after an entry is buffered
    pub fn on_log(mut self, f: impl Fn(&LogEntry) + Send + Sync + 'static) -> Self {
        self.on_log = Some(Arc::new(f));
        self
    }

    /// Called with the entry count after a batch is persisted
    pub fn on_flush(mut self, f: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.on_flush = Some(Arc::new(f));
        self
    }

    /// Called after the active file is rotated or trimmed
    pub fn on_rotate(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_rotate = Some(Arc::new(f));
        self
    }

    /// Called for every internal failure
    pub fn on_error(mut self, f: impl Fn(&PipelineError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub(crate) fn logged(&self, entry: &LogEntry) {
        if let Some(f) = &self.on_log {
            self.guard("on_log", || f(entry));
        }
    }

    pub(crate) fn flushed(&self, count: usize) {
        if let Some(f) = &self.on_flush {
            self.guard("on_flush", || f(count));
        }
    }

    pub(crate) fn rotated(&self) {
        if let Some(f) = &self.on_rotate {
            self.guard("on_rotate", || f());
        }
    }

    pub(crate) fn error(&self, err: &PipelineError) {
        warn!(error = %err, "Logging pipeline failure");
        if let Some(f) = &self.on_error {
            // Not routed back through `error`, a panicking error hook would loop
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| f(err))) {
                warn!(message = %panic_message(payload), "on_error hook panicked");
            }
        }
    }

    /// Run a user callback; a panic is reported and swallowed
    fn guard(&self, hook: &'static str, f: impl FnOnce()) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
            self.error(&PipelineError::Hook {
                hook,
                message: panic_message(payload),
            });
        }
    }
}

/// Secondary destination that sees every buffered entry
///
/// Writes are fire-and-forget. A failing or panicking sink is reported through
/// `on_error` and does not affect other sinks or file persistence.
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    fn write(&self, entry: &LogEntry) -> anyhow::Result<()>;

    /// Called once on shutdown
    fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Forwards entries to the `tracing` facade
#[derive(Debug, Default)]
pub struct TracingSink;

impl Sink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    fn write(&self, entry: &LogEntry) -> anyhow::Result<()> {
        let category = entry.category.as_str();
        let message = entry.message.as_str();
        match entry.level {
            LogLevel::Verbose => tracing::trace!(category, seq = entry.sequence, "{}", message),
            LogLevel::Debug => tracing::debug!(category, seq = entry.sequence, "{}", message),
            LogLevel::Info => tracing::info!(category, seq = entry.sequence, "{}", message),
            LogLevel::Warning => tracing::warn!(category, seq = entry.sequence, "{}", message),
            LogLevel::Error | LogLevel::Fatal => {
                tracing::error!(category, seq = entry.sequence, level = %entry.level, "{}", message)
            }
        }
        Ok(())
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panicked".to_string())
}

/// Run `op` against each sink, isolating failures from one another
pub(crate) fn for_each_sink<F>(sinks: &[Arc<dyn Sink>], hooks: &Hooks, op: F)
where
    F: Fn(&dyn Sink) -> anyhow::Result<()>,
{
    for sink in sinks {
        let result = panic::catch_unwind(AssertUnwindSafe(|| op(sink.as_ref())));
        let message = match result {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e.to_string(),
            Err(payload) => panic_message(payload),
        };
        hooks.error(&PipelineError::Sink {
            name: sink.name().to_string(),
            message,
        });
    }
}
