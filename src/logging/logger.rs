//! Logger handle and lifecycle
//!
//! A [`Logger`] is created by [`Logger::start`] and stays usable until
//! [`Logger::shutdown`]. Log calls only take a short lock to assign a sequence
//! number and push into the buffer; everything else happens on the scheduler
//! and writer tasks. After shutdown, log calls are silently ignored and
//! `flush` returns immediately.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use super::buffer::{LogBuffer, PushOutcome};
use super::entry::{Context, LogEntry, LogLevel};
use super::file_writer::{spawn_writer, BatchOutcome, WriterSettings};
use super::files::LogSetLock;
use super::hooks::{for_each_sink, ContextProvider, Hooks, Sink};
use super::retention::spawn_sweeper;
use super::rotation::RotationPolicy;
use super::scheduler::{FlushRequest, FlushScheduler};
use crate::config::Config;
use crate::crypto::{EncryptionKey, KeyProvider, KeySource};
use crate::error::{ConfigError, CryptoError, ExportError, PipelineError};
use crate::export::{ExportArtifact, ExportOptions, Exporter};
use crate::format::{CustomFormatFn, Formatter};
use crate::redact::{RedactionPattern, Redactor};

/// Pending flush requests; triggers beyond this are redundant anyway
const REQUEST_QUEUE: usize = 64;

/// Point-in-time counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoggerStats {
    /// Entries accepted by a log call
    pub logged: u64,
    /// Entries currently waiting in the buffer
    pub buffered: usize,
    /// Entries discarded because the buffer was full
    pub dropped: u64,
    /// Entries written to disk
    pub persisted: u64,
    pub failed_batches: u64,
    /// Entries lost with failed batches
    pub failed_entries: u64,
    pub rotations: u64,
    /// Batches persisted successfully
    pub flushes: u64,
}

#[derive(Default)]
struct Counters {
    logged: AtomicU64,
    persisted: AtomicU64,
    failed_batches: AtomicU64,
    failed_entries: AtomicU64,
    rotations: AtomicU64,
    flushes: AtomicU64,
}

/// Mutable producer-side state, confined behind one lock
struct Core {
    buffer: LogBuffer,
    next_sequence: u64,
    redactor: Redactor,
}

/// State shared between logger handles and the scheduler task
pub(crate) struct Shared {
    core: Mutex<Core>,
    formatter: Formatter,
    key: Option<KeySource>,
    rotation: RotationPolicy,
    active_path: PathBuf,
    counters: Counters,
    hooks: Hooks,
    sinks: Vec<Arc<dyn Sink>>,
    context_provider: Option<ContextProvider>,
    session_id: String,
    min_level: LogLevel,
    critical_level: LogLevel,
    disposed: AtomicBool,
}

impl Shared {
    fn lock_core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Empty the buffer into a batch, with a value copy of the writer settings
    pub(crate) fn take_batch(&self) -> Option<(Vec<LogEntry>, WriterSettings)> {
        let mut core = self.lock_core();
        if core.buffer.is_empty() {
            return None;
        }
        let entries = core.buffer.snapshot_and_clear();
        let settings = WriterSettings {
            formatter: self.formatter.clone(),
            redactor: core.redactor.clone(),
            key: self.key.clone(),
            rotation: self.rotation,
            active_path: self.active_path.clone(),
        };
        Some((entries, settings))
    }

    pub(crate) fn record_outcome(&self, outcome: BatchOutcome) {
        match outcome {
            BatchOutcome::Persisted {
                count, rotation, ..
            } => {
                self.counters
                    .persisted
                    .fetch_add(count as u64, Ordering::Relaxed);
                self.counters.flushes.fetch_add(1, Ordering::Relaxed);
                if rotation.happened() {
                    self.counters.rotations.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        rotated = rotation.rotated,
                        trimmed = rotation.trimmed_lines,
                        "Log file rotated"
                    );
                    self.hooks.rotated();
                }
                self.hooks.flushed(count);
            }
            BatchOutcome::Failed { id, count, error } => {
                self.counters.failed_batches.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .failed_entries
                    .fetch_add(count as u64, Ordering::Relaxed);
                debug!(batch = id, count, "Batch failed");
                self.hooks.error(&PipelineError::Write {
                    entries: count,
                    source: error,
                });
            }
        }
    }

    pub(crate) fn close_sinks(&self) {
        for_each_sink(&self.sinks, &self.hooks, |sink| sink.close());
    }

    /// Provider context first, explicit context on top
    fn merge_context(&self, explicit: Option<Context>) -> Option<Context> {
        let Some(provider) = &self.context_provider else {
            return explicit;
        };
        let mut merged = provider();
        if let Some(explicit) = explicit {
            merged.extend(explicit);
        }
        Some(merged)
    }
}

/// Everything needed to start a logger
///
/// The [`Config`] carries the serializable settings; key material, the custom
/// formatter and the collaborators are attached here.
#[derive(Default)]
pub struct LoggerOptions {
    config: Config,
    key: Option<KeySource>,
    custom_formatter: Option<CustomFormatFn>,
    hooks: Hooks,
    sinks: Vec<Arc<dyn Sink>>,
    context_provider: Option<ContextProvider>,
}

impl LoggerOptions {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Encrypt every line with a fixed key
    pub fn with_static_key(mut self, key: &[u8]) -> Result<Self, ConfigError> {
        let key = EncryptionKey::from_slice(key).map_err(|e| match e {
            CryptoError::InvalidKeyLength { expected, actual } => {
                ConfigError::InvalidKeyLength { expected, actual }
            }
            other => ConfigError::InvalidValue(other.to_string()),
        })?;
        self.key = Some(KeySource::Static(key));
        Ok(self)
    }

    /// Encrypt every line with a key fetched fresh for each batch
    pub fn with_key_provider(mut self, provider: impl KeyProvider + 'static) -> Self {
        self.key = Some(KeySource::Provider(Arc::new(provider)));
        self
    }

    /// Formatter used when the configured format is `custom`
    pub fn with_custom_formatter(
        mut self,
        f: impl Fn(&LogEntry) -> String + Send + Sync + 'static,
    ) -> Self {
        self.custom_formatter = Some(Arc::new(f));
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_sink(mut self, sink: impl Sink + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    pub fn with_context_provider(
        mut self,
        provider: impl Fn() -> Context + Send + Sync + 'static,
    ) -> Self {
        self.context_provider = Some(Arc::new(provider));
        self
    }
}

struct Tasks {
    scheduler: JoinHandle<()>,
    retention_stop: Option<oneshot::Sender<()>>,
    sweeper: Option<JoinHandle<()>>,
}

struct Inner {
    shared: Arc<Shared>,
    requests: mpsc::Sender<FlushRequest>,
    tasks: Mutex<Option<Tasks>>,
    log_dir: PathBuf,
    file_name: String,
}

/// Cloneable handle to a running pipeline
///
/// Dropping the last handle without calling [`Logger::shutdown`] still drains
/// the buffer in the background, but nothing waits for it.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<Inner>,
}

impl Logger {
    /// Validate the options and start the background tasks
    ///
    /// Must be called from within a tokio runtime. On a current-thread runtime
    /// the background tasks only run when the caller yields, so entries logged
    /// back to back share one batch and a full buffer drops its oldest entry.
    /// On a multi-thread runtime the scheduler may drain the buffer between two
    /// log calls; batch boundaries then vary, but every accepted entry is still
    /// either persisted, dropped or counted as failed.
    pub fn start(options: LoggerOptions) -> Result<Self, ConfigError> {
        Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;

        let LoggerOptions {
            config,
            key,
            custom_formatter,
            hooks,
            sinks,
            context_provider,
        } = options;

        config.validate()?;
        let formatter = Formatter::from_kind(config.format, custom_formatter)?;
        let redactor = Redactor::from_config(&config.redaction.presets, &config.redaction.custom)?;
        fs::create_dir_all(&config.log_dir).map_err(|source| ConfigError::LogDirectory {
            path: config.log_dir.clone(),
            source,
        })?;

        let session_id = Uuid::new_v4().to_string();
        let active_path = config.active_log_path();

        let shared = Arc::new(Shared {
            core: Mutex::new(Core {
                buffer: LogBuffer::new(config.buffer_size),
                next_sequence: 1,
                redactor,
            }),
            formatter,
            key,
            rotation: config.rotation,
            active_path: active_path.clone(),
            counters: Counters::default(),
            hooks: hooks.clone(),
            sinks,
            context_provider,
            session_id: session_id.clone(),
            min_level: config.min_level,
            critical_level: config.critical_level,
            disposed: AtomicBool::new(false),
        });

        let (batch_tx, batch_rx) = mpsc::channel(1);
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE);
        let files_lock: LogSetLock = Arc::new(Mutex::new(()));

        let writer = spawn_writer(batch_rx, outcome_tx, Arc::clone(&files_lock));
        let scheduler = FlushScheduler::new(Arc::clone(&shared), batch_tx, outcome_rx);
        let scheduler = tokio::spawn(scheduler.run(request_rx, config.flush_interval(), writer));

        let (retention_stop, sweeper) = match config.retention {
            Some(policy) => {
                let (stop_tx, stop_rx) = oneshot::channel();
                let handle = spawn_sweeper(
                    config.log_dir.clone(),
                    config.file_name.clone(),
                    active_path,
                    policy,
                    hooks,
                    files_lock,
                    stop_rx,
                );
                (Some(stop_tx), Some(handle))
            }
            None => (None, None),
        };

        info!(
            session = %session_id,
            dir = %config.log_dir.display(),
            format = ?config.format,
            "Logger started"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                shared,
                requests: request_tx,
                tasks: Mutex::new(Some(Tasks {
                    scheduler,
                    retention_stop,
                    sweeper,
                })),
                log_dir: config.log_dir,
                file_name: config.file_name,
            }),
        })
    }

    /// Record an entry
    pub fn log(&self, level: LogLevel, category: &str, message: impl Into<String>) {
        self.log_with_context(level, category, message, None);
    }

    /// Record an entry with structured context
    ///
    /// Never blocks on I/O and never fails. Entries below the minimum level are
    /// discarded before a sequence number is assigned.
    pub fn log_with_context(
        &self,
        level: LogLevel,
        category: &str,
        message: impl Into<String>,
        context: Option<Context>,
    ) {
        let shared = &self.inner.shared;
        if shared.disposed.load(Ordering::Acquire) || level < shared.min_level {
            return;
        }

        let context = shared.merge_context(context);
        let (entry, trigger) = {
            let mut core = shared.lock_core();
            let sequence = core.next_sequence;
            core.next_sequence += 1;
            let entry = LogEntry::new(
                level,
                category,
                message,
                context,
                shared.session_id.as_str(),
                sequence,
            );
            let outcome = core.buffer.push(entry.clone());
            let trigger = core.buffer.is_full() || level >= shared.critical_level;
            if outcome == PushOutcome::DroppedOldest {
                debug!(sequence, "Log buffer full, dropped oldest entry");
            }
            (entry, trigger)
        };
        shared.counters.logged.fetch_add(1, Ordering::Relaxed);

        if trigger {
            // A full queue already holds a request that will take this entry
            let _ = self
                .inner
                .requests
                .try_send(FlushRequest::Flush { done: None });
        }

        shared.hooks.logged(&entry);
        for_each_sink(&shared.sinks, &shared.hooks, |sink| sink.write(&entry));
    }

    pub fn verbose(&self, category: &str, message: impl Into<String>) {
        self.log(LogLevel::Verbose, category, message);
    }

    pub fn debug(&self, category: &str, message: impl Into<String>) {
        self.log(LogLevel::Debug, category, message);
    }

    pub fn info(&self, category: &str, message: impl Into<String>) {
        self.log(LogLevel::Info, category, message);
    }

    pub fn warning(&self, category: &str, message: impl Into<String>) {
        self.log(LogLevel::Warning, category, message);
    }

    pub fn error(&self, category: &str, message: impl Into<String>) {
        self.log(LogLevel::Error, category, message);
    }

    pub fn fatal(&self, category: &str, message: impl Into<String>) {
        self.log(LogLevel::Fatal, category, message);
    }

    /// Append a redaction pattern; it applies from the next batch on
    pub fn add_redaction_pattern(
        &self,
        name: &str,
        pattern: &str,
        replacement: &str,
    ) -> Result<(), ConfigError> {
        let pattern = RedactionPattern::new(name, pattern, replacement)?;
        self.inner.shared.lock_core().redactor.push(pattern);
        Ok(())
    }

    /// Persist everything buffered so far
    ///
    /// Resolves once the batch carrying those entries has been written or has
    /// failed. Failures are reported through hooks and stats, not here.
    pub async fn flush(&self) {
        if self.is_disposed() {
            return;
        }
        let (done_tx, done_rx) = oneshot::channel();
        let request = FlushRequest::Flush {
            done: Some(done_tx),
        };
        if self.inner.requests.send(request).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Drain the buffer, wait for in-flight work, close sinks and stop timers
    ///
    /// Only the first call does anything.
    pub async fn shutdown(&self) {
        let shared = &self.inner.shared;
        if shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let (done_tx, done_rx) = oneshot::channel();
        if self
            .inner
            .requests
            .send(FlushRequest::Shutdown { done: done_tx })
            .await
            .is_ok()
        {
            let _ = done_rx.await;
        }

        let tasks = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tasks) = tasks {
            drop(tasks.retention_stop);
            if let Some(sweeper) = tasks.sweeper {
                let _ = sweeper.await;
            }
            let _ = tasks.scheduler.await;
        }

        let stats = self.stats();
        info!(
            session = %shared.session_id,
            persisted = stats.persisted,
            dropped = stats.dropped,
            failed = stats.failed_entries,
            "Logger shut down"
        );
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.shared.disposed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> LoggerStats {
        let shared = &self.inner.shared;
        let (buffered, dropped) = {
            let core = shared.lock_core();
            (core.buffer.len(), core.buffer.dropped())
        };
        let c = &shared.counters;
        LoggerStats {
            logged: c.logged.load(Ordering::Relaxed),
            buffered,
            dropped,
            persisted: c.persisted.load(Ordering::Relaxed),
            failed_batches: c.failed_batches.load(Ordering::Relaxed),
            failed_entries: c.failed_entries.load(Ordering::Relaxed),
            rotations: c.rotations.load(Ordering::Relaxed),
            flushes: c.flushes.load(Ordering::Relaxed),
        }
    }

    /// Identifier stamped on every entry of this logger
    pub fn session_id(&self) -> &str {
        &self.inner.shared.session_id
    }

    pub fn log_dir(&self) -> &Path {
        &self.inner.log_dir
    }

    pub fn active_log_path(&self) -> &Path {
        &self.inner.shared.active_path
    }

    /// Bundle this logger's files into an export artifact
    ///
    /// Entries still in the buffer are not included; call [`Logger::flush`]
    /// first to capture them.
    pub fn export(&self, options: &ExportOptions) -> Result<ExportArtifact, ExportError> {
        Exporter::new(&self.inner.log_dir, &self.inner.file_name)
            .with_session_id(self.session_id())
            .export(options)
    }
}
