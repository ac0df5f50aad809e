//! Background writer for persisted batches
//!
//! Runs as its own task fed by a single-consumer queue. Each batch arrives as an
//! owned value together with a copy of the writer settings; per entry it goes
//! redact -> format -> encrypt, then the whole batch is appended to the file
//! chosen by the rotation manager. The encryptor lives for one batch only.
//!
//! Appends and rotation hold the log-set lock so a retention sweep never sees
//! the files half-renamed.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::PoisonError;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::entry::LogEntry;
use super::files::LogSetLock;
use super::rotation::{RotationManager, RotationOutcome, RotationPolicy};
use crate::crypto::{Encryptor, KeySource};
use crate::error::WriteError;
use crate::format::Formatter;
use crate::redact::Redactor;

/// Value copy of everything the writer needs for one batch
#[derive(Debug, Clone)]
pub(crate) struct WriterSettings {
    pub formatter: Formatter,
    pub redactor: Redactor,
    pub key: Option<KeySource>,
    pub rotation: RotationPolicy,
    pub active_path: PathBuf,
}

/// Ordered entries handed over from the buffer in one flush round
#[derive(Debug)]
pub(crate) struct Batch {
    pub id: u64,
    pub entries: Vec<LogEntry>,
    pub settings: WriterSettings,
}

/// What happened to a batch
#[derive(Debug)]
pub(crate) enum BatchOutcome {
    Persisted {
        id: u64,
        count: usize,
        rotation: RotationOutcome,
    },
    Failed {
        id: u64,
        count: usize,
        error: WriteError,
    },
}

/// Start the writer task
///
/// The task ends when the batch sender is dropped, after finishing whatever
/// batch it is working on.
pub(crate) fn spawn_writer(
    mut batches: mpsc::Receiver<Batch>,
    outcomes: mpsc::UnboundedSender<BatchOutcome>,
    files_lock: LogSetLock,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(batch) = batches.recv().await {
            let outcome = process(batch, &files_lock).await;
            if outcomes.send(outcome).is_err() {
                break;
            }
        }
        debug!("Background writer stopped");
    })
}

async fn process(batch: Batch, files_lock: &LogSetLock) -> BatchOutcome {
    let id = batch.id;
    let count = batch.entries.len();

    let encryptor = match &batch.settings.key {
        Some(source) => match source.resolve().await {
            Ok(key) => Some(Encryptor::new(key)),
            Err(e) => {
                return BatchOutcome::Failed {
                    id,
                    count,
                    error: e.into(),
                }
            }
        },
        None => None,
    };

    let files_lock = files_lock.clone();
    let result = tokio::task::spawn_blocking(move || {
        let _guard = files_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let result = write_batch(&batch.entries, &batch.settings, encryptor.as_ref());
        drop(encryptor);
        result
    })
    .await
    .unwrap_or_else(|e| Err(WriteError::Worker(e.to_string())));

    match result {
        Ok(rotation) => {
            debug!(batch = id, count, "Persisted batch");
            BatchOutcome::Persisted {
                id,
                count,
                rotation,
            }
        }
        Err(error) => BatchOutcome::Failed { id, count, error },
    }
}

/// Render one entry into its on-disk line
fn render(
    entry: &LogEntry,
    settings: &WriterSettings,
    encryptor: Option<&Encryptor>,
) -> Result<String, WriteError> {
    let line = settings
        .formatter
        .format(&settings.redactor.redact_entry(entry));
    match encryptor {
        Some(enc) => Ok(enc.encrypt_line(&line)?),
        None => Ok(line),
    }
}

/// Persist a batch synchronously
///
/// Every line is rendered before anything touches disk, so an encryption
/// failure leaves the file unchanged. The rotation check runs once, before the
/// single append, so a batch never spans two files.
pub(crate) fn write_batch(
    entries: &[LogEntry],
    settings: &WriterSettings,
    encryptor: Option<&Encryptor>,
) -> Result<RotationOutcome, WriteError> {
    let mut payload = String::new();
    for entry in entries {
        payload.push_str(&render(entry, settings, encryptor)?);
        payload.push('\n');
    }

    let header = match settings.formatter.header() {
        Some(header) => Some(match encryptor {
            Some(enc) => enc.encrypt_line(header)?,
            None => header.to_string(),
        }),
        None => None,
    };

    if let Some(parent) = settings.active_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let manager = RotationManager::new(
        settings.active_path.clone(),
        settings.rotation,
        header.is_some(),
    );
    let outcome = manager.prepare(payload.len() as u64)?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(manager.active_path())?;

    if let Some(header) = header {
        if file.metadata()?.len() == 0 {
            writeln!(file, "{}", header)?;
        }
    }
    file.write_all(payload.as_bytes())?;
    file.flush()?;

    Ok(outcome)
}
