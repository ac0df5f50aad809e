//! Log file retention management
//!
//! Deletes aged log files oldest-first, but never lets the total number of
//! persisted entries fall below a floor, and never touches the active file.
//! The background sweep holds the log-set lock, so it never runs between a
//! rotation's renames.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::PoisonError;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::files::{count_entries, list_log_files, LogFile, LogSetLock};
use super::hooks::Hooks;
use crate::error::PipelineError;

/// Default retention period in days
pub const DEFAULT_RETENTION_DAYS: u64 = 7;

/// When aged files may be deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Files last written longer ago than this are candidates for deletion
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// Entries that must survive across all files, whatever their age
    #[serde(default = "default_min_entries")]
    pub min_entries: usize,

    /// Seconds between background sweeps
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_max_age_secs() -> u64 {
    DEFAULT_RETENTION_DAYS * 24 * 60 * 60
}

fn default_min_entries() -> usize {
    1_000
}

fn default_cleanup_interval_secs() -> u64 {
    3_600 // 1 hour
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age_secs: default_max_age_secs(),
            min_entries: default_min_entries(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl RetentionPolicy {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Result of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// Files removed, oldest first
    pub deleted: Vec<PathBuf>,
    /// Entries left across the log set
    pub remaining_entries: usize,
}

/// Run one sweep now
///
/// Returns an empty report if the directory does not exist.
pub fn sweep(
    logs_dir: &Path,
    file_name: &str,
    active: &Path,
    policy: &RetentionPolicy,
) -> io::Result<RetentionReport> {
    sweep_at(logs_dir, file_name, active, policy, SystemTime::now())
}

/// Run one sweep as if the current time were `now`
pub fn sweep_at(
    logs_dir: &Path,
    file_name: &str,
    active: &Path,
    policy: &RetentionPolicy,
    now: SystemTime,
) -> io::Result<RetentionReport> {
    if !logs_dir.exists() {
        return Ok(RetentionReport::default());
    }

    let files = list_log_files(logs_dir, file_name)?;
    remove_aged(&files, active, policy, now)
}

/// Delete aged files from a listing taken earlier
///
/// Each candidate is checked again right before removal: a file that is gone
/// is skipped, and one written since the listing ends the sweep.
fn remove_aged(
    files: &[LogFile],
    active: &Path,
    policy: &RetentionPolicy,
    now: SystemTime,
) -> io::Result<RetentionReport> {
    let cutoff = now.checked_sub(policy.max_age()).unwrap_or(SystemTime::UNIX_EPOCH);

    let counts = files
        .iter()
        .map(|f| entries_or_zero(&f.path))
        .collect::<io::Result<Vec<usize>>>()?;
    let mut remaining: usize = counts.iter().sum();
    let mut deleted = Vec::new();

    for (file, count) in files.iter().zip(counts) {
        if file.path == active {
            continue;
        }
        if file.modified >= cutoff {
            // Sorted oldest first, so nothing after this is aged either
            break;
        }
        if remaining.saturating_sub(count) < policy.min_entries {
            debug!(
                path = %file.path.display(),
                remaining,
                min_entries = policy.min_entries,
                "Retention floor reached"
            );
            break;
        }

        match fs::metadata(&file.path).and_then(|m| m.modified()) {
            Ok(modified) if modified < cutoff => {}
            Ok(_) => {
                debug!(path = %file.path.display(), "Log file changed since listing");
                break;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                remaining -= count;
                continue;
            }
            Err(e) => return Err(e),
        }

        match fs::remove_file(&file.path) {
            Ok(()) => deleted.push(file.path.clone()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        remaining -= count;
    }

    Ok(RetentionReport {
        deleted,
        remaining_entries: remaining,
    })
}

fn entries_or_zero(path: &Path) -> io::Result<usize> {
    match count_entries(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        other => other,
    }
}

/// Start the periodic sweep; it stops when `stop` fires or its sender drops
pub(crate) fn spawn_sweeper(
    logs_dir: PathBuf,
    file_name: String,
    active: PathBuf,
    policy: RetentionPolicy,
    hooks: Hooks,
    files_lock: LogSetLock,
    mut stop: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = policy.cleanup_interval().max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = ticker.tick() => {
                    let (dir, name, active) = (logs_dir.clone(), file_name.clone(), active.clone());
                    let files_lock = files_lock.clone();
                    let result = tokio::task::spawn_blocking(move || {
                        let _guard = files_lock.lock().unwrap_or_else(PoisonError::into_inner);
                        sweep(&dir, &name, &active, &policy)
                    })
                    .await
                    .unwrap_or_else(|e| Err(io::Error::other(e.to_string())));

                    match result {
                        Ok(report) if !report.deleted.is_empty() => {
                            info!("Cleaned up {} old log files", report.deleted.len());
                        }
                        Ok(_) => {}
                        Err(e) => hooks.error(&PipelineError::Retention(e)),
                    }
                }
            }
        }
        debug!("Retention sweeper stopped");
    })
}
