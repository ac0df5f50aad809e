//! File size bounding for the active log file
//!
//! Two strategies: multi-file rotation shifts numbered backups
//! (`app.log.1`, `app.log.2`, ...) and starts a fresh file; single-file
//! trimming drops the oldest lines in place through a temp-file swap.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::files::next_raw_line;

/// Default size cap for one log file (5 MiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;

/// Default number of multi-file backups
pub const DEFAULT_MAX_FILES: usize = 3;

/// How the active file is kept under its size cap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RotationPolicy {
    /// Keep up to `max_files` numbered backups next to the active file
    MultiFile { max_file_size: u64, max_files: usize },
    /// Keep one file, dropping the oldest `trim_percent`% of lines when full
    SingleFile { max_file_size: u64, trim_percent: u8 },
}

impl Default for RotationPolicy {
    fn default() -> Self {
        RotationPolicy::MultiFile {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_files: DEFAULT_MAX_FILES,
        }
    }
}

impl RotationPolicy {
    pub fn max_file_size(&self) -> u64 {
        match self {
            RotationPolicy::MultiFile { max_file_size, .. }
            | RotationPolicy::SingleFile { max_file_size, .. } => *max_file_size,
        }
    }
}

/// What [`RotationManager::prepare`] did before the append
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RotationOutcome {
    /// Active file was moved to a backup
    pub rotated: bool,
    /// Lines dropped by single-file trimming
    pub trimmed_lines: usize,
}

impl RotationOutcome {
    /// Whether anything happened that counts as a rotation event
    pub fn happened(&self) -> bool {
        self.rotated || self.trimmed_lines > 0
    }
}

/// Chooses and prepares the file the next batch is appended to
#[derive(Debug, Clone)]
pub struct RotationManager {
    active: PathBuf,
    policy: RotationPolicy,
    /// Keep the first line when trimming (CSV header)
    keep_header: bool,
}

impl RotationManager {
    pub fn new(active: PathBuf, policy: RotationPolicy, keep_header: bool) -> Self {
        Self {
            active,
            policy,
            keep_header,
        }
    }

    /// Path of the file currently receiving appends
    pub fn active_path(&self) -> &Path {
        &self.active
    }

    /// Path of backup number `index` (1 is the newest)
    pub fn backup_path(&self, index: usize) -> PathBuf {
        backup_path(&self.active, index)
    }

    /// Make room for `incoming` bytes; must run before the append it guards
    pub fn prepare(&self, incoming: u64) -> io::Result<RotationOutcome> {
        let current = current_size(&self.active)?;
        match self.policy {
            RotationPolicy::MultiFile {
                max_file_size,
                max_files,
            } => {
                if current > 0 && current + incoming > max_file_size {
                    self.rotate(max_files)?;
                    return Ok(RotationOutcome {
                        rotated: true,
                        trimmed_lines: 0,
                    });
                }
                Ok(RotationOutcome::default())
            }
            RotationPolicy::SingleFile {
                max_file_size,
                trim_percent,
            } => {
                if current > max_file_size {
                    let trimmed_lines = self.trim(trim_percent)?;
                    return Ok(RotationOutcome {
                        rotated: false,
                        trimmed_lines,
                    });
                }
                Ok(RotationOutcome::default())
            }
        }
    }

    /// Shift backups up by one and move the active file to backup 1
    fn rotate(&self, max_files: usize) -> io::Result<()> {
        if max_files == 0 {
            debug!(path = %self.active.display(), "Rotating without backups");
            return remove_if_exists(&self.active);
        }

        remove_if_exists(&self.backup_path(max_files))?;
        for index in (1..max_files).rev() {
            let from = self.backup_path(index);
            if from.exists() {
                fs::rename(&from, self.backup_path(index + 1))?;
            }
        }
        fs::rename(&self.active, self.backup_path(1))?;

        debug!(path = %self.active.display(), max_files, "Rotated log file");
        Ok(())
    }

    /// Drop the oldest `percent`% of lines, swapping in a rewritten copy
    fn trim(&self, percent: u8) -> io::Result<usize> {
        let mut reader = BufReader::new(File::open(&self.active)?);
        let mut lines = Vec::new();
        while let Some(line) = next_raw_line(&mut reader)? {
            lines.push(line);
        }

        let header = if self.keep_header && !lines.is_empty() {
            Some(lines.remove(0))
        } else {
            None
        };

        let percent = usize::from(percent.clamp(1, 100));
        let remove = (lines.len() * percent).div_ceil(100).min(lines.len());

        let tmp = self.active.with_extension("trim.tmp");
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            for line in header.iter().chain(&lines[remove..]) {
                out.write_all(line)?;
                out.write_all(b"\n")?;
            }
            out.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        }
        fs::rename(&tmp, &self.active)?;

        debug!(path = %self.active.display(), removed = remove, "Trimmed log file");
        Ok(remove)
    }
}

/// `app.log` -> `app.log.<index>`
pub fn backup_path(active: &Path, index: usize) -> PathBuf {
    let mut name = active.as_os_str().to_owned();
    name.push(format!(".{}", index));
    PathBuf::from(name)
}

fn current_size(path: &Path) -> io::Result<u64> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e),
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use tempfile::TempDir;

    fn append(path: &Path, lines: &[String]) {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
    }

    fn batch(tag: &str, count: usize) -> Vec<String> {
        (0..count).map(|i| format!("{}-{:04}-padding", tag, i)).collect()
    }

    fn size_of(lines: &[String]) -> u64 {
        lines.iter().map(|l| l.len() as u64 + 1).sum()
    }

    #[test]
    fn test_multi_file_keeps_at_most_max_files_backups() {
        let temp_dir = TempDir::new().unwrap();
        let active = temp_dir.path().join("app.log");
        let manager = RotationManager::new(
            active.clone(),
            RotationPolicy::MultiFile {
                max_file_size: 100,
                max_files: 2,
            },
            false,
        );

        for round in 0..10 {
            let lines = batch(&format!("r{}", round), 5);
            manager.prepare(size_of(&lines)).unwrap();
            append(&active, &lines);
        }

        assert!(active.exists());
        assert!(manager.backup_path(1).exists());
        assert!(manager.backup_path(2).exists());
        assert!(!manager.backup_path(3).exists());

        // Every surviving file holds whole, uncorrupted batches
        for path in [active.clone(), manager.backup_path(1), manager.backup_path(2)] {
            let content = fs::read_to_string(&path).unwrap();
            let lines: Vec<&str> = content.lines().collect();
            assert_eq!(lines.len() % 5, 0);
            assert!(lines.iter().all(|l| l.ends_with("-padding")));
        }

        // Newest data is in the active file, older rounds in the backups
        assert!(fs::read_to_string(&active).unwrap().starts_with("r9-"));
        assert!(fs::read_to_string(manager.backup_path(1))
            .unwrap()
            .starts_with("r8-"));
    }

    #[test]
    fn test_multi_file_does_not_rotate_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let active = temp_dir.path().join("app.log");
        let manager = RotationManager::new(
            active.clone(),
            RotationPolicy::MultiFile {
                max_file_size: 10,
                max_files: 2,
            },
            false,
        );

        let outcome = manager.prepare(1_000).unwrap();
        assert!(!outcome.happened());
        assert!(!manager.backup_path(1).exists());
    }

    #[test]
    fn test_multi_file_zero_backups_discards_active() {
        let temp_dir = TempDir::new().unwrap();
        let active = temp_dir.path().join("app.log");
        let manager = RotationManager::new(
            active.clone(),
            RotationPolicy::MultiFile {
                max_file_size: 50,
                max_files: 0,
            },
            false,
        );
        append(&active, &batch("a", 5));

        assert!(manager.prepare(10).unwrap().rotated);
        assert!(!active.exists());
        assert!(!manager.backup_path(1).exists());
    }

    #[test]
    fn test_single_file_trims_oldest_fraction() {
        let temp_dir = TempDir::new().unwrap();
        let active = temp_dir.path().join("app.log");
        let lines = batch("x", 100);
        append(&active, &lines);
        let before = fs::metadata(&active).unwrap().len();

        let manager = RotationManager::new(
            active.clone(),
            RotationPolicy::SingleFile {
                max_file_size: 500,
                trim_percent: 25,
            },
            false,
        );
        let outcome = manager.prepare(0).unwrap();

        assert_eq!(outcome.trimmed_lines, 25);
        let after = fs::metadata(&active).unwrap().len();
        assert!(after < before);

        let content = fs::read_to_string(&active).unwrap();
        let remaining: Vec<&str> = content.lines().collect();
        assert_eq!(remaining.len(), 75);
        assert_eq!(remaining[0], "x-0025-padding");
        assert!(!active.with_extension("trim.tmp").exists());
    }

    #[test]
    fn test_single_file_keeps_header() {
        let temp_dir = TempDir::new().unwrap();
        let active = temp_dir.path().join("app.csv");
        let mut lines = vec!["timestamp,level".to_string()];
        lines.extend(batch("row", 10));
        append(&active, &lines);

        let manager = RotationManager::new(
            active.clone(),
            RotationPolicy::SingleFile {
                max_file_size: 10,
                trim_percent: 50,
            },
            true,
        );
        assert_eq!(manager.prepare(0).unwrap().trimmed_lines, 5);

        let content = fs::read_to_string(&active).unwrap();
        let remaining: Vec<&str> = content.lines().collect();
        assert_eq!(remaining[0], "timestamp,level");
        assert_eq!(remaining[1], "row-0005-padding");
        assert_eq!(remaining.len(), 6);
    }

    #[test]
    fn test_single_file_trim_keeps_invalid_utf8_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let active = temp_dir.path().join("app.log");
        fs::write(&active, b"old one\nold two\nnew \xff\xfe one\nnew two\n").unwrap();

        let manager = RotationManager::new(
            active.clone(),
            RotationPolicy::SingleFile {
                max_file_size: 10,
                trim_percent: 50,
            },
            false,
        );
        assert_eq!(manager.prepare(0).unwrap().trimmed_lines, 2);
        assert_eq!(fs::read(&active).unwrap(), b"new \xff\xfe one\nnew two\n");
    }

    #[test]
    fn test_single_file_under_cap_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let active = temp_dir.path().join("app.log");
        append(&active, &batch("x", 3));

        let manager = RotationManager::new(
            active.clone(),
            RotationPolicy::SingleFile {
                max_file_size: 10_000,
                trim_percent: 50,
            },
            false,
        );
        assert_eq!(manager.prepare(10).unwrap(), RotationOutcome::default());
        assert_eq!(fs::read_to_string(&active).unwrap().lines().count(), 3);
    }

    #[test]
    fn test_backup_path_naming() {
        let path = backup_path(Path::new("/var/log/app.log"), 2);
        assert_eq!(path, PathBuf::from("/var/log/app.log.2"));
    }
}
