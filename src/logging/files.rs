//! Discovery of the log files that belong to one active file name
//!
//! A log set is the active file (`app.log`) plus its numbered backups
//! (`app.log.1`, `app.log.2`, ...). Temp files and exports are never included.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

/// Held while the log set is appended to, rotated or swept
pub(crate) type LogSetLock = Arc<Mutex<()>>;

/// One file of a log set
#[derive(Debug, Clone)]
pub struct LogFile {
    pub path: PathBuf,
    pub modified: SystemTime,
    pub size: u64,
    /// 0 for the active file, N for backup `.N`
    pub index: usize,
}

/// Position of `name` in the log set of `file_name`, if it belongs to it
pub fn backup_index(name: &str, file_name: &str) -> Option<usize> {
    match name.strip_prefix(file_name)? {
        "" => Some(0),
        rest => {
            let digits = rest.strip_prefix('.')?;
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            digits.parse().ok()
        }
    }
}

/// Check whether `name` is `file_name` or one of its numbered backups
pub fn is_log_file(name: &str, file_name: &str) -> bool {
    backup_index(name, file_name).is_some()
}

/// List the log set in `dir`, oldest modification first
pub fn list_log_files(dir: &Path, file_name: &str) -> io::Result<Vec<LogFile>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(index) = backup_index(name, file_name) else {
            continue;
        };

        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        files.push(LogFile {
            path,
            modified: metadata.modified()?,
            size: metadata.len(),
            index,
        });
    }

    // Equal timestamps: higher backup index is older
    files.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| b.index.cmp(&a.index)));
    Ok(files)
}

/// Read the next line as raw bytes, without its terminator
///
/// Returns `None` at end of file. Lines need not be valid UTF-8.
pub fn next_raw_line<R: BufRead>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line)? == 0 {
        return Ok(None);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
    Ok(Some(line))
}

/// Count non-blank lines, one per persisted entry
pub fn count_entries(path: &Path) -> io::Result<usize> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut count = 0;
    while let Some(line) = next_raw_line(&mut reader)? {
        if !String::from_utf8_lossy(&line).trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use tempfile::TempDir;

    #[test]
    fn test_is_log_file() {
        assert!(is_log_file("app.log", "app.log"));
        assert!(is_log_file("app.log.1", "app.log"));
        assert!(is_log_file("app.log.12", "app.log"));
        assert!(!is_log_file("app.log.", "app.log"));
        assert!(!is_log_file("app.log.tmp", "app.log"));
        assert!(!is_log_file("app.trim.tmp", "app.log"));
        assert!(!is_log_file("other.log", "app.log"));
        assert!(!is_log_file("app-export-2026.log.gz", "app.log"));
        assert_eq!(backup_index("app.log", "app.log"), Some(0));
        assert_eq!(backup_index("app.log.10", "app.log"), Some(10));
    }

    #[test]
    fn test_equal_mtimes_order_by_backup_index() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        for name in ["app.log", "app.log.1", "app.log.2", "app.log.9", "app.log.10"] {
            let path = dir.join(name);
            fs::write(&path, "line\n").unwrap();
            set_file_mtime(&path, FileTime::from_unix_time(1_700_000_000, 0)).unwrap();
        }

        let files = list_log_files(dir, "app.log").unwrap();
        let indexes: Vec<usize> = files.iter().map(|f| f.index).collect();
        assert_eq!(indexes, vec![10, 9, 2, 1, 0]);
    }

    #[test]
    fn test_list_orders_oldest_first() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        for (name, age) in [("app.log", 0), ("app.log.1", 100), ("app.log.2", 200)] {
            let path = dir.join(name);
            fs::write(&path, "line\n").unwrap();
            set_file_mtime(&path, FileTime::from_unix_time(1_700_000_000 - age, 0)).unwrap();
        }
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let files = list_log_files(dir, "app.log").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["app.log.2", "app.log.1", "app.log"]);
        assert_eq!(files[0].size, 5);
    }

    #[test]
    fn test_count_entries_skips_blank_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.log");
        fs::write(&path, "one\n\ntwo\n   \nthree\n").unwrap();
        assert_eq!(count_entries(&path).unwrap(), 3);
    }

    #[test]
    fn test_count_entries_tolerates_invalid_utf8() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.log");
        fs::write(&path, b"one\n\xff\xfe broken\r\nthree").unwrap();
        assert_eq!(count_entries(&path).unwrap(), 3);
    }
}
