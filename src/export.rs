//! Export bundler
//!
//! Reads persisted log files independently of the live pipeline, decrypts what
//! it can, and packs everything into one shareable file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, warn};

use crate::crypto::{EncryptionKey, Encryptor};
use crate::error::ExportError;
use crate::logging::files::{list_log_files, LogFile};

/// Default cap on the bytes read for one export
pub const DEFAULT_MAX_EXPORT_BYTES: u64 = 50 * 1024 * 1024;

/// What to export and how
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Key used to decrypt encrypted lines; undecryptable lines pass through
    pub key: Option<EncryptionKey>,
    /// Only files modified within this trailing window
    pub since: Option<Duration>,
    /// Hard cap on the total size of the source files
    pub max_bytes: u64,
    /// Append a block describing the host and the export
    pub include_env_info: bool,
    /// Gzip the output
    pub compress: bool,
    /// Where the artifact is written (default: the system temp dir)
    pub output_dir: Option<PathBuf>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            key: None,
            since: None,
            max_bytes: DEFAULT_MAX_EXPORT_BYTES,
            include_env_info: true,
            compress: true,
            output_dir: None,
        }
    }
}

/// The produced export file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub path: PathBuf,
    /// Bytes of the uncompressed bundle
    pub original_size: u64,
    /// Bytes on disk; equal to `original_size` when not compressed
    pub compressed_size: u64,
    pub compressed: bool,
    /// Non-blank log lines across all source files
    pub entry_count: usize,
    /// Modification time of the oldest included file
    pub oldest: Option<DateTime<Utc>>,
    /// Modification time of the newest included file
    pub newest: Option<DateTime<Utc>>,
}

/// Bundles the log set of one directory
#[derive(Debug, Clone)]
pub struct Exporter {
    log_dir: PathBuf,
    file_name: String,
    session_id: Option<String>,
}

impl Exporter {
    pub fn new(log_dir: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            log_dir: log_dir.into(),
            file_name: file_name.into(),
            session_id: None,
        }
    }

    /// Session recorded in the environment block
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Build the bundle and write it to disk
    pub fn export(&self, options: &ExportOptions) -> Result<ExportArtifact, ExportError> {
        if !self.log_dir.is_dir() {
            return Err(ExportError::DirectoryNotFound(self.log_dir.clone()));
        }

        let files = self.select_files(options)?;
        if files.is_empty() {
            return Err(ExportError::NoFiles);
        }

        let encryptor = options.key.clone().map(Encryptor::new);

        let mut bundle = String::new();
        let mut entry_count = 0;
        for file in &files {
            let name = file
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            bundle.push_str(&format!("=== {} ===\n", name));

            // Invalid UTF-8 comes through as U+FFFD
            let raw = fs::read(&file.path)?;
            let content = String::from_utf8_lossy(&raw);
            for line in content.lines() {
                let line = decrypt_or_pass(line, encryptor.as_ref());
                if !line.trim().is_empty() {
                    entry_count += 1;
                }
                bundle.push_str(&line);
                bundle.push('\n');
            }
        }
        drop(encryptor);

        if options.include_env_info {
            bundle.push_str(&self.environment_block());
        }

        let oldest = files.first().map(|f| DateTime::<Utc>::from(f.modified));
        let newest = files.last().map(|f| DateTime::<Utc>::from(f.modified));

        let output_dir = options
            .output_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        fs::create_dir_all(&output_dir)?;

        let original_size = bundle.len() as u64;
        let stem = Path::new(&self.file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "log".to_string());
        let base = format!(
            "{}-export-{}",
            stem,
            Utc::now().format("%Y%m%d-%H%M%S-%3f")
        );

        let gzipped = if options.compress {
            match gzip(bundle.as_bytes()) {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!(error = %e, "Compression failed, exporting uncompressed");
                    None
                }
            }
        } else {
            None
        };

        let (path, compressed_size, compressed) = match gzipped {
            Some(data) => {
                let path = output_dir.join(format!("{}.log.gz", base));
                fs::write(&path, &data)?;
                (path, data.len() as u64, true)
            }
            None => {
                let path = output_dir.join(format!("{}.log", base));
                fs::write(&path, bundle.as_bytes())?;
                (path, original_size, false)
            }
        };

        debug!(
            path = %path.display(),
            files = files.len(),
            entries = entry_count,
            original_size,
            compressed_size,
            "Export written"
        );

        Ok(ExportArtifact {
            path,
            original_size,
            compressed_size,
            compressed,
            entry_count,
            oldest,
            newest,
        })
    }

    /// Files inside the time window, oldest first, checked against the size cap
    fn select_files(&self, options: &ExportOptions) -> Result<Vec<LogFile>, ExportError> {
        let cutoff = options
            .since
            .and_then(|window| SystemTime::now().checked_sub(window));

        let mut selected = Vec::new();
        let mut total: u64 = 0;
        for file in list_log_files(&self.log_dir, &self.file_name)? {
            if cutoff.is_some_and(|cutoff| file.modified < cutoff) {
                continue;
            }
            total += file.size;
            if total > options.max_bytes {
                return Err(ExportError::SizeExceeded {
                    total,
                    limit: options.max_bytes,
                });
            }
            selected.push(file);
        }
        Ok(selected)
    }

    fn environment_block(&self) -> String {
        let mut block = String::from("\n=== environment ===\n");
        block.push_str(&format!("os: {}\n", std::env::consts::OS));
        block.push_str(&format!("arch: {}\n", std::env::consts::ARCH));
        block.push_str(&format!("family: {}\n", std::env::consts::FAMILY));
        block.push_str(&format!("version: {}\n", env!("CARGO_PKG_VERSION")));
        block.push_str(&format!("exported_at: {}\n", Utc::now().to_rfc3339()));
        if let Some(session) = &self.session_id {
            block.push_str(&format!("session: {}\n", session));
        }
        block
    }
}

/// Decrypt a line, or return it unchanged if it is not ours to decrypt
fn decrypt_or_pass(line: &str, encryptor: Option<&Encryptor>) -> String {
    match encryptor {
        Some(enc) => enc.decrypt_line(line).unwrap_or_else(|_| line.to_string()),
        None => line.to_string(),
    }
}

fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_SIZE;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn log_line(i: usize) -> String {
        format!(
            "2026-01-01T00:00:0{}.000Z [INFO] [export] entry number {} with a fairly repetitive payload",
            i, i
        )
    }

    fn options(out: &TempDir) -> ExportOptions {
        ExportOptions {
            include_env_info: false,
            output_dir: Some(out.path().to_path_buf()),
            ..ExportOptions::default()
        }
    }

    #[test]
    fn test_export_compressed() {
        let logs = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let content: String = (0..3).map(|i| log_line(i) + "\n").collect();
        fs::write(logs.path().join("app.log"), content).unwrap();

        let artifact = Exporter::new(logs.path(), "app.log")
            .export(&options(&out))
            .unwrap();

        assert_eq!(artifact.entry_count, 3);
        assert!(artifact.compressed);
        assert!(artifact.compressed_size <= artifact.original_size);
        assert!(artifact.path.exists());
        assert!(artifact.path.to_string_lossy().ends_with(".log.gz"));
        assert!(artifact.oldest.is_some());

        let mut decoded = String::new();
        GzDecoder::new(fs::File::open(&artifact.path).unwrap())
            .read_to_string(&mut decoded)
            .unwrap();
        assert!(decoded.starts_with("=== app.log ===\n"));
        assert!(decoded.contains("entry number 2"));
    }

    #[test]
    fn test_export_uncompressed() {
        let logs = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let content: String = (0..3).map(|i| log_line(i) + "\n").collect();
        fs::write(logs.path().join("app.log"), content).unwrap();

        let mut opts = options(&out);
        opts.compress = false;
        let artifact = Exporter::new(logs.path(), "app.log").export(&opts).unwrap();

        assert_eq!(artifact.entry_count, 3);
        assert!(!artifact.compressed);
        assert_eq!(artifact.compressed_size, artifact.original_size);
        assert!(artifact.path.to_string_lossy().ends_with(".log"));
        assert_eq!(
            fs::metadata(&artifact.path).unwrap().len(),
            artifact.original_size
        );
    }

    #[test]
    fn test_export_mixed_encrypted_and_plain() {
        let logs = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let key = EncryptionKey::from_slice(&[3u8; KEY_SIZE]).unwrap();
        let sealed = Encryptor::new(key.clone())
            .encrypt_line("encrypted entry")
            .unwrap();
        fs::write(
            logs.path().join("app.log"),
            format!("plain entry\n{}\n\n", sealed),
        )
        .unwrap();

        let mut opts = options(&out);
        opts.compress = false;
        opts.key = Some(key);
        let artifact = Exporter::new(logs.path(), "app.log").export(&opts).unwrap();

        let bundle = fs::read_to_string(&artifact.path).unwrap();
        assert!(bundle.contains("plain entry\n"));
        assert!(bundle.contains("encrypted entry\n"));
        assert!(!bundle.contains(&sealed));
        assert_eq!(artifact.entry_count, 2);
    }

    #[test]
    fn test_export_tolerates_invalid_utf8() {
        let logs = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        fs::write(logs.path().join("app.log"), b"good\nbad \xff byte\n").unwrap();

        let mut opts = options(&out);
        opts.compress = false;
        let artifact = Exporter::new(logs.path(), "app.log").export(&opts).unwrap();

        let bundle = fs::read_to_string(&artifact.path).unwrap();
        assert!(bundle.contains("good\n"));
        assert!(bundle.contains("bad \u{FFFD} byte\n"));
        assert_eq!(artifact.entry_count, 2);
    }

    #[test]
    fn test_export_banners_and_env_block() {
        let logs = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        fs::write(logs.path().join("app.log.1"), "older\n").unwrap();
        fs::write(logs.path().join("app.log"), "newer\n").unwrap();
        let old = SystemTime::now() - Duration::from_secs(3600);
        filetime::set_file_mtime(
            logs.path().join("app.log.1"),
            filetime::FileTime::from_system_time(old),
        )
        .unwrap();

        let mut opts = options(&out);
        opts.compress = false;
        opts.include_env_info = true;
        let artifact = Exporter::new(logs.path(), "app.log")
            .with_session_id("session-42")
            .export(&opts)
            .unwrap();

        let bundle = fs::read_to_string(&artifact.path).unwrap();
        let first = bundle.find("=== app.log.1 ===").unwrap();
        let second = bundle.find("=== app.log ===").unwrap();
        assert!(first < second);
        assert!(bundle.contains("=== environment ==="));
        assert!(bundle.contains("session: session-42"));
        assert_eq!(artifact.entry_count, 2);
        assert!(artifact.oldest < artifact.newest);
    }

    #[test]
    fn test_export_time_window_skips_old_files() {
        let logs = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        fs::write(logs.path().join("app.log.1"), "ancient\n").unwrap();
        fs::write(logs.path().join("app.log"), "recent\n").unwrap();
        let old = SystemTime::now() - Duration::from_secs(10 * 24 * 3600);
        filetime::set_file_mtime(
            logs.path().join("app.log.1"),
            filetime::FileTime::from_system_time(old),
        )
        .unwrap();

        let mut opts = options(&out);
        opts.compress = false;
        opts.since = Some(Duration::from_secs(24 * 3600));
        let artifact = Exporter::new(logs.path(), "app.log").export(&opts).unwrap();

        let bundle = fs::read_to_string(&artifact.path).unwrap();
        assert!(bundle.contains("recent"));
        assert!(!bundle.contains("ancient"));
    }

    #[test]
    fn test_export_size_cap() {
        let logs = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        fs::write(logs.path().join("app.log"), "x".repeat(2048)).unwrap();

        let mut opts = options(&out);
        opts.max_bytes = 1024;
        let err = Exporter::new(logs.path(), "app.log")
            .export(&opts)
            .unwrap_err();
        assert!(matches!(
            err,
            ExportError::SizeExceeded {
                total: 2048,
                limit: 1024
            }
        ));
    }

    #[test]
    fn test_export_missing_directory() {
        let out = TempDir::new().unwrap();
        let err = Exporter::new("/nonexistent/lognest/logs", "app.log")
            .export(&options(&out))
            .unwrap_err();
        assert!(matches!(err, ExportError::DirectoryNotFound(_)));
    }

    #[test]
    fn test_export_no_files() {
        let logs = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        fs::write(logs.path().join("unrelated.txt"), "x\n").unwrap();

        let err = Exporter::new(logs.path(), "app.log")
            .export(&options(&out))
            .unwrap_err();
        assert!(matches!(err, ExportError::NoFiles));
    }
}
