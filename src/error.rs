//! Error types for the logging pipeline
//!
//! Configuration and export errors are returned to the caller. Write, crypto and
//! retention failures never reach a logging call; they are counted and handed to
//! the `on_error` hook as a [`PipelineError`].

use std::path::PathBuf;

use thiserror::Error;

/// Raised synchronously while building or starting a logger
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("encryption key must be {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("custom format selected but no formatter function was supplied")]
    MissingCustomFormatter,

    #[error("invalid redaction pattern '{name}': {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidValue(String),

    #[error("cannot create log directory {}: {source}", .path.display())]
    LogDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("logger must be started inside a tokio runtime")]
    NoRuntime,
}

/// Errors from the per-message encryptor
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption key must be {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Tag mismatch, wrong key, or input too short to hold a nonce and tag
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("invalid base64 line: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("decrypted line is not valid UTF-8")]
    InvalidUtf8,

    #[error("key provider failed: {0}")]
    KeyProvider(String),
}

/// Failure while persisting one batch
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("background writer crashed: {0}")]
    Worker(String),
}

/// Raised to the caller of an export
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("log directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("no log files to export")]
    NoFiles,

    #[error("export size {total} bytes exceeds limit of {limit} bytes; narrow the time window")]
    SizeExceeded { total: u64, limit: u64 },

    #[error("I/O error during export: {0}")]
    Io(#[from] std::io::Error),
}

/// Internal failure surfaced only through the `on_error` hook
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("batch of {entries} entries was not persisted: {source}")]
    Write {
        entries: usize,
        #[source]
        source: WriteError,
    },

    #[error("retention sweep failed: {0}")]
    Retention(#[source] std::io::Error),

    #[error("sink '{name}' failed: {message}")]
    Sink { name: String, message: String },

    #[error("{hook} hook panicked: {message}")]
    Hook { hook: &'static str, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_exceeded_mentions_time_window() {
        let err = ExportError::SizeExceeded {
            total: 2048,
            limit: 1024,
        };
        let msg = err.to_string();
        assert!(msg.contains("2048"));
        assert!(msg.contains("1024"));
        assert!(msg.contains("time window"));
    }

    #[test]
    fn test_authentication_failure_is_distinct_from_io() {
        let auth = WriteError::from(CryptoError::AuthenticationFailed);
        assert!(matches!(
            auth,
            WriteError::Crypto(CryptoError::AuthenticationFailed)
        ));

        let io = WriteError::from(std::io::Error::other("disk gone"));
        assert!(matches!(io, WriteError::Io(_)));
    }

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError::Write {
            entries: 3,
            source: WriteError::Worker("panicked".to_string()),
        };
        assert!(err.to_string().contains("3 entries"));

        let err = PipelineError::Sink {
            name: "console".to_string(),
            message: "closed".to_string(),
        };
        assert!(err.to_string().contains("console"));
    }
}
