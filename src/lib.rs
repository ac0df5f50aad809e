//! lognest - non-blocking local logging pipeline
//!
//! Log calls land in a bounded in-memory buffer. A background scheduler hands
//! batches to a writer task that redacts, formats, optionally encrypts and
//! appends them to size-bounded files. Retention and export run independently
//! of the live path.

pub mod config;
pub mod crypto;
pub mod error;
pub mod export;
pub mod format;
pub mod logging;
pub mod redact;

pub use config::Config;
pub use crypto::{EncryptionKey, Encryptor, KeyProvider};
pub use error::{ConfigError, CryptoError, ExportError, PipelineError, WriteError};
pub use export::{ExportArtifact, ExportOptions, Exporter};
pub use format::{FormatKind, Formatter};
pub use logging::{Hooks, LogEntry, LogLevel, Logger, LoggerOptions, LoggerStats, Sink};
pub use redact::{Preset, RedactionPattern, Redactor};
