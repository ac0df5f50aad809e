//! Logging pipeline for lognest
//!
//! Provides the buffered producer handle, the background flush/write tasks,
//! file rotation, retention and the collaborator contracts.

mod buffer;
mod entry;
mod file_writer;
pub mod files;
mod hooks;
mod logger;
pub mod retention;
pub mod rotation;
mod scheduler;

pub use buffer::{LogBuffer, PushOutcome};
pub use entry::{Context, LogEntry, LogLevel};
pub use hooks::{ContextProvider, Hooks, Sink, TracingSink};
pub use logger::{Logger, LoggerOptions, LoggerStats};
pub use retention::{RetentionPolicy, RetentionReport};
pub use rotation::{RotationManager, RotationOutcome, RotationPolicy};
