//! Configuration management for lognest

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::format::FormatKind;
use crate::logging::{LogLevel, RetentionPolicy, RotationPolicy};
use crate::redact::{Preset, RedactionRule};

/// Redaction settings: built-in presets run first, then custom rules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionConfig {
    #[serde(default)]
    pub presets: Vec<Preset>,

    #[serde(default)]
    pub custom: Vec<RedactionRule>,
}

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the active log file and its backups
    #[serde(default = "logs_dir")]
    pub log_dir: PathBuf,

    /// Name of the active log file (default: app.log)
    #[serde(default = "default_file_name")]
    pub file_name: String,

    /// Entries below this level are not recorded at all
    #[serde(default = "default_min_level")]
    pub min_level: LogLevel,

    /// Entries at or above this level trigger an immediate flush
    #[serde(default = "default_critical_level")]
    pub critical_level: LogLevel,

    /// Maximum entries held in memory between flushes (default: 500)
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Periodic flush interval in milliseconds (default: 5000)
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Line format for persisted entries
    #[serde(default)]
    pub format: FormatKind,

    #[serde(default)]
    pub redaction: RedactionConfig,

    #[serde(default)]
    pub rotation: RotationPolicy,

    /// Background cleanup of aged files; disabled when absent
    #[serde(default)]
    pub retention: Option<RetentionPolicy>,
}

fn default_file_name() -> String {
    "app.log".to_string()
}

fn default_min_level() -> LogLevel {
    LogLevel::Info
}

fn default_critical_level() -> LogLevel {
    LogLevel::Fatal
}

fn default_buffer_size() -> usize {
    500
}

fn default_flush_interval_ms() -> u64 {
    5_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_dir: logs_dir(),
            file_name: default_file_name(),
            min_level: default_min_level(),
            critical_level: default_critical_level(),
            buffer_size: default_buffer_size(),
            flush_interval_ms: default_flush_interval_ms(),
            format: FormatKind::default(),
            redaction: RedactionConfig::default(),
            rotation: RotationPolicy::default(),
            retention: None,
        }
    }
}

impl Config {
    /// Config writing into `log_dir` with every other setting at its default
    pub fn with_log_dir(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from file, or return default if not found
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Path of the file that receives appends
    pub fn active_log_path(&self) -> PathBuf {
        self.log_dir.join(&self.file_name)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidValue("buffer_size must be > 0".into()));
        }
        if self.flush_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "flush_interval_ms must be > 0".into(),
            ));
        }
        if self.file_name.is_empty() || self.file_name.contains(['/', '\\']) {
            return Err(ConfigError::InvalidValue(format!(
                "file_name '{}' must be a plain file name",
                self.file_name
            )));
        }
        if self.rotation.max_file_size() == 0 {
            return Err(ConfigError::InvalidValue(
                "rotation max_file_size must be > 0".into(),
            ));
        }
        if let RotationPolicy::SingleFile { trim_percent, .. } = self.rotation {
            if !(1..=100).contains(&trim_percent) {
                return Err(ConfigError::InvalidValue(format!(
                    "trim_percent must be within 1..=100, got {}",
                    trim_percent
                )));
            }
        }
        if let Some(retention) = &self.retention {
            if retention.cleanup_interval_secs == 0 {
                return Err(ConfigError::InvalidValue(
                    "retention cleanup_interval_secs must be > 0".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Get the base configuration directory (~/.lognest)
/// Falls back to ./.lognest if home directory cannot be determined
pub fn config_dir() -> PathBuf {
    try_config_dir().unwrap_or_else(|| {
        tracing::warn!("Could not determine home directory, using current directory for config");
        PathBuf::from(".lognest")
    })
}

/// Try to get the base configuration directory, returning None if home dir is unavailable
pub fn try_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".lognest"))
}

/// Get the path to the config file
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Get the path to the default logs directory
pub fn logs_dir() -> PathBuf {
    config_dir().join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.buffer_size, 500);
        assert_eq!(config.file_name, "app.log");
        assert_eq!(config.min_level, LogLevel::Info);
        assert_eq!(config.critical_level, LogLevel::Fatal);
        assert!(config.retention.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
            log_dir = "/tmp/lognest"
            buffer_size = 64
            format = "compact_json"
            min_level = "debug"

            [redaction]
            presets = ["email", "ip_address"]
            custom = [{ name = "order", pattern = "ORD-\\d+", replacement = "[ORDER]" }]

            [rotation]
            strategy = "single_file"
            max_file_size = 1048576
            trim_percent = 30

            [retention]
            max_age_secs = 86400
            min_entries = 50
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.buffer_size, 64);
        assert_eq!(config.format, FormatKind::CompactJson);
        assert_eq!(config.min_level, LogLevel::Debug);
        assert_eq!(config.redaction.presets, vec![Preset::Email, Preset::IpAddress]);
        assert_eq!(config.redaction.custom[0].replacement, "[ORDER]");
        assert_eq!(
            config.rotation,
            RotationPolicy::SingleFile {
                max_file_size: 1_048_576,
                trim_percent: 30
            }
        );
        let retention = config.retention.unwrap();
        assert_eq!(retention.min_entries, 50);
        assert_eq!(retention.cleanup_interval_secs, 3_600);
        assert_eq!(config.file_name, "app.log");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.buffer_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));

        let mut config = Config::default();
        config.rotation = RotationPolicy::SingleFile {
            max_file_size: 100,
            trim_percent: 0,
        };
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.file_name = "../escape.log".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_returns_default() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(&temp_dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.buffer_size, 500);
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "buffer_size = 8\nflush_interval_ms = 250\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.buffer_size, 8);
        assert_eq!(config.flush_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_config_dir_does_not_panic() {
        let dir = config_dir();
        assert!(dir.ends_with(".lognest"));
    }
}
