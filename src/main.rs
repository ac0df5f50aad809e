use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use lognest::config::{self, Config};
use lognest::logging::retention::{self, RetentionPolicy};
use lognest::{EncryptionKey, Encryptor, ExportOptions, Exporter, LogLevel, Logger, LoggerOptions};

#[derive(Debug, Parser)]
#[command(version, about = "Inspect and maintain lognest log directories", long_about = None)]
struct Args {
    /// Config file (default: ~/.lognest/config.toml)
    #[arg(long, short, env = "LOGNEST_CONFIG")]
    config: Option<PathBuf>,

    /// Log directory, overriding the config file
    #[arg(long, env = "LOGNEST_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Record one entry through the full pipeline
    Log {
        /// Severity (verbose, debug, info, warning, error, fatal)
        #[arg(long, default_value = "info")]
        level: LogLevel,

        #[arg(long, default_value = "cli")]
        category: String,

        /// File holding a base64 key; lines are encrypted when set
        #[arg(long)]
        key_file: Option<PathBuf>,

        message: String,
    },

    /// Bundle the log files into one shareable file
    Export {
        /// File holding the base64 key used to decrypt lines
        #[arg(long)]
        key_file: Option<PathBuf>,

        /// Only include files modified within the last N hours
        #[arg(long)]
        since_hours: Option<u64>,

        /// Size cap in bytes for the source files
        #[arg(long, default_value_t = lognest::export::DEFAULT_MAX_EXPORT_BYTES)]
        max_bytes: u64,

        #[arg(long)]
        no_compress: bool,

        /// Leave out the environment block
        #[arg(long)]
        no_env: bool,

        /// Output directory (default: system temp dir)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Delete aged log files, keeping the retained-entry floor
    Cleanup {
        #[arg(long)]
        max_age_days: Option<u64>,

        #[arg(long)]
        min_entries: Option<usize>,
    },

    /// Print a log file with encrypted lines decrypted
    Decrypt {
        /// File holding the base64 key
        #[arg(long)]
        key_file: PathBuf,

        file: PathBuf,
    },
}

fn read_key(path: &Path) -> Result<EncryptionKey> {
    let encoded = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read key file {}", path.display()))?;
    EncryptionKey::from_base64(&encoded).context("Invalid key file")
}

fn load_config(args: &Args) -> Result<Config> {
    let path = args
        .config
        .clone()
        .unwrap_or_else(config::config_file_path);
    let mut config = Config::load(&path)?;
    if let Some(dir) = &args.log_dir {
        config.log_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "lognest=info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    match args.command {
        Command::Log {
            level,
            category,
            key_file,
            message,
        } => {
            let mut options = LoggerOptions::new(config);
            if let Some(path) = key_file {
                let key = read_key(&path)?;
                options = options.with_static_key(key.as_bytes())?;
            }
            let logger = Logger::start(options)?;
            logger.log(level, &category, message);
            logger.shutdown().await;

            let stats = logger.stats();
            if stats.failed_entries > 0 {
                anyhow::bail!("entry was not persisted, see log output");
            }
            println!("{}", logger.active_log_path().display());
        }

        Command::Export {
            key_file,
            since_hours,
            max_bytes,
            no_compress,
            no_env,
            output,
        } => {
            let options = ExportOptions {
                key: key_file.as_deref().map(read_key).transpose()?,
                since: since_hours.map(|h| Duration::from_secs(h * 3600)),
                max_bytes,
                include_env_info: !no_env,
                compress: !no_compress,
                output_dir: output,
            };
            let artifact = Exporter::new(&config.log_dir, &config.file_name).export(&options)?;
            tracing::info!(
                entries = artifact.entry_count,
                original = artifact.original_size,
                written = artifact.compressed_size,
                "Export complete"
            );
            println!("{}", artifact.path.display());
        }

        Command::Cleanup {
            max_age_days,
            min_entries,
        } => {
            let mut policy: RetentionPolicy = config.retention.unwrap_or_default();
            if let Some(days) = max_age_days {
                policy.max_age_secs = days * 24 * 60 * 60;
            }
            if let Some(min) = min_entries {
                policy.min_entries = min;
            }
            let report = retention::sweep(
                &config.log_dir,
                &config.file_name,
                &config.active_log_path(),
                &policy,
            )
            .context("Cleanup failed")?;
            for path in &report.deleted {
                println!("deleted {}", path.display());
            }
            tracing::info!(
                deleted = report.deleted.len(),
                remaining = report.remaining_entries,
                "Cleanup complete"
            );
        }

        Command::Decrypt { key_file, file } => {
            let encryptor = Encryptor::new(read_key(&key_file)?);
            let reader = io::BufReader::new(
                std::fs::File::open(&file)
                    .with_context(|| format!("Failed to open {}", file.display()))?,
            );
            let mut out = io::stdout().lock();
            let mut failed = 0usize;
            for line in reader.lines() {
                let line = line?;
                match encryptor.decrypt_line(&line) {
                    Ok(plain) => writeln!(out, "{}", plain)?,
                    Err(_) => {
                        failed += 1;
                        writeln!(out, "{}", line)?;
                    }
                }
            }
            if failed > 0 {
                tracing::warn!("{} lines could not be decrypted and were printed as-is", failed);
            }
        }
    }

    Ok(())
}
