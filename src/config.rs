use crate::services::{
    log_service::UploadLimits,
    promotion::PromoteStrategy,
    storage_service::{DEFAULT_DIRECTORY_MODE, DEFAULT_FILE_MODE, StorageLayout},
};
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub index_url: String,
    pub staging_dir: PathBuf,
    pub storage_dir: PathBuf,
    pub single_file_size_limit: u64,
    pub max_file_count: u16,
    pub retention: Duration,
    pub cleanup_interval: Duration,
    pub use_hardlinks: bool,
    pub directory_mode: u32,
    pub file_mode: u32,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Log file upload and retention service")]
pub struct Args {
    /// Host to bind to (overrides LOG_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides LOG_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// SQLite URL of the bundle index (overrides LOG_STORE_INDEX_URL)
    #[arg(long)]
    pub index_url: Option<String>,

    /// Directory for in-progress uploads (overrides LOG_STORE_STAGING_DIR)
    #[arg(long)]
    pub staging_dir: Option<PathBuf>,

    /// Directory for stored log files (overrides LOG_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// Per-file byte ceiling (overrides LOG_STORE_SINGLE_FILE_SIZE_LIMIT)
    #[arg(long)]
    pub single_file_size_limit: Option<u64>,

    /// Maximum files per bundle (overrides LOG_STORE_MAX_FILE_COUNT_PER_BUNDLE)
    #[arg(long)]
    pub max_file_count: Option<u16>,

    /// Retention window in seconds (overrides LOG_STORE_RETENTION_SECS)
    #[arg(long)]
    pub retention_secs: Option<u64>,

    /// Seconds between retention sweeps (overrides LOG_STORE_CLEANUP_INTERVAL_SECS)
    #[arg(long)]
    pub cleanup_interval_secs: Option<u64>,

    /// Promote via hardlinks instead of copies (overrides LOG_STORE_USE_HARDLINKS)
    #[arg(long)]
    pub use_hardlinks: Option<bool>,

    /// Apply the index schema and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Read `name` from the environment, falling back to `default` when unset.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

/// Read an octal permission mode; unset or zero means `default`.
fn env_mode(name: &str, default: u32) -> Result<u32> {
    let mode = match env::var(name) {
        Ok(value) => u32::from_str_radix(value.trim_start_matches("0o"), 8)
            .with_context(|| format!("parsing {} value `{}` as octal", name, value))?,
        Err(env::VarError::NotPresent) => 0,
        Err(err) => return Err(err).with_context(|| format!("reading {}", name)),
    };
    Ok(if mode == 0 { default } else { mode })
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("LOG_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_or("LOG_STORE_PORT", 3000u16)?;
        let env_index =
            env::var("LOG_STORE_INDEX_URL").unwrap_or_else(|_| "sqlite://./data/index.db".into());
        let env_staging = env::var("LOG_STORE_STAGING_DIR").unwrap_or_else(|_| "./data/staging".into());
        let env_storage = env::var("LOG_STORE_STORAGE_DIR").unwrap_or_else(|_| "./data/logs".into());
        let env_file_limit = env_or("LOG_STORE_SINGLE_FILE_SIZE_LIMIT", 1_048_576u64)?;
        let env_file_count = env_or("LOG_STORE_MAX_FILE_COUNT_PER_BUNDLE", 5u16)?;
        let env_retention = env_or("LOG_STORE_RETENTION_SECS", 336 * 60 * 60u64)?;
        let env_interval = env_or("LOG_STORE_CLEANUP_INTERVAL_SECS", 10 * 60u64)?;
        let env_hardlinks = env_or("LOG_STORE_USE_HARDLINKS", false)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            index_url: args.index_url.unwrap_or(env_index),
            staging_dir: args.staging_dir.unwrap_or_else(|| env_staging.into()),
            storage_dir: args.storage_dir.unwrap_or_else(|| env_storage.into()),
            single_file_size_limit: args.single_file_size_limit.unwrap_or(env_file_limit),
            max_file_count: args.max_file_count.unwrap_or(env_file_count),
            retention: Duration::from_secs(args.retention_secs.unwrap_or(env_retention)),
            cleanup_interval: Duration::from_secs(
                args.cleanup_interval_secs.unwrap_or(env_interval),
            ),
            use_hardlinks: args.use_hardlinks.unwrap_or(env_hardlinks),
            directory_mode: env_mode("LOG_STORE_DIRECTORY_MODE", DEFAULT_DIRECTORY_MODE)?,
            file_mode: env_mode("LOG_STORE_FILE_MODE", DEFAULT_FILE_MODE)?,
        };
        cfg.validate()?;

        Ok((cfg, args.migrate))
    }

    fn validate(&self) -> Result<()> {
        if self.single_file_size_limit == 0 {
            anyhow::bail!("single file size limit must be positive");
        }
        if self.max_file_count == 0 {
            anyhow::bail!("max file count per bundle must be positive");
        }
        if self.cleanup_interval.is_zero() {
            anyhow::bail!("cleanup interval must be positive");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn storage_layout(&self) -> StorageLayout {
        StorageLayout {
            staging_dir: self.staging_dir.clone(),
            storage_dir: self.storage_dir.clone(),
            directory_mode: self.directory_mode,
            file_mode: self.file_mode,
        }
    }

    pub fn promote_strategy(&self) -> PromoteStrategy {
        if self.use_hardlinks {
            PromoteStrategy::Hardlink
        } else {
            PromoteStrategy::Copy
        }
    }

    pub fn upload_limits(&self) -> UploadLimits {
        UploadLimits {
            single_file_size_limit: self.single_file_size_limit,
            max_file_count: self.max_file_count as usize,
        }
    }
}
