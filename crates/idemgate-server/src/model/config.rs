//! Configuration management for Idemgate server
//!
//! Sources, lowest precedence first: the YAML file (`conf/application.yml`
//! unless `--config` names another), `IDEMGATE`-prefixed environment
//! variables, then command line flags.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use config::{Config, ConfigError, Environment, File};

use idemgate_common::settings::{DEFAULT_LOCK_DURATION, DEFAULT_SWEEP_LEASE_NAME};
use idemgate_common::{
    CoordinatorSettings, IdempotencyError, ReaperSettings, StorageMode, StorageSettings,
};

use crate::startup::LoggingConfig;

use super::constants::{
    DEFAULT_CONFIG_FILE, ENV_PREFIX, LOCK_ALLOW_SAVE_ON_EXPIRED, LOCK_DEFAULT_DURATION_MS,
    LOCK_MIRROR_ACTIVE_LOCKS, LOGS_CONSOLE, LOGS_FILE, LOGS_LEVEL, LOGS_PATH, REAPER_FAST_PATH,
    REAPER_INTERVAL_MS, REAPER_LEASE_NAME, REAPER_LOCK_AT_LEAST_FOR_MS, REAPER_LOCK_AT_MOST_FOR_MS,
    REAPER_SCAN_LIMIT, STORAGE_DATA_DIR, STORAGE_MODE,
};

/// Command line arguments for the server
#[derive(Debug, Default, Parser)]
#[command(name = "idemgate-server", version, about)]
pub struct Cli {
    /// Configuration file; must exist when given
    #[arg(short = 'c', long = "config", env = "IDEMGATE_CONFIG")]
    pub config: Option<PathBuf>,
    /// Storage backend: memory or embedded
    #[arg(short = 's', long = "storage-mode")]
    pub storage_mode: Option<String>,
    /// RocksDB directory for the embedded backend
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,
}

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

fn invalid(e: ConfigError) -> IdempotencyError {
    IdempotencyError::InvalidConfig(e.to_string())
}

impl Configuration {
    /// Load configuration using the process arguments
    pub fn new() -> Result<Self, IdempotencyError> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(args: Cli) -> Result<Self, IdempotencyError> {
        let required = args.config.is_some();
        let file = args
            .config
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());

        let mut config_builder = Config::builder()
            .add_source(File::with_name(&file).required(required))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .keep_prefix(true)
                    .separator(".")
                    .try_parsing(true),
            );

        if let Some(v) = args.storage_mode {
            config_builder = config_builder
                .set_override(STORAGE_MODE, v)
                .map_err(invalid)?;
        }
        if let Some(v) = args.data_dir {
            config_builder = config_builder
                .set_override(STORAGE_DATA_DIR, v.to_string_lossy().into_owned())
                .map_err(invalid)?;
        }

        let config = config_builder.build().map_err(invalid)?;
        Ok(Configuration { config })
    }

    // ========================================================================
    // Lock Coordinator Configuration
    // ========================================================================

    pub fn coordinator_settings(&self) -> Result<CoordinatorSettings, IdempotencyError> {
        let default_lock_duration = self.millis(LOCK_DEFAULT_DURATION_MS, DEFAULT_LOCK_DURATION)?;
        if default_lock_duration.is_zero() {
            return Err(IdempotencyError::InvalidConfig(format!(
                "{} must be positive",
                LOCK_DEFAULT_DURATION_MS
            )));
        }

        Ok(CoordinatorSettings {
            default_lock_duration,
            default_allow_save_on_expired: self.flag(LOCK_ALLOW_SAVE_ON_EXPIRED, true)?,
            mirror_active_locks: self.flag(LOCK_MIRROR_ACTIVE_LOCKS, true)?,
        })
    }

    // ========================================================================
    // Expiry Reaper Configuration
    // ========================================================================

    pub fn reaper_settings(&self) -> Result<ReaperSettings, IdempotencyError> {
        let defaults = ReaperSettings::default();

        let sweep_interval = self.millis(REAPER_INTERVAL_MS, defaults.sweep_interval)?;
        if sweep_interval.is_zero() {
            return Err(IdempotencyError::InvalidConfig(format!(
                "{} must be positive",
                REAPER_INTERVAL_MS
            )));
        }

        let lock_at_most_for =
            self.millis(REAPER_LOCK_AT_MOST_FOR_MS, defaults.lock_at_most_for)?;
        let lock_at_least_for =
            self.millis(REAPER_LOCK_AT_LEAST_FOR_MS, defaults.lock_at_least_for)?;
        if lock_at_least_for > lock_at_most_for {
            return Err(IdempotencyError::InvalidConfig(format!(
                "{} must not exceed {}",
                REAPER_LOCK_AT_LEAST_FOR_MS, REAPER_LOCK_AT_MOST_FOR_MS
            )));
        }

        let scan_limit = match self.config.get_int(REAPER_SCAN_LIMIT) {
            Ok(v) if v > 0 => v as usize,
            Ok(v) => {
                return Err(IdempotencyError::InvalidConfig(format!(
                    "{} must be positive, got {}",
                    REAPER_SCAN_LIMIT, v
                )));
            }
            Err(ConfigError::NotFound(_)) => defaults.scan_limit,
            Err(e) => return Err(invalid(e)),
        };

        Ok(ReaperSettings {
            sweep_interval,
            fast_path: self.flag(REAPER_FAST_PATH, defaults.fast_path)?,
            lease_name: self
                .string(REAPER_LEASE_NAME)?
                .unwrap_or_else(|| DEFAULT_SWEEP_LEASE_NAME.to_string()),
            lock_at_most_for,
            lock_at_least_for,
            scan_limit,
        })
    }

    // ========================================================================
    // Storage Configuration
    // ========================================================================

    pub fn storage_settings(&self) -> Result<StorageSettings, IdempotencyError> {
        let defaults = StorageSettings::default();

        let mode = match self.string(STORAGE_MODE)? {
            Some(v) => v
                .to_lowercase()
                .parse::<StorageMode>()
                .map_err(IdempotencyError::InvalidConfig)?,
            None => defaults.mode,
        };

        Ok(StorageSettings {
            mode,
            data_dir: self
                .string(STORAGE_DATA_DIR)?
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
        })
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::from_config(
            self.config.get_string(LOGS_PATH).ok(),
            self.config.get_bool(LOGS_CONSOLE).unwrap_or(true),
            self.config.get_bool(LOGS_FILE).unwrap_or(true),
            self.config
                .get_string(LOGS_LEVEL)
                .unwrap_or("info".to_string()),
        )
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, IdempotencyError> {
        match self.config.get_int(key) {
            Ok(v) if v >= 0 => Ok(Duration::from_millis(v as u64)),
            Ok(v) => Err(IdempotencyError::InvalidConfig(format!(
                "{} must not be negative, got {}",
                key, v
            ))),
            Err(ConfigError::NotFound(_)) => Ok(default),
            Err(e) => Err(invalid(e)),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, IdempotencyError> {
        match self.config.get_bool(key) {
            Ok(v) => Ok(v),
            Err(ConfigError::NotFound(_)) => Ok(default),
            Err(e) => Err(invalid(e)),
        }
    }

    fn string(&self, key: &str) -> Result<Option<String>, IdempotencyError> {
        match self.config.get_string(key) {
            Ok(v) if v.trim().is_empty() => Ok(None),
            Ok(v) => Ok(Some(v)),
            Err(ConfigError::NotFound(_)) => Ok(None),
            Err(e) => Err(invalid(e)),
        }
    }
}
