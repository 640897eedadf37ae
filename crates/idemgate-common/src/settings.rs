//! Typed settings for idemgate components
//!
//! These structures are plain values. Loading them from files, environment
//! variables, or the command line is the job of the hosting process.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lock duration applied to operations without a persisted configuration
pub const DEFAULT_LOCK_DURATION: Duration = Duration::from_millis(5000);

/// Default name of the execution lease guarding the expiry sweep
pub const DEFAULT_SWEEP_LEASE_NAME: &str = "idemgate-expiry-sweep";

/// Settings for the lock coordinator and the operation config cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// Lock duration synthesized for unknown `(service, operation)` pairs (default: 5000ms)
    pub default_lock_duration: Duration,
    /// Allow-save-on-expired policy synthesized for unknown pairs (default: true)
    pub default_allow_save_on_expired: bool,
    /// Mirror fresh grants into the active lock cache (default: true)
    pub mirror_active_locks: bool,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            default_lock_duration: DEFAULT_LOCK_DURATION,
            default_allow_save_on_expired: true,
            mirror_active_locks: true,
        }
    }
}

/// Settings for the expiry reaper
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaperSettings {
    /// Period of the durable sweep (default: 10s)
    pub sweep_interval: Duration,
    /// React to per-grant expiry timers from the active lock cache (default: true)
    pub fast_path: bool,
    /// Name of the execution lease shared by all instances
    pub lease_name: String,
    /// Upper bound on how long one instance may hold the sweep lease (default: 60s)
    pub lock_at_most_for: Duration,
    /// Minimum time the sweep lease stays held after a sweep (default: 0s)
    pub lock_at_least_for: Duration,
    /// Maximum number of expired grants handled per sweep (default: 500)
    pub scan_limit: usize,
}

impl Default for ReaperSettings {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(10),
            fast_path: true,
            lease_name: DEFAULT_SWEEP_LEASE_NAME.to_string(),
            lock_at_most_for: Duration::from_secs(60),
            lock_at_least_for: Duration::ZERO,
            scan_limit: 500,
        }
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Process-local maps; nothing survives a restart
    Memory,
    /// Embedded RocksDB under `data_dir`
    Embedded,
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageMode::Memory => write!(f, "memory"),
            StorageMode::Embedded => write!(f, "embedded"),
        }
    }
}

impl std::str::FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(StorageMode::Memory),
            "embedded" => Ok(StorageMode::Embedded),
            _ => Err(format!("Invalid storage mode: {}", s)),
        }
    }
}

/// Settings for the storage layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    pub mode: StorageMode,
    /// RocksDB directory (embedded mode only)
    pub data_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            mode: StorageMode::Embedded,
            data_dir: PathBuf::from("data/idemgate"),
        }
    }
}
