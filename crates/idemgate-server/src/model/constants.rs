// Configuration keys

pub const DEFAULT_CONFIG_FILE: &str = "conf/application.yml";
pub const ENV_PREFIX: &str = "idemgate";

// Lock coordinator
pub const LOCK_DEFAULT_DURATION_MS: &str = "idemgate.lock.default-duration-ms";
pub const LOCK_ALLOW_SAVE_ON_EXPIRED: &str = "idemgate.lock.allow-save-on-expired";
pub const LOCK_MIRROR_ACTIVE_LOCKS: &str = "idemgate.lock.mirror-active-locks";

// Expiry reaper
pub const REAPER_INTERVAL_MS: &str = "idemgate.reaper.interval-ms";
pub const REAPER_FAST_PATH: &str = "idemgate.reaper.fast-path";
pub const REAPER_LEASE_NAME: &str = "idemgate.reaper.lease-name";
pub const REAPER_LOCK_AT_MOST_FOR_MS: &str = "idemgate.reaper.lock-at-most-for-ms";
pub const REAPER_LOCK_AT_LEAST_FOR_MS: &str = "idemgate.reaper.lock-at-least-for-ms";
pub const REAPER_SCAN_LIMIT: &str = "idemgate.reaper.scan-limit";

// Storage
pub const STORAGE_MODE: &str = "idemgate.storage.mode";
pub const STORAGE_DATA_DIR: &str = "idemgate.storage.data-dir";

// Logging
pub const LOGS_PATH: &str = "idemgate.logs.path";
pub const LOGS_LEVEL: &str = "idemgate.logs.level";
pub const LOGS_CONSOLE: &str = "idemgate.logs.console";
pub const LOGS_FILE: &str = "idemgate.logs.file";
