// In-memory caches in front of the durable stores

pub mod config_cache;
pub mod lock_cache;

pub use config_cache::OperationConfigCache;
pub use lock_cache::ActiveLockCache;
