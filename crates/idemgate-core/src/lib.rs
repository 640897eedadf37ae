//! Idemgate Core - Idempotency lock coordination
//!
//! This crate provides:
//! - The Lock Coordinator (`request_or_lock` / `complete`)
//! - The Expiry Reaper reconciling abandoned grants
//! - The Operation Config Cache and the Active Lock Cache
//! - Store adapters over the persistence traits
//! - The `IdempotencyService` facade bundling all of the above

pub mod cache;
pub mod metrics;
pub mod service;
pub mod store;

// Re-export commonly used types
pub use cache::{ActiveLockCache, OperationConfigCache};
pub use service::{
    Completion, ExpiryReaper, GrantTicket, IdempotencyService, LockCoordinator, LockOutcome,
    ReaperHandle, SweepReport,
};
pub use store::Stores;
