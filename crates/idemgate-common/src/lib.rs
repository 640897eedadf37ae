//! Idemgate Common - Shared types, errors, and settings
//!
//! This crate provides the foundational types used across all idemgate components:
//! - Error taxonomy and execution result codes
//! - The `(service, operation, idempotency_key)` key triple and its storage encoding
//! - Typed settings for the coordinator, reaper, and storage layer
//! - Time helpers

pub mod error;
pub mod key;
pub mod settings;
pub mod utils;

// Re-exports for convenience
pub use error::{ExecutionResult, IdempotencyError};
pub use key::{OperationKey, ServiceOperation};
pub use settings::{CoordinatorSettings, ReaperSettings, StorageMode, StorageSettings};
pub use utils::{deadline_from, millis_until};

/// Failure reason recorded when a grant expires before its holder completes
pub const OPERATION_EXPIRED_REASON: &str = "operation expired";

/// Failure reason used when a holder reports failure without a message
pub const OPERATION_FAILED_REASON: &str = "operation failed";
