// Lock coordination services

pub mod coordinator;
pub mod idempotency;
pub mod reaper;

// Re-export commonly used types
pub use coordinator::{Completion, GrantTicket, LockCoordinator, LockOutcome};
pub use idempotency::IdempotencyService;
pub use reaper::{ExpiryReaper, ReaperHandle, SweepReport};
