//! Idemgate Consistency - Execution leases
//!
//! This crate provides:
//! - The execution lease data model
//! - Lease acquire/release API with lock-at-most / lock-at-least semantics
//! - An in-process implementation and one backed by a durable `LeaseStore`
//!
//! Leases make sure that periodic background work (the expiry sweep) runs on
//! at most one process instance at a time.

pub mod lock;

// Re-export lock types
pub use lock::{
    ExecutionLease, ExecutionLock, LeaseRequest, LeaseStore, MemoryExecutionLock,
    PersistentExecutionLock,
};
