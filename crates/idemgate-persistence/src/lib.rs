//! Idemgate Persistence - storage layer for the idempotency lock protocol
//!
//! This crate provides:
//! - Persistence trait abstractions, one per store
//! - Domain model types for persisted records
//! - An in-memory backend and an embedded RocksDB backend

pub mod embedded;
pub mod memory;
pub mod model;
pub mod traits;

// Re-export persistence traits
pub use traits::{
    FailedResultPersistence, GrantPersistence, LockAuditPersistence, OperationConfigPersistence,
    OperationRecordPersistence, PersistenceService, StoredResultPersistence,
};

// Re-export backends
pub use embedded::EmbeddedPersistService;
pub use memory::MemoryPersistService;

// Re-export model types
pub use model::{
    FailedResult, Grant, InsertOutcome, LockAuditRecord, LockDisposition, OperationConfig,
    OperationRecord, StoredResult,
};
