//! Persistence traits for the storage abstraction layer
//!
//! This module defines the core persistence traits that abstract over the
//! storage backends: process-local memory and embedded RocksDB. Every trait
//! speaks in terms of `insert_unique`, point lookups, deletes, and scans.

pub mod audit;
pub mod config;
pub mod grant;
pub mod operation;
pub mod result;

pub use audit::LockAuditPersistence;
pub use config::OperationConfigPersistence;
pub use grant::GrantPersistence;
pub use operation::OperationRecordPersistence;
pub use result::{FailedResultPersistence, StoredResultPersistence};

use async_trait::async_trait;

use idemgate_common::StorageMode;
use idemgate_consistency::LeaseStore;

/// Unified persistence service trait
///
/// This is the main interface for all storage operations. A backend that
/// implements it can serve every store the coordinator and reaper need.
#[async_trait]
pub trait PersistenceService:
    OperationConfigPersistence
    + OperationRecordPersistence
    + GrantPersistence
    + StoredResultPersistence
    + FailedResultPersistence
    + LockAuditPersistence
    + LeaseStore
    + Send
    + Sync
{
    /// Get the current storage mode
    fn storage_mode(&self) -> StorageMode;

    /// Health check for the storage backend
    async fn health_check(&self) -> anyhow::Result<()>;
}
