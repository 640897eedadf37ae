//! Operation config persistence trait
//!
//! Defines the interface for per-(service, operation) settings storage.

use async_trait::async_trait;

use idemgate_common::ServiceOperation;

use crate::model::{InsertOutcome, OperationConfig};

/// Operation config persistence operations
#[async_trait]
pub trait OperationConfigPersistence: Send + Sync {
    /// Find the config for a `(service, operation)` pair
    async fn config_find(&self, key: &ServiceOperation)
    -> anyhow::Result<Option<OperationConfig>>;

    /// Load every persisted config
    async fn config_find_all(&self) -> anyhow::Result<Vec<OperationConfig>>;

    /// Insert a config unless one already exists for its `(service, operation)`
    async fn config_insert(&self, config: &OperationConfig) -> anyhow::Result<InsertOutcome>;

    /// Create or replace the config for its `(service, operation)`
    async fn config_save(&self, config: &OperationConfig) -> anyhow::Result<()>;
}
