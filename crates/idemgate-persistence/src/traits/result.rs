//! Stored and failed result persistence traits

use async_trait::async_trait;
use uuid::Uuid;

use idemgate_common::OperationKey;

use crate::model::{FailedResult, InsertOutcome, StoredResult};

/// Successful outcomes, unique per key triple
#[async_trait]
pub trait StoredResultPersistence: Send + Sync {
    /// Insert a result; the first writer for a key triple wins
    async fn result_insert(&self, result: &StoredResult) -> anyhow::Result<InsertOutcome>;

    /// Find the result for a key triple
    async fn result_find(&self, key: &OperationKey) -> anyhow::Result<Option<StoredResult>>;
}

/// Failure and expiry records, unique per grant
#[async_trait]
pub trait FailedResultPersistence: Send + Sync {
    /// Insert a failure record unless one exists for the grant
    async fn failed_insert(&self, failed: &FailedResult) -> anyhow::Result<InsertOutcome>;

    /// Find the failure record of a grant
    async fn failed_find(&self, grant_id: Uuid) -> anyhow::Result<Option<FailedResult>>;

    /// Delete the failure record of a grant, returning whether it existed
    async fn failed_delete(&self, grant_id: Uuid) -> anyhow::Result<bool>;
}
