//! Operation record persistence trait

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::OperationRecord;

/// Append-only request audit trail
#[async_trait]
pub trait OperationRecordPersistence: Send + Sync {
    /// Append a record for an incoming request
    async fn operation_insert(&self, record: &OperationRecord) -> anyhow::Result<()>;

    /// Find a record by its ID
    async fn operation_find(&self, id: Uuid) -> anyhow::Result<Option<OperationRecord>>;
}
