//! Lock audit persistence trait

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{InsertOutcome, LockAuditRecord};

/// Append-only record of finalized grants
#[async_trait]
pub trait LockAuditPersistence: Send + Sync {
    /// Append an audit record unless the grant was already finalized
    async fn audit_insert(&self, record: &LockAuditRecord) -> anyhow::Result<InsertOutcome>;

    /// Find the audit record of a grant
    async fn audit_find(&self, grant_id: Uuid) -> anyhow::Result<Option<LockAuditRecord>>;
}
