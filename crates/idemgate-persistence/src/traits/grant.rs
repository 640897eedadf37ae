//! Grant (temporary lock) persistence trait

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{Grant, InsertOutcome};

/// Grant persistence operations
///
/// Backends enforce a uniqueness constraint on
/// `(service, operation, idempotency_key)` at insert time.
#[async_trait]
pub trait GrantPersistence: Send + Sync {
    /// Insert a grant unless another grant exists for the same key triple
    async fn grant_insert(&self, grant: &Grant) -> anyhow::Result<InsertOutcome>;

    /// Find a grant by its ID
    async fn grant_find(&self, id: Uuid) -> anyhow::Result<Option<Grant>>;

    /// Delete a grant, returning whether it existed
    async fn grant_delete(&self, id: Uuid) -> anyhow::Result<bool>;

    /// Grants whose `expires_at` is at or before `now`, oldest deadline first
    async fn grant_find_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<Grant>>;

    /// Number of outstanding grants
    async fn grant_count(&self) -> anyhow::Result<u64>;
}
