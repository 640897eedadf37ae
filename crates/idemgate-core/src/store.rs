// Store adapters over the persistence traits
// Translate uniqueness violations into benign-race outcomes; no other business logic

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use idemgate_common::{IdempotencyError, OPERATION_EXPIRED_REASON, OperationKey};
use idemgate_consistency::LeaseStore;
use idemgate_persistence::{
    FailedResult, FailedResultPersistence, Grant, GrantPersistence, InsertOutcome,
    LockAuditPersistence, LockAuditRecord, LockDisposition, OperationConfigPersistence,
    OperationRecordPersistence, PersistenceService, StoredResult, StoredResultPersistence,
};

/// Handles to every durable store the coordinator and the reaper use
///
/// Each store is a separate trait object so a single collection can be
/// swapped (for example by a failure-injecting wrapper in tests).
#[derive(Clone)]
pub struct Stores {
    pub configs: Arc<dyn OperationConfigPersistence>,
    pub operations: Arc<dyn OperationRecordPersistence>,
    pub grants: Arc<dyn GrantPersistence>,
    pub results: Arc<dyn StoredResultPersistence>,
    pub failed: Arc<dyn FailedResultPersistence>,
    pub audit: Arc<dyn LockAuditPersistence>,
    pub leases: Arc<dyn LeaseStore>,
}

impl Stores {
    /// Use one backend for every store
    pub fn from_backend<B: PersistenceService + 'static>(backend: Arc<B>) -> Self {
        Self {
            configs: backend.clone(),
            operations: backend.clone(),
            grants: backend.clone(),
            results: backend.clone(),
            failed: backend.clone(),
            audit: backend.clone(),
            leases: backend,
        }
    }

    /// Persist a successful outcome
    ///
    /// Returns `false` when another writer already stored a result for the
    /// key triple; the first writer wins and this write is discarded.
    pub async fn record_success(
        &self,
        key: &OperationKey,
        payload: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, IdempotencyError> {
        let result = StoredResult::new(key, payload, now);
        match self.results.result_insert(&result).await {
            Ok(InsertOutcome::Inserted) => Ok(true),
            Ok(InsertOutcome::Duplicate) => {
                debug!(%key, "Result already stored by another writer");
                Ok(false)
            }
            Err(e) => Err(IdempotencyError::storage("failed to store result", e)),
        }
    }

    /// Persist a failure record for a grant; a record already present is kept
    pub async fn record_failure(
        &self,
        grant_id: Uuid,
        operation_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, IdempotencyError> {
        let failed = FailedResult {
            grant_id,
            operation_id,
            error_message: reason.to_string(),
            created_at: now,
        };
        match self.failed.failed_insert(&failed).await {
            Ok(outcome) => {
                if !outcome.is_inserted() {
                    debug!(%grant_id, "Failure already recorded for grant");
                }
                Ok(outcome.is_inserted())
            }
            Err(e) => Err(IdempotencyError::storage("failed to store failure record", e)),
        }
    }

    /// Append the audit record for a finalized grant; a repeat is benign
    pub async fn record_release(
        &self,
        grant: &Grant,
        released_at: DateTime<Utc>,
        disposition: LockDisposition,
    ) -> Result<bool, IdempotencyError> {
        let record = LockAuditRecord::for_grant(grant, released_at, disposition);
        self.audit
            .audit_insert(&record)
            .await
            .map(|outcome| outcome.is_inserted())
            .map_err(|e| IdempotencyError::storage("failed to write lock audit", e))
    }

    /// Drop the expiry record of a grant, logging instead of failing
    ///
    /// Only a record carrying the expiry reason is removed; a failure the
    /// holder reported itself is final.
    pub async fn clear_expiry_failure(&self, grant_id: Uuid) {
        let failed = match self.failed.failed_find(grant_id).await {
            Ok(Some(failed)) => failed,
            Ok(None) => return,
            Err(e) => {
                warn!(%grant_id, error = %e, "Failed to look up expiry record");
                return;
            }
        };
        if failed.error_message != OPERATION_EXPIRED_REASON {
            return;
        }
        match self.failed.failed_delete(grant_id).await {
            Ok(true) => debug!(%grant_id, "Removed stale expiry record"),
            Ok(false) => {}
            Err(e) => warn!(%grant_id, error = %e, "Failed to remove stale expiry record"),
        }
    }

    pub async fn audit_record(
        &self,
        grant_id: Uuid,
    ) -> Result<Option<LockAuditRecord>, IdempotencyError> {
        self.audit
            .audit_find(grant_id)
            .await
            .map_err(|e| IdempotencyError::storage("failed to look up lock audit", e))
    }

    pub async fn stored_result(
        &self,
        key: &OperationKey,
    ) -> Result<Option<StoredResult>, IdempotencyError> {
        self.results
            .result_find(key)
            .await
            .map_err(|e| IdempotencyError::storage("failed to look up result", e))
    }

    pub async fn failed_result(
        &self,
        grant_id: Uuid,
    ) -> Result<Option<FailedResult>, IdempotencyError> {
        self.failed
            .failed_find(grant_id)
            .await
            .map_err(|e| IdempotencyError::storage("failed to look up failure record", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idemgate_persistence::MemoryPersistService;

    fn stores() -> (Stores, Arc<MemoryPersistService>) {
        let backend = Arc::new(MemoryPersistService::new());
        (Stores::from_backend(backend.clone()), backend)
    }

    #[tokio::test]
    async fn test_duplicate_success_is_benign() {
        let (stores, backend) = stores();
        let key = OperationKey::new("svc", "op", "k");

        assert!(stores.record_success(&key, "first", Utc::now()).await.unwrap());
        assert!(!stores.record_success(&key, "second", Utc::now()).await.unwrap());
        assert_eq!(backend.result_count(), 1);
        assert_eq!(
            stores.stored_result(&key).await.unwrap().unwrap().payload,
            "first"
        );
    }

    #[tokio::test]
    async fn test_failure_written_once_per_grant() {
        let (stores, _) = stores();
        let grant_id = Uuid::new_v4();
        let operation_id = Uuid::new_v4();

        assert!(
            stores
                .record_failure(grant_id, operation_id, "boom", Utc::now())
                .await
                .unwrap()
        );
        assert!(
            !stores
                .record_failure(grant_id, operation_id, "again", Utc::now())
                .await
                .unwrap()
        );
        let failed = stores.failed_result(grant_id).await.unwrap().unwrap();
        assert_eq!(failed.error_message, "boom");
    }

    #[tokio::test]
    async fn test_only_expiry_records_are_cleared() {
        let (stores, _) = stores();
        let reported = Uuid::new_v4();
        let expired = Uuid::new_v4();
        let now = Utc::now();
        stores
            .record_failure(reported, Uuid::new_v4(), "card declined", now)
            .await
            .unwrap();
        stores
            .record_failure(expired, Uuid::new_v4(), OPERATION_EXPIRED_REASON, now)
            .await
            .unwrap();

        stores.clear_expiry_failure(reported).await;
        stores.clear_expiry_failure(expired).await;
        stores.clear_expiry_failure(Uuid::new_v4()).await;

        assert!(stores.failed_result(reported).await.unwrap().is_some());
        assert!(stores.failed_result(expired).await.unwrap().is_none());
    }
}
