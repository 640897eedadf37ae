// Lock Coordinator
// Turns a request into a stored result, an exclusive grant, or a rejection

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use idemgate_common::{
    CoordinatorSettings, ExecutionResult, IdempotencyError, OPERATION_EXPIRED_REASON,
    OPERATION_FAILED_REASON, OperationKey, deadline_from,
};
use idemgate_persistence::{Grant, InsertOutcome, LockDisposition, OperationRecord};

use crate::cache::{ActiveLockCache, OperationConfigCache};
use crate::metrics::{
    COMPLETE_FAILURE, COMPLETE_SUCCESS, LOCK_CONTENDED, LOCK_GRANTED, RESULT_CACHED,
};
use crate::store::Stores;

/// Grant handed to the caller that won the lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantTicket {
    pub grant_id: Uuid,
    pub operation_id: Uuid,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Result of `request_or_lock`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    /// The caller owns the grant and must call `complete`
    Locked(GrantTicket),
    /// A previous attempt already succeeded; carries its payload
    Success(String),
    /// Another holder owns the grant and has not finished yet
    AlreadyLocked,
    /// Infrastructure or validation fault
    OperationFailed(String),
}

impl LockOutcome {
    pub fn execution_result(&self) -> ExecutionResult {
        match self {
            LockOutcome::Locked(_) => ExecutionResult::OperationLockedSuccessfully,
            LockOutcome::Success(_) => ExecutionResult::Success,
            LockOutcome::AlreadyLocked => ExecutionResult::OperationAlreadyLocked,
            LockOutcome::OperationFailed(_) => ExecutionResult::OperationFailed,
        }
    }

    pub fn ticket(&self) -> Option<&GrantTicket> {
        match self {
            LockOutcome::Locked(ticket) => Some(ticket),
            _ => None,
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, LockOutcome::Locked(_))
    }
}

/// Outcome reported by a grant holder
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub grant_id: Option<Uuid>,
    pub operation_id: Option<Uuid>,
    pub success: bool,
    /// Result payload on success, failure reason otherwise
    pub payload: Option<String>,
}

impl Completion {
    pub fn success(ticket: &GrantTicket, payload: impl Into<String>) -> Self {
        Self {
            grant_id: Some(ticket.grant_id),
            operation_id: Some(ticket.operation_id),
            success: true,
            payload: Some(payload.into()),
        }
    }

    pub fn failure(ticket: &GrantTicket, reason: impl Into<String>) -> Self {
        Self {
            grant_id: Some(ticket.grant_id),
            operation_id: Some(ticket.operation_id),
            success: false,
            payload: Some(reason.into()),
        }
    }
}

/// The grant/deny protocol
///
/// Exclusivity comes from the grant store's uniqueness constraint on the key
/// triple; nothing here blocks on another caller.
pub struct LockCoordinator {
    stores: Stores,
    configs: Arc<OperationConfigCache>,
    active_locks: Arc<ActiveLockCache>,
    settings: CoordinatorSettings,
}

impl LockCoordinator {
    pub fn new(
        stores: Stores,
        configs: Arc<OperationConfigCache>,
        active_locks: Arc<ActiveLockCache>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            stores,
            configs,
            active_locks,
            settings,
        }
    }

    /// Return the stored result, grant the lock, or reject the request
    pub async fn request_or_lock(
        &self,
        service: &str,
        operation: &str,
        idempotency_key: &str,
    ) -> LockOutcome {
        if let Err(e) = validate_key(service, operation, idempotency_key) {
            return LockOutcome::OperationFailed(e.to_string());
        }
        let key = OperationKey::new(service, operation, idempotency_key);
        let now = Utc::now();

        let record = OperationRecord::new(&key, now);
        if let Err(e) = self.stores.operations.operation_insert(&record).await {
            let e = IdempotencyError::storage("failed to record operation", e);
            error!(%key, error = %e, "Request rejected");
            return LockOutcome::OperationFailed(e.to_string());
        }

        match self.stores.stored_result(&key).await {
            Ok(Some(result)) => {
                metrics::counter!(RESULT_CACHED).increment(1);
                debug!(%key, operation_id = %record.id, "Returning stored result");
                return LockOutcome::Success(result.payload);
            }
            Ok(None) => {}
            Err(e) => {
                error!(%key, operation_id = %record.id, error = %e, "Request rejected");
                return LockOutcome::OperationFailed(e.to_string());
            }
        }

        let config = self.configs.get(&key.service_operation()).await;
        let grant = Grant {
            id: Uuid::new_v4(),
            operation_id: record.id,
            service: key.service.clone(),
            operation: key.operation.clone(),
            idempotency_key: key.idempotency_key.clone(),
            locked_at: now,
            expires_at: deadline_from(now, config.lock_duration),
        };

        match self.stores.grants.grant_insert(&grant).await {
            Ok(InsertOutcome::Inserted) => {
                if self.settings.mirror_active_locks {
                    self.active_locks.insert(grant.clone());
                }
                metrics::counter!(LOCK_GRANTED).increment(1);
                info!(
                    %key,
                    grant_id = %grant.id,
                    operation_id = %grant.operation_id,
                    expires_at = %grant.expires_at,
                    "Lock granted"
                );
                LockOutcome::Locked(GrantTicket {
                    grant_id: grant.id,
                    operation_id: grant.operation_id,
                    locked_at: grant.locked_at,
                    expires_at: grant.expires_at,
                })
            }
            Ok(InsertOutcome::Duplicate) => {
                // The holder may have finished since the first lookup
                match self.stores.stored_result(&key).await {
                    Ok(Some(result)) => {
                        metrics::counter!(RESULT_CACHED).increment(1);
                        LockOutcome::Success(result.payload)
                    }
                    Ok(None) => {
                        metrics::counter!(LOCK_CONTENDED).increment(1);
                        debug!(%key, operation_id = %record.id, "Lock already held");
                        LockOutcome::AlreadyLocked
                    }
                    Err(e) => {
                        error!(%key, error = %e, "Request rejected");
                        LockOutcome::OperationFailed(e.to_string())
                    }
                }
            }
            Err(e) => {
                let e = IdempotencyError::storage("failed to create grant", e);
                error!(%key, operation_id = %record.id, error = %e, "Request rejected");
                LockOutcome::OperationFailed(e.to_string())
            }
        }
    }

    /// Record the holder's outcome and release the grant
    ///
    /// The outcome is written while the grant still blocks the key. The lock
    /// audit record, unique per grant, then decides who finalized it: this
    /// holder or the reaper.
    pub async fn complete(&self, completion: Completion) -> Result<(), IdempotencyError> {
        let grant_id = completion
            .grant_id
            .ok_or(IdempotencyError::MissingField("grant_id"))?;
        let operation_id = completion
            .operation_id
            .ok_or(IdempotencyError::MissingField("operation_id"))?;

        let (grant, live) = match self.resolve_grant(grant_id, operation_id).await? {
            ResolvedGrant::Live(grant) => (grant, true),
            ResolvedGrant::Reaped(grant) => (grant, false),
            ResolvedGrant::Released => {
                warn!(
                    %grant_id,
                    %operation_id,
                    success = completion.success,
                    "Grant already released by its holder, completion ignored"
                );
                self.active_locks.remove(grant_id);
                return Ok(());
            }
        };
        let key = grant.key();
        let now = Utc::now();

        let expired = grant.is_expired(now);
        let eligible = completion.success
            && (!expired
                || self
                    .configs
                    .is_allow_save_on_expired(&grant.service, &grant.operation)
                    .await);

        let mut stored = false;
        if eligible {
            let payload = completion.payload.as_deref().unwrap_or_default();
            stored = self.stores.record_success(&key, payload, now).await?;
            metrics::counter!(COMPLETE_SUCCESS).increment(1);
            info!(%key, %grant_id, %operation_id, late = expired, "Operation succeeded");
        } else {
            let reason = if completion.success {
                OPERATION_EXPIRED_REASON
            } else {
                completion
                    .payload
                    .as_deref()
                    .filter(|reason| !reason.is_empty())
                    .unwrap_or(OPERATION_FAILED_REASON)
            };
            self.stores
                .record_failure(grant_id, operation_id, reason, now)
                .await?;
            metrics::counter!(COMPLETE_FAILURE).increment(1);
            info!(%key, %grant_id, %operation_id, reason, "Operation failed");
        }

        if !live {
            // The reaper writes its audit record after the expiry record
            if stored {
                self.stores.clear_expiry_failure(grant_id).await;
            }
            self.active_locks.remove(grant_id);
            return Ok(());
        }

        let audit = match self
            .stores
            .record_release(&grant, now, LockDisposition::Released)
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => {
                if stored {
                    self.reconcile_with_reaper(grant_id).await;
                }
                Ok(())
            }
            Err(e) => {
                error!(%grant_id, error = %e, "Failed to write lock audit");
                Err(e)
            }
        };

        self.release_grant(grant_id).await;
        audit
    }

    /// Another finalizer wrote the audit record first. When it was the
    /// reaper, its expiry record no longer applies to a stored success.
    async fn reconcile_with_reaper(&self, grant_id: Uuid) {
        match self.stores.audit_record(grant_id).await {
            Ok(Some(audit)) if audit.disposition == LockDisposition::Reaped => {
                debug!(%grant_id, "Grant reaped during completion");
                self.stores.clear_expiry_failure(grant_id).await;
            }
            Ok(_) => {}
            Err(e) => warn!(%grant_id, error = %e, "Failed to look up lock audit"),
        }
    }

    /// Find the grant being completed
    ///
    /// A grant that is gone is recovered from the audit trail only when the
    /// reaper finalized it; a released grant stays final.
    async fn resolve_grant(
        &self,
        grant_id: Uuid,
        operation_id: Uuid,
    ) -> Result<ResolvedGrant, IdempotencyError> {
        let mismatch = || IdempotencyError::GrantMismatch {
            grant_id: grant_id.to_string(),
            operation_id: operation_id.to_string(),
        };

        let live = self
            .stores
            .grants
            .grant_find(grant_id)
            .await
            .map_err(|e| IdempotencyError::storage("failed to look up grant", e))?;
        if let Some(grant) = live {
            if grant.operation_id != operation_id {
                return Err(mismatch());
            }
            return Ok(ResolvedGrant::Live(grant));
        }

        let audit = self
            .stores
            .audit_record(grant_id)
            .await?
            .ok_or_else(|| IdempotencyError::GrantNotFound(grant_id.to_string()))?;
        if audit.operation_id != operation_id {
            return Err(mismatch());
        }
        if audit.disposition == LockDisposition::Released {
            return Ok(ResolvedGrant::Released);
        }

        let record = self
            .stores
            .operations
            .operation_find(operation_id)
            .await
            .map_err(|e| IdempotencyError::storage("failed to look up operation", e))?
            .ok_or_else(|| IdempotencyError::GrantNotFound(grant_id.to_string()))?;

        debug!(%grant_id, %operation_id, "Completing reaped grant");
        Ok(ResolvedGrant::Reaped(Grant {
            id: grant_id,
            operation_id,
            service: record.service,
            operation: record.operation,
            idempotency_key: record.idempotency_key,
            locked_at: audit.locked_at,
            expires_at: audit.expires_at,
        }))
    }

    async fn release_grant(&self, grant_id: Uuid) {
        if let Err(e) = self.stores.grants.grant_delete(grant_id).await {
            warn!(%grant_id, error = %e, "Failed to delete grant");
        }
        self.active_locks.remove(grant_id);
    }
}

enum ResolvedGrant {
    Live(Grant),
    Reaped(Grant),
    Released,
}

fn validate_key(
    service: &str,
    operation: &str,
    idempotency_key: &str,
) -> Result<(), IdempotencyError> {
    if service.is_empty() {
        return Err(IdempotencyError::MissingField("service"));
    }
    if operation.is_empty() {
        return Err(IdempotencyError::MissingField("operation"));
    }
    if idempotency_key.is_empty() {
        return Err(IdempotencyError::MissingField("idempotency_key"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use idemgate_persistence::{
        FailedResultPersistence, GrantPersistence, LockAuditPersistence, MemoryPersistService,
        OperationConfig, OperationConfigPersistence,
    };

    struct Fixture {
        coordinator: LockCoordinator,
        backend: Arc<MemoryPersistService>,
        active_locks: Arc<ActiveLockCache>,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(MemoryPersistService::new());
        let stores = Stores::from_backend(backend.clone());
        let settings = CoordinatorSettings::default();
        let configs = Arc::new(OperationConfigCache::new(stores.configs.clone(), &settings));
        let active_locks = Arc::new(ActiveLockCache::new());
        Fixture {
            coordinator: LockCoordinator::new(stores, configs, active_locks.clone(), settings),
            backend,
            active_locks,
        }
    }

    async fn short_lock(backend: &MemoryPersistService, allow_save_on_expired: bool) {
        backend
            .config_insert(&OperationConfig::new(
                "svc",
                "op",
                Duration::from_millis(20),
                allow_save_on_expired,
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_lock_then_complete_returns_cached_result() {
        let f = fixture();
        let outcome = f.coordinator.request_or_lock("svc", "op", "k").await;
        let ticket = outcome.ticket().cloned().unwrap();
        assert_eq!(
            outcome.execution_result(),
            ExecutionResult::OperationLockedSuccessfully
        );
        assert!(f.active_locks.contains(ticket.grant_id));

        f.coordinator
            .complete(Completion::success(&ticket, "R"))
            .await
            .unwrap();
        assert!(!f.active_locks.contains(ticket.grant_id));

        let again = f.coordinator.request_or_lock("svc", "op", "k").await;
        assert_eq!(again, LockOutcome::Success("R".to_string()));
        // Every request is recorded, whatever its outcome
        assert_eq!(f.backend.operation_count(), 2);
    }

    #[tokio::test]
    async fn test_second_request_is_already_locked() {
        let f = fixture();
        assert!(f.coordinator.request_or_lock("svc", "op", "k").await.is_locked());
        assert_eq!(
            f.coordinator.request_or_lock("svc", "op", "k").await,
            LockOutcome::AlreadyLocked
        );
        assert!(f.coordinator.request_or_lock("svc", "op", "other").await.is_locked());
    }

    #[tokio::test]
    async fn test_blank_fields_are_rejected() {
        let f = fixture();
        assert_eq!(
            f.coordinator.request_or_lock("", "op", "k").await,
            LockOutcome::OperationFailed("service is required".to_string())
        );
        assert_eq!(
            f.coordinator.request_or_lock("svc", "op", "").await,
            LockOutcome::OperationFailed("idempotency_key is required".to_string())
        );
        assert_eq!(f.backend.operation_count(), 0);
    }

    #[tokio::test]
    async fn test_complete_requires_identifiers() {
        let f = fixture();
        let err = f.coordinator.complete(Completion::default()).await.unwrap_err();
        assert!(matches!(err, IdempotencyError::MissingField("grant_id")));

        let err = f
            .coordinator
            .complete(Completion {
                grant_id: Some(Uuid::new_v4()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, IdempotencyError::MissingField("operation_id")));
        assert_eq!(err.execution_result(), ExecutionResult::OperationFailed);
    }

    #[tokio::test]
    async fn test_failure_records_reason_and_frees_key() {
        let f = fixture();
        let ticket = f
            .coordinator
            .request_or_lock("svc", "op", "k")
            .await
            .ticket()
            .cloned()
            .unwrap();

        f.coordinator
            .complete(Completion::failure(&ticket, "card declined"))
            .await
            .unwrap();

        let failed = f.backend.failed_find(ticket.grant_id).await.unwrap().unwrap();
        assert_eq!(failed.error_message, "card declined");
        assert_eq!(failed.operation_id, ticket.operation_id);
        let audit = f.backend.audit_find(ticket.grant_id).await.unwrap().unwrap();
        assert_eq!(audit.disposition, LockDisposition::Released);

        // No stored result, so a retry gets a fresh grant
        assert!(f.coordinator.request_or_lock("svc", "op", "k").await.is_locked());
    }

    #[tokio::test]
    async fn test_failure_without_reason_uses_default() {
        let f = fixture();
        let ticket = f
            .coordinator
            .request_or_lock("svc", "op", "k")
            .await
            .ticket()
            .cloned()
            .unwrap();
        f.coordinator
            .complete(Completion {
                payload: None,
                ..Completion::failure(&ticket, "")
            })
            .await
            .unwrap();

        let failed = f.backend.failed_find(ticket.grant_id).await.unwrap().unwrap();
        assert_eq!(failed.error_message, OPERATION_FAILED_REASON);
    }

    #[tokio::test]
    async fn test_late_success_rejected_when_not_allowed() {
        let f = fixture();
        short_lock(&f.backend, false).await;
        let ticket = f
            .coordinator
            .request_or_lock("svc", "op", "k")
            .await
            .ticket()
            .cloned()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        f.coordinator
            .complete(Completion::success(&ticket, "late"))
            .await
            .unwrap();

        let failed = f.backend.failed_find(ticket.grant_id).await.unwrap().unwrap();
        assert_eq!(failed.error_message, OPERATION_EXPIRED_REASON);
        assert_eq!(f.backend.result_count(), 0);
    }

    #[tokio::test]
    async fn test_late_success_honored_when_allowed() {
        let f = fixture();
        short_lock(&f.backend, true).await;
        let ticket = f
            .coordinator
            .request_or_lock("svc", "op", "k")
            .await
            .ticket()
            .cloned()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        f.coordinator
            .complete(Completion::success(&ticket, "late"))
            .await
            .unwrap();

        assert_eq!(
            f.coordinator.request_or_lock("svc", "op", "k").await,
            LockOutcome::Success("late".to_string())
        );
    }

    #[tokio::test]
    async fn test_complete_unknown_grant_is_not_found() {
        let f = fixture();
        let err = f
            .coordinator
            .complete(Completion {
                grant_id: Some(Uuid::new_v4()),
                operation_id: Some(Uuid::new_v4()),
                success: true,
                payload: Some("R".to_string()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, IdempotencyError::GrantNotFound(_)));
    }

    #[tokio::test]
    async fn test_complete_with_wrong_operation_is_mismatch() {
        let f = fixture();
        let ticket = f
            .coordinator
            .request_or_lock("svc", "op", "k")
            .await
            .ticket()
            .cloned()
            .unwrap();

        let err = f
            .coordinator
            .complete(Completion {
                operation_id: Some(Uuid::new_v4()),
                ..Completion::success(&ticket, "R")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, IdempotencyError::GrantMismatch { .. }));
        // The real holder can still finish
        assert!(f.backend.grant_find(ticket.grant_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_repeated_completion_is_benign() {
        let f = fixture();
        let ticket = f
            .coordinator
            .request_or_lock("svc", "op", "k")
            .await
            .ticket()
            .cloned()
            .unwrap();

        f.coordinator
            .complete(Completion::success(&ticket, "R"))
            .await
            .unwrap();
        // The holder already released the grant
        f.coordinator
            .complete(Completion::success(&ticket, "R2"))
            .await
            .unwrap();

        assert_eq!(f.backend.result_count(), 1);
        assert_eq!(
            f.coordinator.request_or_lock("svc", "op", "k").await,
            LockOutcome::Success("R".to_string())
        );
    }

    #[tokio::test]
    async fn test_success_after_failure_does_not_touch_next_holder() {
        let f = fixture();
        let failed = f
            .coordinator
            .request_or_lock("svc", "op", "k")
            .await
            .ticket()
            .cloned()
            .unwrap();
        f.coordinator
            .complete(Completion::failure(&failed, "card declined"))
            .await
            .unwrap();

        let retry = f
            .coordinator
            .request_or_lock("svc", "op", "k")
            .await
            .ticket()
            .cloned()
            .unwrap();
        f.coordinator
            .complete(Completion::success(&failed, "from failed grant"))
            .await
            .unwrap();

        assert_eq!(f.backend.result_count(), 0);
        assert_eq!(
            f.backend
                .failed_find(failed.grant_id)
                .await
                .unwrap()
                .unwrap()
                .error_message,
            "card declined"
        );
        assert!(f.backend.grant_find(retry.grant_id).await.unwrap().is_some());
        assert!(f.backend.audit_find(retry.grant_id).await.unwrap().is_none());
        assert_eq!(
            f.coordinator.request_or_lock("svc", "op", "k").await,
            LockOutcome::AlreadyLocked
        );
    }

    #[tokio::test]
    async fn test_success_after_reap_replaces_expiry_record() {
        let f = fixture();
        short_lock(&f.backend, true).await;
        let ticket = f
            .coordinator
            .request_or_lock("svc", "op", "k")
            .await
            .ticket()
            .cloned()
            .unwrap();

        // Finalize the way the reaper does: claim, expiry record, then audit
        let grant = f.backend.grant_find(ticket.grant_id).await.unwrap().unwrap();
        assert!(f.backend.grant_delete(grant.id).await.unwrap());
        f.coordinator
            .stores
            .record_failure(grant.id, grant.operation_id, OPERATION_EXPIRED_REASON, Utc::now())
            .await
            .unwrap();
        f.coordinator
            .stores
            .record_release(&grant, Utc::now(), LockDisposition::Reaped)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        f.coordinator
            .complete(Completion::success(&ticket, "late"))
            .await
            .unwrap();

        assert!(f.backend.failed_find(ticket.grant_id).await.unwrap().is_none());
        assert_eq!(
            f.backend.audit_find(ticket.grant_id).await.unwrap().unwrap().disposition,
            LockDisposition::Reaped
        );
        assert_eq!(
            f.coordinator.request_or_lock("svc", "op", "k").await,
            LockOutcome::Success("late".to_string())
        );
    }

    #[tokio::test]
    async fn test_mirroring_can_be_disabled() {
        let backend = Arc::new(MemoryPersistService::new());
        let stores = Stores::from_backend(backend);
        let settings = CoordinatorSettings {
            mirror_active_locks: false,
            ..Default::default()
        };
        let configs = Arc::new(OperationConfigCache::new(stores.configs.clone(), &settings));
        let active_locks = Arc::new(ActiveLockCache::new());
        let coordinator = LockCoordinator::new(stores, configs, active_locks.clone(), settings);

        assert!(coordinator.request_or_lock("svc", "op", "k").await.is_locked());
        assert!(active_locks.is_empty());
    }
}
