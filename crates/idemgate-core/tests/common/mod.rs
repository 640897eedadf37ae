//! Common test utilities for integration testing
//!
//! This module provides shared test infrastructure including:
//! - FaultyBackend: an in-memory backend whose individual writes can be made to fail
//! - Helpers building an `IdempotencyService` over a backend

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use idemgate_common::{CoordinatorSettings, OperationKey, ReaperSettings, ServiceOperation, StorageMode};
use idemgate_consistency::{ExecutionLease, LeaseStore};
use idemgate_core::{IdempotencyService, Stores};
use idemgate_persistence::{
    FailedResult, FailedResultPersistence, Grant, GrantPersistence, InsertOutcome,
    LockAuditPersistence, LockAuditRecord, LockDisposition, MemoryPersistService, OperationConfig,
    OperationConfigPersistence, OperationRecord, OperationRecordPersistence, PersistenceService,
    StoredResult, StoredResultPersistence,
};

/// Store calls that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    OperationInsert,
    ConfigInsert,
    GrantInsert,
    GrantDelete,
    ResultInsert,
    FailedInsert,
    /// Fail the failure-record insert of one grant only
    FailedInsertFor(Uuid),
    AuditInsert,
}

/// In-memory backend with switchable failures
#[derive(Default)]
pub struct FaultyBackend {
    pub inner: MemoryPersistService,
    faults: Mutex<HashSet<Fault>>,
    /// Hold `Released` audit writes back to widen race windows
    release_audit_delay: Mutex<Option<Duration>>,
}

impl FaultyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&self, fault: Fault) {
        self.faults.lock().insert(fault);
    }

    pub fn heal(&self, fault: Fault) {
        self.faults.lock().remove(&fault);
    }

    pub fn delay_release_audit(&self, delay: Duration) {
        *self.release_audit_delay.lock() = Some(delay);
    }

    fn check(&self, fault: Fault) -> anyhow::Result<()> {
        if self.faults.lock().contains(&fault) {
            return Err(anyhow::anyhow!("injected fault: {:?}", fault));
        }
        Ok(())
    }
}

#[async_trait]
impl OperationConfigPersistence for FaultyBackend {
    async fn config_find(&self, key: &ServiceOperation) -> anyhow::Result<Option<OperationConfig>> {
        self.inner.config_find(key).await
    }

    async fn config_find_all(&self) -> anyhow::Result<Vec<OperationConfig>> {
        self.inner.config_find_all().await
    }

    async fn config_insert(&self, config: &OperationConfig) -> anyhow::Result<InsertOutcome> {
        self.check(Fault::ConfigInsert)?;
        self.inner.config_insert(config).await
    }

    async fn config_save(&self, config: &OperationConfig) -> anyhow::Result<()> {
        self.inner.config_save(config).await
    }
}

#[async_trait]
impl OperationRecordPersistence for FaultyBackend {
    async fn operation_insert(&self, record: &OperationRecord) -> anyhow::Result<()> {
        self.check(Fault::OperationInsert)?;
        self.inner.operation_insert(record).await
    }

    async fn operation_find(&self, id: Uuid) -> anyhow::Result<Option<OperationRecord>> {
        self.inner.operation_find(id).await
    }
}

#[async_trait]
impl GrantPersistence for FaultyBackend {
    async fn grant_insert(&self, grant: &Grant) -> anyhow::Result<InsertOutcome> {
        self.check(Fault::GrantInsert)?;
        self.inner.grant_insert(grant).await
    }

    async fn grant_find(&self, id: Uuid) -> anyhow::Result<Option<Grant>> {
        self.inner.grant_find(id).await
    }

    async fn grant_delete(&self, id: Uuid) -> anyhow::Result<bool> {
        self.check(Fault::GrantDelete)?;
        self.inner.grant_delete(id).await
    }

    async fn grant_find_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<Grant>> {
        self.inner.grant_find_expired(now, limit).await
    }

    async fn grant_count(&self) -> anyhow::Result<u64> {
        self.inner.grant_count().await
    }
}

#[async_trait]
impl StoredResultPersistence for FaultyBackend {
    async fn result_insert(&self, result: &StoredResult) -> anyhow::Result<InsertOutcome> {
        self.check(Fault::ResultInsert)?;
        self.inner.result_insert(result).await
    }

    async fn result_find(&self, key: &OperationKey) -> anyhow::Result<Option<StoredResult>> {
        self.inner.result_find(key).await
    }
}

#[async_trait]
impl FailedResultPersistence for FaultyBackend {
    async fn failed_insert(&self, failed: &FailedResult) -> anyhow::Result<InsertOutcome> {
        self.check(Fault::FailedInsert)?;
        self.check(Fault::FailedInsertFor(failed.grant_id))?;
        self.inner.failed_insert(failed).await
    }

    async fn failed_find(&self, grant_id: Uuid) -> anyhow::Result<Option<FailedResult>> {
        self.inner.failed_find(grant_id).await
    }

    async fn failed_delete(&self, grant_id: Uuid) -> anyhow::Result<bool> {
        self.inner.failed_delete(grant_id).await
    }
}

#[async_trait]
impl LockAuditPersistence for FaultyBackend {
    async fn audit_insert(&self, record: &LockAuditRecord) -> anyhow::Result<InsertOutcome> {
        self.check(Fault::AuditInsert)?;
        let delay = *self.release_audit_delay.lock();
        if let Some(delay) = delay.filter(|_| record.disposition == LockDisposition::Released) {
            tokio::time::sleep(delay).await;
        }
        self.inner.audit_insert(record).await
    }

    async fn audit_find(&self, grant_id: Uuid) -> anyhow::Result<Option<LockAuditRecord>> {
        self.inner.audit_find(grant_id).await
    }
}

#[async_trait]
impl LeaseStore for FaultyBackend {
    async fn lease_try_insert(&self, lease: &ExecutionLease, now: DateTime<Utc>) -> anyhow::Result<bool> {
        self.inner.lease_try_insert(lease, now).await
    }

    async fn lease_find(&self, name: &str) -> anyhow::Result<Option<ExecutionLease>> {
        self.inner.lease_find(name).await
    }

    async fn lease_unlock(&self, name: &str, owner: &str, unlock_at: DateTime<Utc>) -> anyhow::Result<bool> {
        self.inner.lease_unlock(name, owner, unlock_at).await
    }
}

#[async_trait]
impl PersistenceService for FaultyBackend {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::Memory
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Reaper settings for tests that drive sweeps by hand
pub fn manual_reaper_settings() -> ReaperSettings {
    ReaperSettings {
        sweep_interval: Duration::from_secs(3600),
        fast_path: false,
        ..Default::default()
    }
}

/// Service over a fresh in-memory backend
pub fn memory_service() -> (IdempotencyService, Arc<MemoryPersistService>) {
    let backend = Arc::new(MemoryPersistService::new());
    let service = IdempotencyService::new(
        Stores::from_backend(backend.clone()),
        CoordinatorSettings::default(),
        manual_reaper_settings(),
    );
    (service, backend)
}

/// Service over a fresh faulty backend
pub fn faulty_service() -> (IdempotencyService, Arc<FaultyBackend>) {
    let backend = Arc::new(FaultyBackend::new());
    let service = IdempotencyService::new(
        Stores::from_backend(backend.clone()),
        CoordinatorSettings::default(),
        manual_reaper_settings(),
    );
    (service, backend)
}

/// Persist a config for `svc/op` before the service first sees it
pub async fn configure(
    backend: &dyn OperationConfigPersistence,
    lock_duration: Duration,
    allow_save_on_expired: bool,
) {
    backend
        .config_insert(&OperationConfig::new(
            "svc",
            "op",
            lock_duration,
            allow_save_on_expired,
        ))
        .await
        .unwrap();
}
