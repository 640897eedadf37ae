// In-memory persistence backend
// Uniqueness constraints are enforced through DashMap's entry API

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use idemgate_common::{OperationKey, ServiceOperation, StorageMode};
use idemgate_consistency::{ExecutionLease, LeaseStore};

use crate::model::{
    FailedResult, Grant, InsertOutcome, LockAuditRecord, OperationConfig, OperationRecord,
    StoredResult,
};
use crate::traits::{
    FailedResultPersistence, GrantPersistence, LockAuditPersistence, OperationConfigPersistence,
    OperationRecordPersistence, PersistenceService, StoredResultPersistence,
};

/// Process-local persistence
///
/// Every collection lives in a `DashMap`. Nothing survives a restart, which
/// makes this backend suitable for tests and single-process deployments that
/// accept losing in-flight grants.
#[derive(Default)]
pub struct MemoryPersistService {
    configs: DashMap<ServiceOperation, OperationConfig>,
    operations: DashMap<Uuid, OperationRecord>,
    grants: DashMap<Uuid, Grant>,
    /// Unique index: key triple -> grant ID
    grant_index: DashMap<OperationKey, Uuid>,
    results: DashMap<OperationKey, StoredResult>,
    failed: DashMap<Uuid, FailedResult>,
    audit: DashMap<Uuid, LockAuditRecord>,
    leases: DashMap<String, ExecutionLease>,
}

impl MemoryPersistService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored results (test and diagnostics helper)
    pub fn result_count(&self) -> usize {
        self.results.len()
    }

    /// Number of failure records (test and diagnostics helper)
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Number of request audit records (test and diagnostics helper)
    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }
}

fn insert_unique<K, V>(map: &DashMap<K, V>, key: K, value: &V) -> InsertOutcome
where
    K: std::hash::Hash + Eq,
    V: Clone,
{
    match map.entry(key) {
        Entry::Occupied(_) => InsertOutcome::Duplicate,
        Entry::Vacant(entry) => {
            entry.insert(value.clone());
            InsertOutcome::Inserted
        }
    }
}

#[async_trait]
impl OperationConfigPersistence for MemoryPersistService {
    async fn config_find(
        &self,
        key: &ServiceOperation,
    ) -> anyhow::Result<Option<OperationConfig>> {
        Ok(self.configs.get(key).map(|c| c.clone()))
    }

    async fn config_find_all(&self) -> anyhow::Result<Vec<OperationConfig>> {
        Ok(self.configs.iter().map(|c| c.value().clone()).collect())
    }

    async fn config_insert(&self, config: &OperationConfig) -> anyhow::Result<InsertOutcome> {
        Ok(insert_unique(
            &self.configs,
            config.service_operation(),
            config,
        ))
    }

    async fn config_save(&self, config: &OperationConfig) -> anyhow::Result<()> {
        self.configs
            .insert(config.service_operation(), config.clone());
        Ok(())
    }
}

#[async_trait]
impl OperationRecordPersistence for MemoryPersistService {
    async fn operation_insert(&self, record: &OperationRecord) -> anyhow::Result<()> {
        match insert_unique(&self.operations, record.id, record) {
            InsertOutcome::Inserted => Ok(()),
            InsertOutcome::Duplicate => {
                Err(anyhow::anyhow!("Operation record '{}' already exists", record.id))
            }
        }
    }

    async fn operation_find(&self, id: Uuid) -> anyhow::Result<Option<OperationRecord>> {
        Ok(self.operations.get(&id).map(|r| r.clone()))
    }
}

#[async_trait]
impl GrantPersistence for MemoryPersistService {
    async fn grant_insert(&self, grant: &Grant) -> anyhow::Result<InsertOutcome> {
        // The index shard stays locked until both maps are written
        match self.grant_index.entry(grant.key()) {
            Entry::Occupied(_) => Ok(InsertOutcome::Duplicate),
            Entry::Vacant(entry) => {
                self.grants.insert(grant.id, grant.clone());
                entry.insert(grant.id);
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    async fn grant_find(&self, id: Uuid) -> anyhow::Result<Option<Grant>> {
        Ok(self.grants.get(&id).map(|g| g.clone()))
    }

    async fn grant_delete(&self, id: Uuid) -> anyhow::Result<bool> {
        match self.grants.remove(&id) {
            Some((_, grant)) => {
                self.grant_index
                    .remove_if(&grant.key(), |_, indexed| *indexed == id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn grant_find_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<Grant>> {
        let mut expired: Vec<Grant> = self
            .grants
            .iter()
            .filter(|g| g.is_expired(now))
            .map(|g| g.value().clone())
            .collect();
        expired.sort_by_key(|g| g.expires_at);
        expired.truncate(limit);
        Ok(expired)
    }

    async fn grant_count(&self) -> anyhow::Result<u64> {
        Ok(self.grants.len() as u64)
    }
}

#[async_trait]
impl StoredResultPersistence for MemoryPersistService {
    async fn result_insert(&self, result: &StoredResult) -> anyhow::Result<InsertOutcome> {
        Ok(insert_unique(&self.results, result.key(), result))
    }

    async fn result_find(&self, key: &OperationKey) -> anyhow::Result<Option<StoredResult>> {
        Ok(self.results.get(key).map(|r| r.clone()))
    }
}

#[async_trait]
impl FailedResultPersistence for MemoryPersistService {
    async fn failed_insert(&self, failed: &FailedResult) -> anyhow::Result<InsertOutcome> {
        Ok(insert_unique(&self.failed, failed.grant_id, failed))
    }

    async fn failed_find(&self, grant_id: Uuid) -> anyhow::Result<Option<FailedResult>> {
        Ok(self.failed.get(&grant_id).map(|f| f.clone()))
    }

    async fn failed_delete(&self, grant_id: Uuid) -> anyhow::Result<bool> {
        Ok(self.failed.remove(&grant_id).is_some())
    }
}

#[async_trait]
impl LockAuditPersistence for MemoryPersistService {
    async fn audit_insert(&self, record: &LockAuditRecord) -> anyhow::Result<InsertOutcome> {
        Ok(insert_unique(&self.audit, record.grant_id, record))
    }

    async fn audit_find(&self, grant_id: Uuid) -> anyhow::Result<Option<LockAuditRecord>> {
        Ok(self.audit.get(&grant_id).map(|a| a.clone()))
    }
}

#[async_trait]
impl LeaseStore for MemoryPersistService {
    async fn lease_try_insert(
        &self,
        lease: &ExecutionLease,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        match self.leases.entry(lease.name.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_held(now) {
                    return Ok(false);
                }
                entry.insert(lease.clone());
                Ok(true)
            }
            Entry::Vacant(entry) => {
                entry.insert(lease.clone());
                Ok(true)
            }
        }
    }

    async fn lease_find(&self, name: &str) -> anyhow::Result<Option<ExecutionLease>> {
        Ok(self.leases.get(name).map(|l| l.clone()))
    }

    async fn lease_unlock(
        &self,
        name: &str,
        owner: &str,
        unlock_at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        match self.leases.get_mut(name) {
            Some(mut lease) if lease.owner == owner => {
                lease.lock_until = unlock_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl PersistenceService for MemoryPersistService {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::Memory
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
