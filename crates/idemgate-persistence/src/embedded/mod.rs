// Embedded persistence backend using RocksDB
// Provides durable single-node storage without an external database

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rocksdb::{BlockBasedOptions, ColumnFamilyDescriptor, DB, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::info;
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

pub const CF_OPERATION_CONFIG: &str = "operation_config";
pub const CF_OPERATIONS: &str = "operations";
pub const CF_GRANTS: &str = "grants";
/// Unique index of grants by key triple
pub const CF_GRANT_KEYS: &str = "grant_keys";
pub const CF_RESULTS: &str = "results";
pub const CF_FAILED_RESULTS: &str = "failed_results";
pub const CF_LOCK_AUDIT: &str = "lock_audit";
pub const CF_LEASES: &str = "leases";

const COLUMN_FAMILIES: [&str; 8] = [
    CF_OPERATION_CONFIG,
    CF_OPERATIONS,
    CF_GRANTS,
    CF_GRANT_KEYS,
    CF_RESULTS,
    CF_FAILED_RESULTS,
    CF_LOCK_AUDIT,
    CF_LEASES,
];

/// Standalone embedded persistence using RocksDB
///
/// Each collection is a column family holding JSON values. Check-then-write
/// sequences run under a single write mutex, so uniqueness constraints hold
/// for every caller sharing this instance.
pub struct EmbeddedPersistService {
    db: Arc<DB>,
    write_lock: Mutex<()>,
}

impl EmbeddedPersistService {
    /// Open (or create) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        std::fs::create_dir_all(path.as_ref())?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        // Point lookups dominate, so every column family gets a bloom filter
        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);

        let mut cf_opts = Options::default();
        cf_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        cf_opts.set_block_based_table_factory(&block_opts);

        let cfs = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, cf_opts.clone()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cfs)
            .map_err(|e| anyhow::anyhow!("RocksDB open error: {}", e))?;

        info!(path = %path.as_ref().display(), "Embedded idempotency store opened");
        Ok(Self::new(Arc::new(db)))
    }

    /// Create from a raw RocksDB instance that already has every column family
    pub fn new(db: Arc<DB>) -> Self {
        Self {
            db,
            write_lock: Mutex::new(()),
        }
    }

    /// Get a column family handle
    fn cf(&self, name: &str) -> anyhow::Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| anyhow::anyhow!("Column family '{}' not found", name))
    }

    /// Read and decode a JSON value
    fn get_json<T: DeserializeOwned>(&self, cf_name: &str, key: &str) -> anyhow::Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self
            .db
            .get_cf(cf, key.as_bytes())
            .map_err(|e| anyhow::anyhow!("RocksDB get error: {}", e))?
        {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Write a JSON value to a column family
    fn put_json<T: Serialize>(&self, cf_name: &str, key: &str, value: &T) -> anyhow::Result<()> {
        let cf = self.cf(cf_name)?;
        self.db
            .put_cf(cf, key.as_bytes(), serde_json::to_vec(value)?)
            .map_err(|e| anyhow::anyhow!("RocksDB put error: {}", e))
    }

    /// Write a JSON value unless the key is already present
    fn insert_unique<T: Serialize>(
        &self,
        cf_name: &str,
        key: &str,
        value: &T,
    ) -> anyhow::Result<InsertOutcome> {
        let _guard = self.write_lock.lock();
        if self.key_exists(cf_name, key)? {
            return Ok(InsertOutcome::Duplicate);
        }
        self.put_json(cf_name, key, value)?;
        Ok(InsertOutcome::Inserted)
    }

    fn key_exists(&self, cf_name: &str, key: &str) -> anyhow::Result<bool> {
        let cf = self.cf(cf_name)?;
        Ok(self
            .db
            .get_pinned_cf(cf, key.as_bytes())
            .map_err(|e| anyhow::anyhow!("RocksDB get error: {}", e))?
            .is_some())
    }

    /// Delete a key from a column family, returning whether it existed
    fn delete_key(&self, cf_name: &str, key: &str) -> anyhow::Result<bool> {
        let _guard = self.write_lock.lock();
        if !self.key_exists(cf_name, key)? {
            return Ok(false);
        }
        let cf = self.cf(cf_name)?;
        self.db
            .delete_cf(cf, key.as_bytes())
            .map_err(|e| anyhow::anyhow!("RocksDB delete error: {}", e))?;
        Ok(true)
    }

    /// Decode every value of a column family
    fn scan_json<T: DeserializeOwned>(&self, cf_name: &str) -> anyhow::Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut items = Vec::new();
        for entry in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_, value) = entry.map_err(|e| anyhow::anyhow!("RocksDB iterator error: {}", e))?;
            items.push(serde_json::from_slice(&value)?);
        }
        Ok(items)
    }

    fn write(&self, batch: WriteBatch) -> anyhow::Result<()> {
        self.db
            .write(batch)
            .map_err(|e| anyhow::anyhow!("RocksDB write error: {}", e))
    }
}

#[async_trait]
impl OperationConfigPersistence for EmbeddedPersistService {
    async fn config_find(
        &self,
        key: &ServiceOperation,
    ) -> anyhow::Result<Option<OperationConfig>> {
        self.get_json(CF_OPERATION_CONFIG, &key.storage_key())
    }

    async fn config_find_all(&self) -> anyhow::Result<Vec<OperationConfig>> {
        self.scan_json(CF_OPERATION_CONFIG)
    }

    async fn config_insert(&self, config: &OperationConfig) -> anyhow::Result<InsertOutcome> {
        self.insert_unique(
            CF_OPERATION_CONFIG,
            &config.service_operation().storage_key(),
            config,
        )
    }

    async fn config_save(&self, config: &OperationConfig) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock();
        self.put_json(
            CF_OPERATION_CONFIG,
            &config.service_operation().storage_key(),
            config,
        )
    }
}

#[async_trait]
impl OperationRecordPersistence for EmbeddedPersistService {
    async fn operation_insert(&self, record: &OperationRecord) -> anyhow::Result<()> {
        match self.insert_unique(CF_OPERATIONS, &record.id.to_string(), record)? {
            InsertOutcome::Inserted => Ok(()),
            InsertOutcome::Duplicate => {
                Err(anyhow::anyhow!("Operation record '{}' already exists", record.id))
            }
        }
    }

    async fn operation_find(&self, id: Uuid) -> anyhow::Result<Option<OperationRecord>> {
        self.get_json(CF_OPERATIONS, &id.to_string())
    }
}

#[async_trait]
impl GrantPersistence for EmbeddedPersistService {
    async fn grant_insert(&self, grant: &Grant) -> anyhow::Result<InsertOutcome> {
        let index_key = grant.key().storage_key();
        let _guard = self.write_lock.lock();
        if self.key_exists(CF_GRANT_KEYS, &index_key)? {
            return Ok(InsertOutcome::Duplicate);
        }

        let grant_id = grant.id.to_string();
        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_GRANTS)?,
            grant_id.as_bytes(),
            serde_json::to_vec(grant)?,
        );
        batch.put_cf(
            self.cf(CF_GRANT_KEYS)?,
            index_key.as_bytes(),
            grant_id.as_bytes(),
        );
        self.write(batch)?;
        Ok(InsertOutcome::Inserted)
    }

    async fn grant_find(&self, id: Uuid) -> anyhow::Result<Option<Grant>> {
        self.get_json(CF_GRANTS, &id.to_string())
    }

    async fn grant_delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let grant_id = id.to_string();
        let _guard = self.write_lock.lock();
        let Some(grant) = self.get_json::<Grant>(CF_GRANTS, &grant_id)? else {
            return Ok(false);
        };

        let index_key = grant.key().storage_key();
        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf(CF_GRANTS)?, grant_id.as_bytes());

        // Only drop the index entry while it still points at this grant
        let indexed = self
            .db
            .get_cf(self.cf(CF_GRANT_KEYS)?, index_key.as_bytes())
            .map_err(|e| anyhow::anyhow!("RocksDB get error: {}", e))?;
        if indexed.as_deref() == Some(grant_id.as_bytes()) {
            batch.delete_cf(self.cf(CF_GRANT_KEYS)?, index_key.as_bytes());
        }

        self.write(batch)?;
        Ok(true)
    }

    async fn grant_find_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<Grant>> {
        let mut expired: Vec<Grant> = self
            .scan_json::<Grant>(CF_GRANTS)?
            .into_iter()
            .filter(|g| g.is_expired(now))
            .collect();
        expired.sort_by_key(|g| g.expires_at);
        expired.truncate(limit);
        Ok(expired)
    }

    async fn grant_count(&self) -> anyhow::Result<u64> {
        let cf = self.cf(CF_GRANTS)?;
        let mut count = 0u64;
        for entry in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            entry.map_err(|e| anyhow::anyhow!("RocksDB iterator error: {}", e))?;
            count += 1;
        }
        Ok(count)
    }
}

#[async_trait]
impl StoredResultPersistence for EmbeddedPersistService {
    async fn result_insert(&self, result: &StoredResult) -> anyhow::Result<InsertOutcome> {
        self.insert_unique(CF_RESULTS, &result.key().storage_key(), result)
    }

    async fn result_find(&self, key: &OperationKey) -> anyhow::Result<Option<StoredResult>> {
        self.get_json(CF_RESULTS, &key.storage_key())
    }
}

#[async_trait]
impl FailedResultPersistence for EmbeddedPersistService {
    async fn failed_insert(&self, failed: &FailedResult) -> anyhow::Result<InsertOutcome> {
        self.insert_unique(CF_FAILED_RESULTS, &failed.grant_id.to_string(), failed)
    }

    async fn failed_find(&self, grant_id: Uuid) -> anyhow::Result<Option<FailedResult>> {
        self.get_json(CF_FAILED_RESULTS, &grant_id.to_string())
    }

    async fn failed_delete(&self, grant_id: Uuid) -> anyhow::Result<bool> {
        self.delete_key(CF_FAILED_RESULTS, &grant_id.to_string())
    }
}

#[async_trait]
impl LockAuditPersistence for EmbeddedPersistService {
    async fn audit_insert(&self, record: &LockAuditRecord) -> anyhow::Result<InsertOutcome> {
        self.insert_unique(CF_LOCK_AUDIT, &record.grant_id.to_string(), record)
    }

    async fn audit_find(&self, grant_id: Uuid) -> anyhow::Result<Option<LockAuditRecord>> {
        self.get_json(CF_LOCK_AUDIT, &grant_id.to_string())
    }
}

#[async_trait]
impl LeaseStore for EmbeddedPersistService {
    async fn lease_try_insert(
        &self,
        lease: &ExecutionLease,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let _guard = self.write_lock.lock();
        if let Some(current) = self.get_json::<ExecutionLease>(CF_LEASES, &lease.name)?
            && current.is_held(now)
        {
            return Ok(false);
        }
        self.put_json(CF_LEASES, &lease.name, lease)?;
        Ok(true)
    }

    async fn lease_find(&self, name: &str) -> anyhow::Result<Option<ExecutionLease>> {
        self.get_json(CF_LEASES, name)
    }

    async fn lease_unlock(
        &self,
        name: &str,
        owner: &str,
        unlock_at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let _guard = self.write_lock.lock();
        match self.get_json::<ExecutionLease>(CF_LEASES, name)? {
            Some(mut lease) if lease.owner == owner => {
                lease.lock_until = unlock_at;
                self.put_json(CF_LEASES, name, &lease)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl PersistenceService for EmbeddedPersistService {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::Embedded
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        // Verify we can access column families
        for name in COLUMN_FAMILIES {
            self.cf(name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_test_service() -> (EmbeddedPersistService, TempDir) {
        let tmp_dir = TempDir::new().unwrap();
        let service = EmbeddedPersistService::open(tmp_dir.path()).unwrap();
        (service, tmp_dir)
    }

    fn grant_for(key: &OperationKey, expires_in_ms: i64) -> Grant {
        let now = Utc::now();
        Grant {
            id: Uuid::new_v4(),
            operation_id: Uuid::new_v4(),
            service: key.service.clone(),
            operation: key.operation.clone(),
            idempotency_key: key.idempotency_key.clone(),
            locked_at: now,
            expires_at: now + chrono::Duration::milliseconds(expires_in_ms),
        }
    }

    // ==================== Grant Tests ====================

    #[tokio::test]
    async fn test_grant_insert_find_delete() {
        let (svc, _tmp) = create_test_service();
        let key = OperationKey::new("payments", "charge", "abc-1");
        let grant = grant_for(&key, 5000);

        assert!(svc.grant_insert(&grant).await.unwrap().is_inserted());
        assert_eq!(svc.grant_find(grant.id).await.unwrap(), Some(grant.clone()));
        assert_eq!(svc.grant_count().await.unwrap(), 1);

        let rival = grant_for(&key, 5000);
        assert_eq!(svc.grant_insert(&rival).await.unwrap(), InsertOutcome::Duplicate);

        assert!(svc.grant_delete(grant.id).await.unwrap());
        assert!(!svc.grant_delete(grant.id).await.unwrap());
        assert!(svc.grant_find(grant.id).await.unwrap().is_none());
        assert!(svc.grant_insert(&rival).await.unwrap().is_inserted());
    }

    #[tokio::test]
    async fn test_grant_keys_with_separators_do_not_collide() {
        let (svc, _tmp) = create_test_service();
        let a = grant_for(&OperationKey::new("a:b", "c", "d"), 5000);
        let b = grant_for(&OperationKey::new("a", "b:c", "d"), 5000);

        assert!(svc.grant_insert(&a).await.unwrap().is_inserted());
        assert!(svc.grant_insert(&b).await.unwrap().is_inserted());
    }

    #[tokio::test]
    async fn test_grant_find_expired() {
        let (svc, _tmp) = create_test_service();
        let late = grant_for(&OperationKey::new("svc", "op", "late"), -10);
        let early = grant_for(&OperationKey::new("svc", "op", "early"), -500);
        let live = grant_for(&OperationKey::new("svc", "op", "live"), 60_000);
        for grant in [&late, &early, &live] {
            svc.grant_insert(grant).await.unwrap();
        }

        let expired = svc.grant_find_expired(Utc::now(), 100).await.unwrap();
        assert_eq!(
            expired.iter().map(|g| g.id).collect::<Vec<_>>(),
            vec![early.id, late.id]
        );
    }

    // ==================== Result Tests ====================

    #[tokio::test]
    async fn test_result_insert_is_unique() {
        let (svc, _tmp) = create_test_service();
        let key = OperationKey::new("svc", "op", "k");

        let first = StoredResult::new(&key, "{\"id\":1}", Utc::now());
        assert!(svc.result_insert(&first).await.unwrap().is_inserted());
        let second = StoredResult::new(&key, "{\"id\":2}", Utc::now());
        assert_eq!(svc.result_insert(&second).await.unwrap(), InsertOutcome::Duplicate);

        let found = svc.result_find(&key).await.unwrap().unwrap();
        assert_eq!(found.payload, "{\"id\":1}");
        assert!(
            svc.result_find(&OperationKey::new("svc", "op", "other"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_failed_result_crud() {
        let (svc, _tmp) = create_test_service();
        let operation_id = Uuid::new_v4();
        let failed = FailedResult {
            grant_id: Uuid::new_v4(),
            operation_id,
            error_message: "operation expired".to_string(),
            created_at: Utc::now(),
        };

        assert!(svc.failed_insert(&failed).await.unwrap().is_inserted());
        assert_eq!(svc.failed_insert(&failed).await.unwrap(), InsertOutcome::Duplicate);
        assert_eq!(svc.failed_find(failed.grant_id).await.unwrap(), Some(failed.clone()));
        assert_eq!(svc.failed_find(failed.grant_id).await.unwrap().unwrap().operation_id, operation_id);
        assert!(svc.failed_delete(failed.grant_id).await.unwrap());
        assert!(!svc.failed_delete(failed.grant_id).await.unwrap());
    }

    // ==================== Config / Audit Tests ====================

    #[tokio::test]
    async fn test_config_insert_save_and_find_all() {
        let (svc, _tmp) = create_test_service();
        let config = OperationConfig::new("svc", "op", Duration::from_millis(5000), true);
        assert!(svc.config_insert(&config).await.unwrap().is_inserted());

        let replacement = OperationConfig::new("svc", "op", Duration::from_millis(250), false);
        assert_eq!(
            svc.config_insert(&replacement).await.unwrap(),
            InsertOutcome::Duplicate
        );
        svc.config_save(&replacement).await.unwrap();

        let found = svc
            .config_find(&ServiceOperation::new("svc", "op"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, replacement);
        assert_eq!(svc.config_find_all().await.unwrap(), vec![replacement]);
    }

    #[tokio::test]
    async fn test_operation_and_audit_records() {
        let (svc, _tmp) = create_test_service();
        let key = OperationKey::new("svc", "op", "k");
        let record = OperationRecord::new(&key, Utc::now());
        svc.operation_insert(&record).await.unwrap();
        assert!(svc.operation_insert(&record).await.is_err());
        assert_eq!(svc.operation_find(record.id).await.unwrap(), Some(record));

        let grant = grant_for(&key, 1000);
        let audit = LockAuditRecord::for_grant(
            &grant,
            Utc::now(),
            crate::model::LockDisposition::Reaped,
        );
        assert!(svc.audit_insert(&audit).await.unwrap().is_inserted());
        assert_eq!(svc.audit_insert(&audit).await.unwrap(), InsertOutcome::Duplicate);
        assert_eq!(svc.audit_find(grant.id).await.unwrap(), Some(audit));
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let tmp_dir = TempDir::new().unwrap();
        let key = OperationKey::new("svc", "op", "durable");
        let grant = grant_for(&key, 5000);
        {
            let svc = EmbeddedPersistService::open(tmp_dir.path()).unwrap();
            svc.grant_insert(&grant).await.unwrap();
        }

        let svc = EmbeddedPersistService::open(tmp_dir.path()).unwrap();
        assert_eq!(svc.grant_find(grant.id).await.unwrap(), Some(grant.clone()));
        assert_eq!(
            svc.grant_insert(&grant_for(&key, 5000)).await.unwrap(),
            InsertOutcome::Duplicate
        );
    }

    #[tokio::test]
    async fn test_lease_store_semantics() {
        let (svc, _tmp) = create_test_service();
        let now = Utc::now();
        let lease = ExecutionLease::new("sweep", "node-1", now, Duration::from_secs(60));
        let rival = ExecutionLease::new("sweep", "node-2", now, Duration::from_secs(60));

        assert!(svc.lease_try_insert(&lease, now).await.unwrap());
        assert!(!svc.lease_try_insert(&rival, now).await.unwrap());
        assert!(svc.lease_unlock("sweep", "node-1", now).await.unwrap());
        assert!(svc.lease_try_insert(&rival, now).await.unwrap());
        assert_eq!(svc.lease_find("sweep").await.unwrap().unwrap().owner, "node-2");
    }

    #[tokio::test]
    async fn test_health_check_and_storage_mode() {
        let (svc, _tmp) = create_test_service();
        assert!(svc.health_check().await.is_ok());
        assert_eq!(svc.storage_mode(), StorageMode::Embedded);
    }
}
