//! Domain model types for the persistence abstraction layer
//!
//! These types are stored by every backend and returned from the persistence
//! traits, decoupled from the storage technology.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use idemgate_common::{OperationKey, ServiceOperation};

/// Result of a uniqueness-constrained insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record was written
    Inserted,
    /// A record with the same unique key already exists; nothing was written
    Duplicate,
}

impl InsertOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted)
    }
}

/// Per-(service, operation) settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationConfig {
    pub id: Uuid,
    pub service: String,
    pub operation: String,
    #[serde(rename = "lockDurationMs", with = "duration_millis")]
    pub lock_duration: Duration,
    pub allow_save_on_expired: bool,
}

impl OperationConfig {
    pub fn new(
        service: impl Into<String>,
        operation: impl Into<String>,
        lock_duration: Duration,
        allow_save_on_expired: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            service: service.into(),
            operation: operation.into(),
            lock_duration,
            allow_save_on_expired,
        }
    }

    pub fn service_operation(&self) -> ServiceOperation {
        ServiceOperation::new(&self.service, &self.operation)
    }
}

/// Audit entry written for every incoming request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    pub id: Uuid,
    pub service: String,
    pub operation: String,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

impl OperationRecord {
    pub fn new(key: &OperationKey, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            service: key.service.clone(),
            operation: key.operation.clone(),
            idempotency_key: key.idempotency_key.clone(),
            created_at,
        }
    }

    pub fn key(&self) -> OperationKey {
        OperationKey::new(&self.service, &self.operation, &self.idempotency_key)
    }
}

/// Temporary exclusivity token for one in-flight attempt
///
/// At most one grant exists per `(service, operation, idempotency_key)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
    pub id: Uuid,
    /// The `OperationRecord` of the request that obtained the grant
    pub operation_id: Uuid,
    pub service: String,
    pub operation: String,
    pub idempotency_key: String,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Grant {
    pub fn key(&self) -> OperationKey {
        OperationKey::new(&self.service, &self.operation, &self.idempotency_key)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Durable memo of a successful execution
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredResult {
    pub service: String,
    pub operation: String,
    pub idempotency_key: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

impl StoredResult {
    pub fn new(key: &OperationKey, payload: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            service: key.service.clone(),
            operation: key.operation.clone(),
            idempotency_key: key.idempotency_key.clone(),
            payload: payload.into(),
            created_at,
        }
    }

    pub fn key(&self) -> OperationKey {
        OperationKey::new(&self.service, &self.operation, &self.idempotency_key)
    }
}

/// Durable memo of a failed or expired attempt, keyed by grant
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedResult {
    pub grant_id: Uuid,
    pub operation_id: Uuid,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
}

/// How a grant was finalized
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockDisposition {
    /// The holder called back with an outcome
    Released,
    /// The expiry reaper closed the grant
    Reaped,
}

/// Append-only record of a finalized grant
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockAuditRecord {
    pub grant_id: Uuid,
    pub operation_id: Uuid,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub released_at: DateTime<Utc>,
    pub disposition: LockDisposition,
}

impl LockAuditRecord {
    pub fn for_grant(grant: &Grant, released_at: DateTime<Utc>, disposition: LockDisposition) -> Self {
        Self {
            grant_id: grant.id,
            operation_id: grant.operation_id,
            locked_at: grant.locked_at,
            expires_at: grant.expires_at,
            released_at,
            disposition,
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
