//! Execution lease services
//!
//! Provides:
//! - The `ExecutionLock` API used by background jobs
//! - `MemoryExecutionLock`, a single-process implementation
//! - `PersistentExecutionLock`, backed by any durable `LeaseStore`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::model::*;

/// Execution lease service
#[async_trait]
pub trait ExecutionLock: Send + Sync {
    /// Try to acquire a lease without waiting
    ///
    /// Returns `None` when another owner holds an unexpired lease.
    async fn try_acquire(&self, request: LeaseRequest) -> anyhow::Result<Option<ExecutionLease>>;

    /// Release a lease, keeping it held until `locked_at + lock_at_least_for`
    async fn release(
        &self,
        lease: &ExecutionLease,
        lock_at_least_for: Duration,
    ) -> anyhow::Result<bool>;

    /// Get a lease by name
    async fn get(&self, name: &str) -> anyhow::Result<Option<ExecutionLease>>;
}

/// Durable storage for execution leases
///
/// Implemented by persistence backends so that leases are shared by every
/// process instance attached to the same store.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Store `lease` if no lease with its name exists or the existing one is
    /// no longer held at `now`. Must be atomic with respect to other callers.
    async fn lease_try_insert(
        &self,
        lease: &ExecutionLease,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    /// Find a lease by name
    async fn lease_find(&self, name: &str) -> anyhow::Result<Option<ExecutionLease>>;

    /// Move `lock_until` to `unlock_at` if `owner` still holds the lease
    async fn lease_unlock(
        &self,
        name: &str,
        owner: &str,
        unlock_at: DateTime<Utc>,
    ) -> anyhow::Result<bool>;
}

/// In-memory lease service
/// For multi-instance deployments use `PersistentExecutionLock`
pub struct MemoryExecutionLock {
    leases: Arc<DashMap<String, ExecutionLease>>,
}

impl MemoryExecutionLock {
    pub fn new() -> Self {
        Self {
            leases: Arc::new(DashMap::new()),
        }
    }
}

impl Default for MemoryExecutionLock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionLock for MemoryExecutionLock {
    async fn try_acquire(&self, request: LeaseRequest) -> anyhow::Result<Option<ExecutionLease>> {
        let now = Utc::now();
        let lease = ExecutionLease::new(
            &request.name,
            &request.owner,
            now,
            request.lock_at_most_for,
        );

        match self.leases.entry(request.name.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_held(now) {
                    tracing::debug!(
                        lease = %request.name,
                        holder = %entry.get().owner,
                        "Execution lease held by another owner"
                    );
                    return Ok(None);
                }
                entry.insert(lease.clone());
            }
            Entry::Vacant(entry) => {
                entry.insert(lease.clone());
            }
        }

        Ok(Some(lease))
    }

    async fn release(
        &self,
        lease: &ExecutionLease,
        lock_at_least_for: Duration,
    ) -> anyhow::Result<bool> {
        let now = Utc::now();
        let unlock_at = lease.unlock_at(now, lock_at_least_for);

        let mut stored = match self.leases.get_mut(&lease.name) {
            Some(stored) => stored,
            None => return Ok(false),
        };

        if !stored.is_owned_by(&lease.owner, now) {
            return Ok(false);
        }

        stored.lock_until = unlock_at;
        drop(stored);

        if unlock_at <= now {
            self.leases
                .remove_if(&lease.name, |_, stored| stored.owner == lease.owner);
        }

        Ok(true)
    }

    async fn get(&self, name: &str) -> anyhow::Result<Option<ExecutionLease>> {
        Ok(self.leases.get(name).map(|l| l.clone()))
    }
}

/// Lease service shared across process instances through a durable store
pub struct PersistentExecutionLock {
    store: Arc<dyn LeaseStore>,
}

impl PersistentExecutionLock {
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ExecutionLock for PersistentExecutionLock {
    async fn try_acquire(&self, request: LeaseRequest) -> anyhow::Result<Option<ExecutionLease>> {
        let now = Utc::now();
        let lease = ExecutionLease::new(
            &request.name,
            &request.owner,
            now,
            request.lock_at_most_for,
        );

        if self.store.lease_try_insert(&lease, now).await? {
            Ok(Some(lease))
        } else {
            tracing::debug!(lease = %request.name, "Execution lease held by another owner");
            Ok(None)
        }
    }

    async fn release(
        &self,
        lease: &ExecutionLease,
        lock_at_least_for: Duration,
    ) -> anyhow::Result<bool> {
        let unlock_at = lease.unlock_at(Utc::now(), lock_at_least_for);
        let released = self
            .store
            .lease_unlock(&lease.name, &lease.owner, unlock_at)
            .await?;
        if !released {
            tracing::warn!(
                lease = %lease.name,
                owner = %lease.owner,
                "Execution lease was no longer held at release"
            );
        }
        Ok(released)
    }

    async fn get(&self, name: &str) -> anyhow::Result<Option<ExecutionLease>> {
        self.store.lease_find(name).await
    }
}
