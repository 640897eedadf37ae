// Idempotency service facade
// Wires the stores, caches, coordinator and reaper together

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::info;
use uuid::Uuid;

use idemgate_common::{CoordinatorSettings, IdempotencyError, OperationKey, ReaperSettings};
use idemgate_consistency::{ExecutionLock, PersistentExecutionLock};
use idemgate_persistence::{FailedResult, StoredResult};

use crate::cache::{ActiveLockCache, OperationConfigCache};
use crate::service::coordinator::{Completion, LockCoordinator, LockOutcome};
use crate::service::reaper::{ExpiryReaper, ReaperHandle};
use crate::store::Stores;

/// Entry point for an API layer
///
/// Owns one coordinator and one reaper sharing the same caches. The reaper
/// does not run until `start_reaper` is called.
pub struct IdempotencyService {
    stores: Stores,
    config_cache: Arc<OperationConfigCache>,
    active_locks: Arc<ActiveLockCache>,
    coordinator: LockCoordinator,
    reaper: Arc<ExpiryReaper>,
    expiry_rx: Mutex<Option<UnboundedReceiver<Uuid>>>,
}

impl IdempotencyService {
    /// Build a service whose sweep lease lives in the same stores
    pub fn new(
        stores: Stores,
        coordinator_settings: CoordinatorSettings,
        reaper_settings: ReaperSettings,
    ) -> Self {
        let execution_lock = Arc::new(PersistentExecutionLock::new(stores.leases.clone()));
        Self::with_execution_lock(
            stores,
            execution_lock,
            coordinator_settings,
            reaper_settings,
        )
    }

    /// Build a service with an externally provided sweep lease
    pub fn with_execution_lock(
        stores: Stores,
        execution_lock: Arc<dyn ExecutionLock>,
        coordinator_settings: CoordinatorSettings,
        reaper_settings: ReaperSettings,
    ) -> Self {
        let config_cache = Arc::new(OperationConfigCache::new(
            stores.configs.clone(),
            &coordinator_settings,
        ));

        let (active_locks, expiry_rx) = if reaper_settings.fast_path {
            let (tx, rx) = mpsc::unbounded_channel();
            (ActiveLockCache::with_expiry_notifier(tx), Some(rx))
        } else {
            (ActiveLockCache::new(), None)
        };
        let active_locks = Arc::new(active_locks);

        let coordinator = LockCoordinator::new(
            stores.clone(),
            config_cache.clone(),
            active_locks.clone(),
            coordinator_settings,
        );
        let reaper = Arc::new(ExpiryReaper::new(
            stores.clone(),
            active_locks.clone(),
            execution_lock,
            reaper_settings,
        ));

        Self {
            stores,
            config_cache,
            active_locks,
            coordinator,
            reaper,
            expiry_rx: Mutex::new(expiry_rx),
        }
    }

    /// Warm the operation config cache from the store
    pub async fn warm_up(&self) -> Result<usize, IdempotencyError> {
        self.config_cache.load_all().await
    }

    pub async fn request_or_lock(
        &self,
        service: &str,
        operation: &str,
        idempotency_key: &str,
    ) -> LockOutcome {
        self.coordinator
            .request_or_lock(service, operation, idempotency_key)
            .await
    }

    pub async fn complete(&self, completion: Completion) -> Result<(), IdempotencyError> {
        self.coordinator.complete(completion).await
    }

    /// Start the background reaper
    ///
    /// Only the first started reaper receives per-grant expiry notices; later
    /// ones rely on the periodic sweep alone.
    pub fn start_reaper(&self) -> ReaperHandle {
        let expiry_rx = self.expiry_rx.lock().take();
        info!(fast_path = expiry_rx.is_some(), "Idempotency reaper requested");
        self.reaper.clone().start(expiry_rx)
    }

    pub async fn stored_result(
        &self,
        service: &str,
        operation: &str,
        idempotency_key: &str,
    ) -> Result<Option<StoredResult>, IdempotencyError> {
        self.stores
            .stored_result(&OperationKey::new(service, operation, idempotency_key))
            .await
    }

    pub async fn failed_result(
        &self,
        grant_id: Uuid,
    ) -> Result<Option<FailedResult>, IdempotencyError> {
        self.stores.failed_result(grant_id).await
    }

    pub fn reaper(&self) -> &Arc<ExpiryReaper> {
        &self.reaper
    }

    pub fn config_cache(&self) -> &Arc<OperationConfigCache> {
        &self.config_cache
    }

    pub fn active_locks(&self) -> &Arc<ActiveLockCache> {
        &self.active_locks
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }
}
