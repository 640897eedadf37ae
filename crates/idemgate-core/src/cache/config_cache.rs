// Operation Config Cache
// Read-through cache of per-(service, operation) lock settings

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use tracing::{debug, info, warn};

use idemgate_common::{CoordinatorSettings, IdempotencyError, ServiceOperation};
use idemgate_persistence::{InsertOutcome, OperationConfig, OperationConfigPersistence};

/// Read-through cache of `OperationConfig` entries
///
/// The cache has no eviction: its key space is the set of
/// `(service, operation)` pairs, which is small and grows slowly. On a miss
/// in both the cache and the store, a default config is synthesized and
/// persisted. Failing to persist it is logged and the caller still gets the
/// default for that call.
pub struct OperationConfigCache {
    cache: Cache<ServiceOperation, OperationConfig>,
    store: Arc<dyn OperationConfigPersistence>,
    default_lock_duration: Duration,
    default_allow_save_on_expired: bool,
}

impl OperationConfigCache {
    pub fn new(store: Arc<dyn OperationConfigPersistence>, settings: &CoordinatorSettings) -> Self {
        Self {
            cache: Cache::builder().build(),
            store,
            default_lock_duration: settings.default_lock_duration,
            default_allow_save_on_expired: settings.default_allow_save_on_expired,
        }
    }

    /// Get the config for a `(service, operation)` pair, creating the default on first use
    pub async fn get(&self, key: &ServiceOperation) -> OperationConfig {
        if let Some(config) = self.cache.get(key) {
            return config;
        }

        match self.store.config_find(key).await {
            Ok(Some(config)) => {
                self.cache.insert(key.clone(), config.clone());
                return config;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    service = %key.service,
                    operation = %key.operation,
                    error = %e,
                    "Failed to load operation config, using defaults"
                );
                return self.default_config(key);
            }
        }

        let config = self.default_config(key);
        match self.store.config_insert(&config).await {
            Ok(InsertOutcome::Inserted) => {
                debug!(
                    service = %key.service,
                    operation = %key.operation,
                    lock_duration_ms = config.lock_duration.as_millis() as u64,
                    "Created default operation config"
                );
                self.cache.insert(key.clone(), config.clone());
                config
            }
            Ok(InsertOutcome::Duplicate) => {
                // Another caller created it first; both values are defaults unless
                // an administrator wrote in between, so prefer the stored one
                match self.store.config_find(key).await {
                    Ok(Some(stored)) => {
                        self.cache.insert(key.clone(), stored.clone());
                        stored
                    }
                    _ => config,
                }
            }
            Err(e) => {
                warn!(
                    service = %key.service,
                    operation = %key.operation,
                    error = %e,
                    "Failed to persist default operation config"
                );
                config
            }
        }
    }

    /// Lock duration for a `(service, operation)` pair
    pub async fn lock_duration(&self, service: &str, operation: &str) -> Duration {
        self.get(&ServiceOperation::new(service, operation))
            .await
            .lock_duration
    }

    /// Allow-save-on-expired policy for a `(service, operation)` pair
    pub async fn is_allow_save_on_expired(&self, service: &str, operation: &str) -> bool {
        self.get(&ServiceOperation::new(service, operation))
            .await
            .allow_save_on_expired
    }

    /// Fill the cache with every persisted config
    pub async fn load_all(&self) -> Result<usize, IdempotencyError> {
        let configs = self
            .store
            .config_find_all()
            .await
            .map_err(|e| IdempotencyError::storage("failed to load operation configs", e))?;

        let count = configs.len();
        for config in configs {
            self.cache.insert(config.service_operation(), config);
        }

        info!(count, "Operation configs loaded");
        Ok(count)
    }

    /// Persist an administrative change and refresh the cached entry
    pub async fn update(&self, config: OperationConfig) -> Result<(), IdempotencyError> {
        if config.lock_duration.is_zero() {
            return Err(IdempotencyError::InvalidConfig(format!(
                "lock duration of {}/{} must be positive",
                config.service, config.operation
            )));
        }

        self.store
            .config_save(&config)
            .await
            .map_err(|e| IdempotencyError::storage("failed to save operation config", e))?;

        info!(
            service = %config.service,
            operation = %config.operation,
            lock_duration_ms = config.lock_duration.as_millis() as u64,
            allow_save_on_expired = config.allow_save_on_expired,
            "Operation config updated"
        );
        self.cache.insert(config.service_operation(), config);
        Ok(())
    }

    /// Number of cached entries
    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    fn default_config(&self, key: &ServiceOperation) -> OperationConfig {
        OperationConfig::new(
            &key.service,
            &key.operation,
            self.default_lock_duration,
            self.default_allow_save_on_expired,
        )
    }
}
