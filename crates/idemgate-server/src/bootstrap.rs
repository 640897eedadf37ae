//! Storage selection and service wiring

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use idemgate_common::{StorageMode, StorageSettings};
use idemgate_core::{IdempotencyService, Stores};
use idemgate_persistence::{EmbeddedPersistService, MemoryPersistService, PersistenceService};

use crate::model::Configuration;

/// A wired idempotency service and the backend behind it
pub struct Idemgate {
    pub service: Arc<IdempotencyService>,
    pub persistence: Arc<dyn PersistenceService>,
}

/// Open the configured backend and split it into per-concern stores
pub fn open_stores(
    settings: &StorageSettings,
) -> anyhow::Result<(Stores, Arc<dyn PersistenceService>)> {
    match settings.mode {
        StorageMode::Memory => {
            let backend = Arc::new(MemoryPersistService::new());
            let persistence: Arc<dyn PersistenceService> = backend.clone();
            Ok((Stores::from_backend(backend), persistence))
        }
        StorageMode::Embedded => {
            let backend = Arc::new(
                EmbeddedPersistService::open(&settings.data_dir).with_context(|| {
                    format!(
                        "Failed to open embedded storage at {}",
                        settings.data_dir.display()
                    )
                })?,
            );
            let persistence: Arc<dyn PersistenceService> = backend.clone();
            Ok((Stores::from_backend(backend), persistence))
        }
    }
}

/// Build the idempotency service from configuration
///
/// The reaper is not started; call `start_reaper` on the returned service.
pub async fn bootstrap(configuration: &Configuration) -> anyhow::Result<Idemgate> {
    let storage = configuration.storage_settings()?;
    let coordinator_settings = configuration.coordinator_settings()?;
    let reaper_settings = configuration.reaper_settings()?;

    let (stores, persistence) = open_stores(&storage)?;
    persistence
        .health_check()
        .await
        .context("Storage health check failed")?;

    let service = Arc::new(IdempotencyService::new(
        stores,
        coordinator_settings,
        reaper_settings,
    ));

    match service.warm_up().await {
        Ok(count) => info!(configs = count, "Operation config cache warmed up"),
        Err(e) => warn!("Failed to warm up operation config cache: {}", e),
    }

    info!(
        storage_mode = %persistence.storage_mode(),
        "Idempotency service ready"
    );

    Ok(Idemgate {
        service,
        persistence,
    })
}
