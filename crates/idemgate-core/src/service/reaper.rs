// Expiry Reaper
// Closes out grants whose holder never reported back

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use idemgate_common::{IdempotencyError, OPERATION_EXPIRED_REASON, ReaperSettings};
use idemgate_consistency::{ExecutionLock, LeaseRequest};
use idemgate_persistence::{Grant, LockDisposition};

use crate::cache::ActiveLockCache;
use crate::metrics::{LOCK_ACTIVE, REAPER_ERRORS, REAPER_EXPIRED};
use crate::store::Stores;

/// Summary of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired grants found by the scan
    pub scanned: usize,
    /// Grants this sweep finalized
    pub reaped: usize,
    pub errors: usize,
    /// The sweep lease was held elsewhere, nothing was scanned
    pub skipped: bool,
}

/// Periodic sweep over expired grants
///
/// Each sweep runs under an execution lease so only one instance reconciles
/// at a time. Per-grant timers from the active lock cache can trigger an
/// earlier check for a single grant; the sweep stays the source of truth.
pub struct ExpiryReaper {
    stores: Stores,
    active_locks: Arc<ActiveLockCache>,
    execution_lock: Arc<dyn ExecutionLock>,
    settings: ReaperSettings,
    /// Lease owner ID of this instance
    owner: String,
}

impl ExpiryReaper {
    pub fn new(
        stores: Stores,
        active_locks: Arc<ActiveLockCache>,
        execution_lock: Arc<dyn ExecutionLock>,
        settings: ReaperSettings,
    ) -> Self {
        Self {
            stores,
            active_locks,
            execution_lock,
            settings,
            owner: Uuid::new_v4().to_string(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn settings(&self) -> &ReaperSettings {
        &self.settings
    }

    /// Run one lease-guarded sweep
    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        let request = LeaseRequest::new(
            &self.settings.lease_name,
            &self.owner,
            self.settings.lock_at_most_for,
        );
        let lease = match self.execution_lock.try_acquire(request).await {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                debug!(lease = %self.settings.lease_name, "Sweep lease held elsewhere, skipping");
                report.skipped = true;
                return report;
            }
            Err(e) => {
                warn!(lease = %self.settings.lease_name, error = %e, "Failed to acquire sweep lease");
                metrics::counter!(REAPER_ERRORS).increment(1);
                report.skipped = true;
                report.errors = 1;
                return report;
            }
        };

        let now = Utc::now();
        let mut exhausted = false;
        match self
            .stores
            .grants
            .grant_find_expired(now, self.settings.scan_limit)
            .await
        {
            Ok(expired) => {
                report.scanned = expired.len();
                exhausted = expired.len() < self.settings.scan_limit;
                for grant in &expired {
                    match self.reap(grant, now).await {
                        Ok(true) => report.reaped += 1,
                        Ok(false) => {}
                        Err(e) => {
                            report.errors += 1;
                            metrics::counter!(REAPER_ERRORS).increment(1);
                            error!(
                                grant_id = %grant.id,
                                operation_id = %grant.operation_id,
                                error = %e,
                                "Failed to reap expired grant"
                            );
                        }
                    }
                }
            }
            Err(e) => {
                report.errors += 1;
                metrics::counter!(REAPER_ERRORS).increment(1);
                error!(error = %e, "Failed to scan expired grants");
            }
        }

        // A truncated scan leaves expired grants whose timers must survive
        if exhausted {
            self.active_locks.prune_expired(now);
        }
        match self.stores.grants.grant_count().await {
            Ok(count) => metrics::gauge!(LOCK_ACTIVE).set(count as f64),
            Err(e) => debug!(error = %e, "Failed to count active grants"),
        }

        if let Err(e) = self
            .execution_lock
            .release(&lease, self.settings.lock_at_least_for)
            .await
        {
            warn!(lease = %self.settings.lease_name, error = %e, "Failed to release sweep lease");
        }

        if report.reaped > 0 || report.errors > 0 {
            info!(
                scanned = report.scanned,
                reaped = report.reaped,
                errors = report.errors,
                "Expiry sweep finished"
            );
        }
        report
    }

    /// Check one grant right after its deadline
    ///
    /// Returns `Ok(true)` when this call finalized the grant.
    pub async fn reap_grant(&self, grant_id: Uuid) -> Result<bool, IdempotencyError> {
        let grant = self
            .stores
            .grants
            .grant_find(grant_id)
            .await
            .map_err(|e| IdempotencyError::storage("failed to look up grant", e))?;

        let now = Utc::now();
        match grant {
            Some(grant) if grant.is_expired(now) => self.reap(&grant, now).await,
            Some(_) => Ok(false),
            None => {
                // Completed elsewhere; drop the advisory copy
                self.active_locks.remove(grant_id);
                Ok(false)
            }
        }
    }

    /// Delete an expired grant and record it as failed
    ///
    /// The delete decides ownership: when it finds nothing, a completion or
    /// another reaper got there first and nothing else is written. The audit
    /// record goes last so that a holder finding `Reaped` knows the expiry
    /// record is already in place.
    async fn reap(&self, grant: &Grant, now: DateTime<Utc>) -> Result<bool, IdempotencyError> {
        let deleted = self
            .stores
            .grants
            .grant_delete(grant.id)
            .await
            .map_err(|e| IdempotencyError::storage("failed to delete expired grant", e))?;
        self.active_locks.remove(grant.id);
        if !deleted {
            return Ok(false);
        }
        metrics::counter!(REAPER_EXPIRED).increment(1);

        let failed = self
            .stores
            .record_failure(grant.id, grant.operation_id, OPERATION_EXPIRED_REASON, now)
            .await;
        let audit = self
            .stores
            .record_release(grant, now, LockDisposition::Reaped)
            .await;

        info!(
            key = %grant.key(),
            grant_id = %grant.id,
            operation_id = %grant.operation_id,
            expires_at = %grant.expires_at,
            "Expired grant reaped"
        );

        match audit {
            Ok(true) => {}
            Ok(false) => {
                // The holder released the grant while it was being reaped
                if matches!(failed, Ok(true)) {
                    self.withdraw_expiry(grant).await;
                }
            }
            Err(e) => {
                warn!(grant_id = %grant.id, error = %e, "Failed to write lock audit for reaped grant")
            }
        }
        failed?;
        Ok(true)
    }

    async fn withdraw_expiry(&self, grant: &Grant) {
        match self.stores.stored_result(&grant.key()).await {
            Ok(Some(_)) => {
                debug!(grant_id = %grant.id, "Holder stored a result, withdrawing expiry record");
                self.stores.clear_expiry_failure(grant.id).await;
            }
            Ok(None) => {}
            Err(e) => warn!(grant_id = %grant.id, error = %e, "Failed to look up result"),
        }
    }

    /// Spawn the periodic sweep, optionally listening for per-grant expiry notices
    pub fn start(self: Arc<Self>, expiry_rx: Option<UnboundedReceiver<Uuid>>) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let mut expiry_rx = expiry_rx.filter(|_| self.settings.fast_path);
        let reaper = self;

        info!(
            owner = %reaper.owner,
            interval_ms = reaper.settings.sweep_interval.as_millis() as u64,
            fast_path = expiry_rx.is_some(),
            "Starting expiry reaper"
        );

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(reaper.settings.sweep_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = interval.tick() => {
                        reaper.sweep_once().await;
                    }
                    Some(grant_id) = next_expired(&mut expiry_rx) => {
                        match reaper.reap_grant(grant_id).await {
                            Ok(true) => debug!(%grant_id, "Grant reaped at its deadline"),
                            Ok(false) => {}
                            Err(e) => {
                                metrics::counter!(REAPER_ERRORS).increment(1);
                                warn!(%grant_id, error = %e, "Fast-path reap failed, leaving it to the sweep");
                            }
                        }
                    }
                }
            }

            info!("Expiry reaper stopped");
        });

        ReaperHandle {
            shutdown_tx: Some(shutdown_tx),
            task,
        }
    }
}

async fn next_expired(rx: &mut Option<UnboundedReceiver<Uuid>>) -> Option<Uuid> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Handle to a running reaper task
///
/// Dropping the handle also stops the task.
pub struct ReaperHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Signal the reaper and wait for its current step to finish
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "Expiry reaper task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
