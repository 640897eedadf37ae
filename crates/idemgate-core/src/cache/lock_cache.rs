// Active Lock Cache
// Advisory index of outstanding grants that drives per-grant expiry timers

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use idemgate_common::millis_until;
use idemgate_persistence::Grant;

/// Extra delay past the deadline before a timer fires, so the wall clock
/// has certainly passed `expires_at` when the reaper checks it
const EXPIRY_TIMER_SLACK: Duration = Duration::from_millis(5);

struct ActiveLock {
    grant: Grant,
    timer: Option<JoinHandle<()>>,
}

impl Drop for ActiveLock {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// In-memory copies of outstanding grants, keyed by grant ID
///
/// Never the source of truth: it starts empty after a restart and may hold
/// entries for grants that another instance already finalized. When built
/// with an expiry notifier, each entry owns a timer that sends the grant ID
/// once its deadline passes.
pub struct ActiveLockCache {
    entries: DashMap<Uuid, ActiveLock>,
    expiry_tx: Option<UnboundedSender<Uuid>>,
}

impl Default for ActiveLockCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveLockCache {
    /// Cache without expiry timers
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            expiry_tx: None,
        }
    }

    /// Cache whose entries notify `expiry_tx` when their grant expires
    pub fn with_expiry_notifier(expiry_tx: UnboundedSender<Uuid>) -> Self {
        Self {
            entries: DashMap::new(),
            expiry_tx: Some(expiry_tx),
        }
    }

    /// Mirror a grant, replacing any entry with the same ID
    pub fn insert(&self, grant: Grant) {
        let timer = self.schedule_expiry(&grant);
        let grant_id = grant.id;
        self.entries.insert(grant_id, ActiveLock { grant, timer });
        debug!(%grant_id, "Grant mirrored into active lock cache");
    }

    /// Remove an entry and cancel its timer
    pub fn remove(&self, grant_id: Uuid) -> Option<Grant> {
        self.entries
            .remove(&grant_id)
            .map(|(_, entry)| entry.grant.clone())
    }

    pub fn get(&self, grant_id: Uuid) -> Option<Grant> {
        self.entries.get(&grant_id).map(|e| e.grant.clone())
    }

    pub fn contains(&self, grant_id: Uuid) -> bool {
        self.entries.contains_key(&grant_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry whose deadline is at or before `now`
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.grant.is_expired(now));
        let pruned = before.saturating_sub(self.entries.len());
        if pruned > 0 {
            debug!(count = pruned, "Pruned expired active lock entries");
        }
        pruned
    }

    fn schedule_expiry(&self, grant: &Grant) -> Option<JoinHandle<()>> {
        let tx = self.expiry_tx.clone()?;
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(grant_id = %grant.id, "No runtime available, expiry timer not scheduled");
                return None;
            }
        };

        let grant_id = grant.id;
        let delay = Duration::from_millis(millis_until(grant.expires_at, Utc::now()))
            + EXPIRY_TIMER_SLACK;
        Some(handle.spawn(async move {
            tokio::time::sleep(delay).await;
            // The receiver is gone once the reaper stops; the sweep covers it
            let _ = tx.send(grant_id);
        }))
    }
}
