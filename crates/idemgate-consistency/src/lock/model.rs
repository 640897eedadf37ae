//! Execution lease data model

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named lease held by one owner until `lock_until`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLease {
    /// Lease name (one per kind of background job)
    pub name: String,
    /// Current owner (process instance ID)
    pub owner: String,
    /// Acquisition timestamp
    pub locked_at: DateTime<Utc>,
    /// Instant after which the lease is free again
    pub lock_until: DateTime<Utc>,
}

impl ExecutionLease {
    /// Create a lease for `owner` starting at `now` and lasting at most `lock_at_most_for`
    pub fn new(
        name: impl Into<String>,
        owner: impl Into<String>,
        now: DateTime<Utc>,
        lock_at_most_for: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            locked_at: now,
            lock_until: add_duration(now, lock_at_most_for),
        }
    }

    /// Check if the lease still blocks other owners at `now`
    pub fn is_held(&self, now: DateTime<Utc>) -> bool {
        now < self.lock_until
    }

    /// Check if the given owner holds this lease at `now`
    pub fn is_owned_by(&self, owner: &str, now: DateTime<Utc>) -> bool {
        self.is_held(now) && self.owner == owner
    }

    /// Instant at which a released lease becomes free
    ///
    /// The lease stays held until `locked_at + lock_at_least_for` even when the
    /// owner finishes earlier, so that instances with skewed schedules do not
    /// repeat the same run.
    pub fn unlock_at(&self, now: DateTime<Utc>, lock_at_least_for: Duration) -> DateTime<Utc> {
        let at_least = add_duration(self.locked_at, lock_at_least_for);
        if at_least > now { at_least } else { now }
    }
}

/// Lease acquisition request
#[derive(Debug, Clone)]
pub struct LeaseRequest {
    /// Lease name
    pub name: String,
    /// Owner (process instance ID)
    pub owner: String,
    /// Upper bound on how long the lease is held if never released
    pub lock_at_most_for: Duration,
}

impl LeaseRequest {
    pub fn new(name: impl Into<String>, owner: impl Into<String>, lock_at_most_for: Duration) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            lock_at_most_for,
        }
    }
}

fn add_duration(start: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| start.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
