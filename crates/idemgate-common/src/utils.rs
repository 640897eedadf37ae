//! Time helpers shared by the coordinator and the reaper

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Compute `start + duration`, saturating at the maximum representable instant
pub fn deadline_from(start: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| start.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Milliseconds from `now` until `deadline`, zero if already passed
pub fn millis_until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (deadline - now).num_milliseconds().max(0) as u64
}
