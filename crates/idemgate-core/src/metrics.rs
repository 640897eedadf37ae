// Metric names emitted by the coordinator and the reaper
// Recorded through the `metrics` facade; the hosting process installs the exporter

/// Grants issued by `request_or_lock`
pub const LOCK_GRANTED: &str = "idemgate.lock.granted";
/// `request_or_lock` calls rejected because another holder owns the grant
pub const LOCK_CONTENDED: &str = "idemgate.lock.contended";
/// `request_or_lock` calls answered from a stored result
pub const RESULT_CACHED: &str = "idemgate.result.cached";
/// Completions persisted as a stored result
pub const COMPLETE_SUCCESS: &str = "idemgate.complete.success";
/// Completions persisted as a failure record
pub const COMPLETE_FAILURE: &str = "idemgate.complete.failure";
/// Grants closed by the reaper
pub const REAPER_EXPIRED: &str = "idemgate.reaper.expired";
/// Per-record and per-sweep reaper errors
pub const REAPER_ERRORS: &str = "idemgate.reaper.errors";
/// Outstanding grants, published after each sweep
pub const LOCK_ACTIVE: &str = "idemgate.lock.active";
