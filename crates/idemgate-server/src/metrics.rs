// Metrics module for observability
// Describes the counters and gauges recorded by the idempotency core

use metrics::{describe_counter, describe_gauge};

use idemgate_core::metrics::{
    COMPLETE_FAILURE, COMPLETE_SUCCESS, LOCK_ACTIVE, LOCK_CONTENDED, LOCK_GRANTED,
    REAPER_ERRORS, REAPER_EXPIRED, RESULT_CACHED,
};

/// Initialize all metric descriptions
/// Should be called once at application startup
pub fn init_metrics() {
    // Lock coordinator metrics
    describe_counter!(LOCK_GRANTED, "Total number of grants issued");
    describe_counter!(
        LOCK_CONTENDED,
        "Total number of requests rejected because the key was already locked"
    );
    describe_counter!(
        RESULT_CACHED,
        "Total number of requests answered from a stored result"
    );
    describe_counter!(
        COMPLETE_SUCCESS,
        "Total number of completions stored as a result"
    );
    describe_counter!(
        COMPLETE_FAILURE,
        "Total number of completions stored as a failure"
    );

    // Reaper metrics
    describe_counter!(REAPER_EXPIRED, "Total number of expired grants reaped");
    describe_counter!(REAPER_ERRORS, "Total number of reaper errors");
    describe_gauge!(LOCK_ACTIVE, "Number of outstanding grants");
}
