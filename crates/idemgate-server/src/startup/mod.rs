//! Application startup utilities module.
//!
//! Logging setup and process signal handling for the server binary.

mod logging;
mod shutdown;

pub use logging::{LogRotation, LoggingConfig, LoggingGuard, init_logging};
pub use shutdown::{ShutdownSignal, wait_for_shutdown_signal};
