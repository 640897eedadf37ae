//! Idemgate Server - process wiring for the idempotency core
//!
//! Loads configuration, initializes logging and metrics descriptions, opens
//! the configured storage backend and runs the expiry reaper until shutdown.
//! The network API layer is not part of this crate; it reuses [`bootstrap()`].

pub mod bootstrap;
pub mod metrics;
pub mod model;
pub mod startup;

pub use bootstrap::{Idemgate, bootstrap, open_stores};
