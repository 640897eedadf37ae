//! Execution lease implementation
//!
//! This module provides:
//! - Execution lease data model
//! - Lease acquire/release API
//! - In-memory and store-backed lease services

mod model;
mod service;

pub use model::*;
pub use service::*;
