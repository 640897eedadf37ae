//! Error types and execution result codes for idemgate
//!
//! This module defines:
//! - `ExecutionResult`: the outcome vocabulary shared with API layers
//! - `IdempotencyError`: faults surfaced by the coordinator

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Outcome codes exchanged with callers of the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionResult {
    /// A stored result exists and is returned to the caller
    Success,
    /// The caller holds a fresh grant and should execute the operation
    OperationLockedSuccessfully,
    /// Another holder owns the grant; no result yet
    OperationAlreadyLocked,
    /// The grant expired before its holder completed
    OperationExpired,
    /// Infrastructure or validation fault
    OperationFailed,
}

impl ExecutionResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionResult::Success => "SUCCESS",
            ExecutionResult::OperationLockedSuccessfully => "OPERATION_LOCKED_SUCCESSFULLY",
            ExecutionResult::OperationAlreadyLocked => "OPERATION_ALREADY_LOCKED",
            ExecutionResult::OperationExpired => "OPERATION_EXPIRED",
            ExecutionResult::OperationFailed => "OPERATION_FAILED",
        }
    }
}

impl Display for ExecutionResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ExecutionResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SUCCESS" => Ok(ExecutionResult::Success),
            "OPERATION_LOCKED_SUCCESSFULLY" => Ok(ExecutionResult::OperationLockedSuccessfully),
            "OPERATION_ALREADY_LOCKED" => Ok(ExecutionResult::OperationAlreadyLocked),
            "OPERATION_EXPIRED" => Ok(ExecutionResult::OperationExpired),
            "OPERATION_FAILED" => Ok(ExecutionResult::OperationFailed),
            _ => Err(format!("Invalid execution result: {}", s)),
        }
    }
}

/// Faults raised by the idempotency core
#[derive(thiserror::Error, Debug)]
pub enum IdempotencyError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("grant '{0}' not found")]
    GrantNotFound(String),

    #[error("grant '{grant_id}' does not belong to operation '{operation_id}'")]
    GrantMismatch {
        grant_id: String,
        operation_id: String,
    },

    #[error("{context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("configuration error: {0}")]
    InvalidConfig(String),
}

impl IdempotencyError {
    /// Wrap a storage failure with the step that produced it
    pub fn storage(context: impl Into<String>, source: anyhow::Error) -> Self {
        IdempotencyError::Storage {
            context: context.into(),
            source,
        }
    }

    /// All faults surface to callers as `OPERATION_FAILED`
    pub fn execution_result(&self) -> ExecutionResult {
        ExecutionResult::OperationFailed
    }
}
