//! Key types identifying idempotent operations
//!
//! Durable stores index grants and results by the full triple. The storage
//! encoding prefixes every component with its byte length so that no two
//! distinct triples map to the same key, whatever characters they contain.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Identity of an operation's configuration: `(service, operation)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceOperation {
    pub service: String,
    pub operation: String,
}

impl ServiceOperation {
    pub fn new(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
        }
    }

    /// Collision-free storage key
    pub fn storage_key(&self) -> String {
        encode_components(&[&self.service, &self.operation])
    }
}

impl Display for ServiceOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.service, self.operation)
    }
}

/// Identity of one logical request: `(service, operation, idempotency_key)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationKey {
    pub service: String,
    pub operation: String,
    pub idempotency_key: String,
}

impl OperationKey {
    pub fn new(
        service: impl Into<String>,
        operation: impl Into<String>,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
            idempotency_key: idempotency_key.into(),
        }
    }

    /// The `(service, operation)` pair whose configuration governs this key
    pub fn service_operation(&self) -> ServiceOperation {
        ServiceOperation::new(&self.service, &self.operation)
    }

    /// Collision-free storage key for the compound uniqueness constraint
    pub fn storage_key(&self) -> String {
        encode_components(&[&self.service, &self.operation, &self.idempotency_key])
    }
}

impl Display for OperationKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.service, self.operation, self.idempotency_key
        )
    }
}

fn encode_components(components: &[&str]) -> String {
    let capacity = components.iter().map(|c| c.len() + 8).sum();
    let mut encoded = String::with_capacity(capacity);
    for component in components {
        encoded.push_str(&component.len().to_string());
        encoded.push(':');
        encoded.push_str(component);
    }
    encoded
}
