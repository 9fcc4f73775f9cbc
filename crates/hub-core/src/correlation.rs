//! Correlation ids for tracing one rule match through its actions

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Token minted once per rule match and handed to every action of that match
///
/// It only ties log lines together; nothing branches on it and it is never
/// stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Create a new correlation id with a fresh ULID
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Create a correlation id with a specific value
    pub fn with_id(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
