//! Seams between the event manager and the components it owns
//!
//! Bridges only see an [`EventSink`] (they emit observations), actions only
//! see a [`Hub`] (they route instructions back into bridges). The manager
//! implements both, which keeps the dependency graph acyclic.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::uri::UriError;

/// Errors raised when routing a `bridge://` instruction
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("malformed trigger URI: {0}")]
    Malformed(#[from] UriError),

    #[error("bridge '{bridge}' not found (remaining URI '{remainder}')")]
    UnknownBridge { bridge: String, remainder: String },

    #[error("bridge '{bridge}' rejected trigger '{remainder}': {reason}")]
    Bridge {
        bridge: String,
        remainder: String,
        reason: String,
    },
}

/// Result type for routing operations
pub type RoutingResult<T> = Result<T, RoutingError>;

/// Routing capability handed to actions
#[async_trait]
pub trait Hub: Send + Sync {
    /// Route a `bridge://<id>/<remainder>` instruction to the bridge `<id>`
    ///
    /// URIs with any other scheme are ignored and return `Ok(())`. An
    /// unknown bridge id is an error and must never be swallowed.
    async fn trigger(&self, uri: &str) -> RoutingResult<()>;
}

/// Fire-and-forget event emission handed to bridges
pub trait EventSink: Send + Sync {
    /// Dispatch an event URI without waiting for rule evaluation
    fn emit(&self, uri: String);
}

/// Thread-safe handle to an event sink
pub type SharedEventSink = Arc<dyn EventSink>;
