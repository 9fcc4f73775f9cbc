//! Core types for the event hub
//!
//! This crate provides the types every other hub crate shares: the
//! URI-shaped event identifier, the per-match correlation id, the seams
//! between the manager and its components, and the connection lifecycle
//! used by bridges and the publisher.

mod correlation;
mod hub;
pub mod lifecycle;
mod uri;

pub use correlation::CorrelationId;
pub use hub::{EventSink, Hub, RoutingError, RoutingResult, SharedEventSink};
pub use lifecycle::{supervise, Connectable, Link, LinkState, DEFAULT_RETRY_DELAY};
pub use uri::{EventUri, UriError, BRIDGE_SCHEME};
