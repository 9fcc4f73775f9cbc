//! Bridge contract
//!
//! A bridge owns one device-protocol connection. It emits observations into
//! an [`EventSink`](hub_core::EventSink) and accepts routed instructions via
//! [`Bridge::trigger`]. The connection itself is a [`Connectable`], driven by
//! [`hub_core::supervise`].

use async_trait::async_trait;
use hub_core::{Connectable, LinkState, UriError};
use std::sync::Arc;
use thiserror::Error;

/// Bridge and publisher errors
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("unknown bridge type '{0}'")]
    UnknownType(String),

    #[error("invalid bridge configuration: {0}")]
    InvalidConfig(String),

    #[error("bridge discovery failed: {0}")]
    Discovery(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("bridge API error: {0}")]
    Api(String),

    #[error("unexpected response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("MQTT client error: {0}")]
    MqttClient(#[from] rumqttc::ClientError),

    #[error("MQTT connection error: {0}")]
    MqttConnection(#[from] rumqttc::ConnectionError),

    #[error("broker refused connection: {0}")]
    Refused(String),

    #[error("controller error: {0}")]
    Controller(String),

    #[error("not connected")]
    NotConnected,

    #[error("invalid trigger '{0}'")]
    InvalidTrigger(String),

    #[error("invalid event URI: {0}")]
    InvalidUri(#[from] UriError),
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// A device-protocol adapter
///
/// Construction validates configuration only and never touches the network;
/// the handshake happens in [`Connectable::connect`].
#[async_trait]
pub trait Bridge: Connectable<Error = BridgeError> {
    /// Configuration type tag, e.g. `hue`
    fn kind(&self) -> &'static str;

    /// Push an instruction into the device protocol
    ///
    /// `remainder` is what followed `bridge://<id>/` in the routed URI. Safe
    /// to call concurrently with the bridge's own event emission.
    async fn trigger(&self, remainder: &str) -> BridgeResult<()>;

    /// Ask the connection task to return; no reconnection follows
    fn stop(&self) {
        self.link().request_stop();
    }

    fn state(&self) -> LinkState {
        self.link().state()
    }
}

/// Thread-safe handle to a bridge
pub type SharedBridge = Arc<dyn Bridge>;
