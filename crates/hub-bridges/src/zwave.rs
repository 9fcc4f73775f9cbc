//! Z-Wave bridge
//!
//! The controller driver is an external collaborator opened through a
//! [`ZWaveConnector`]. Node updates become
//! `zwave://<id>/node/<n>/state#k=v&k2=v2` with keys in sorted order; node
//! discovery is only logged. Triggers are not supported by the protocol
//! layer and are logged.

use async_trait::async_trait;
use hub_config::ZWaveBridgeConfig;
use hub_core::{Connectable, Link, SharedEventSink};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bridge::{Bridge, BridgeError, BridgeResult};

/// Something the controller reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZWaveEvent {
    NodeDiscovered { node: u32 },
    NodeUpdated { node: u32, state: BTreeMap<String, bool> },
}

/// An open controller
#[async_trait]
pub trait ZWaveController: Send {
    /// Next controller event; `None` once the controller went away
    async fn next_event(&mut self) -> BridgeResult<Option<ZWaveEvent>>;
}

/// Opens a controller on a serial port
#[async_trait]
pub trait ZWaveConnector: Send + Sync {
    async fn open(&self, port: &str) -> BridgeResult<Box<dyn ZWaveController>>;
}

/// Event URI for a node state update
pub fn node_state_uri(bridge: &str, node: u32, state: &BTreeMap<String, bool>) -> String {
    let params: Vec<String> = state.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    if params.is_empty() {
        format!("zwave://{}/node/{}/state", bridge, node)
    } else {
        format!("zwave://{}/node/{}/state#{}", bridge, node, params.join("&"))
    }
}

pub struct ZWaveBridge {
    config: ZWaveBridgeConfig,
    connector: Arc<dyn ZWaveConnector>,
    sink: SharedEventSink,
    link: Link,
}

impl ZWaveBridge {
    pub fn new(
        config: ZWaveBridgeConfig,
        connector: Arc<dyn ZWaveConnector>,
        sink: SharedEventSink,
    ) -> BridgeResult<Self> {
        if config.port.is_empty() {
            return Err(BridgeError::InvalidConfig("port must not be empty".to_string()));
        }
        info!(bridge = %config.name, port = %config.port, "Initialized Z-Wave bridge");
        Ok(Self {
            config,
            connector,
            sink,
            link: Link::new(),
        })
    }

    async fn pump(&self, controller: &mut dyn ZWaveController) -> BridgeResult<()> {
        loop {
            match controller.next_event().await? {
                Some(ZWaveEvent::NodeDiscovered { node }) => {
                    info!(bridge = %self.config.name, node, "Node discovered");
                }
                Some(ZWaveEvent::NodeUpdated { node, state }) => {
                    let uri = node_state_uri(&self.config.name, node, &state);
                    debug!(bridge = %self.config.name, uri = %uri, "Node updated");
                    self.sink.emit(uri);
                }
                None => {
                    return Err(BridgeError::Controller("event stream closed".to_string()));
                }
            }
        }
    }
}

#[async_trait]
impl Connectable for ZWaveBridge {
    type Error = BridgeError;

    fn id(&self) -> &str {
        &self.config.name
    }

    fn link(&self) -> &Link {
        &self.link
    }

    async fn connect(&self) -> BridgeResult<()> {
        let mut controller = self.connector.open(&self.config.port).await?;
        self.link.mark_connected();
        info!(bridge = %self.config.name, "Z-Wave bridge connected");

        tokio::select! {
            result = self.pump(controller.as_mut()) => result,
            _ = self.link.stopped() => Ok(()),
        }
    }
}

#[async_trait]
impl Bridge for ZWaveBridge {
    fn kind(&self) -> &'static str {
        "zwave"
    }

    async fn trigger(&self, remainder: &str) -> BridgeResult<()> {
        warn!(bridge = %self.config.name, remainder, "Z-Wave triggers are not supported, ignoring");
        Ok(())
    }
}
