//! Device-protocol bridges
//!
//! Each bridge owns one protocol connection, emits observations as event
//! URIs and accepts routed instructions:
//!
//! - [`HueBridge`]: lighting bridge polled over REST, sensor changes via
//!   [`SnapshotTracker`]
//! - [`MqttBridge`]: broker subscription and publishing
//! - [`ZWaveBridge`]: mesh-radio controller events
//!
//! [`BridgeRegistry`] maps configuration type tags to constructors. The
//! optional [`Publisher`] mirrors every dispatched event onto MQTT.

mod bridge;
pub mod hue;
pub mod mqtt;
pub mod poll;
mod publisher;
mod registry;
pub mod zwave;

pub use bridge::{Bridge, BridgeError, BridgeResult, SharedBridge};
pub use hue::{HueBridge, HueClient, SensorSource};
pub use mqtt::MqttBridge;
pub use poll::{SensorChange, SensorState, Snapshot, SnapshotTracker};
pub use publisher::{build_publisher, publish_target, MqttPublisher, Publisher, SharedPublisher};
pub use registry::{BridgeConstructor, BridgeRegistry};
pub use zwave::{ZWaveBridge, ZWaveConnector, ZWaveController, ZWaveEvent};
