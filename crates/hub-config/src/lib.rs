//! Configuration loading for the event hub
//!
//! A configuration document is read with [`DocumentLoader`] (YAML with
//! `!include`, `!include_dir_merge_list`, `!secret` and `!env_var` tags;
//! plain JSON works too) and then validated into a [`HubConfig`].
//!
//! # Example
//!
//! ```ignore
//! use hub_config::load_config;
//!
//! let config = load_config("/etc/eventhub/config.yaml")?;
//! for bridge in &config.bridges {
//!     println!("{} ({})", bridge.name(), bridge.kind());
//! }
//! ```

mod error;
mod loader;
mod schema;
mod secrets;

use std::path::Path;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_document, DocumentLoader};
pub use schema::{
    ActionConfig, BridgeConfig, EmailActionConfig, HttpActionConfig, HubConfig, HubSettings,
    HueBridgeConfig, MqttBridgeConfig, MqttConnection, MqttPublisherConfig, MqttTransport,
    PublisherConfig, RegexRuleConfig, RuleConfig, TriggerActionConfig, WaitActionConfig,
    ZWaveBridgeConfig,
};
pub use secrets::Secrets;

pub use serde_yaml::Value;

/// Load and validate the configuration document at `path`
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<HubConfig> {
    HubConfig::from_value(load_document(path)?)
}
