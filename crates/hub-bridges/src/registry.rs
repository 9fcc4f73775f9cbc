//! Bridge constructors keyed by configuration type tag

use hub_config::BridgeConfig;
use hub_core::SharedEventSink;
use reqwest::Client;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::bridge::{BridgeError, BridgeResult, SharedBridge};
use crate::hue::HueBridge;
use crate::mqtt::MqttBridge;
use crate::zwave::{ZWaveBridge, ZWaveConnector};

/// Builds one bridge from its configuration entry
pub type BridgeConstructor =
    Arc<dyn Fn(&BridgeConfig, SharedEventSink) -> BridgeResult<SharedBridge> + Send + Sync>;

/// Closed set of bridge types available to the manager
///
/// The default registry knows `hue` and `mqtt`. `zwave` needs a controller
/// driver and is added with [`BridgeRegistry::with_zwave`].
#[derive(Clone)]
pub struct BridgeRegistry {
    constructors: HashMap<&'static str, BridgeConstructor>,
}

impl BridgeRegistry {
    /// A registry with no bridge types
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    pub fn register(mut self, kind: &'static str, constructor: BridgeConstructor) -> Self {
        self.constructors.insert(kind, constructor);
        self
    }

    pub fn with_hue(self, http: Client) -> Self {
        self.register(
            "hue",
            Arc::new(move |config: &BridgeConfig, sink: SharedEventSink| match config {
                BridgeConfig::Hue(c) => {
                    let bridge = HueBridge::new(c.clone(), http.clone(), sink)?;
                    Ok(Arc::new(bridge) as SharedBridge)
                }
                other => Err(mismatch("hue", other)),
            }),
        )
    }

    pub fn with_mqtt(self) -> Self {
        self.register(
            "mqtt",
            Arc::new(|config: &BridgeConfig, sink: SharedEventSink| match config {
                BridgeConfig::Mqtt(c) => {
                    let bridge = MqttBridge::new(c.clone(), sink)?;
                    Ok(Arc::new(bridge) as SharedBridge)
                }
                other => Err(mismatch("mqtt", other)),
            }),
        )
    }

    pub fn with_zwave(self, connector: Arc<dyn ZWaveConnector>) -> Self {
        self.register(
            "zwave",
            Arc::new(move |config: &BridgeConfig, sink: SharedEventSink| match config {
                BridgeConfig::ZWave(c) => {
                    let bridge = ZWaveBridge::new(c.clone(), connector.clone(), sink)?;
                    Ok(Arc::new(bridge) as SharedBridge)
                }
                other => Err(mismatch("zwave", other)),
            }),
        )
    }

    pub fn supports(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    /// Registered type tags, sorted
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.constructors.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    /// Construct the bridge for `config`; never touches the network
    pub fn build(
        &self,
        config: &BridgeConfig,
        sink: SharedEventSink,
    ) -> BridgeResult<SharedBridge> {
        let constructor = self
            .constructors
            .get(config.kind())
            .ok_or_else(|| BridgeError::UnknownType(config.kind().to_string()))?;
        constructor(config, sink)
    }
}

impl Default for BridgeRegistry {
    fn default() -> Self {
        Self::empty().with_hue(Client::new()).with_mqtt()
    }
}

impl fmt::Debug for BridgeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

fn mismatch(expected: &str, config: &BridgeConfig) -> BridgeError {
    BridgeError::InvalidConfig(format!(
        "'{}' constructor given a '{}' entry",
        expected,
        config.kind()
    ))
}
