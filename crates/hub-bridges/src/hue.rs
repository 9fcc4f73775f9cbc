//! Lighting bridge over the Hue REST API
//!
//! Connecting resolves the bridge address (configured, or through the public
//! discovery portal), lists lights, groups and sensors, then polls sensors at
//! the configured interval until stopped. Sensor changes are turned into
//! events by [`SnapshotTracker`].

use async_trait::async_trait;
use hub_config::HueBridgeConfig;
use hub_core::{Connectable, EventSink, Link, SharedEventSink};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::bridge::{Bridge, BridgeError, BridgeResult};
use crate::poll::{SensorState, SnapshotTracker};

/// Public portal listing bridges on the caller's network
pub const DISCOVERY_URL: &str = "https://discovery.meethue.com/";

/// Something that returns the current state of every sensor
#[async_trait]
pub trait SensorSource: Send + Sync {
    async fn sensors(&self) -> BridgeResult<Vec<SensorState>>;
}

/// A light or group addressed by a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HueTarget {
    Light(u32),
    Group(u32),
}

impl HueTarget {
    fn state_resource(&self) -> String {
        match self {
            HueTarget::Light(n) => format!("lights/{}/state", n),
            HueTarget::Group(n) => format!("groups/{}/action", n),
        }
    }
}

/// Parse `lights/<n>/on|off` or `groups/<n>/on|off`
pub fn parse_trigger(remainder: &str) -> BridgeResult<(HueTarget, bool)> {
    let invalid = || BridgeError::InvalidTrigger(remainder.to_string());

    let parts: Vec<&str> = remainder.trim_matches('/').split('/').collect();
    let [collection, number, state] = parts.as_slice() else {
        return Err(invalid());
    };

    let number: u32 = number.parse().map_err(|_| invalid())?;
    let target = match *collection {
        "lights" => HueTarget::Light(number),
        "groups" => HueTarget::Group(number),
        _ => return Err(invalid()),
    };
    let on = match *state {
        "on" => true,
        "off" => false,
        _ => return Err(invalid()),
    };

    Ok((target, on))
}

/// Named resource as listed by the bridge
#[derive(Debug, Clone, Deserialize)]
pub struct NamedResource {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct RawSensor {
    #[serde(default)]
    modelid: String,
    #[serde(default)]
    state: RawSensorState,
}

#[derive(Debug, Default, Deserialize)]
struct RawSensorState {
    buttonevent: Option<i64>,
    presence: Option<bool>,
    daylight: Option<bool>,
    temperature: Option<i64>,
    lastupdated: Option<String>,
}

fn sensor_states(raw: BTreeMap<String, RawSensor>) -> Vec<SensorState> {
    raw.into_iter()
        .filter_map(|(key, sensor)| {
            let Ok(id) = key.parse() else {
                debug!(key = %key, "Skipping sensor with non-numeric id");
                return None;
            };
            let state = sensor.state;
            Some(SensorState {
                id,
                device_type: sensor.modelid,
                button: state.buttonevent.unwrap_or(0).to_string(),
                presence: state.presence.unwrap_or(false).to_string(),
                daylight: state.daylight.unwrap_or(false).to_string(),
                temperature: state.temperature.unwrap_or(0).to_string(),
                last_updated: state.lastupdated.unwrap_or_default(),
            })
        })
        .collect()
}

/// REST client for one bridge and one API key
#[derive(Debug, Clone)]
pub struct HueClient {
    http: Client,
    base: String,
}

impl HueClient {
    /// `host` is an address (`10.0.0.2`, `10.0.0.2:80`) or a base URL
    pub fn new(http: Client, host: &str, api_key: &str) -> Self {
        let host = host.trim_end_matches('/');
        let base = if host.contains("://") {
            format!("{}/api/{}", host, api_key)
        } else {
            format!("http://{}/api/{}", host, api_key)
        };
        Self { http, base }
    }

    async fn get<T: DeserializeOwned>(&self, resource: &str) -> BridgeResult<T> {
        let value: Value = self
            .http
            .get(format!("{}/{}", self.base, resource))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        check_api_error(&value)?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn lights(&self) -> BridgeResult<BTreeMap<String, NamedResource>> {
        self.get("lights").await
    }

    pub async fn groups(&self) -> BridgeResult<BTreeMap<String, NamedResource>> {
        self.get("groups").await
    }

    pub async fn set_on(&self, target: HueTarget, on: bool) -> BridgeResult<()> {
        let value: Value = self
            .http
            .put(format!("{}/{}", self.base, target.state_resource()))
            .json(&json!({ "on": on }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        check_api_error(&value)
    }
}

#[async_trait]
impl SensorSource for HueClient {
    async fn sensors(&self) -> BridgeResult<Vec<SensorState>> {
        Ok(sensor_states(self.get("sensors").await?))
    }
}

/// The API answers errors with `[{"error": {...}}]` and a 200 status
fn check_api_error(value: &Value) -> BridgeResult<()> {
    let error = value
        .as_array()
        .into_iter()
        .flatten()
        .find_map(|entry| entry.get("error"));
    match error {
        Some(error) => Err(BridgeError::Api(
            error
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        )),
        None => Ok(()),
    }
}

/// Find the first bridge on the local network through the discovery portal
pub async fn discover(http: &Client) -> BridgeResult<String> {
    #[derive(Deserialize)]
    struct Discovered {
        internalipaddress: String,
    }

    let found: Vec<Discovered> = http
        .get(DISCOVERY_URL)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    found
        .into_iter()
        .next()
        .map(|b| b.internalipaddress)
        .ok_or_else(|| BridgeError::Discovery("no bridge found on the network".to_string()))
}

/// Poll `source` forever, emitting one event per changed sensor per cycle
///
/// A failed fetch skips the cycle and keeps the previous snapshots.
pub async fn poll_sensors(
    source: &dyn SensorSource,
    bridge: &str,
    interval: Duration,
    sink: &dyn EventSink,
) {
    let mut tracker: SnapshotTracker<u32, SensorState> = SnapshotTracker::new();

    loop {
        match source.sensors().await {
            Ok(states) => {
                let changes = tracker.observe(states.into_iter().map(|s| (s.id, s)), |then, now| {
                    debug!(bridge, previous = %then, current = %now, "Sensor state differs");
                    now.change_from(then)
                });
                for change in changes {
                    let uri = change.to_uri(bridge);
                    info!(bridge, uri = %uri, "Sensor changed");
                    sink.emit(uri);
                }
            }
            Err(e) => debug!(bridge, error = %e, "Sensor poll failed, skipping cycle"),
        }

        tokio::time::sleep(interval).await;
    }
}

/// Lighting bridge
pub struct HueBridge {
    config: HueBridgeConfig,
    http: Client,
    sink: SharedEventSink,
    link: Link,
    client: RwLock<Option<Arc<HueClient>>>,
}

impl HueBridge {
    pub fn new(config: HueBridgeConfig, http: Client, sink: SharedEventSink) -> BridgeResult<Self> {
        if config.api_key.is_empty() {
            return Err(BridgeError::InvalidConfig("api_key must not be empty".to_string()));
        }
        if config.poll_interval == 0 {
            return Err(BridgeError::InvalidConfig(
                "poll_interval must be greater than 0".to_string(),
            ));
        }
        info!(bridge = %config.name, host = ?config.host, "Initialized Hue bridge");
        Ok(Self {
            config,
            http,
            sink,
            link: Link::new(),
            client: RwLock::new(None),
        })
    }

    async fn resolve_host(&self) -> BridgeResult<String> {
        match &self.config.host {
            Some(host) => Ok(host.clone()),
            None => {
                let host = discover(&self.http).await?;
                info!(bridge = %self.config.name, host = %host, "Discovered Hue bridge");
                Ok(host)
            }
        }
    }
}

#[async_trait]
impl Connectable for HueBridge {
    type Error = BridgeError;

    fn id(&self) -> &str {
        &self.config.name
    }

    fn link(&self) -> &Link {
        &self.link
    }

    async fn connect(&self) -> BridgeResult<()> {
        let host = self.resolve_host().await?;
        let client = Arc::new(HueClient::new(self.http.clone(), &host, &self.config.api_key));

        for (id, light) in client.lights().await? {
            info!(bridge = %self.config.name, id = %id, name = %light.name, "Light");
        }
        for (id, group) in client.groups().await? {
            info!(bridge = %self.config.name, id = %id, name = %group.name, "Group");
        }
        let sensors = client.sensors().await?;
        for sensor in &sensors {
            info!(
                bridge = %self.config.name,
                id = sensor.id,
                model = %sensor.device_type,
                "Sensor"
            );
        }

        *self.client.write().await = Some(client.clone());
        self.link.mark_connected();
        info!(bridge = %self.config.name, host = %host, "Hue bridge connected");

        let interval = Duration::from_millis(self.config.poll_interval);
        tokio::select! {
            _ = poll_sensors(client.as_ref(), &self.config.name, interval, self.sink.as_ref()) => {}
            _ = self.link.stopped() => {}
        }

        *self.client.write().await = None;
        Ok(())
    }
}

#[async_trait]
impl Bridge for HueBridge {
    fn kind(&self) -> &'static str {
        "hue"
    }

    async fn trigger(&self, remainder: &str) -> BridgeResult<()> {
        let (target, on) = parse_trigger(remainder)?;
        let client = self.client.read().await.clone();
        let Some(client) = client else {
            warn!(bridge = %self.config.name, remainder, "Trigger while not connected");
            return Err(BridgeError::NotConnected);
        };
        info!(bridge = %self.config.name, ?target, on, "Setting on-state");
        client.set_on(target, on).await
    }
}
