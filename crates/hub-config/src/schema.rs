//! Typed configuration schema
//!
//! The document has three sections plus optional hub settings:
//!
//! ```yaml
//! hub:
//!   reconnect_delay_secs: 3
//! bridges:
//!   - { type: hue, name: h1, api_key: "...", poll_interval: 500 }
//!   - { type: mqtt, name: m1, host: broker, port: 1883, client_id: hub }
//! rules:
//!   - type: regex
//!     regex: "presence#true"
//!     actions:
//!       - { type: wait, seconds: 5 }
//!       - { type: trigger, trigger: "bridge://m1/hall/light on" }
//! publisher:
//!   { type: mqtt, name: out, prefix: events, host: broker, port: 1883, client_id: hub-pub }
//! ```
//!
//! Validation runs over the whole document and reports every problem at
//! once. Unknown bridge, rule and publisher types are errors; unknown action
//! types are logged and skipped.

use crate::error::{ConfigError, ConfigResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::HashSet;
use tracing::warn;

/// The whole hub configuration
#[derive(Debug, Clone, Default)]
pub struct HubConfig {
    pub hub: HubSettings,
    pub bridges: Vec<BridgeConfig>,
    pub rules: Vec<RuleConfig>,
    pub publisher: Option<PublisherConfig>,
}

/// Runtime tuning for the manager
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HubSettings {
    /// Fixed delay between reconnection attempts
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Capacity of the queue feeding the publisher
    #[serde(default = "default_publisher_queue")]
    pub publisher_queue: usize,

    /// Bound on fire-and-forget dispatches in flight
    ///
    /// A dispatch holds its slot until every matched rule finished, `wait`
    /// actions included. Long waits therefore occupy slots, and once all are
    /// taken further bridge events are dropped with a warning. Raise this
    /// when rules wait for minutes on frequent events.
    #[serde(default = "default_max_pending_dispatches")]
    pub max_pending_dispatches: usize,

    /// Interval of the statistics log line, 0 disables it
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

fn default_reconnect_delay_secs() -> u64 {
    3
}

fn default_publisher_queue() -> usize {
    1024
}

fn default_max_pending_dispatches() -> usize {
    256
}

fn default_heartbeat_secs() -> u64 {
    30
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: default_reconnect_delay_secs(),
            publisher_queue: default_publisher_queue(),
            max_pending_dispatches: default_max_pending_dispatches(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

/// Bridge configuration, one variant per protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeConfig {
    Hue(HueBridgeConfig),
    Mqtt(MqttBridgeConfig),
    #[serde(rename = "zwave")]
    ZWave(ZWaveBridgeConfig),
}

impl BridgeConfig {
    /// Type tags accepted in the `type` field
    pub const KINDS: &'static [&'static str] = &["hue", "mqtt", "zwave"];

    /// The bridge id (its configured name)
    pub fn name(&self) -> &str {
        match self {
            BridgeConfig::Hue(c) => &c.name,
            BridgeConfig::Mqtt(c) => &c.name,
            BridgeConfig::ZWave(c) => &c.name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BridgeConfig::Hue(_) => "hue",
            BridgeConfig::Mqtt(_) => "mqtt",
            BridgeConfig::ZWave(_) => "zwave",
        }
    }
}

/// Lighting bridge polled over its REST API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HueBridgeConfig {
    pub name: String,

    #[serde(alias = "apiKey")]
    pub api_key: String,

    /// Sensor poll interval in milliseconds
    #[serde(alias = "pollInterval", default = "default_poll_interval")]
    pub poll_interval: u64,

    /// Bridge address; discovered through the portal when absent
    #[serde(default)]
    pub host: Option<String>,
}

fn default_poll_interval() -> u64 {
    1000
}

/// Broker connection settings shared by the MQTT bridge and publisher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConnection {
    pub host: String,

    pub port: u16,

    #[serde(alias = "clientId")]
    pub client_id: String,

    #[serde(default)]
    pub proto: MqttTransport,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

/// Network transport to the broker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MqttTransport {
    #[default]
    Tcp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttBridgeConfig {
    pub name: String,

    #[serde(flatten)]
    pub connection: MqttConnection,

    /// Subscription filter
    #[serde(default = "default_topic")]
    pub topic: String,
}

fn default_topic() -> String {
    "#".to_string()
}

/// Mesh-radio controller attached over a serial port
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZWaveBridgeConfig {
    pub name: String,
    pub port: String,
}

/// Rule configuration
#[derive(Debug, Clone)]
pub enum RuleConfig {
    Regex(RegexRuleConfig),
}

impl RuleConfig {
    pub const KINDS: &'static [&'static str] = &["regex"];

    pub fn actions(&self) -> &[ActionConfig] {
        match self {
            RuleConfig::Regex(c) => &c.actions,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegexRuleConfig {
    /// Optional label for logs
    pub name: Option<String>,
    pub regex: String,
    pub actions: Vec<ActionConfig>,
}

/// Shape of a rule entry before its actions are validated one by one
#[derive(Debug, Deserialize)]
struct RawRegexRule {
    #[serde(default)]
    name: Option<String>,
    regex: String,
    #[serde(default)]
    actions: Vec<Value>,
}

/// Action configuration, one variant per action type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionConfig {
    Wait(WaitActionConfig),
    Trigger(TriggerActionConfig),
    Http(HttpActionConfig),
    Email(EmailActionConfig),
}

impl ActionConfig {
    pub const KINDS: &'static [&'static str] = &["wait", "trigger", "http", "email"];

    pub fn kind(&self) -> &'static str {
        match self {
            ActionConfig::Wait(_) => "wait",
            ActionConfig::Trigger(_) => "trigger",
            ActionConfig::Http(_) => "http",
            ActionConfig::Email(_) => "email",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitActionConfig {
    pub seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerActionConfig {
    /// Target routing URI, `bridge://<id>/<path>`
    #[serde(alias = "target")]
    pub trigger: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpActionConfig {
    pub method: String,
    #[serde(alias = "format")]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailActionConfig {
    /// SMTP endpoint as `host:port`
    pub address: String,
    /// Host name used for authentication and TLS
    pub host: String,
    pub user: String,
    pub password: String,
    pub from: String,
    pub to: String,
    /// Raw message, headers included; a literal `\n` becomes a newline
    pub message: String,
}

/// Outbound mirror of every dispatched event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PublisherConfig {
    Mqtt(MqttPublisherConfig),
}

impl PublisherConfig {
    pub const KINDS: &'static [&'static str] = &["mqtt"];

    pub fn name(&self) -> &str {
        match self {
            PublisherConfig::Mqtt(c) => &c.name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttPublisherConfig {
    pub name: String,

    /// Topic prefix prepended to every mirrored event
    #[serde(default)]
    pub prefix: String,

    #[serde(flatten)]
    pub connection: MqttConnection,
}

impl HubConfig {
    /// Validate a loaded document into the typed schema
    pub fn from_value(document: Value) -> ConfigResult<Self> {
        let mut problems = Problems::default();
        let mut config = HubConfig::default();

        let Value::Mapping(mut root) = document else {
            return Err(ConfigError::Invalid {
                errors: vec!["configuration root must be a mapping".to_string()],
            });
        };

        if let Some(hub) = root.remove("hub") {
            if let Some(settings) = problems.parse::<HubSettings>("hub", hub) {
                config.hub = settings;
            }
        }

        for (i, entry) in problems.sequence("bridges", root.remove("bridges")) {
            let at = format!("bridges[{}]", i);
            let bridge = problems.parse_tagged::<BridgeConfig>(&at, BridgeConfig::KINDS, entry);
            if let Some(bridge) = bridge {
                config.bridges.push(bridge);
            }
        }
        problems.check_bridge_names(&config.bridges);

        for (i, entry) in problems.sequence("rules", root.remove("rules")) {
            let at = format!("rules[{}]", i);
            if let Some(rule) = problems.parse_rule(&at, entry) {
                config.rules.push(rule);
            }
        }

        if let Some(entry) = root.remove("publisher").filter(|v| !v.is_null()) {
            config.publisher = problems.parse_tagged::<PublisherConfig>(
                "publisher",
                PublisherConfig::KINDS,
                entry,
            );
        }

        for (key, _) in root {
            warn!(key = ?key, "Ignoring unknown top-level configuration key");
        }

        problems.finish(config)
    }
}

/// Collects schema problems with their location
#[derive(Default)]
struct Problems {
    errors: Vec<String>,
}

impl Problems {
    fn push(&mut self, at: &str, message: impl std::fmt::Display) {
        self.errors.push(format!("{}: {}", at, message));
    }

    fn parse<T: DeserializeOwned>(&mut self, at: &str, value: Value) -> Option<T> {
        match serde_yaml::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                self.push(at, e);
                None
            }
        }
    }

    fn parse_tagged<T: DeserializeOwned>(
        &mut self,
        at: &str,
        kinds: &[&str],
        value: Value,
    ) -> Option<T> {
        match type_tag(&value) {
            Some(Some(kind)) if kinds.contains(&kind.as_str()) => {
                self.parse(&format!("{} ({})", at, kind), value)
            }
            Some(Some(kind)) => {
                self.push(at, format!("unknown type '{}'", kind));
                None
            }
            Some(None) => {
                self.push(at, "missing field `type`");
                None
            }
            None => {
                self.push(at, "expected a mapping");
                None
            }
        }
    }

    fn parse_rule(&mut self, at: &str, value: Value) -> Option<RuleConfig> {
        match type_tag(&value) {
            Some(Some(kind)) if RuleConfig::KINDS.contains(&kind.as_str()) => {}
            Some(Some(kind)) => {
                self.push(at, format!("unknown rule type '{}'", kind));
                return None;
            }
            Some(None) => {
                self.push(at, "missing field `type`");
                return None;
            }
            None => {
                self.push(at, "expected a mapping");
                return None;
            }
        }

        let raw: RawRegexRule = self.parse(&format!("{} (regex)", at), value)?;
        let mut actions = Vec::with_capacity(raw.actions.len());
        for (j, entry) in raw.actions.into_iter().enumerate() {
            let action_at = format!("{}.actions[{}]", at, j);
            match type_tag(&entry) {
                Some(Some(kind)) if ActionConfig::KINDS.contains(&kind.as_str()) => {
                    if let Some(action) = self.parse(&format!("{} ({})", action_at, kind), entry) {
                        actions.push(action);
                    }
                }
                Some(Some(kind)) => {
                    warn!(at = %action_at, kind = %kind, "Skipping action of unknown type");
                }
                Some(None) => self.push(&action_at, "missing field `type`"),
                None => self.push(&action_at, "expected a mapping"),
            }
        }

        Some(RuleConfig::Regex(RegexRuleConfig {
            name: raw.name,
            regex: raw.regex,
            actions,
        }))
    }

    /// Entries of an optional list section
    fn sequence(&mut self, at: &str, value: Option<Value>) -> Vec<(usize, Value)> {
        match value {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Sequence(items)) => items.into_iter().enumerate().collect(),
            Some(_) => {
                self.push(at, "expected a list");
                Vec::new()
            }
        }
    }

    fn check_bridge_names(&mut self, bridges: &[BridgeConfig]) {
        let mut seen = HashSet::new();
        for (i, bridge) in bridges.iter().enumerate() {
            let name = bridge.name();
            if name.is_empty() || name.contains('/') {
                self.push(
                    &format!("bridges[{}] ({})", i, bridge.kind()),
                    format!("name '{}' must be non-empty and contain no '/'", name),
                );
            } else if !seen.insert(name) {
                warn!(
                    bridge = %name,
                    "Duplicate bridge name, the later entry replaces the earlier one"
                );
            }
        }
    }

    fn finish<T>(self, value: T) -> ConfigResult<T> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(ConfigError::Invalid {
                errors: self.errors,
            })
        }
    }
}

/// `None` if the entry is not a mapping, `Some(None)` if it has no string `type`
fn type_tag(value: &Value) -> Option<Option<String>> {
    let map = value.as_mapping()?;
    Some(map.get("type").and_then(Value::as_str).map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> ConfigResult<HubConfig> {
        HubConfig::from_value(serde_yaml::from_str(yaml).unwrap())
    }

    fn problems(yaml: &str) -> Vec<String> {
        match parse(yaml) {
            Err(ConfigError::Invalid { errors }) => errors,
            other => panic!("expected invalid configuration, got {:?}", other),
        }
    }

    #[test]
    fn test_full_document() {
        let config = parse(
            r#"
hub:
  reconnect_delay_secs: 5
bridges:
  - type: hue
    name: h1
    apiKey: secret
    pollInterval: 250
  - type: mqtt
    name: m1
    host: broker.local
    port: 1883
    clientId: hub
rules:
  - type: regex
    regex: "button#34"
    actions:
      - type: wait
        seconds: 5
      - type: trigger
        trigger: "bridge://m1/hall/light off"
publisher:
  type: mqtt
  name: out
  prefix: events
  host: broker.local
  port: 1883
  client_id: hub-pub
"#,
        )
        .unwrap();

        assert_eq!(config.hub.reconnect_delay_secs, 5);
        assert_eq!(config.hub.publisher_queue, 1024);
        assert_eq!(config.bridges.len(), 2);

        match &config.bridges[0] {
            BridgeConfig::Hue(hue) => {
                assert_eq!(hue.api_key, "secret");
                assert_eq!(hue.poll_interval, 250);
                assert!(hue.host.is_none());
            }
            other => panic!("unexpected bridge {:?}", other),
        }
        match &config.bridges[1] {
            BridgeConfig::Mqtt(mqtt) => {
                assert_eq!(mqtt.connection.client_id, "hub");
                assert_eq!(mqtt.connection.proto, MqttTransport::Tcp);
                assert_eq!(mqtt.topic, "#");
            }
            other => panic!("unexpected bridge {:?}", other),
        }

        assert_eq!(
            config.rules[0].actions(),
            &[
                ActionConfig::Wait(WaitActionConfig { seconds: 5 }),
                ActionConfig::Trigger(TriggerActionConfig {
                    trigger: "bridge://m1/hall/light off".to_string()
                }),
            ]
        );
        assert_eq!(config.publisher.as_ref().map(|p| p.name()), Some("out"));
    }

    #[test]
    fn test_empty_document_sections_are_optional() {
        let config = parse("{}").unwrap();
        assert!(config.bridges.is_empty());
        assert!(config.rules.is_empty());
        assert!(config.publisher.is_none());
        assert_eq!(config.hub.heartbeat_secs, 30);
    }

    #[test]
    fn test_problems_are_aggregated() {
        let errors = problems(
            r#"
bridges:
  - type: hue
    name: h1
  - type: mqtt
    name: m1
    port: 1883
    client_id: x
  - type: lifx
    name: l1
rules:
  - type: fuzzy
    regex: x
"#,
        );

        assert_eq!(errors.len(), 4, "{:?}", errors);
        assert!(errors[0].starts_with("bridges[0] (hue): missing field `api_key`"));
        assert!(errors[1].starts_with("bridges[1] (mqtt):"));
        assert!(errors[1].contains("host"));
        assert_eq!(errors[2], "bridges[2]: unknown type 'lifx'");
        assert_eq!(errors[3], "rules[0]: unknown rule type 'fuzzy'");
    }

    #[test]
    fn test_unknown_action_type_is_skipped() {
        let config = parse(
            r#"
rules:
  - type: regex
    regex: x
    actions:
      - type: teleport
        where: moon
      - type: wait
        seconds: 1
"#,
        )
        .unwrap();

        assert_eq!(
            config.rules[0].actions(),
            &[ActionConfig::Wait(WaitActionConfig { seconds: 1 })]
        );
    }

    #[test]
    fn test_mistyped_action_field_is_an_error() {
        let errors = problems(
            r#"
rules:
  - type: regex
    regex: x
    actions:
      - type: wait
        seconds: soon
"#,
        );
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("rules[0].actions[0] (wait):"));
    }

    #[test]
    fn test_bridge_name_must_not_contain_slash() {
        let errors = problems(
            r#"
bridges:
  - type: zwave
    name: "a/b"
    port: /dev/ttyACM0
"#,
        );
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("must be non-empty"));
    }

    #[test]
    fn test_unknown_publisher_type() {
        let errors = problems("publisher:\n  type: kafka\n  name: k\n");
        assert_eq!(errors, vec!["publisher: unknown type 'kafka'".to_string()]);
    }

    #[test]
    fn test_http_action_accepts_format_alias() {
        let config = parse(
            r#"
rules:
  - type: regex
    regex: x
    actions:
      - type: http
        method: POST
        format: "http://example.invalid/hook"
"#,
        )
        .unwrap();
        assert_eq!(
            config.rules[0].actions(),
            &[ActionConfig::Http(HttpActionConfig {
                method: "POST".to_string(),
                url: "http://example.invalid/hook".to_string(),
            })]
        );
    }
}
