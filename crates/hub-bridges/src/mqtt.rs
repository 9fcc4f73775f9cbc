//! MQTT bridge
//!
//! Subscribes to the configured topic filter with QoS 2. Every inbound
//! publish becomes `mqtt://<id>/<topic>#<payload>`. A trigger remainder
//! `<topic> <message>` publishes `message` on `topic`.

use async_trait::async_trait;
use hub_config::{MqttBridgeConfig, MqttConnection};
use hub_core::{Connectable, Link, SharedEventSink};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::bridge::{Bridge, BridgeError, BridgeResult};

const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Capacity of the client's request channel
const REQUEST_CAPACITY: usize = 10;

/// Client options for one broker connection
pub(crate) fn mqtt_options(connection: &MqttConnection) -> MqttOptions {
    let mut options = MqttOptions::new(&connection.client_id, &connection.host, connection.port);
    options.set_keep_alive(KEEP_ALIVE);
    if let Some(username) = &connection.username {
        options.set_credentials(username, connection.password.as_deref().unwrap_or_default());
    }
    options
}

/// Poll `event_loop` until the broker acknowledged the connection
pub(crate) async fn handshake(event_loop: &mut EventLoop) -> BridgeResult<()> {
    loop {
        if let Event::Incoming(Packet::ConnAck(ack)) = event_loop.poll().await? {
            return match ack.code {
                ConnectReturnCode::Success => Ok(()),
                code => Err(BridgeError::Refused(format!("{:?}", code))),
            };
        }
    }
}

/// Split a trigger remainder at its last space into topic and message
pub fn split_publish(remainder: &str) -> (&str, &str) {
    match remainder.rsplit_once(' ') {
        Some((topic, message)) => (topic.trim_end(), message.trim()),
        None => (remainder, ""),
    }
}

/// Event URI for one inbound message
pub fn message_uri(bridge: &str, topic: &str, payload: &[u8]) -> String {
    format!(
        "mqtt://{}/{}#{}",
        bridge,
        topic,
        String::from_utf8_lossy(payload)
    )
}

pub struct MqttBridge {
    config: MqttBridgeConfig,
    sink: SharedEventSink,
    link: Link,
    client: RwLock<Option<AsyncClient>>,
}

impl MqttBridge {
    pub fn new(config: MqttBridgeConfig, sink: SharedEventSink) -> BridgeResult<Self> {
        if config.connection.host.is_empty() {
            return Err(BridgeError::InvalidConfig("host must not be empty".to_string()));
        }
        if config.topic.is_empty() {
            return Err(BridgeError::InvalidConfig("topic must not be empty".to_string()));
        }
        info!(
            bridge = %config.name,
            host = %config.connection.host,
            port = config.connection.port,
            client_id = %config.connection.client_id,
            "Initialized MQTT bridge"
        );
        Ok(Self {
            config,
            sink,
            link: Link::new(),
            client: RwLock::new(None),
        })
    }

    async fn session(&self, client: &AsyncClient, mut event_loop: EventLoop) -> BridgeResult<()> {
        handshake(&mut event_loop).await?;
        client
            .subscribe(self.config.topic.as_str(), QoS::ExactlyOnce)
            .await?;

        *self.client.write().await = Some(client.clone());
        self.link.mark_connected();
        info!(bridge = %self.config.name, topic = %self.config.topic, "MQTT bridge connected");

        loop {
            if let Event::Incoming(Packet::Publish(publish)) = event_loop.poll().await? {
                debug!(bridge = %self.config.name, topic = %publish.topic, "MQTT message");
                self.sink
                    .emit(message_uri(&self.config.name, &publish.topic, &publish.payload));
            }
        }
    }
}

#[async_trait]
impl Connectable for MqttBridge {
    type Error = BridgeError;

    fn id(&self) -> &str {
        &self.config.name
    }

    fn link(&self) -> &Link {
        &self.link
    }

    async fn connect(&self) -> BridgeResult<()> {
        let options = mqtt_options(&self.config.connection);
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);

        let result = tokio::select! {
            result = self.session(&client, event_loop) => result,
            _ = self.link.stopped() => {
                if let Err(e) = client.try_disconnect() {
                    debug!(bridge = %self.config.name, error = %e, "Disconnect request not queued");
                }
                Ok(())
            }
        };

        *self.client.write().await = None;
        result
    }
}

#[async_trait]
impl Bridge for MqttBridge {
    fn kind(&self) -> &'static str {
        "mqtt"
    }

    async fn trigger(&self, remainder: &str) -> BridgeResult<()> {
        let (topic, message) = split_publish(remainder);
        if topic.is_empty() {
            return Err(BridgeError::InvalidTrigger(remainder.to_string()));
        }

        let client = self.client.read().await.clone();
        let Some(client) = client else {
            warn!(bridge = %self.config.name, remainder, "Trigger while not connected");
            return Err(BridgeError::NotConnected);
        };

        info!(bridge = %self.config.name, topic, message, "Publishing");
        client
            .publish(topic, QoS::AtMostOnce, false, message.as_bytes().to_vec())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_config::MqttTransport;
    use hub_core::{EventSink, LinkState};
    use std::sync::Arc;

    struct NullSink;

    impl EventSink for NullSink {
        fn emit(&self, _uri: String) {}
    }

    fn config(host: &str) -> MqttBridgeConfig {
        MqttBridgeConfig {
            name: "m1".to_string(),
            connection: MqttConnection {
                host: host.to_string(),
                port: 1883,
                client_id: "eventhub".to_string(),
                proto: MqttTransport::Tcp,
                username: None,
                password: None,
            },
            topic: "#".to_string(),
        }
    }

    #[test]
    fn test_split_publish() {
        assert_eq!(split_publish("home/lamp ON"), ("home/lamp", "ON"));
        assert_eq!(split_publish("home/lamp set on"), ("home/lamp set", "on"));
        assert_eq!(split_publish("home/lamp"), ("home/lamp", ""));
    }

    #[test]
    fn test_message_uri() {
        assert_eq!(
            message_uri("m1", "home/door", b"open"),
            "mqtt://m1/home/door#open"
        );
    }

    #[test]
    fn test_rejects_empty_host() {
        let result = MqttBridge::new(config(""), Arc::new(NullSink));
        assert!(matches!(result, Err(BridgeError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_trigger_before_connect_fails() {
        let bridge = MqttBridge::new(config("localhost"), Arc::new(NullSink)).unwrap();
        assert_eq!(bridge.state(), LinkState::Initialized);
        assert!(matches!(
            bridge.trigger("home/lamp ON").await,
            Err(BridgeError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut config = config("127.0.0.1");
        config.connection.port = port;
        let bridge = MqttBridge::new(config, Arc::new(NullSink)).unwrap();

        assert!(matches!(
            bridge.connect().await,
            Err(BridgeError::MqttConnection(_))
        ));
    }
}
