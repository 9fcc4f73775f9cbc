//! Event publisher
//!
//! Mirrors every dispatched event onto an external bus. The MQTT publisher
//! maps `scheme://authority/path#fragment` to topic
//! `<prefix>/<scheme>/<authority>/<path>` with the fragment as payload.

use async_trait::async_trait;
use hub_config::{MqttPublisherConfig, PublisherConfig};
use hub_core::{Connectable, EventUri, Link};
use rumqttc::{AsyncClient, EventLoop, QoS};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::bridge::{BridgeError, BridgeResult};
use crate::mqtt::{handshake, mqtt_options};

/// Capacity of the client's request channel
const REQUEST_CAPACITY: usize = 64;

/// An outbound mirror of dispatched events
#[async_trait]
pub trait Publisher: Connectable<Error = BridgeError> {
    async fn publish(&self, uri: &str) -> BridgeResult<()>;

    fn stop(&self) {
        self.link().request_stop();
    }
}

/// Thread-safe handle to a publisher
pub type SharedPublisher = Arc<dyn Publisher>;

/// Build the configured publisher
pub fn build_publisher(config: &PublisherConfig) -> BridgeResult<SharedPublisher> {
    match config {
        PublisherConfig::Mqtt(c) => Ok(Arc::new(MqttPublisher::new(c.clone())?)),
    }
}

/// Topic and payload for one event
pub fn publish_target(prefix: &str, uri: &EventUri) -> (String, String) {
    let prefix = prefix.trim_end_matches('/');
    let mut topic = String::new();
    if !prefix.is_empty() {
        topic.push_str(prefix);
        topic.push('/');
    }
    topic.push_str(&format!("{}/{}", uri.scheme(), uri.authority()));
    if !uri.path().is_empty() {
        topic.push('/');
        topic.push_str(uri.path());
    }
    (topic, uri.fragment().unwrap_or_default().to_string())
}

pub struct MqttPublisher {
    config: MqttPublisherConfig,
    link: Link,
    client: RwLock<Option<AsyncClient>>,
}

impl MqttPublisher {
    pub fn new(config: MqttPublisherConfig) -> BridgeResult<Self> {
        if config.connection.host.is_empty() {
            return Err(BridgeError::InvalidConfig("host must not be empty".to_string()));
        }
        info!(
            publisher = %config.name,
            host = %config.connection.host,
            prefix = %config.prefix,
            "Initialized MQTT publisher"
        );
        Ok(Self {
            config,
            link: Link::new(),
            client: RwLock::new(None),
        })
    }

    async fn session(&self, client: &AsyncClient, mut event_loop: EventLoop) -> BridgeResult<()> {
        handshake(&mut event_loop).await?;
        *self.client.write().await = Some(client.clone());
        self.link.mark_connected();
        info!(publisher = %self.config.name, "MQTT publisher connected");

        // Outgoing publishes only leave when the event loop is polled
        loop {
            event_loop.poll().await?;
        }
    }
}

#[async_trait]
impl Connectable for MqttPublisher {
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
                    debug!(
                        publisher = %self.config.name,
                        error = %e,
                        "Disconnect request not queued"
                    );
                }
                Ok(())
            }
        };

        *self.client.write().await = None;
        result
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, uri: &str) -> BridgeResult<()> {
        let uri: EventUri = uri.parse()?;
        let (topic, payload) = publish_target(&self.config.prefix, &uri);

        let client = self.client.read().await.clone();
        let Some(client) = client else {
            return Err(BridgeError::NotConnected);
        };

        debug!(publisher = %self.config.name, topic = %topic, "Publishing event");
        client
            .publish(topic, QoS::AtMostOnce, false, payload.into_bytes())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_config::{MqttConnection, MqttTransport};

    fn config() -> PublisherConfig {
        PublisherConfig::Mqtt(MqttPublisherConfig {
            name: "mirror".to_string(),
            prefix: "home/events/".to_string(),
            connection: MqttConnection {
                host: "localhost".to_string(),
                port: 1883,
                client_id: "eventhub-mirror".to_string(),
                proto: MqttTransport::Tcp,
                username: Some("hub".to_string()),
                password: None,
            },
        })
    }

    #[test]
    fn test_publish_target() {
        let uri: EventUri = "hue://h1/sensors/3/presence#true".parse().unwrap();
        assert_eq!(
            publish_target("home/events/", &uri),
            ("home/events/hue/h1/sensors/3/presence".to_string(), "true".to_string())
        );

        let uri: EventUri = "mqtt://m1/#".parse().unwrap();
        assert_eq!(publish_target("", &uri), ("mqtt/m1".to_string(), String::new()));
    }

    #[tokio::test]
    async fn test_publish_before_connect_fails() {
        let publisher = build_publisher(&config()).unwrap();
        assert_eq!(publisher.id(), "mirror");
        assert!(!publisher.link().is_connected());
        assert!(matches!(
            publisher.publish("hue://h1/sensors/3/button#1002").await,
            Err(BridgeError::NotConnected)
        ));
        assert!(matches!(
            publisher.publish("not a uri").await,
            Err(BridgeError::InvalidUri(_))
        ));
    }
}
