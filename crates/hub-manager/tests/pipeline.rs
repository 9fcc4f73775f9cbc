//! End-to-end rule pipelines driven from a YAML file

use async_trait::async_trait;
use hub_actions::{ActionFactory, ActionResult, Mailer};
use hub_bridges::{Bridge, BridgeRegistry, BridgeResult};
use hub_core::{Connectable, Link};
use hub_manager::EventManager;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct RecordingMailer {
    sent: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, from: &str, to: &str, message: &str) -> ActionResult<()> {
        self.sent
            .lock()
            .unwrap()
            .push((from.to_string(), to.to_string(), message.to_string()));
        Ok(())
    }
}

struct Lamp {
    link: Link,
    triggers: Mutex<Vec<(Instant, String)>>,
}

impl Lamp {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            link: Link::new(),
            triggers: Mutex::new(Vec::new()),
        })
    }

    fn remainders(&self) -> Vec<String> {
        self.triggers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }
}

#[async_trait]
impl Connectable for Lamp {
    type Error = hub_bridges::BridgeError;

    fn id(&self) -> &str {
        "lamp1"
    }

    fn link(&self) -> &Link {
        &self.link
    }

    async fn connect(&self) -> BridgeResult<()> {
        self.link.mark_connected();
        self.link.stopped().await;
        Ok(())
    }
}

#[async_trait]
impl Bridge for Lamp {
    fn kind(&self) -> &'static str {
        "lamp"
    }

    async fn trigger(&self, remainder: &str) -> BridgeResult<()> {
        self.triggers
            .lock()
            .unwrap()
            .push((Instant::now(), remainder.to_string()));
        Ok(())
    }
}

fn write_config(yaml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

async fn manager_from(file: &NamedTempFile, actions: &ActionFactory) -> EventManager {
    let config = hub_config::load_config(file.path()).unwrap();
    EventManager::from_config(&config, &BridgeRegistry::default(), actions)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_presence_sends_one_email() {
    let file = write_config(
        r#"
rules:
  - type: regex
    name: presence-mail
    regex: "presence#true"
    actions:
      - type: email
        address: "smtp.example.com:587"
        host: smtp.example.com
        user: hub
        password: pw
        from: hub@example.com
        to: me@example.com
        message: "Subject: presence\nsomeone is home"
"#,
    );
    let mailer = Arc::new(RecordingMailer::default());
    let actions = ActionFactory::new().with_mailer(mailer.clone());
    let manager = manager_from(&file, &actions).await;

    assert_eq!(manager.dispatch("hue://h1/sensors/3/presence#true").await, 1);
    assert_eq!(manager.dispatch("hue://h1/sensors/3/presence#false").await, 0);

    let sent = mailer.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "hub@example.com");
    assert_eq!(sent[0].1, "me@example.com");
    assert_eq!(sent[0].2, "Subject: presence\nsomeone is home");
}

#[tokio::test(start_paused = true)]
async fn test_wait_then_trigger_chain() {
    let file = write_config(
        r#"
rules:
  - type: regex
    regex: "button#1002"
    actions:
      - type: wait
        seconds: 5
      - type: trigger
        trigger: "bridge://lamp1/lights/1/off"
      - type: trigger
        trigger: "bridge://lamp1/groups/2/off"
"#,
    );
    let manager = manager_from(&file, &ActionFactory::new()).await;
    let lamp = Lamp::new();
    manager.add_bridge(lamp.clone()).await;

    let start = Instant::now();
    manager.dispatch("hue://h1/sensors/5/button#1002").await;

    assert_eq!(lamp.remainders(), vec!["lights/1/off", "groups/2/off"]);
    let first = lamp.triggers.lock().unwrap()[0].0;
    assert!(first.duration_since(start) >= Duration::from_secs(5));
}

#[tokio::test]
async fn test_unknown_bridge_aborts_only_its_sequence() {
    let file = write_config(
        r#"
rules:
  - type: regex
    regex: "door#open"
    actions:
      - type: trigger
        trigger: "bridge://missing/on"
      - type: trigger
        trigger: "bridge://lamp1/after-missing"
  - type: regex
    regex: "door"
    actions:
      - type: trigger
        trigger: "bridge://lamp1/on"
"#,
    );
    let manager = manager_from(&file, &ActionFactory::new()).await;
    let lamp = Lamp::new();
    manager.add_bridge(lamp.clone()).await;

    assert_eq!(manager.dispatch("mqtt://m1/door#open").await, 2);
    assert_eq!(lamp.remainders(), vec!["on"]);
}

#[tokio::test]
async fn test_start_fails_on_invalid_file() {
    let file = write_config(
        r#"
bridges:
  - type: carrier-pigeon
    name: p1
"#,
    );

    let result = EventManager::start(
        file.path(),
        &BridgeRegistry::default(),
        &ActionFactory::new(),
        std::future::pending(),
    )
    .await;

    assert!(result.is_err());
}
