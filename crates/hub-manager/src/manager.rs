//! The event manager
//!
//! Owns the bridge table, the rule list and the optional publisher.
//! Observations enter through [`EventManager::dispatch`] (directly, or via
//! the [`EventSink`] handle given to bridges) and are matched against every
//! rule in registration order. Routing instructions leave through the
//! [`Hub`] implementation, which hands `bridge://<id>/...` to bridge `<id>`.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use hub_actions::{run_sequence, ActionFactory, SequenceOutcome};
use hub_bridges::{build_publisher, BridgeRegistry, SharedBridge, SharedPublisher};
use hub_config::{ConfigError, HubConfig, HubSettings};
use hub_core::{
    supervise, Connectable, CorrelationId, EventSink, EventUri, Hub, LinkState, RoutingError,
    RoutingResult, SharedEventSink,
};
use hub_rules::Rule;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::{ManagerError, ManagerResult};
use crate::stats::{Counters, ManagerStats};

/// Central dispatch bus; cheap to clone
#[derive(Clone)]
pub struct EventManager {
    inner: Arc<Inner>,
}

struct Inner {
    settings: HubSettings,
    bridges: DashMap<String, SharedBridge>,
    rules: RwLock<Vec<Arc<Rule>>>,
    publisher: OnceLock<PublisherHandle>,
    dispatch_permits: Arc<Semaphore>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
    counters: Counters,
}

struct PublisherHandle {
    publisher: SharedPublisher,
    queue: mpsc::Sender<String>,
}

impl EventManager {
    pub fn new(settings: HubSettings) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                dispatch_permits: Arc::new(Semaphore::new(settings.max_pending_dispatches)),
                settings,
                bridges: DashMap::new(),
                rules: RwLock::new(Vec::new()),
                publisher: OnceLock::new(),
                tasks: Mutex::new(Vec::new()),
                shutdown,
                counters: Counters::new(),
            }),
        }
    }

    pub fn settings(&self) -> &HubSettings {
        &self.inner.settings
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.inner.settings.reconnect_delay_secs)
    }

    /// Fire-and-forget entry point for bridges
    ///
    /// Holds only a weak reference, so bridges stored in the manager do not
    /// keep it alive.
    pub fn handle(&self) -> SharedEventSink {
        Arc::new(DispatchHandle {
            inner: Arc::downgrade(&self.inner),
        })
    }

    /// Register a bridge and start its supervised connection task
    ///
    /// Returns without waiting for the connection. A bridge with the same id
    /// replaces the earlier one, which is stopped.
    pub async fn add_bridge(&self, bridge: SharedBridge) {
        let id = bridge.id().to_string();
        if let Some(previous) = self.inner.bridges.insert(id.clone(), bridge.clone()) {
            warn!(bridge = %id, "Duplicate bridge id, replacing the earlier bridge");
            previous.stop();
        }

        info!(bridge = %id, kind = bridge.kind(), "Starting bridge");
        let task = tokio::spawn(supervise(bridge, self.retry_delay()));
        self.inner.tasks.lock().await.push(task);
    }

    /// Append a rule; rules are evaluated in the order they were added
    pub async fn add_rule(&self, rule: Rule) {
        info!(rule = %rule, actions = rule.actions().len(), "Adding rule");
        self.inner.rules.write().await.push(Arc::new(rule));
    }

    /// Install the publisher and start its connection and forwarding tasks
    pub async fn set_publisher(&self, publisher: SharedPublisher) -> ManagerResult<()> {
        let (queue, mut rx) = mpsc::channel::<String>(self.inner.settings.publisher_queue.max(1));
        let handle = PublisherHandle {
            publisher: publisher.clone(),
            queue,
        };
        if self.inner.publisher.set(handle).is_err() {
            return Err(ManagerError::PublisherAlreadySet);
        }

        info!(publisher = %publisher.id(), "Starting publisher");
        let supervisor = tokio::spawn(supervise(publisher.clone(), self.retry_delay()));

        let mut shutdown = self.inner.shutdown.subscribe();
        let forwarder = tokio::spawn(async move {
            loop {
                tokio::select! {
                    uri = rx.recv() => {
                        let Some(uri) = uri else { break };
                        if let Err(e) = publisher.publish(&uri).await {
                            warn!(
                                publisher = %publisher.id(),
                                uri = %uri,
                                error = %e,
                                "Publishing failed"
                            );
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });

        let mut tasks = self.inner.tasks.lock().await;
        tasks.push(supervisor);
        tasks.push(forwarder);
        Ok(())
    }

    pub fn bridge(&self, id: &str) -> Option<SharedBridge> {
        self.inner.bridges.get(id).map(|entry| entry.value().clone())
    }

    /// Registered bridge ids, sorted
    pub fn bridge_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.inner.bridges.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub async fn rule_count(&self) -> usize {
        self.inner.rules.read().await.len()
    }

    /// Dispatch one event URI
    ///
    /// Forwards to a connected publisher without waiting, then runs the
    /// actions of every matching rule. Each match gets its own correlation
    /// id; the matched sequences run concurrently, the actions inside one
    /// sequence strictly in order. Returns the number of matching rules once
    /// all their sequences finished.
    #[instrument(skip(self))]
    pub async fn dispatch(&self, uri: &str) -> usize {
        self.inner.counters.dispatched();
        debug!(uri, "Dispatching");
        self.forward_to_publisher(uri);

        let rules: Vec<Arc<Rule>> = self.inner.rules.read().await.clone();
        let runs: Vec<_> = rules
            .into_iter()
            .filter(|rule| rule.matches(uri))
            .map(|rule| self.run_rule(rule, uri))
            .collect();

        let matched = runs.len();
        join_all(runs).await;
        matched
    }

    async fn run_rule(&self, rule: Arc<Rule>, uri: &str) {
        let correlation = CorrelationId::new();
        self.inner.counters.rule_run();
        info!(%correlation, rule = %rule.label(), uri, "Rule matched");

        match run_sequence(rule.actions(), self, &correlation).await {
            SequenceOutcome::Completed { ran, failures } => {
                info!(%correlation, rule = %rule.label(), ran, failures, "Rule finished");
            }
            SequenceOutcome::Aborted { at, error } => {
                error!(%correlation, rule = %rule.label(), at, error = %error, "Rule aborted");
            }
        }
    }

    fn forward_to_publisher(&self, uri: &str) {
        let Some(handle) = self.inner.publisher.get() else {
            return;
        };
        if !handle.publisher.link().is_connected() {
            trace!(uri, "Publisher not connected, not forwarding");
            return;
        }
        match handle.queue.try_send(uri.to_string()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.inner.counters.dropped();
                warn!(uri, "Publisher queue full, dropping event");
            }
            Err(TrySendError::Closed(_)) => debug!(uri, "Publisher queue closed"),
        }
    }

    /// Ask every bridge and the publisher to stop; does not wait for them
    pub fn stop(&self) {
        self.inner.shutdown.send_replace(true);
        for entry in self.inner.bridges.iter() {
            info!(bridge = %entry.key(), "Stopping bridge");
            entry.value().stop();
        }
        if let Some(handle) = self.inner.publisher.get() {
            info!(publisher = %handle.publisher.id(), "Stopping publisher");
            handle.publisher.stop();
        }
    }

    /// Wait for every task started so far to end
    pub async fn wait_stopped(&self) {
        let tasks = std::mem::take(&mut *self.inner.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Task ended abnormally");
            }
        }
    }

    pub async fn stats(&self) -> ManagerStats {
        let bridges = self.inner.bridges.len();
        let connected = self
            .inner
            .bridges
            .iter()
            .filter(|e| e.value().state() == LinkState::Connected)
            .count();
        let rules = self.rule_count().await;
        self.inner.counters.snapshot(bridges, connected, rules)
    }

    fn spawn_heartbeat(&self) -> Option<JoinHandle<()>> {
        let secs = self.inner.settings.heartbeat_secs;
        if secs == 0 {
            return None;
        }

        let manager = Arc::downgrade(&self.inner);
        let mut shutdown = self.inner.shutdown.subscribe();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(secs));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(inner) = manager.upgrade() else { break };
                        let stats = EventManager { inner }.stats().await;
                        info!(
                            bridges = stats.bridges,
                            connected = stats.connected,
                            rules = stats.rules,
                            dispatched = stats.dispatched,
                            rule_runs = stats.rule_runs,
                            dropped = stats.dropped,
                            uptime_secs = stats.uptime.num_seconds(),
                            "Heartbeat: {}",
                            stats
                        );
                    }
                    _ = shutdown.changed() => break,
                }
            }
        }))
    }

    /// Run until `shutdown` resolves, then stop everything
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let heartbeat = self.spawn_heartbeat();
        info!(bridges = ?self.bridge_ids(), "Event manager running");

        shutdown.await;

        info!("Shutdown requested");
        self.stop();
        if let Some(heartbeat) = heartbeat {
            let _ = heartbeat.await;
        }
    }

    /// Build a manager from a validated configuration
    ///
    /// Every publisher, bridge and rule is constructed before anything
    /// starts; all construction problems are reported together. Rules are
    /// registered before bridges start so no early event is missed.
    pub async fn from_config(
        config: &HubConfig,
        registry: &BridgeRegistry,
        actions: &ActionFactory,
    ) -> ManagerResult<Self> {
        let manager = Self::new(config.hub.clone());
        let mut errors = Vec::new();

        let publisher = match &config.publisher {
            Some(c) => match build_publisher(c) {
                Ok(publisher) => Some(publisher),
                Err(e) => {
                    errors.push(format!("publisher ({}): {}", c.name(), e));
                    None
                }
            },
            None => None,
        };

        let mut bridges = Vec::with_capacity(config.bridges.len());
        for (i, c) in config.bridges.iter().enumerate() {
            match registry.build(c, manager.handle()) {
                Ok(bridge) => bridges.push(bridge),
                Err(e) => errors.push(format!("bridges[{}] ({}): {}", i, c.name(), e)),
            }
        }

        let mut rules = Vec::with_capacity(config.rules.len());
        for (i, c) in config.rules.iter().enumerate() {
            match Rule::from_config(c, actions) {
                Ok(rule) => rules.push(rule),
                Err(e) => errors.push(format!("rules[{}]: {}", i, e)),
            }
        }

        if !errors.is_empty() {
            return Err(ConfigError::Invalid { errors }.into());
        }

        if let Some(publisher) = publisher {
            manager.set_publisher(publisher).await?;
        }
        for rule in rules {
            manager.add_rule(rule).await;
        }
        for bridge in bridges {
            manager.add_bridge(bridge).await;
        }

        Ok(manager)
    }

    /// Load the configuration at `path`, start everything and run until
    /// `shutdown` resolves
    pub async fn start<F>(
        path: impl AsRef<Path>,
        registry: &BridgeRegistry,
        actions: &ActionFactory,
        shutdown: F,
    ) -> ManagerResult<()>
    where
        F: Future<Output = ()>,
    {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");
        let config = hub_config::load_config(path)?;
        info!(
            bridges = config.bridges.len(),
            rules = config.rules.len(),
            publisher = config.publisher.is_some(),
            "Configuration loaded"
        );

        let manager = Self::from_config(&config, registry, actions).await?;
        manager.run_until(shutdown).await;
        Ok(())
    }
}

#[async_trait]
impl Hub for EventManager {
    #[instrument(skip(self))]
    async fn trigger(&self, uri: &str) -> RoutingResult<()> {
        let parsed: EventUri = uri.parse()?;
        if !parsed.is_routing() {
            debug!(uri, "Ignoring trigger with a non-bridge scheme");
            return Ok(());
        }

        let remainder = parsed.remainder();
        // Clone out of the map so no shard lock is held across the await
        let bridge = self.bridge(parsed.authority());
        let Some(bridge) = bridge else {
            error!(
                bridge = %parsed.authority(),
                remainder = %remainder,
                "Trigger for unknown bridge"
            );
            return Err(RoutingError::UnknownBridge {
                bridge: parsed.authority().to_string(),
                remainder,
            });
        };

        self.inner.counters.routed();
        info!(bridge = %parsed.authority(), remainder = %remainder, "Routing trigger");
        bridge
            .trigger(&remainder)
            .await
            .map_err(|e| RoutingError::Bridge {
                bridge: parsed.authority().to_string(),
                remainder,
                reason: e.to_string(),
            })
    }
}

impl fmt::Debug for EventManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventManager")
            .field("bridges", &self.bridge_ids())
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

/// The sink bridges emit into
struct DispatchHandle {
    inner: Weak<Inner>,
}

impl EventSink for DispatchHandle {
    fn emit(&self, uri: String) {
        let Some(inner) = self.inner.upgrade() else {
            debug!(uri = %uri, "Event manager gone, dropping event");
            return;
        };

        let permit = match inner.dispatch_permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                inner.counters.dropped();
                warn!(uri = %uri, "Too many dispatches in flight, dropping event");
                return;
            }
        };

        let manager = EventManager { inner };
        // The permit covers the whole run, waits included
        tokio::spawn(async move {
            let _permit = permit;
            manager.dispatch(&uri).await;
        });
    }
}
