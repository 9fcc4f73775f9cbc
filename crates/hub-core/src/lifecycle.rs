//! Connection lifecycle shared by bridges and the publisher
//!
//! ```text
//! Initialized → Connecting → Connected → (Disconnected → Connecting)* → Stopped
//! ```
//!
//! A [`Connectable`] performs one connection attempt per `connect` call and
//! holds the connection until its [`Link`] is asked to stop. [`supervise`]
//! drives the attempts: unbounded retries with a fixed delay, one attempt in
//! flight at a time.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Default delay between two connection attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Observable state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// Configured, no attempt made yet
    Initialized,
    /// A connection attempt is in progress
    Connecting,
    /// Handshake done, events flowing
    Connected,
    /// Last attempt failed, waiting for the retry delay
    Disconnected,
    /// Stop was requested and honored; terminal
    Stopped,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Initialized => "initialized",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Disconnected => "disconnected",
            LinkState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// State and stop signal of one connection
///
/// The stop request is sticky: once set it stays set, so a request made
/// while no attempt is blocked (e.g. during the retry delay) is still seen.
pub struct Link {
    state: watch::Sender<LinkState>,
    stop: watch::Sender<bool>,
    attempts: AtomicU64,
    failures: AtomicU64,
}

impl Link {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LinkState::Initialized);
        let (stop, _) = watch::channel(false);
        Self {
            state,
            stop,
            attempts: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Current state
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions
    pub fn watch(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Called by a `Connectable` once its handshake succeeded
    pub fn mark_connected(&self) {
        self.set_state(LinkState::Connected);
    }

    /// Ask the connection to shut down
    pub fn request_stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    /// Resolve once a stop has been requested
    pub async fn stopped(&self) {
        let mut rx = self.stop.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|stop| *stop).await;
    }

    /// Number of connection attempts started so far
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of connection attempts that ended in failure
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: LinkState) {
        self.state.send_replace(state);
    }

    fn begin_attempt(&self) -> u64 {
        self.set_state(LinkState::Connecting);
        self.attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        self.set_state(LinkState::Disconnected);
    }
}

impl Default for Link {
    fn default() -> Self {
        Self::new()
    }
}

/// Something that holds one long-lived connection
#[async_trait]
pub trait Connectable: Send + Sync {
    type Error: fmt::Display + Send;

    /// Configured identifier, used in logs
    fn id(&self) -> &str;

    fn link(&self) -> &Link;

    /// Run one connection attempt
    ///
    /// Performs the handshake, calls [`Link::mark_connected`], then holds
    /// the connection until [`Link::stopped`] resolves and returns `Ok(())`.
    /// Any handshake or mid-session failure returns `Err`.
    async fn connect(&self) -> Result<(), Self::Error>;
}

/// Keep `target` connected until it is stopped
///
/// Failed attempts are logged and retried after `retry_delay`, forever. A
/// stop request received during the delay ends the loop. An attempt that
/// returns `Ok` without a stop request is treated as a lost connection.
pub async fn supervise<C>(target: Arc<C>, retry_delay: Duration)
where
    C: Connectable + ?Sized,
{
    let link = target.link();

    loop {
        if link.is_stop_requested() {
            break;
        }

        let attempt = link.begin_attempt();
        info!(id = %target.id(), attempt, "Connecting");

        match target.connect().await {
            Ok(()) if link.is_stop_requested() => {
                debug!(id = %target.id(), "Connection closed on stop request");
                break;
            }
            Ok(()) => {
                link.record_failure();
                warn!(
                    id = %target.id(),
                    retry_in = ?retry_delay,
                    "Connection ended unexpectedly, reconnecting"
                );
            }
            Err(e) => {
                link.record_failure();
                warn!(
                    id = %target.id(),
                    error = %e,
                    retry_in = ?retry_delay,
                    "Connection failed, reconnecting"
                );
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(retry_delay) => {}
            _ = link.stopped() => break,
        }
    }

    link.set_state(LinkState::Stopped);
    info!(id = %target.id(), "Stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::Instant;

    /// Fails its first `fail_first` attempts, then holds until stopped
    struct Flaky {
        link: Link,
        fail_first: u64,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl Flaky {
        fn new(fail_first: u64) -> Arc<Self> {
            Arc::new(Self {
                link: Link::new(),
                fail_first,
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Connectable for Flaky {
        type Error = String;

        fn id(&self) -> &str {
            "flaky"
        }

        fn link(&self) -> &Link {
            &self.link
        }

        async fn connect(&self) -> Result<(), String> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);

            let result = if self.link.attempts() <= self.fail_first {
                tokio::task::yield_now().await;
                Err(format!("attempt {} refused", self.link.attempts()))
            } else {
                self.link.mark_connected();
                self.link.stopped().await;
                Ok(())
            };

            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_k_failures_with_fixed_delay() {
        let delay = Duration::from_secs(3);
        let target = Flaky::new(4);
        let mut state = target.link().watch();
        let start = Instant::now();

        let handle = tokio::spawn(supervise(target.clone(), delay));
        state
            .wait_for(|s| *s == LinkState::Connected)
            .await
            .unwrap();

        assert_eq!(target.link().failures(), 4);
        assert_eq!(target.link().attempts(), 5);
        assert_eq!(start.elapsed(), delay * 4);
        assert_eq!(target.max_active.load(Ordering::SeqCst), 1);

        target.link().request_stop();
        handle.await.unwrap();
        assert_eq!(target.link().state(), LinkState::Stopped);
        assert_eq!(target.link().attempts(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_first_time() {
        let target = Flaky::new(0);
        let mut state = target.link().watch();

        let handle = tokio::spawn(supervise(target.clone(), DEFAULT_RETRY_DELAY));
        state
            .wait_for(|s| *s == LinkState::Connected)
            .await
            .unwrap();
        assert_eq!(target.link().failures(), 0);

        target.link().request_stop();
        handle.await.unwrap();
        assert_eq!(target.link().state(), LinkState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_retry_delay_is_honored() {
        let target = Flaky::new(u64::MAX);
        let mut state = target.link().watch();

        let handle = tokio::spawn(supervise(target.clone(), Duration::from_secs(60)));
        state
            .wait_for(|s| *s == LinkState::Disconnected)
            .await
            .unwrap();

        target.link().request_stop();
        handle.await.unwrap();
        assert_eq!(target.link().attempts(), 1);
        assert_eq!(target.link().state(), LinkState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_before_start_never_connects() {
        let target = Flaky::new(0);
        target.link().request_stop();
        supervise(target.clone(), DEFAULT_RETRY_DELAY).await;
        assert_eq!(target.link().attempts(), 0);
        assert_eq!(target.link().state(), LinkState::Stopped);
    }

    struct EndsCleanly {
        link: Link,
    }

    #[async_trait]
    impl Connectable for EndsCleanly {
        type Error = String;

        fn id(&self) -> &str {
            "ends-cleanly"
        }

        fn link(&self) -> &Link {
            &self.link
        }

        async fn connect(&self) -> Result<(), String> {
            if self.link.attempts() >= 3 {
                self.link.request_stop();
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrequested_clean_end_is_retried() {
        let target = Arc::new(EndsCleanly { link: Link::new() });
        supervise(target.clone(), Duration::from_millis(10)).await;
        assert_eq!(target.link().attempts(), 3);
        assert_eq!(target.link().failures(), 2);
    }
}
