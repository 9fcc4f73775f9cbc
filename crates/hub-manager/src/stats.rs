//! Runtime counters and the heartbeat report

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub(crate) struct Counters {
    started_at: DateTime<Utc>,
    dispatched: AtomicU64,
    rule_runs: AtomicU64,
    routed: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    pub(crate) fn new() -> Self {
        Self {
            started_at: Utc::now(),
            dispatched: AtomicU64::new(0),
            rule_runs: AtomicU64::new(0),
            routed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub(crate) fn dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rule_run(&self) {
        self.rule_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn routed(&self) {
        self.routed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, bridges: usize, connected: usize, rules: usize) -> ManagerStats {
        ManagerStats {
            bridges,
            connected,
            rules,
            dispatched: self.dispatched.load(Ordering::Relaxed),
            rule_runs: self.rule_runs.load(Ordering::Relaxed),
            routed: self.routed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime: Utc::now() - self.started_at,
        }
    }
}

/// Point-in-time view of the manager
#[derive(Debug, Clone)]
pub struct ManagerStats {
    pub bridges: usize,
    /// Bridges currently in the connected state
    pub connected: usize,
    pub rules: usize,
    /// Events passed to dispatch
    pub dispatched: u64,
    /// Rule matches whose action sequence was started
    pub rule_runs: u64,
    /// Triggers handed to a bridge
    pub routed: u64,
    /// Events dropped by a full publisher queue or saturated dispatch bound
    pub dropped: u64,
    pub started_at: DateTime<Utc>,
    pub uptime: chrono::Duration,
}

impl fmt::Display for ManagerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.uptime.num_seconds();
        write!(
            f,
            "{}/{} bridges connected, {} rules, {} dispatched, {} rule runs, {} routed, {} dropped, up {}h{:02}m{:02}s",
            self.connected,
            self.bridges,
            self.rules,
            self.dispatched,
            self.rule_runs,
            self.routed,
            self.dropped,
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60
        )
    }
}
