//! Turning full-state polls into change events
//!
//! [`SnapshotTracker`] keeps the latest snapshot per device and compares each
//! new poll against it. The comparison itself is supplied by the caller, so
//! the tracker knows nothing about any protocol. [`SensorState`] is the
//! lighting bridge's snapshot and carries its change priority.
//!
//! Per device and cycle:
//!
//! - first sight: store, emit nothing
//! - unchanged `last updated` stamp: no change, whatever the fields say
//! - otherwise at most one event, picked from the current state
//! - the stored snapshot is always replaced
//!
//! Devices missing from a poll are left as they are and emit nothing.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use tracing::{debug, trace};

/// A point-in-time record of one device
pub trait Snapshot: Clone {
    /// Protocol-provided "last changed" stamp
    fn stamp(&self) -> &str;
}

/// Latest snapshot per device id
#[derive(Debug, Clone)]
pub struct SnapshotTracker<K, S> {
    previous: HashMap<K, S>,
}

impl<K, S> SnapshotTracker<K, S>
where
    K: Eq + Hash + fmt::Display,
    S: Snapshot,
{
    pub fn new() -> Self {
        Self {
            previous: HashMap::new(),
        }
    }

    /// Feed one poll cycle and collect the resulting events
    ///
    /// `diff(previous, current)` is only called when the stamp moved; it
    /// picks the single event for that device, if any.
    pub fn observe<I, F, E>(&mut self, current: I, mut diff: F) -> Vec<E>
    where
        I: IntoIterator<Item = (K, S)>,
        F: FnMut(&S, &S) -> Option<E>,
    {
        let mut events = Vec::new();

        for (id, now) in current {
            match self.previous.get(&id) {
                None => debug!(device = %id, "New device"),
                Some(then) if then.stamp() == now.stamp() => {}
                Some(then) => {
                    trace!(device = %id, "Snapshot changed");
                    if let Some(event) = diff(then, &now) {
                        events.push(event);
                    }
                }
            }
            self.previous.insert(id, now);
        }

        events
    }

    pub fn get(&self, id: &K) -> Option<&S> {
        self.previous.get(id)
    }

    /// Number of devices seen so far
    pub fn len(&self) -> usize {
        self.previous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.previous.is_empty()
    }
}

impl<K, S> Default for SnapshotTracker<K, S>
where
    K: Eq + Hash + fmt::Display,
    S: Snapshot,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Sensor attribute that produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorAttribute {
    Button,
    Presence,
    Daylight,
    Temperature,
}

impl SensorAttribute {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorAttribute::Button => "button",
            SensorAttribute::Presence => "presence",
            SensorAttribute::Daylight => "daylight",
            SensorAttribute::Temperature => "temperature",
        }
    }
}

impl fmt::Display for SensorAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sensor as seen in one poll; every value is kept in its textual form
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SensorState {
    pub id: u32,
    pub device_type: String,
    pub button: String,
    pub presence: String,
    pub daylight: String,
    pub temperature: String,
    pub last_updated: String,
}

impl Snapshot for SensorState {
    fn stamp(&self) -> &str {
        &self.last_updated
    }
}

/// The event chosen for one changed sensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorChange {
    pub sensor: u32,
    pub attribute: SensorAttribute,
    pub value: String,
}

impl SensorChange {
    /// `hue://<bridge>/sensors/<id>/<attribute>#<value>`
    pub fn to_uri(&self, bridge: &str) -> String {
        format!(
            "hue://{}/sensors/{}/{}#{}",
            bridge, self.sensor, self.attribute, self.value
        )
    }
}

impl SensorState {
    /// Pick the one change worth reporting between `previous` and `self`
    ///
    /// Priority: button or presence when they changed, then daylight when it
    /// is now `true`, then temperature when it is now nonzero. The last two
    /// are reported on every new stamp, changed or not.
    pub fn change_from(&self, previous: &SensorState) -> Option<SensorChange> {
        let (attribute, value) = if self.button != previous.button {
            (SensorAttribute::Button, &self.button)
        } else if self.presence != previous.presence {
            (SensorAttribute::Presence, &self.presence)
        } else if self.daylight == "true" {
            (SensorAttribute::Daylight, &self.daylight)
        } else if self.temperature != "0" {
            (SensorAttribute::Temperature, &self.temperature)
        } else {
            return None;
        };

        Some(SensorChange {
            sensor: self.id,
            attribute,
            value: value.clone(),
        })
    }
}

impl fmt::Display for SensorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} @{} btn:{} pres:{} daylt:{} tmp:{}",
            self.id,
            self.device_type,
            self.last_updated,
            self.button,
            self.presence,
            self.daylight,
            self.temperature
        )
    }
}
