// src/link/listener.rs
//! Listener traits and the registry the link delivers to

use serde::Serialize;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Status change codes delivered to status listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GnssEvent {
    /// The link connected and the receiver stream is starting.
    Started,
    /// First valid fix of the session.
    FirstFix,
    /// The satellite view changed (end of an update burst).
    SatelliteStatus,
}

/// Why the link went to `Disabled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DisableReason {
    UserRequested,
    TransportUnavailable,
    DeviceUnavailable,
    LocationSinkRejected,
    TooManyConnectionProblems,
}

impl fmt::Display for DisableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DisableReason::UserRequested => "stopped by user",
            DisableReason::TransportUnavailable => "transport unavailable",
            DisableReason::DeviceUnavailable => "device unavailable",
            DisableReason::LocationSinkRejected => "location sink rejected updates",
            DisableReason::TooManyConnectionProblems => "too many connection problems",
        };
        f.write_str(text)
    }
}

/// Receives every accepted sentence, without its line terminator.
pub trait NmeaListener: Send + Sync {
    fn on_nmea_received(&self, timestamp: i64, sentence: &str);
}

pub trait StatusListener: Send + Sync {
    fn on_status_changed(&self, event: GnssEvent);

    /// A connection attempt failed and `remaining` attempts are left.
    fn on_connection_problem(&self, _attempt: u32, _remaining: u32) {}

    fn on_disconnected(&self, _reason: DisableReason) {}
}

/// Registry whose membership may change while a delivery is in progress.
///
/// Delivery iterates over a snapshot, so a listener added or removed during
/// a delivery takes effect on the next one.
pub struct ListenerSet<L: ?Sized> {
    listeners: RwLock<Vec<Arc<L>>>,
}

impl<L: ?Sized> ListenerSet<L> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Returns false when the listener is already registered.
    pub fn add(&self, listener: Arc<L>) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    pub fn remove(&self, listener: &Arc<L>) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub fn clear(&self) {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<L: ?Sized> Default for ListenerSet<L> {
    fn default() -> Self {
        Self::new()
    }
}
