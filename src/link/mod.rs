// src/link/mod.rs
//! Connection to the receiver and delivery to listeners

pub(crate) mod dispatch;
pub mod listener;
pub mod manager;
pub mod sink;
pub mod transport;

pub use listener::{DisableReason, GnssEvent, ListenerSet, NmeaListener, StatusListener};
pub use manager::{LinkManager, LinkState};
pub use sink::{LocationSink, LoggingSink, ProviderStatus};
pub use transport::{available_ports, SerialTransport, Transport, SPP_UUID};
