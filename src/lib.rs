// src/lib.rs
//! GNSS Link Library
//!
//! Connects to a Bluetooth GNSS receiver over an RFCOMM serial channel,
//! reconstructs position, velocity and satellite visibility from its
//! NMEA-0183 stream and forwards complete fixes to a location sink.

pub mod config;
pub mod error;
pub mod gnss;
pub mod host;
pub mod link;
pub mod logging;
pub mod nmea;
pub mod recorder;
pub mod session;
pub mod sirf;

// Re-export main types for convenience
pub use config::{GnssConfig, LinkTiming};
pub use error::{GnssError, Result};
pub use gnss::{Constellation, Fix, GnssStatus, Satellite};
pub use host::HostContext;
pub use link::{
    DisableReason, GnssEvent, LinkManager, LinkState, LocationSink, LoggingSink, NmeaListener,
    ProviderStatus, SerialTransport, StatusListener, Transport,
};
pub use nmea::NmeaParser;
pub use recorder::NmeaRecorder;
pub use session::Session;
pub use sirf::SirfSettings;
