// src/gnss/mod.rs
pub mod fix;
pub mod satellite;
pub mod status;

pub use fix::Fix;
pub use satellite::{resolve, Constellation, Satellite, SatelliteKey, SatelliteTable, TrackedSatellites};
pub use status::GnssStatus;
