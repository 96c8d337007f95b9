// src/gnss/status.rs
//! The aggregate position, velocity and satellite snapshot of a session

use super::fix::Fix;
use super::satellite::{Satellite, SatelliteTable, TrackedSatellites};
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct GnssStatus {
    timestamp: i64,
    fix_timestamp: i64,
    start_timestamp: i64,
    first_fix_timestamp: i64,

    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub geoid_height: Option<f64>,
    /// Meters per second.
    pub speed: Option<f32>,
    pub bearing: Option<f32>,
    pub pdop: Option<f32>,
    pub hdop: Option<f32>,
    pub vdop: Option<f32>,
    /// Scale applied to HDOP to get an accuracy radius in meters.
    pub precision: f32,
    /// GGA fix quality, 0 (invalid) to 8 (simulation).
    pub quality: u8,
    /// RMC mode indicator (A, D, E, N, S).
    pub mode: Option<char>,
    /// GSA fix type: 1 none, 2 2D, 3 3D.
    pub fix_mode: u8,
    /// GSA selection mode, `A` automatic or `M` manual.
    pub selection_mode: Option<char>,
    pub num_used_in_fix: u32,
    pub num_in_view: u32,

    #[serde(skip)]
    satellites: SatelliteTable,
    #[serde(skip)]
    tracked: TrackedSatellites,
}

impl GnssStatus {
    pub fn new(precision: f32) -> Self {
        Self {
            precision,
            ..Self::default()
        }
    }

    /// Reset everything except the precision factor and anchor TTFF at `now_ms`.
    pub fn start(&mut self, now_ms: i64) {
        *self = Self::new(self.precision);
        self.start_timestamp = now_ms;
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn fix_timestamp(&self) -> i64 {
        self.fix_timestamp
    }

    pub fn start_timestamp(&self) -> i64 {
        self.start_timestamp
    }

    pub fn first_fix_timestamp(&self) -> i64 {
        self.first_fix_timestamp
    }

    /// Record the time of a valid fix; the first one is latched for TTFF.
    pub fn set_fix_timestamp(&mut self, timestamp: i64) {
        self.timestamp = timestamp;
        self.fix_timestamp = timestamp;
        if self.first_fix_timestamp == 0 {
            self.first_fix_timestamp = timestamp;
        }
    }

    /// Record a sentence time without a fix. A new time resets the in-view count.
    pub fn set_timestamp(&mut self, timestamp: i64) {
        if self.start_timestamp == 0 {
            self.start_timestamp = timestamp;
        }
        if self.timestamp != timestamp {
            self.num_in_view = 0;
        }
        self.timestamp = timestamp;
    }

    /// Time to first fix in milliseconds, 0 while either anchor is unset.
    pub fn ttff(&self) -> i64 {
        if self.first_fix_timestamp == 0
            || self.start_timestamp == 0
            || self.first_fix_timestamp < self.start_timestamp
        {
            0
        } else {
            self.first_fix_timestamp - self.start_timestamp
        }
    }

    /// True while the latest sentence time is also the latest fix time.
    pub fn has_fix(&self) -> bool {
        self.fix_timestamp != 0 && self.fix_timestamp == self.timestamp
    }

    pub fn satellites(&self) -> &SatelliteTable {
        &self.satellites
    }

    pub fn satellites_mut(&mut self) -> &mut SatelliteTable {
        &mut self.satellites
    }

    pub fn tracked(&self) -> &TrackedSatellites {
        &self.tracked
    }

    pub fn tracked_mut(&mut self) -> &mut TrackedSatellites {
        &mut self.tracked
    }

    /// Whether a satellite in view is one of those used in the current fix.
    pub fn is_used_in_fix(&self, satellite: &Satellite) -> bool {
        self.tracked.contains(satellite.id())
    }

    pub fn satellites_used(&self) -> usize {
        self.satellites
            .iter()
            .filter(|sat| self.is_used_in_fix(sat))
            .count()
    }

    pub fn fix_description(&self) -> String {
        match self.quality {
            0 => match self.fix_mode {
                2 => "2D fix".to_string(),
                3 => "3D fix".to_string(),
                _ => "No fix".to_string(),
            },
            1 => "GPS".to_string(),
            2 => "DGPS".to_string(),
            3 => "PPS".to_string(),
            4 => "RTK".to_string(),
            5 => "Float RTK".to_string(),
            6 => "Estimated".to_string(),
            7 => "Manual".to_string(),
            8 => "Simulation".to_string(),
            q => format!("Unknown ({})", q),
        }
    }

    /// Build a position record from the current values.
    pub fn synthesize_fix(&self) -> Fix {
        Fix {
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy: self
                .hdop
                .map(|hdop| f64::from(hdop) * f64::from(self.precision)),
            altitude: self.altitude,
            bearing: self.bearing,
            speed: self.speed,
            time: self.fix_timestamp,
            satellites: self.num_used_in_fix,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttff_anchors() {
        let mut status = GnssStatus::new(5.1);
        assert_eq!(status.ttff(), 0);

        status.set_timestamp(1_000);
        assert_eq!(status.ttff(), 0);

        status.set_fix_timestamp(4_500);
        assert_eq!(status.ttff(), 3_500);

        // Latched once
        status.set_fix_timestamp(9_000);
        assert_eq!(status.first_fix_timestamp(), 4_500);
        assert_eq!(status.fix_timestamp(), 9_000);
    }

    #[test]
    fn test_ttff_ordering_violation_is_zero() {
        let mut status = GnssStatus::new(5.1);
        status.start(10_000);
        status.set_fix_timestamp(5_000);
        assert_eq!(status.ttff(), 0);
    }

    #[test]
    fn test_start_keeps_precision() {
        let mut status = GnssStatus::new(3.0);
        status.latitude = 10.0;
        status.quality = 1;
        status.start(42);
        assert_eq!(status.precision, 3.0);
        assert_eq!(status.latitude, 0.0);
        assert_eq!(status.quality, 0);
        assert_eq!(status.start_timestamp(), 42);
    }

    #[test]
    fn test_new_timestamp_resets_in_view() {
        let mut status = GnssStatus::new(5.1);
        status.set_timestamp(1_000);
        status.num_in_view = 8;
        status.set_timestamp(1_000);
        assert_eq!(status.num_in_view, 8);
        status.set_timestamp(2_000);
        assert_eq!(status.num_in_view, 0);
    }

    #[test]
    fn test_synthesize_fix_accuracy() {
        let mut status = GnssStatus::new(5.1);
        status.latitude = 48.1173;
        status.longitude = 11.5167;
        status.hdop = Some(0.9);
        status.altitude = Some(545.4);
        status.num_used_in_fix = 8;
        status.set_fix_timestamp(1_000);

        let fix = status.synthesize_fix();
        assert!((fix.accuracy.unwrap() - 4.59).abs() < 1e-4);
        assert_eq!(fix.altitude, Some(545.4));
        assert_eq!(fix.time, 1_000);
        assert_eq!(fix.satellites, 8);
        assert!(fix.is_publishable());

        status.altitude = None;
        assert!(!status.synthesize_fix().is_publishable());
    }
}
