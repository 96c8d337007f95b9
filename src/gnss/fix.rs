// src/gnss/fix.rs
//! Immutable position record handed to the location sink

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in meters (HDOP times the precision factor).
    pub accuracy: Option<f64>,
    pub altitude: Option<f64>,
    pub bearing: Option<f32>,
    /// Meters per second.
    pub speed: Option<f32>,
    /// Epoch milliseconds of the fix.
    pub time: i64,
    /// Satellites used, as reported by GGA.
    pub satellites: u32,
}

impl Fix {
    /// A fix goes to the sink only when it carries both an accuracy and an altitude.
    pub fn is_publishable(&self) -> bool {
        self.accuracy.is_some() && self.altitude.is_some()
    }

    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.time).single()
    }
}

impl fmt::Display for Fix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.latitude, self.longitude)?;
        if let Some(alt) = self.altitude {
            write!(f, " alt={:.1}m", alt)?;
        }
        if let Some(acc) = self.accuracy {
            write!(f, " acc={:.1}m", acc)?;
        }
        if let Some(speed) = self.speed {
            write!(f, " speed={:.2}m/s", speed)?;
        }
        if let Some(bearing) = self.bearing {
            write!(f, " bearing={:.1}", bearing)?;
        }
        write!(f, " sats={}", self.satellites)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(accuracy: Option<f64>, altitude: Option<f64>) -> Fix {
        Fix {
            latitude: 48.1173,
            longitude: 11.5167,
            accuracy,
            altitude,
            bearing: None,
            speed: None,
            time: 1_700_000_000_000,
            satellites: 8,
        }
    }

    #[test]
    fn test_publishable_needs_accuracy_and_altitude() {
        assert!(fix(Some(4.59), Some(545.4)).is_publishable());
        assert!(!fix(None, Some(545.4)).is_publishable());
        assert!(!fix(Some(4.59), None).is_publishable());
    }

    #[test]
    fn test_display() {
        let text = fix(Some(4.59), Some(545.4)).to_string();
        assert!(text.starts_with("48.117300,11.516700"));
        assert!(text.contains("alt=545.4m"));
        assert!(text.ends_with("sats=8"));
    }
}
