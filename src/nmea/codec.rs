// src/nmea/codec.rs
//! Field-level NMEA decoding and encoding
//!
//! Every decoder here is total: missing or malformed input yields a sentinel
//! (`0` for integers and timestamps, `0.0` for coordinates and speeds)
//! instead of an error. Handlers that need to know whether a field was present
//! use the `opt_*` variants.

use chrono::{DateTime, Duration, NaiveTime, Utc};

const KNOT_TO_KMH: f32 = 1.852;
const HALF_DAY_MS: i64 = 12 * 60 * 60 * 1000;

/// Decode a `ddmm.mmmm` / `dddmm.mmmm` coordinate with its hemisphere letter.
///
/// `S` and `W` produce negative values. An empty value or hemisphere gives 0.0.
pub fn parse_coordinate(value: &str, hemisphere: &str) -> f64 {
    if value.is_empty() || hemisphere.is_empty() {
        return 0.0;
    }
    let raw = match value.parse::<f64>() {
        Ok(v) => v,
        Err(_) => return 0.0,
    };
    let degrees = (raw / 100.0).floor();
    let minutes = (raw / 100.0 - degrees) / 0.6;
    match hemisphere {
        "S" | "W" => -(degrees + minutes),
        "N" | "E" => degrees + minutes,
        _ => 0.0,
    }
}

/// Encode decimal degrees back into the NMEA `ddmm.mmmm` form.
pub fn format_latitude(latitude: f64) -> (String, &'static str) {
    let hemisphere = if latitude < 0.0 { "S" } else { "N" };
    (format_degrees_minutes(latitude.abs(), 2), hemisphere)
}

pub fn format_longitude(longitude: f64) -> (String, &'static str) {
    let hemisphere = if longitude < 0.0 { "W" } else { "E" };
    (format_degrees_minutes(longitude.abs(), 3), hemisphere)
}

fn format_degrees_minutes(value: f64, degree_width: usize) -> String {
    let mut degrees = value.floor();
    let mut minutes = ((value - degrees) * 60.0 * 10_000.0).round() / 10_000.0;
    if minutes >= 60.0 {
        degrees += 1.0;
        minutes -= 60.0;
    }
    format!(
        "{:0width$}{:07.4}",
        degrees as u32,
        minutes,
        width = degree_width
    )
}

/// Speed in knots (`N`) or km/h (`K`) to meters per second.
pub fn parse_speed(value: &str, unit: &str) -> f32 {
    if value.is_empty() || unit.is_empty() {
        return 0.0;
    }
    let kmh = match value.parse::<f32>() {
        Ok(v) => v,
        Err(_) => return 0.0,
    };
    match unit {
        "K" => kmh / 3.6,
        "N" => kmh * KNOT_TO_KMH / 3.6,
        _ => 0.0,
    }
}

/// Altitude in meters; `KM` is scaled, anything else is taken as meters.
pub fn opt_altitude(value: &str, unit: &str) -> Option<f64> {
    let meters = opt_f64(value)?;
    match unit {
        "KM" | "km" => Some(meters * 1000.0),
        _ => Some(meters),
    }
}

pub fn parse_int(value: &str) -> i32 {
    value.trim().parse::<i32>().unwrap_or(0)
}

pub fn opt_f32(value: &str) -> Option<f32> {
    if value.is_empty() {
        return None;
    }
    value.trim().parse::<f32>().ok().filter(|v| v.is_finite())
}

pub fn opt_f64(value: &str) -> Option<f64> {
    if value.is_empty() {
        return None;
    }
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a `HHMMSS[.sss]` UTC field into a time of day.
pub fn parse_utc_time(value: &str) -> Option<NaiveTime> {
    let raw = opt_f64(value)?;
    if raw < 0.0 {
        return None;
    }
    let whole = raw.trunc() as u32;
    let millis = ((raw - raw.trunc()) * 1000.0).round() as u32;
    let (hour, minute, second) = (whole / 10_000, (whole / 100) % 100, whole % 100);
    NaiveTime::from_hms_milli_opt(hour, minute, second, millis.min(999))
}

/// Epoch milliseconds of a UTC time-of-day field, resolved against `now`.
///
/// The naive "today at HH:MM:SS" timestamp is shifted by a day when it lies
/// more than twelve hours away from `now`, which handles a receiver still
/// reporting 23:59 after the wall clock has rolled over (and the reverse).
pub fn parse_time_at(value: &str, now: DateTime<Utc>) -> i64 {
    let Some(time) = parse_utc_time(value) else {
        return 0;
    };
    let candidate = now.date_naive().and_time(time).and_utc();
    let now_ms = now.timestamp_millis();
    let candidate_ms = candidate.timestamp_millis();
    let resolved = if candidate_ms - now_ms > HALF_DAY_MS {
        candidate - Duration::days(1)
    } else if now_ms - candidate_ms > HALF_DAY_MS {
        candidate + Duration::days(1)
    } else {
        candidate
    };
    resolved.timestamp_millis()
}

/// XOR of every byte between `$` and `*`.
pub fn compute_checksum(body: &str) -> u8 {
    body.bytes().fold(0u8, |acc, b| acc ^ b)
}

pub fn format_checksum(checksum: u8) -> String {
    format!("{:02X}", checksum)
}

/// Frame a command payload as `$<payload>*HH\r\n`.
pub fn format_command(payload: &str) -> String {
    format!("${}*{:02X}\r\n", payload, compute_checksum(payload))
}
