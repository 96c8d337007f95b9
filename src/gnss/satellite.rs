// src/gnss/satellite.rs
//! Satellite identity, the satellite-in-view table and the tracked list

use crate::nmea::sentence::Talker;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Constellation {
    Gps,
    Glonass,
    Galileo,
    Beidou,
    Qzss,
    Sbas,
    Unknown,
}

impl Constellation {
    pub fn from_talker(talker: Talker) -> Self {
        match talker {
            Talker::GP => Constellation::Gps,
            Talker::GL => Constellation::Glonass,
            Talker::GA => Constellation::Galileo,
            Talker::BD => Constellation::Beidou,
            Talker::QZ => Constellation::Qzss,
            Talker::SB => Constellation::Sbas,
            Talker::GN | Talker::Other => Constellation::Unknown,
        }
    }

    /// Two-letter prefix used in sentence talkers.
    pub fn prefix(&self) -> &'static str {
        match self {
            Constellation::Gps => "GP",
            Constellation::Glonass => "GL",
            Constellation::Galileo => "GA",
            Constellation::Beidou => "BD",
            Constellation::Qzss => "QZ",
            Constellation::Sbas => "SB",
            Constellation::Unknown => "UN",
        }
    }

    /// One-letter prefix used in satellite names such as `G12` or `Q193`.
    pub fn short_prefix(&self) -> &'static str {
        match self {
            Constellation::Gps => "G",
            Constellation::Glonass => "L",
            Constellation::Galileo => "E",
            Constellation::Beidou => "B",
            Constellation::Qzss => "Q",
            Constellation::Sbas => "S",
            Constellation::Unknown => "U",
        }
    }
}

impl fmt::Display for Constellation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Constellation::Gps => "GPS",
            Constellation::Glonass => "GLONASS",
            Constellation::Galileo => "GALILEO",
            Constellation::Beidou => "BEIDOU",
            Constellation::Qzss => "QZSS",
            Constellation::Sbas => "SBAS",
            Constellation::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Identity of a satellite: two satellites with the same number in
/// different constellations are distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SatelliteKey {
    pub constellation: Constellation,
    pub id: u32,
}

/// Work out the real constellation and constellation-local number of a
/// satellite reported under `talker` with number `prn`.
///
/// Receivers reuse the GPS talker for SBAS, QZSS and BeiDou satellites and
/// number them in overlapping bands; the rules below are applied in order.
pub fn resolve(talker: Talker, prn: u32) -> SatelliteKey {
    let (constellation, id) = match talker {
        Talker::QZ => (Constellation::Qzss, prn),
        Talker::GL if prn < 64 => (Constellation::Glonass, prn),
        Talker::GP if prn == 193 => (Constellation::Qzss, prn),
        Talker::GP if 200 < prn && prn < 211 => (Constellation::Beidou, prn),
        Talker::GP if 32 < prn && prn < 72 => (Constellation::Sbas, prn + 87),
        Talker::GP if 119 < prn && prn < 139 => (Constellation::Sbas, prn),
        Talker::BD if prn < 16 => (Constellation::Beidou, prn + 200),
        _ => (Constellation::from_talker(talker), prn),
    };
    SatelliteKey { constellation, id }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Satellite {
    pub key: SatelliteKey,
    /// Degrees, clamped to 0..=90.
    pub elevation: Option<f32>,
    /// Degrees, 0..=360; out-of-range samples read as 0.
    pub azimuth: Option<f32>,
    /// dB-Hz, clamped to 0..=99.
    pub snr: Option<f32>,
}

impl Satellite {
    pub fn new(key: SatelliteKey) -> Self {
        Self {
            key,
            elevation: None,
            azimuth: None,
            snr: None,
        }
    }

    /// Set the sky position and signal, clamping each value into range.
    pub fn set_status(&mut self, elevation: Option<f32>, azimuth: Option<f32>, snr: Option<f32>) {
        self.elevation = elevation.map(|e| e.clamp(0.0, 90.0));
        self.azimuth = azimuth.map(|a| if (0.0..=360.0).contains(&a) { a } else { 0.0 });
        self.snr = snr.map(|s| s.clamp(0.0, 99.0));
    }

    pub fn with_status(mut self, elevation: Option<f32>, azimuth: Option<f32>, snr: Option<f32>) -> Self {
        self.set_status(elevation, azimuth, snr);
        self
    }

    pub fn constellation(&self) -> Constellation {
        self.key.constellation
    }

    pub fn id(&self) -> u32 {
        self.key.id
    }

    pub fn name(&self) -> String {
        format!("{}{}", self.key.constellation.short_prefix(), self.key.id)
    }

    pub fn signal_strength_description(&self) -> &'static str {
        match self.snr {
            Some(snr) if snr >= 40.0 => "Excellent",
            Some(snr) if snr >= 35.0 => "Good",
            Some(snr) if snr >= 25.0 => "Fair",
            Some(snr) if snr >= 15.0 => "Poor",
            Some(_) => "Very Poor",
            None => "Unknown",
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    satellite: Satellite,
    talker: Talker,
    burst: u64,
}

/// Satellites in view, keyed by identity.
///
/// Each talker's GSV burst marks the entries it reports with that talker's
/// current burst number; at the end of the burst every entry from the same
/// talker still carrying an older number is evicted.
#[derive(Debug, Clone, Default)]
pub struct SatelliteTable {
    slots: BTreeMap<SatelliteKey, Slot>,
    bursts: HashMap<Talker, u64>,
}

impl SatelliteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new burst for `talker` (first sentence of a GSV group).
    pub fn begin_burst(&mut self, talker: Talker) {
        *self.bursts.entry(talker).or_insert(0) += 1;
    }

    pub fn upsert(&mut self, talker: Talker, satellite: Satellite) {
        let burst = self.bursts.get(&talker).copied().unwrap_or(0);
        self.slots.insert(
            satellite.key,
            Slot {
                satellite,
                talker,
                burst,
            },
        );
    }

    /// Drop every entry from `talker` that was not reported in its current burst.
    pub fn evict_unseen(&mut self, talker: Talker) -> usize {
        let burst = self.bursts.get(&talker).copied().unwrap_or(0);
        let before = self.slots.len();
        self.slots
            .retain(|_, slot| slot.talker != talker || slot.burst == burst);
        before - self.slots.len()
    }

    pub fn get(&self, key: &SatelliteKey) -> Option<&Satellite> {
        self.slots.get(key).map(|slot| &slot.satellite)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Satellite> {
        self.slots.values().map(|slot| &slot.satellite)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.bursts.clear();
    }
}

/// Satellite numbers used in the current fix, as reported by GSA.
#[derive(Debug, Clone, Default)]
pub struct TrackedSatellites {
    prns: Vec<u32>,
    cycle: u64,
    filled_in: u64,
}

impl TrackedSatellites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the start of a new update cycle.
    pub fn begin_cycle(&mut self) {
        self.cycle += 1;
    }

    pub fn replace(&mut self, prns: &[u32]) {
        self.prns.clear();
        self.prns.extend_from_slice(prns);
        self.filled_in = self.cycle;
    }

    /// Add numbers from another constellation's GSA; a list left over from
    /// an earlier cycle is replaced instead.
    pub fn append(&mut self, prns: &[u32]) {
        if self.filled_in != self.cycle {
            self.replace(prns);
            return;
        }
        for prn in prns {
            if !self.prns.contains(prn) {
                self.prns.push(*prn);
            }
        }
    }

    pub fn contains(&self, prn: u32) -> bool {
        self.prns.contains(&prn)
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.prns
    }

    pub fn len(&self) -> usize {
        self.prns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(constellation: Constellation, id: u32) -> SatelliteKey {
        SatelliteKey { constellation, id }
    }

    #[test]
    fn test_resolver_bands() {
        assert_eq!(resolve(Talker::QZ, 1), key(Constellation::Qzss, 1));
        assert_eq!(resolve(Talker::GL, 40), key(Constellation::Glonass, 40));
        assert_eq!(resolve(Talker::GL, 70), key(Constellation::Glonass, 70));
        assert_eq!(resolve(Talker::GP, 193), key(Constellation::Qzss, 193));
        assert_eq!(resolve(Talker::GP, 201), key(Constellation::Beidou, 201));
        assert_eq!(resolve(Talker::GP, 210), key(Constellation::Beidou, 210));
        assert_eq!(resolve(Talker::GP, 211), key(Constellation::Gps, 211));
        assert_eq!(resolve(Talker::GP, 33), key(Constellation::Sbas, 120));
        assert_eq!(resolve(Talker::GP, 71), key(Constellation::Sbas, 158));
        assert_eq!(resolve(Talker::GP, 72), key(Constellation::Gps, 72));
        assert_eq!(resolve(Talker::GP, 129), key(Constellation::Sbas, 129));
        assert_eq!(resolve(Talker::GP, 139), key(Constellation::Gps, 139));
        assert_eq!(resolve(Talker::BD, 7), key(Constellation::Beidou, 207));
        assert_eq!(resolve(Talker::BD, 16), key(Constellation::Beidou, 16));
        assert_eq!(resolve(Talker::GA, 12), key(Constellation::Galileo, 12));
        assert_eq!(resolve(Talker::GP, 12), key(Constellation::Gps, 12));
    }

    #[test]
    fn test_same_number_distinct_constellations() {
        let gps = resolve(Talker::GP, 12);
        let galileo = resolve(Talker::GA, 12);
        assert_ne!(gps, galileo);
    }

    #[test]
    fn test_status_clamping() {
        let sat = Satellite::new(key(Constellation::Gps, 1)).with_status(Some(-5.0), Some(400.0), Some(150.0));
        assert_eq!(sat.elevation, Some(0.0));
        assert_eq!(sat.azimuth, Some(0.0));
        assert_eq!(sat.snr, Some(99.0));

        let sat = Satellite::new(key(Constellation::Gps, 1)).with_status(Some(95.0), Some(-1.0), Some(-3.0));
        assert_eq!(sat.elevation, Some(90.0));
        assert_eq!(sat.azimuth, Some(0.0));
        assert_eq!(sat.snr, Some(0.0));

        let sat = Satellite::new(key(Constellation::Gps, 1)).with_status(Some(45.0), Some(360.0), None);
        assert_eq!(sat.elevation, Some(45.0));
        assert_eq!(sat.azimuth, Some(360.0));
        assert_eq!(sat.snr, None);
    }

    #[test]
    fn test_names() {
        assert_eq!(Satellite::new(key(Constellation::Qzss, 193)).name(), "Q193");
        assert_eq!(Satellite::new(key(Constellation::Galileo, 4)).name(), "E4");
        assert_eq!(Constellation::Unknown.prefix(), "UN");
    }

    #[test]
    fn test_table_evicts_per_talker() {
        let mut table = SatelliteTable::new();
        table.begin_burst(Talker::GP);
        table.upsert(Talker::GP, Satellite::new(resolve(Talker::GP, 1)));
        table.upsert(Talker::GP, Satellite::new(resolve(Talker::GP, 2)));
        table.evict_unseen(Talker::GP);
        table.begin_burst(Talker::GL);
        table.upsert(Talker::GL, Satellite::new(resolve(Talker::GL, 65)));
        table.evict_unseen(Talker::GL);
        assert_eq!(table.len(), 3);

        table.begin_burst(Talker::GP);
        table.upsert(Talker::GP, Satellite::new(resolve(Talker::GP, 2)));
        assert_eq!(table.evict_unseen(Talker::GP), 1);
        assert_eq!(table.len(), 2);
        assert!(table.get(&key(Constellation::Gps, 1)).is_none());
        assert!(table.get(&key(Constellation::Glonass, 65)).is_some());
    }

    #[test]
    fn test_tracked_append_within_cycle() {
        let mut tracked = TrackedSatellites::new();
        tracked.begin_cycle();
        tracked.replace(&[1, 2, 3]);
        tracked.append(&[65, 66, 2]);
        assert_eq!(tracked.as_slice(), &[1, 2, 3, 65, 66]);

        tracked.begin_cycle();
        tracked.append(&[70]);
        assert_eq!(tracked.as_slice(), &[70]);
    }
}
