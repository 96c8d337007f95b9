// src/nmea/sentence.rs
//! Sentence framing and typed decoding
//!
//! A line is framed with the whole-sentence pattern `$body[*HH]\r\n`, the body
//! is split on commas, and the `TTSSS` command is turned into a closed
//! [`Sentence`] enum. Decoding reads every field before anything is applied,
//! so a malformed field abandons the whole sentence.

use super::codec;
use crate::error::{GnssError, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static SENTENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\$([^*$]*)(?:\*([0-9A-F][0-9A-F]))?)\r\n$").expect("static sentence pattern")
});

/// Two-letter talker identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Talker {
    GP,
    GN,
    GL,
    GA,
    QZ,
    BD,
    SB,
    Other,
}

impl Talker {
    pub fn from_code(code: &str) -> Self {
        match code {
            "GP" => Talker::GP,
            "GN" => Talker::GN,
            "GL" => Talker::GL,
            "GA" => Talker::GA,
            "QZ" => Talker::QZ,
            "BD" | "GB" => Talker::BD,
            "SB" => Talker::SB,
            _ => Talker::Other,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Talker::GP => "GP",
            Talker::GN => "GN",
            Talker::GL => "GL",
            Talker::GA => "GA",
            Talker::QZ => "QZ",
            Talker::BD => "BD",
            Talker::SB => "SB",
            Talker::Other => "??",
        }
    }
}

impl fmt::Display for Talker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A line that matched the sentence pattern, not yet decoded.
#[derive(Debug, Clone)]
pub struct Frame<'a> {
    /// `$...*HH` without the line terminator.
    pub sentence: &'a str,
    /// Text between `$` and `*`.
    pub body: &'a str,
    pub checksum: Option<u8>,
}

impl<'a> Frame<'a> {
    /// Match a raw line (including its `\r\n`) against the sentence pattern.
    pub fn parse(line: &'a str) -> Option<Self> {
        let caps = SENTENCE_PATTERN.captures(line)?;
        let sentence = caps.get(1)?.as_str();
        let body = caps.get(2)?.as_str();
        let checksum = caps
            .get(3)
            .and_then(|m| u8::from_str_radix(m.as_str(), 16).ok());
        Some(Self {
            sentence,
            body,
            checksum,
        })
    }

    pub fn computed_checksum(&self) -> u8 {
        codec::compute_checksum(self.body)
    }

    pub fn verify_checksum(&self) -> Result<()> {
        match self.checksum {
            Some(expected) if expected != self.computed_checksum() => Err(GnssError::Checksum {
                expected,
                actual: self.computed_checksum(),
            }),
            _ => Ok(()),
        }
    }

    pub fn command(&self) -> &'a str {
        self.body.split(',').next().unwrap_or("")
    }

    pub fn fields(&self) -> Vec<&'a str> {
        self.body.split(',').skip(1).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Gga {
    pub time: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// 0 = invalid .. 8 = simulation; an empty field reads as 0.
    pub quality: u8,
    pub satellites: Option<u32>,
    pub hdop: Option<f32>,
    pub altitude: Option<f64>,
    pub geoid_height: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rmc {
    pub time: i64,
    /// `A` active, `V` void, `None` when the field is missing or unknown.
    pub active: Option<bool>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Meters per second.
    pub speed: Option<f32>,
    pub bearing: Option<f32>,
    pub mode: Option<char>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Gsa {
    pub selection_mode: Option<char>,
    pub fix_type: u8,
    pub prns: Vec<u32>,
    pub pdop: Option<f32>,
    pub hdop: Option<f32>,
    pub vdop: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GsvRecord {
    pub prn: u32,
    pub elevation: Option<f32>,
    pub azimuth: Option<f32>,
    pub snr: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Gsv {
    pub total: u32,
    pub index: u32,
    pub in_view: u32,
    pub records: Vec<GsvRecord>,
}

impl Gsv {
    pub fn is_first(&self) -> bool {
        self.index == 1
    }

    pub fn is_last(&self) -> bool {
        self.index == self.total
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Gll {
    pub time: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Gns {
    pub time: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub satellites: Option<u32>,
}

/// The closed set of sentences the parser understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Sentence {
    Gga(Gga),
    Rmc(Rmc),
    Gsa(Talker, Gsa),
    Gsv(Talker, Gsv),
    Gll(Gll),
    Vtg,
    Gns(Gns),
    /// Range residuals; recognized, not used.
    Grs,
    /// Leica local position and quality; recognized, not used.
    Llq,
    Unknown(String),
}

impl Sentence {
    /// Decode a framed sentence, resolving time fields against `now`.
    pub fn decode(frame: &Frame<'_>, now: DateTime<Utc>) -> Result<Self> {
        let command = frame.command();
        if command.len() != 5 || !command.is_ascii() {
            return Ok(Sentence::Unknown(command.to_string()));
        }
        let (code, kind) = command.split_at(2);
        let talker = Talker::from_code(code);
        let fields = frame.fields();

        let sentence = match (talker, kind) {
            (Talker::GP | Talker::GN, "GGA") => Sentence::Gga(decode_gga(&fields, now)?),
            (Talker::GP | Talker::GN, "RMC") => Sentence::Rmc(decode_rmc(&fields, now)?),
            (Talker::GP | Talker::GN | Talker::GA | Talker::QZ | Talker::BD, "GSA") => {
                Sentence::Gsa(talker, decode_gsa(&fields)?)
            }
            (Talker::GP | Talker::GL | Talker::GA | Talker::QZ | Talker::BD, "GSV") => {
                Sentence::Gsv(talker, decode_gsv(&fields)?)
            }
            (Talker::GP | Talker::GN, "GLL") => Sentence::Gll(decode_gll(&fields, now)),
            (Talker::GP | Talker::GN, "VTG") => Sentence::Vtg,
            (Talker::GP | Talker::GN | Talker::GL, "GNS") => Sentence::Gns(decode_gns(&fields, now)?),
            (Talker::GP, "GRS") => Sentence::Grs,
            (Talker::GP, "LLQ") => Sentence::Llq,
            _ => Sentence::Unknown(command.to_string()),
        };
        Ok(sentence)
    }
}

fn field<'a>(fields: &[&'a str], index: usize) -> &'a str {
    fields.get(index).copied().unwrap_or("")
}

fn coordinate(value: &str, hemisphere: &str) -> Option<f64> {
    if value.is_empty() {
        None
    } else {
        Some(codec::parse_coordinate(value, hemisphere))
    }
}

fn opt_u32(value: &str) -> Result<Option<u32>> {
    if value.is_empty() {
        Ok(None)
    } else {
        Ok(Some(value.trim().parse::<u32>()?))
    }
}

fn status_flag(value: &str) -> Option<bool> {
    match value {
        "A" => Some(true),
        "V" => Some(false),
        _ => None,
    }
}

fn first_char(value: &str) -> Option<char> {
    value.chars().next()
}

fn decode_gga(fields: &[&str], now: DateTime<Utc>) -> Result<Gga> {
    // time, lat, N/S, lon, E/W, quality, sats, hdop, alt, unit, geoid, unit, age, station
    let quality = match field(fields, 5) {
        "" => 0,
        q => q
            .trim()
            .parse::<u8>()
            .map_err(|e| GnssError::parse(format!("GGA quality {:?}: {}", q, e)))?,
    };
    Ok(Gga {
        time: codec::parse_time_at(field(fields, 0), now),
        latitude: coordinate(field(fields, 1), field(fields, 2)),
        longitude: coordinate(field(fields, 3), field(fields, 4)),
        quality,
        satellites: opt_u32(field(fields, 6))?,
        hdop: codec::opt_f32(field(fields, 7)),
        altitude: codec::opt_altitude(field(fields, 8), field(fields, 9)),
        geoid_height: codec::opt_altitude(field(fields, 10), field(fields, 11)),
    })
}

fn decode_rmc(fields: &[&str], now: DateTime<Utc>) -> Result<Rmc> {
    // time, status, lat, N/S, lon, E/W, knots, course, date, magvar, E/W, mode
    let speed = match field(fields, 6) {
        "" => None,
        s => Some(codec::parse_speed(s, "N")),
    };
    Ok(Rmc {
        time: codec::parse_time_at(field(fields, 0), now),
        active: status_flag(field(fields, 1)),
        latitude: coordinate(field(fields, 2), field(fields, 3)),
        longitude: coordinate(field(fields, 4), field(fields, 5)),
        speed,
        bearing: codec::opt_f32(field(fields, 7)),
        mode: first_char(field(fields, 11)),
    })
}

fn decode_gsa(fields: &[&str]) -> Result<Gsa> {
    // mode, fix type, 12 x prn, pdop, hdop, vdop
    let fix_type = codec::parse_int(field(fields, 1)).clamp(0, 3) as u8;
    let mut prns = Vec::with_capacity(12);
    for index in 2..14 {
        if let Some(prn) = opt_u32(field(fields, index))? {
            prns.push(prn);
        }
    }
    Ok(Gsa {
        selection_mode: first_char(field(fields, 0)),
        fix_type,
        prns,
        pdop: codec::opt_f32(field(fields, 14)),
        hdop: codec::opt_f32(field(fields, 15)),
        vdop: codec::opt_f32(field(fields, 16)),
    })
}

fn decode_gsv(fields: &[&str]) -> Result<Gsv> {
    // total, index, in view, then up to four (prn, elevation, azimuth, snr)
    let total = field(fields, 0).trim().parse::<u32>()?;
    let index = field(fields, 1).trim().parse::<u32>()?;
    let in_view = field(fields, 2).trim().parse::<u32>()?;

    let mut records = Vec::new();
    if in_view != 0 {
        let mut count = 4;
        if index == total {
            count = in_view % 4;
            if count == 0 {
                count = 4;
            }
        }
        for slot in 0..count as usize {
            let base = 3 + slot * 4;
            let prn = match field(fields, base) {
                "" => break,
                p => p.trim().parse::<u32>()?,
            };
            records.push(GsvRecord {
                prn,
                elevation: codec::opt_f32(field(fields, base + 1)),
                azimuth: codec::opt_f32(field(fields, base + 2)),
                snr: codec::opt_f32(field(fields, base + 3)),
            });
        }
    }

    Ok(Gsv {
        total,
        index,
        in_view,
        records,
    })
}

fn decode_gll(fields: &[&str], now: DateTime<Utc>) -> Gll {
    // lat, N/S, lon, E/W, time, status, mode
    Gll {
        time: codec::parse_time_at(field(fields, 4), now),
        latitude: coordinate(field(fields, 0), field(fields, 1)),
        longitude: coordinate(field(fields, 2), field(fields, 3)),
        active: status_flag(field(fields, 5)),
    }
}

fn decode_gns(fields: &[&str], now: DateTime<Utc>) -> Result<Gns> {
    // time, lat, N/S, lon, E/W, mode, sats, hdop, height, geoid, age, station
    Ok(Gns {
        time: codec::parse_time_at(field(fields, 0), now),
        latitude: coordinate(field(fields, 1), field(fields, 2)),
        longitude: coordinate(field(fields, 3), field(fields, 4)),
        satellites: opt_u32(field(fields, 6))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(line: &str) -> Result<Sentence> {
        let frame = Frame::parse(line).expect("line should frame");
        Sentence::decode(&frame, Utc::now())
    }

    #[test]
    fn test_frame_requires_crlf() {
        assert!(Frame::parse("$GPVTG,,T,,M,,N,,K*4E\r\n").is_some());
        assert!(Frame::parse("$GPVTG,,T,,M,,N,,K*4E").is_none());
        assert!(Frame::parse("$GPVTG,,T,,M,,N,,K*4E\n").is_none());
        assert!(Frame::parse("GPVTG,,T*4E\r\n").is_none());
        assert!(Frame::parse("$GP$VTG\r\n").is_none());
    }

    #[test]
    fn test_frame_checksum() {
        let line = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n";
        let frame = Frame::parse(line).unwrap();
        assert_eq!(frame.checksum, Some(0x47));
        assert!(frame.verify_checksum().is_ok());
        assert_eq!(frame.command(), "GPGGA");
        assert_eq!(frame.sentence, &line[..line.len() - 2]);

        let bad = Frame::parse("$GPGGA,123519,,,,,0,,,,,,,,*00\r\n").unwrap();
        assert!(matches!(bad.verify_checksum(), Err(GnssError::Checksum { .. })));

        let none = Frame::parse("$GPVTG,,T,,M,,N,,K\r\n").unwrap();
        assert_eq!(none.checksum, None);
        assert!(none.verify_checksum().is_ok());
    }

    #[test]
    fn test_decode_gga() {
        let sentence =
            decode("$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n").unwrap();
        let Sentence::Gga(gga) = sentence else {
            panic!("expected GGA, got {:?}", sentence);
        };
        assert_eq!(gga.quality, 1);
        assert_eq!(gga.satellites, Some(8));
        assert_eq!(gga.hdop, Some(0.9));
        assert_eq!(gga.altitude, Some(545.4));
        assert_eq!(gga.geoid_height, Some(46.9));
        assert!((gga.latitude.unwrap() - 48.1173).abs() < 1e-4);
        assert!(gga.time > 0);
    }

    #[test]
    fn test_decode_rmc() {
        let sentence =
            decode("$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r\n").unwrap();
        let Sentence::Rmc(rmc) = sentence else {
            panic!("expected RMC");
        };
        assert_eq!(rmc.active, Some(true));
        assert!((rmc.speed.unwrap() - 11.5236).abs() < 1e-3);
        assert_eq!(rmc.bearing, Some(84.4));
        assert_eq!(rmc.mode, None);
    }

    #[test]
    fn test_decode_gsa() {
        let sentence = decode("$GPGSA,A,3,04,05,,09,12,,,24,,,,,2.5,1.3,2.1*39\r\n").unwrap();
        let Sentence::Gsa(talker, gsa) = sentence else {
            panic!("expected GSA");
        };
        assert_eq!(talker, Talker::GP);
        assert_eq!(gsa.selection_mode, Some('A'));
        assert_eq!(gsa.fix_type, 3);
        assert_eq!(gsa.prns, vec![4, 5, 9, 12, 24]);
        assert_eq!(gsa.pdop, Some(2.5));
        assert_eq!(gsa.hdop, Some(1.3));
        assert_eq!(gsa.vdop, Some(2.1));
    }

    #[test]
    fn test_decode_gsv_last_sentence_count() {
        let sentence = decode("$GPGSV,2,2,06,21,10,100,30,22,20,200,31\r\n").unwrap();
        let Sentence::Gsv(_, gsv) = sentence else {
            panic!("expected GSV");
        };
        assert!(gsv.is_last());
        assert_eq!(gsv.records.len(), 2);
        assert_eq!(gsv.records[1].prn, 22);
    }

    #[test]
    fn test_decode_gsv_empty_snr() {
        let sentence = decode("$GLGSV,1,1,02,65,40,083,,66,17,308,41\r\n").unwrap();
        let Sentence::Gsv(talker, gsv) = sentence else {
            panic!("expected GSV");
        };
        assert_eq!(talker, Talker::GL);
        assert_eq!(gsv.records[0].snr, None);
        assert_eq!(gsv.records[1].snr, Some(41.0));
    }

    #[test]
    fn test_decode_gsv_none_in_view() {
        let sentence = decode("$GPGSV,1,1,00*79\r\n").unwrap();
        let Sentence::Gsv(_, gsv) = sentence else {
            panic!("expected GSV");
        };
        assert_eq!(gsv.in_view, 0);
        assert!(gsv.records.is_empty());
    }

    #[test]
    fn test_decode_malformed_gsv_is_error() {
        assert!(decode("$GPGSV,x,1,04,01,40,083,46\r\n").is_err());
        assert!(decode("$GPGSV,1,1,01,zz,40,083,46\r\n").is_err());
    }

    #[test]
    fn test_decode_talker_dispatch() {
        assert_eq!(decode("$GNVTG,,T,,M,,N,,K\r\n").unwrap(), Sentence::Vtg);
        assert_eq!(decode("$GPGRS,123519,0,1.0\r\n").unwrap(), Sentence::Grs);
        assert_eq!(
            decode("$GLGGA,123519,,,,,0,,,,,,,,\r\n").unwrap(),
            Sentence::Unknown("GLGGA".to_string())
        );
        assert_eq!(
            decode("$PSRF100,0,38400,8,1,0\r\n").unwrap(),
            Sentence::Unknown("PSRF100".to_string())
        );
    }
}
