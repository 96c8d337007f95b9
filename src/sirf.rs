// src/sirf.rs
//! SiRF receiver configuration commands
//!
//! SiRF III receivers accept NMEA `PSRF` input sentences while in NMEA mode
//! and framed binary messages while in binary mode. A binary frame is
//! `A0 A2`, a 15-bit payload length, the payload, a 15-bit checksum (sum of
//! the payload bytes) and `B0 B3`.

use crate::error::{GnssError, Result};
use serde::{Deserialize, Serialize};

/// NMEA message ids understood by `PSRF103`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NmeaMessage {
    Gga = 0,
    Gll = 1,
    Gsa = 2,
    Gsv = 3,
    Rmc = 4,
    Vtg = 5,
    Mss = 6,
    Zda = 8,
}

/// Switch the receiver from NMEA to binary mode at 38400 baud.
pub const SWITCH_TO_BINARY: &str = "PSRF100,0,38400,8,1,0";

const FRAME_START: [u8; 2] = [0xA0, 0xA2];
const FRAME_END: [u8; 2] = [0xB0, 0xB3];
const MAX_PAYLOAD: usize = 0x7FFF;

/// Receiver settings to push; `None` leaves a setting unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SirfSettings {
    pub enable_gga: Option<bool>,
    pub enable_rmc: Option<bool>,
    pub enable_gll: Option<bool>,
    pub enable_vtg: Option<bool>,
    pub enable_gsa: Option<bool>,
    pub enable_gsv: Option<bool>,
    pub enable_zda: Option<bool>,
    pub enable_sbas: Option<bool>,
    /// `Some(false)` switches the receiver to binary mode.
    pub enable_nmea: Option<bool>,
    pub enable_static_navigation: Option<bool>,
}

/// One command for the receiver, in the form the link sends it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SirfCommand {
    /// NMEA payload without `$`, `*` and checksum.
    Nmea(String),
    /// Binary payload as hex, without framing.
    Binary(String),
}

impl SirfSettings {
    /// The commands that apply these settings, in sending order.
    pub fn commands(&self) -> Vec<SirfCommand> {
        let mut commands = Vec::new();

        let optional = [
            (NmeaMessage::Gll, self.enable_gll),
            (NmeaMessage::Vtg, self.enable_vtg),
            (NmeaMessage::Gsa, self.enable_gsa),
            (NmeaMessage::Gsv, self.enable_gsv),
            (NmeaMessage::Zda, self.enable_zda),
        ];
        for (message, enable) in optional {
            if let Some(enable) = enable {
                commands.push(SirfCommand::Nmea(message_rate(message, enable)));
            }
        }

        if let Some(enable) = self.enable_static_navigation {
            let in_nmea_mode = self.enable_nmea.unwrap_or(true);
            if in_nmea_mode {
                commands.push(SirfCommand::Nmea(SWITCH_TO_BINARY.to_string()));
            }
            commands.push(SirfCommand::Binary(static_navigation(enable).to_string()));
            if in_nmea_mode {
                commands.push(SirfCommand::Binary(self.switch_to_nmea()));
            }
        } else if let Some(enable) = self.enable_nmea {
            commands.push(if enable {
                SirfCommand::Binary(self.switch_to_nmea())
            } else {
                SirfCommand::Nmea(SWITCH_TO_BINARY.to_string())
            });
        }

        if let Some(enable) = self.enable_sbas {
            commands.push(SirfCommand::Nmea(sbas(enable)));
        }

        // GGA and RMC carry the fix, so they are always switched back on first
        commands.push(SirfCommand::Nmea(message_rate(NmeaMessage::Gga, true)));
        commands.push(SirfCommand::Nmea(message_rate(NmeaMessage::Rmc, true)));
        if let Some(enable) = self.enable_gga {
            commands.push(SirfCommand::Nmea(message_rate(NmeaMessage::Gga, enable)));
        }
        if let Some(enable) = self.enable_rmc {
            commands.push(SirfCommand::Nmea(message_rate(NmeaMessage::Rmc, enable)));
        }

        commands
    }

    fn switch_to_nmea(&self) -> String {
        let on = |enabled: Option<bool>, rate: u8| if enabled.unwrap_or(false) { rate } else { 0 };
        switch_to_nmea(&NmeaRates {
            gga: 1,
            gll: on(self.enable_gll, 1),
            gsa: on(self.enable_gsa, 5),
            gsv: on(self.enable_gsv, 5),
            rmc: 1,
            vtg: on(self.enable_vtg, 1),
            mss: 0,
            epe: 0,
            zda: on(self.enable_zda, 1),
        })
    }
}

/// Output period in seconds of each sentence after switching to NMEA mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NmeaRates {
    pub gga: u8,
    pub gll: u8,
    pub gsa: u8,
    pub gsv: u8,
    pub rmc: u8,
    pub vtg: u8,
    pub mss: u8,
    pub epe: u8,
    pub zda: u8,
}

/// `PSRF103` query/rate control: turn one sentence on (1 s) or off.
pub fn message_rate(message: NmeaMessage, enable: bool) -> String {
    format!(
        "PSRF103,{:02},00,{:02},01",
        message as u8,
        if enable { 1 } else { 0 }
    )
}

/// `PSRF151`: WAAS/EGNOS/MSAS correction on or off.
pub fn sbas(enable: bool) -> String {
    format!("PSRF151,{:02}", if enable { 1 } else { 0 })
}

/// Binary message 0x8F: static navigation on or off.
pub fn static_navigation(enable: bool) -> &'static str {
    if enable {
        "8F01"
    } else {
        "8F00"
    }
}

/// Binary message 0x81: back to NMEA mode at 38400 baud with the given rates.
pub fn switch_to_nmea(rates: &NmeaRates) -> String {
    let mut payload = String::from("8102");
    for rate in [
        rates.gga, rates.gll, rates.gsa, rates.gsv, rates.rmc, rates.vtg, rates.mss, rates.epe,
        rates.zda,
    ] {
        payload.push_str(&format!("{:02X}01", rate));
    }
    payload.push_str("0000");
    payload.push_str(&format!("{:04X}", 38_400u16));
    payload
}

/// Decode a hex string; whitespace is ignored.
pub fn hex_to_bytes(hex: &str) -> Result<Vec<u8>> {
    let digits: Vec<u8> = hex.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err(GnssError::parse(format!("odd number of hex digits in {:?}", hex)));
    }
    digits
        .chunks(2)
        .map(|pair| {
            let text = std::str::from_utf8(pair)
                .map_err(|_| GnssError::parse(format!("invalid hex in {:?}", hex)))?;
            u8::from_str_radix(text, 16)
                .map_err(|_| GnssError::parse(format!("invalid hex in {:?}", hex)))
        })
        .collect()
}

/// Frame a binary payload given as hex into a complete SiRF message.
pub fn binary_frame(payload_hex: &str) -> Result<Vec<u8>> {
    let payload = hex_to_bytes(payload_hex)?;
    if payload.is_empty() || payload.len() > MAX_PAYLOAD {
        return Err(GnssError::parse(format!(
            "SiRF payload length {} out of range",
            payload.len()
        )));
    }
    let length = payload.len() as u16;
    let checksum = payload
        .iter()
        .fold(0u16, |acc, b| acc.wrapping_add(u16::from(*b)))
        & 0x7FFF;

    let mut frame = Vec::with_capacity(payload.len() + 8);
    frame.extend_from_slice(&FRAME_START);
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&checksum.to_be_bytes());
    frame.extend_from_slice(&FRAME_END);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_rate_commands() {
        assert_eq!(message_rate(NmeaMessage::Gga, true), "PSRF103,00,00,01,01");
        assert_eq!(message_rate(NmeaMessage::Zda, false), "PSRF103,08,00,00,01");
        assert_eq!(sbas(true), "PSRF151,01");
        assert_eq!(sbas(false), "PSRF151,00");
    }

    #[test]
    fn test_binary_frame() {
        let frame = binary_frame("8F01").unwrap();
        assert_eq!(
            frame,
            vec![0xA0, 0xA2, 0x00, 0x02, 0x8F, 0x01, 0x00, 0x90, 0xB0, 0xB3]
        );
        assert!(binary_frame("8F0").is_err());
        assert!(binary_frame("zz").is_err());
        assert!(binary_frame("").is_err());
    }

    #[test]
    fn test_switch_to_nmea_payload() {
        let payload = switch_to_nmea(&NmeaRates {
            gga: 1,
            rmc: 1,
            gsv: 5,
            ..Default::default()
        });
        assert_eq!(payload, "810201010001000105010101000100010001000100009600");
        let frame = binary_frame(&payload).unwrap();
        assert_eq!(&frame[2..4], &[0x00, 0x18]);
    }

    #[test]
    fn test_settings_order() {
        let settings = SirfSettings {
            enable_gga: Some(false),
            enable_gll: Some(true),
            enable_sbas: Some(true),
            ..Default::default()
        };
        assert_eq!(
            settings.commands(),
            vec![
                SirfCommand::Nmea("PSRF103,01,00,01,01".into()),
                SirfCommand::Nmea("PSRF151,01".into()),
                SirfCommand::Nmea("PSRF103,00,00,01,01".into()),
                SirfCommand::Nmea("PSRF103,04,00,01,01".into()),
                SirfCommand::Nmea("PSRF103,00,00,00,01".into()),
            ]
        );
    }

    #[test]
    fn test_static_navigation_round_trips_through_binary() {
        let settings = SirfSettings {
            enable_static_navigation: Some(true),
            ..Default::default()
        };
        let commands = settings.commands();
        assert_eq!(commands[0], SirfCommand::Nmea(SWITCH_TO_BINARY.into()));
        assert_eq!(commands[1], SirfCommand::Binary("8F01".into()));
        assert!(matches!(&commands[2], SirfCommand::Binary(p) if p.starts_with("8102")));

        let binary_mode = SirfSettings {
            enable_nmea: Some(false),
            enable_static_navigation: Some(false),
            ..Default::default()
        };
        assert_eq!(binary_mode.commands()[0], SirfCommand::Binary("8F00".into()));
    }
}
