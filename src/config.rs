// src/config.rs
//! Configuration management with JSON file storage

use crate::error::{GnssError, Result};
use crate::sirf::SirfSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GnssConfig {
    pub device: Option<String>, // e.g. /dev/rfcomm0
    pub baud_rate: u32,
    pub max_connection_retries: u32,
    pub connect_delay_ms: u64,  // before the first attempt
    pub retry_period_ms: u64,   // between attempts
    pub read_timeout_ms: u64,   // liveness window of the read loop
    pub write_poll_ms: u64,     // readiness re-check while a command waits
    pub precision: f32,         // HDOP to meters
    pub strict_checksum: bool,
    pub track_file_dir: PathBuf,
    pub track_file_prefix: String,
    pub sirf: Option<SirfSettings>,
}

/// Timing of the link's connect, retry, read and write loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTiming {
    pub connect_delay: Duration,
    pub retry_period: Duration,
    pub read_timeout: Duration,
    pub write_poll: Duration,
}

impl Default for LinkTiming {
    fn default() -> Self {
        GnssConfig::default().link_timing()
    }
}

impl Default for GnssConfig {
    fn default() -> Self {
        Self {
            device: None,
            baud_rate: 9600,
            max_connection_retries: 10,
            connect_delay_ms: 5_000,
            retry_period_ms: 60_000,
            read_timeout_ms: 5_000,
            write_poll_ms: 500,
            precision: 5.1,
            strict_checksum: false,
            track_file_dir: home_dir().join("gnss-link").join("tracks"),
            track_file_prefix: "nmeatrack".to_string(),
            sirf: None,
        }
    }
}

impl GnssConfig {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    /// Load from a file, falling back to defaults when it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| GnssError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| GnssError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GnssError::Config(format!("Failed to create config directory: {}", e)))?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .map_err(|e| GnssError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Config file path: `$HOME/.config/gnss-link/config.json`
    pub fn get_config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME")
            .map_err(|_| GnssError::Config("HOME environment variable not set".to_string()))?;

        Ok(PathBuf::from(home).join(".config").join("gnss-link").join("config.json"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(GnssError::Config("baud_rate must be positive".to_string()));
        }
        if self.max_connection_retries == 0 {
            return Err(GnssError::Config(
                "max_connection_retries must be at least 1".to_string(),
            ));
        }
        if self.read_timeout_ms == 0 || self.write_poll_ms == 0 {
            return Err(GnssError::Config(
                "read_timeout_ms and write_poll_ms must be positive".to_string(),
            ));
        }
        if !(self.precision.is_finite() && self.precision > 0.0) {
            return Err(GnssError::Config("precision must be a positive number".to_string()));
        }
        Ok(())
    }

    /// Update serial device settings
    pub fn update_device(&mut self, device: String, baud_rate: u32) {
        self.device = Some(device);
        self.baud_rate = baud_rate;
    }

    pub fn update_retries(&mut self, retries: u32) {
        self.max_connection_retries = retries.max(1);
    }

    pub fn link_timing(&self) -> LinkTiming {
        LinkTiming {
            connect_delay: Duration::from_millis(self.connect_delay_ms),
            retry_period: Duration::from_millis(self.retry_period_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            write_poll: Duration::from_millis(self.write_poll_ms),
        }
    }
}

fn home_dir() -> PathBuf {
    std::env::var("HOME").map(PathBuf::from).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GnssConfig::default();
        assert_eq!(config.device, None);
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.max_connection_retries, 10);
        assert_eq!(config.track_file_prefix, "nmeatrack");
        assert!(!config.strict_checksum);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_update_device() {
        let mut config = GnssConfig::default();
        config.update_device("/dev/rfcomm0".to_string(), 38400);
        assert_eq!(config.device, Some("/dev/rfcomm0".to_string()));
        assert_eq!(config.baud_rate, 38400);

        config.update_retries(0);
        assert_eq!(config.max_connection_retries, 1);
    }

    #[test]
    fn test_link_timing() {
        let timing = GnssConfig::default().link_timing();
        assert_eq!(timing.connect_delay, Duration::from_secs(5));
        assert_eq!(timing.retry_period, Duration::from_secs(60));
        assert_eq!(timing.read_timeout, Duration::from_secs(5));
        assert_eq!(timing.write_poll, Duration::from_millis(500));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = GnssConfig::default();
        config.update_device("/dev/rfcomm1".to_string(), 4800);
        config.sirf = Some(SirfSettings {
            enable_sbas: Some(true),
            ..Default::default()
        });
        config.save_to(&path).unwrap();

        let loaded = GnssConfig::load_from(&path).unwrap();
        assert_eq!(loaded.device.as_deref(), Some("/dev/rfcomm1"));
        assert_eq!(loaded.baud_rate, 4800);
        assert_eq!(loaded.sirf.and_then(|s| s.enable_sbas), Some(true));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = GnssConfig::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.baud_rate, 9600);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "device": "/dev/rfcomm0", "strict_checksum": true }"#).unwrap();
        let config = GnssConfig::load_from(&path).unwrap();
        assert_eq!(config.device.as_deref(), Some("/dev/rfcomm0"));
        assert!(config.strict_checksum);
        assert_eq!(config.retry_period_ms, 60_000);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(GnssConfig::load_from(&path), Err(GnssError::Config(_))));

        std::fs::write(&path, r#"{ "baud_rate": 0 }"#).unwrap();
        assert!(matches!(GnssConfig::load_from(&path), Err(GnssError::Config(_))));
    }
}
