// src/error.rs
//! Error types for the GNSS link

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GnssError>;

#[derive(Debug, Error)]
pub enum GnssError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Checksum mismatch: expected {expected:02X}, got {actual:02X}")]
    Checksum { expected: u8, actual: u8 },

    #[error("Link is already enabled")]
    AlreadyEnabled,

    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The location sink refused a fix or status update.
    #[error("Location sink rejected update: {0}")]
    SinkRejected(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Error: {0}")]
    Other(String),
}

impl GnssError {
    pub(crate) fn parse(msg: impl Into<String>) -> Self {
        GnssError::Parse(msg.into())
    }
}

impl From<std::num::ParseIntError> for GnssError {
    fn from(error: std::num::ParseIntError) -> Self {
        GnssError::Parse(error.to_string())
    }
}

impl From<std::num::ParseFloatError> for GnssError {
    fn from(error: std::num::ParseFloatError) -> Self {
        GnssError::Parse(error.to_string())
    }
}

impl From<anyhow::Error> for GnssError {
    fn from(error: anyhow::Error) -> Self {
        GnssError::Other(error.to_string())
    }
}
