// src/error.rs
//! Error types for the GPS relay

use std::fmt;

pub type Result<T> = std::result::Result<T, GpsError>;

#[derive(Debug)]
pub enum GpsError {
    /// Command name is not one of the known PMTK commands
    UnknownCommand(String),
    /// A device setting is outside the range the module accepts
    InvalidParameter(String),
    /// Writing a command sentence to the serial port failed
    DeviceWrite(std::io::Error),
    /// A received sentence failed its `*HH` integrity check
    Checksum { expected: u8, found: Option<u8> },
    /// A received sentence could not be decoded
    Decode(String),
    /// The serial link failed while reading; fatal to the run loop
    Channel(String),
    /// A single sink refused or failed a publish
    SinkPublish { sink: String, reason: String },
    Config(String),
    Io(std::io::Error),
    Serial(tokio_serial::Error),
    Json(serde_json::Error),
    Other(String),
}

impl GpsError {
    /// Errors that drop a single line or a single publish without stopping
    /// the stream.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GpsError::Checksum { .. } | GpsError::Decode(_) | GpsError::SinkPublish { .. }
        )
    }

    pub fn sink_publish(sink: &str, reason: impl fmt::Display) -> Self {
        GpsError::SinkPublish {
            sink: sink.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for GpsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpsError::UnknownCommand(name) => write!(f, "Unknown command: {}", name),
            GpsError::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
            GpsError::DeviceWrite(e) => write!(f, "Device write error: {}", e),
            GpsError::Checksum { expected, found: Some(found) } => write!(
                f,
                "Checksum error: computed {:02X}, sentence carries {:02X}",
                expected, found
            ),
            GpsError::Checksum { expected, found: None } => write!(
                f,
                "Checksum error: computed {:02X}, sentence has no valid checksum",
                expected
            ),
            GpsError::Decode(msg) => write!(f, "Decode error: {}", msg),
            GpsError::Channel(msg) => write!(f, "Channel error: {}", msg),
            GpsError::SinkPublish { sink, reason } => {
                write!(f, "Publish to {} failed: {}", sink, reason)
            }
            GpsError::Config(msg) => write!(f, "Configuration error: {}", msg),
            GpsError::Io(e) => write!(f, "IO error: {}", e),
            GpsError::Serial(e) => write!(f, "Serial error: {}", e),
            GpsError::Json(e) => write!(f, "JSON error: {}", e),
            GpsError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for GpsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GpsError::DeviceWrite(e) | GpsError::Io(e) => Some(e),
            GpsError::Serial(e) => Some(e),
            GpsError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for GpsError {
    fn from(error: std::io::Error) -> Self {
        GpsError::Io(error)
    }
}

impl From<tokio_serial::Error> for GpsError {
    fn from(error: tokio_serial::Error) -> Self {
        GpsError::Serial(error)
    }
}

impl From<serde_json::Error> for GpsError {
    fn from(error: serde_json::Error) -> Self {
        GpsError::Json(error)
    }
}

impl From<anyhow::Error> for GpsError {
    fn from(error: anyhow::Error) -> Self {
        GpsError::Other(error.to_string())
    }
}
