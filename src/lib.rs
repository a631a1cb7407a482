// src/lib.rs
//! GPS relay library
//!
//! Configures an MTK3339 GPS module over serial, decodes its NMEA stream and
//! publishes position fixes to InfluxDB and MQTT.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gps;
pub mod monitor;
pub mod sink;

// Re-export main types for convenience
pub use config::GpsConfig;
pub use dispatcher::{Dispatch, FixDispatcher};
pub use error::{GpsError, Result};
pub use gps::data::Fix;
pub use monitor::{GpsMonitor, MonitorState, RunSummary};
pub use sink::{FieldMapping, Reading, Sink};
