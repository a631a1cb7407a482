// src/gps/mod.rs
//! GPS protocol handling: PMTK commands out, NMEA sentences in

pub mod data;
pub mod decoder;
pub mod device;
pub mod mtk;
pub mod nmea;

pub use data::{Fix, FixField, FixKind};
pub use decoder::StreamDecoder;
pub use device::{DeviceConfigurator, DeviceSettings, NmeaOutput};
pub use mtk::{MtkCommand, MtkSentence};
