// src/gps/data.rs
//! GPS data structures and utilities

use super::nmea::NmeaSentence;
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct SatelliteInfo {
    pub prn: u8,                      // Satellite PRN/ID number
    pub elevation: Option<f32>,       // Elevation angle in degrees
    pub azimuth: Option<f32>,         // Azimuth angle in degrees
    pub snr: Option<f32>,             // Signal-to-noise ratio in dB
    pub constellation: &'static str, // GPS, GLONASS, GALILEO, BEIDOU, etc.
}

/// Which sentence a fix was decoded from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixKind {
    /// Recommended minimum navigation information
    #[serde(rename = "RMC")]
    Rmc,
    /// Global positioning system fix data
    #[serde(rename = "GGA")]
    Gga,
}

impl FixKind {
    pub fn tag(&self) -> &'static str {
        match self {
            FixKind::Rmc => "RMC",
            FixKind::Gga => "GGA",
        }
    }
}

impl fmt::Display for FixKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A single decoded position reading.
///
/// Built fresh for every RMC or GGA line and never modified afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Fix {
    pub kind: FixKind,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: Option<f64>,  // knots over ground
    pub course: Option<f64>, // degrees true
    pub altitude: Option<f64>, // metres above mean sea level
    pub valid: bool,
    pub satellites: Option<u8>,
    pub hdop: Option<f64>,
    pub device_time: Option<NaiveTime>,
    /// Host clock at decode time, shared by every field published for this fix
    pub timestamp: DateTime<Utc>,
}

impl Fix {
    /// Build a fix from a decoded sentence. Only RMC and GGA carry a fix.
    pub fn from_sentence(sentence: &NmeaSentence, timestamp: DateTime<Utc>) -> Option<Self> {
        match sentence {
            NmeaSentence::Rmc(rmc) => Some(Self {
                kind: FixKind::Rmc,
                latitude: rmc.latitude,
                longitude: rmc.longitude,
                speed: rmc.speed_knots,
                course: rmc.true_course,
                altitude: None,
                valid: rmc.active,
                satellites: None,
                hdop: None,
                device_time: rmc.time,
                timestamp,
            }),
            NmeaSentence::Gga(gga) => Some(Self {
                kind: FixKind::Gga,
                latitude: gga.latitude,
                longitude: gga.longitude,
                speed: None,
                course: None,
                altitude: gga.altitude,
                valid: gga.fix_quality > 0,
                satellites: gga.satellites,
                hdop: gga.hdop,
                device_time: gga.time,
                timestamp,
            }),
            _ => None,
        }
    }

    /// The receiver reports 0,0 until it has acquired a position
    pub fn is_placeholder(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }

    /// Value of a mapped field, if this fix carries it
    pub fn field(&self, field: FixField) -> Option<FieldValue> {
        match field {
            FixField::Latitude => Some(FieldValue::Float(self.latitude)),
            FixField::Longitude => Some(FieldValue::Float(self.longitude)),
            FixField::Speed => self.speed.map(FieldValue::Float),
            FixField::Course => self.course.map(FieldValue::Float),
            FixField::Altitude => self.altitude.map(FieldValue::Float),
            FixField::Status => Some(FieldValue::Integer(self.valid as i64)),
        }
    }
}

/// Fix fields that can be published to a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixField {
    #[serde(rename = "lat")]
    Latitude,
    #[serde(rename = "lon")]
    Longitude,
    #[serde(rename = "sog")]
    Speed,
    #[serde(rename = "cog")]
    Course,
    #[serde(rename = "alt")]
    Altitude,
    #[serde(rename = "status")]
    Status,
}

impl FixField {
    /// Field key used in line protocol and in `{field}` topic templates
    pub fn name(&self) -> &'static str {
        match self {
            FixField::Latitude => "lat",
            FixField::Longitude => "lon",
            FixField::Speed => "sog",
            FixField::Course => "cog",
            FixField::Altitude => "alt",
            FixField::Status => "status",
        }
    }
}

impl fmt::Display for FixField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Integer(v) => write!(f, "{}", v),
        }
    }
}
