// src/gps/nmea.rs
//! NMEA 0183 sentence parsing
//!
//! A sentence looks like `$GPRMC,....*6A`. The two hex digits after `*` are
//! the XOR of every byte between `$` and `*`; a sentence is only decoded once
//! that checksum matches. The first field is a five character tag made of a
//! two character talker (`GP`, `GN`, `GL`, ...) and a three character type.

use super::data::SatelliteInfo;
use crate::error::{GpsError, Result};
use chrono::{NaiveDate, NaiveTime};

/// XOR-fold of a sentence payload (the bytes between `$` and `*`)
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0, |acc, b| acc ^ b)
}

/// Recommended minimum navigation information
#[derive(Debug, Clone, PartialEq)]
pub struct Rmc {
    pub time: Option<NaiveTime>,
    pub active: bool,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_knots: Option<f64>,
    pub true_course: Option<f64>,
    pub date: Option<NaiveDate>,
    pub magnetic_variation: Option<f64>,
}

/// Global positioning system fix data
#[derive(Debug, Clone, PartialEq)]
pub struct Gga {
    pub time: Option<NaiveTime>,
    pub latitude: f64,
    pub longitude: f64,
    pub fix_quality: u8,
    pub satellites: Option<u8>,
    pub hdop: Option<f64>,
    pub altitude: Option<f64>,
    pub geoid_separation: Option<f64>,
}

/// Geographic position, latitude and longitude
#[derive(Debug, Clone, PartialEq)]
pub struct Gll {
    pub latitude: f64,
    pub longitude: f64,
    pub time: Option<NaiveTime>,
    pub active: bool,
}

/// Track made good and ground speed
#[derive(Debug, Clone, PartialEq)]
pub struct Vtg {
    pub true_course: Option<f64>,
    pub magnetic_course: Option<f64>,
    pub speed_knots: Option<f64>,
    pub speed_kmh: Option<f64>,
}

/// DOP and active satellites
#[derive(Debug, Clone, PartialEq)]
pub struct Gsa {
    pub automatic: bool,
    /// 1 = no fix, 2 = 2D, 3 = 3D
    pub fix_type: u8,
    pub satellites_used: Vec<u8>,
    pub pdop: Option<f64>,
    pub hdop: Option<f64>,
    pub vdop: Option<f64>,
}

/// Satellites in view, one page of a multi-sentence group
#[derive(Debug, Clone, PartialEq)]
pub struct Gsv {
    pub constellation: &'static str,
    pub total_messages: u8,
    pub message_number: u8,
    pub satellites_in_view: u8,
    pub satellites: Vec<SatelliteInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NmeaSentence {
    Rmc(Rmc),
    Gga(Gga),
    Gll(Gll),
    Vtg(Vtg),
    Gsa(Gsa),
    Gsv(Gsv),
    /// Checksum was valid but the type is not one we decode, e.g. `$PMTK001`
    Unsupported(String),
}

impl NmeaSentence {
    /// Short type name used in logs
    pub fn kind(&self) -> &str {
        match self {
            NmeaSentence::Rmc(_) => "RMC",
            NmeaSentence::Gga(_) => "GGA",
            NmeaSentence::Gll(_) => "GLL",
            NmeaSentence::Vtg(_) => "VTG",
            NmeaSentence::Gsa(_) => "GSA",
            NmeaSentence::Gsv(_) => "GSV",
            NmeaSentence::Unsupported(tag) => tag,
        }
    }
}

/// Validate and decode a single NMEA sentence
pub fn parse_sentence(line: &str) -> Result<NmeaSentence> {
    let line = line.trim_end_matches(['\r', '\n']);
    let body = line
        .strip_prefix('$')
        .or_else(|| line.strip_prefix('!'))
        .ok_or_else(|| GpsError::Decode(format!("missing start delimiter: {:?}", line)))?;
    if !body.is_ascii() {
        return Err(GpsError::Decode(format!("non ASCII sentence: {:?}", line)));
    }

    let (payload, trailer) = match body.rsplit_once('*') {
        Some(parts) => parts,
        None => {
            return Err(GpsError::Checksum {
                expected: checksum(body.as_bytes()),
                found: None,
            })
        }
    };

    let expected = checksum(payload.as_bytes());
    let found = if trailer.len() == 2 {
        u8::from_str_radix(trailer, 16).ok()
    } else {
        None
    };
    if found != Some(expected) {
        return Err(GpsError::Checksum { expected, found });
    }

    let fields = Fields::new(payload);
    let tag = fields.get(0);
    if tag.len() != 5 || !tag.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Ok(NmeaSentence::Unsupported(tag.to_string()));
    }

    let (talker, kind) = tag.split_at(2);
    match kind {
        "RMC" => parse_rmc(&fields).map(NmeaSentence::Rmc),
        "GGA" => parse_gga(&fields).map(NmeaSentence::Gga),
        "GLL" => parse_gll(&fields).map(NmeaSentence::Gll),
        "VTG" => parse_vtg(&fields).map(NmeaSentence::Vtg),
        "GSA" => parse_gsa(&fields).map(NmeaSentence::Gsa),
        "GSV" => parse_gsv(&fields, talker).map(NmeaSentence::Gsv),
        _ => Ok(NmeaSentence::Unsupported(tag.to_string())),
    }
}

/// Comma separated fields of a payload, with typed accessors
struct Fields<'a> {
    parts: Vec<&'a str>,
}

impl<'a> Fields<'a> {
    fn new(payload: &'a str) -> Self {
        Self {
            parts: payload.split(',').collect(),
        }
    }

    fn tag(&self) -> &'a str {
        self.get(0)
    }

    fn len(&self) -> usize {
        self.parts.len()
    }

    fn require(&self, count: usize) -> Result<()> {
        if self.len() < count {
            return Err(GpsError::Decode(format!(
                "{} has {} fields, expected at least {}",
                self.tag(),
                self.len(),
                count
            )));
        }
        Ok(())
    }

    fn get(&self, index: usize) -> &'a str {
        self.parts.get(index).copied().unwrap_or("")
    }

    fn f64(&self, index: usize) -> Result<Option<f64>> {
        let raw = self.get(index);
        if raw.is_empty() {
            return Ok(None);
        }
        finite(raw).map(Some).ok_or_else(|| self.invalid(index))
    }

    fn u8(&self, index: usize) -> Result<Option<u8>> {
        let raw = self.get(index);
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse::<u8>().map(Some).map_err(|_| self.invalid(index))
    }

    fn time(&self, index: usize) -> Result<Option<NaiveTime>> {
        let raw = self.get(index);
        if raw.is_empty() {
            return Ok(None);
        }
        parse_time(raw).map(Some).ok_or_else(|| self.invalid(index))
    }

    fn date(&self, index: usize) -> Result<Option<NaiveDate>> {
        let raw = self.get(index);
        if raw.is_empty() {
            return Ok(None);
        }
        parse_date(raw).map(Some).ok_or_else(|| self.invalid(index))
    }

    /// Latitude or longitude in `dddmm.mmmm` form followed by its hemisphere.
    /// An empty field decodes to 0.0, which downstream treats as "no fix yet".
    fn coordinate(&self, index: usize) -> Result<f64> {
        let raw = self.get(index);
        let hemisphere = self.get(index + 1);
        if raw.is_empty() {
            return Ok(0.0);
        }
        let value = finite(raw).ok_or_else(|| self.invalid(index))?;
        let degrees = (value / 100.0).trunc();
        let minutes = value - degrees * 100.0;
        let decimal = degrees + minutes / 60.0;
        match hemisphere {
            "N" | "E" => Ok(decimal),
            "S" | "W" => Ok(-decimal),
            _ => Err(self.invalid(index + 1)),
        }
    }

    fn invalid(&self, index: usize) -> GpsError {
        GpsError::Decode(format!(
            "{} field {} is invalid: {:?}",
            self.tag(),
            index,
            self.get(index)
        ))
    }
}

/// `f64::from_str` also takes `nan` and `inf`, which no receiver sends
fn finite(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    let (whole, fraction) = raw.split_once('.').unwrap_or((raw, ""));
    if whole.len() != 6 || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hour = whole[0..2].parse().ok()?;
    let minute = whole[2..4].parse().ok()?;
    let second = whole[4..6].parse().ok()?;
    let milli = if fraction.is_empty() {
        0
    } else {
        let digits: String = fraction.chars().chain("000".chars()).take(3).collect();
        digits.parse().ok()?
    };
    NaiveTime::from_hms_milli_opt(hour, minute, second, milli)
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    if raw.len() != 6 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let day = raw[0..2].parse().ok()?;
    let month = raw[2..4].parse().ok()?;
    let year: i32 = raw[4..6].parse().ok()?;
    NaiveDate::from_ymd_opt(2000 + year, month, day)
}

/// Parse RMC (Recommended Minimum Course) sentence
fn parse_rmc(fields: &Fields) -> Result<Rmc> {
    fields.require(10)?;

    let magnetic_variation = fields.f64(10)?.map(|v| match fields.get(11) {
        "W" => -v,
        _ => v,
    });

    Ok(Rmc {
        time: fields.time(1)?,
        active: fields.get(2) == "A",
        latitude: fields.coordinate(3)?,
        longitude: fields.coordinate(5)?,
        speed_knots: fields.f64(7)?,
        true_course: fields.f64(8)?,
        date: fields.date(9)?,
        magnetic_variation,
    })
}

/// Parse GGA (Global Positioning System Fix Data) sentence
fn parse_gga(fields: &Fields) -> Result<Gga> {
    fields.require(10)?;

    Ok(Gga {
        time: fields.time(1)?,
        latitude: fields.coordinate(2)?,
        longitude: fields.coordinate(4)?,
        fix_quality: fields.u8(6)?.unwrap_or(0),
        satellites: fields.u8(7)?,
        hdop: fields.f64(8)?,
        altitude: fields.f64(9)?,
        geoid_separation: fields.f64(11)?,
    })
}

fn parse_gll(fields: &Fields) -> Result<Gll> {
    fields.require(5)?;

    Ok(Gll {
        latitude: fields.coordinate(1)?,
        longitude: fields.coordinate(3)?,
        time: fields.time(5)?,
        active: fields.get(6) == "A",
    })
}

fn parse_vtg(fields: &Fields) -> Result<Vtg> {
    fields.require(9)?;

    Ok(Vtg {
        true_course: fields.f64(1)?,
        magnetic_course: fields.f64(3)?,
        speed_knots: fields.f64(5)?,
        speed_kmh: fields.f64(7)?,
    })
}

fn parse_gsa(fields: &Fields) -> Result<Gsa> {
    fields.require(18)?;

    let mut satellites_used = Vec::new();
    for index in 3..15 {
        if let Some(prn) = fields.u8(index)? {
            satellites_used.push(prn);
        }
    }

    Ok(Gsa {
        automatic: fields.get(1) == "A",
        fix_type: fields.u8(2)?.unwrap_or(1),
        satellites_used,
        pdop: fields.f64(15)?,
        hdop: fields.f64(16)?,
        vdop: fields.f64(17)?,
    })
}

/// Parse GSV (Satellites in View) sentence
fn parse_gsv(fields: &Fields, talker: &str) -> Result<Gsv> {
    fields.require(4)?;

    // Determine constellation from the talker
    let constellation = match talker {
        "GP" => "GPS",
        "GL" => "GLONASS",
        "GA" => "GALILEO",
        "GB" | "BD" => "BEIDOU",
        _ => "UNKNOWN",
    };

    // Up to 4 satellites per message, starting after the header fields
    let mut satellites = Vec::new();
    let mut index = 4;
    while index < fields.len() {
        if let Some(prn) = fields.u8(index)? {
            satellites.push(SatelliteInfo {
                prn,
                elevation: fields.f64(index + 1)?.map(|v| v as f32),
                azimuth: fields.f64(index + 2)?.map(|v| v as f32),
                snr: fields.f64(index + 3)?.map(|v| v as f32),
                constellation,
            });
        }
        index += 4;
    }

    Ok(Gsv {
        constellation,
        total_messages: fields.u8(1)?.unwrap_or(0),
        message_number: fields.u8(2)?.unwrap_or(0),
        satellites_in_view: fields.u8(3)?.unwrap_or(0),
        satellites,
    })
}
