// src/gps/mtk.rs
//! PMTK command sentences for MediaTek MT3339 based receivers

use super::nmea::checksum;
use crate::error::{GpsError, Result};
use std::{fmt, str::FromStr};

/// Commands understood by the module, with their PMTK packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MtkCommand {
    /// Restart using all data in non-volatile storage
    HotStart,
    /// Restart without ephemeris
    WarmStart,
    /// Restart without time, position, almanac or ephemeris
    ColdStart,
    /// Cold start and reset every setting to factory defaults
    FullColdStart,
    SetNmeaUpdateRate,
    SetNmeaBaudRate,
    SetFixControl,
    SetNmeaOutput,
    SetNavSpeedThreshold,
}

impl MtkCommand {
    pub const ALL: [MtkCommand; 9] = [
        MtkCommand::HotStart,
        MtkCommand::WarmStart,
        MtkCommand::ColdStart,
        MtkCommand::FullColdStart,
        MtkCommand::SetNmeaUpdateRate,
        MtkCommand::SetNmeaBaudRate,
        MtkCommand::SetFixControl,
        MtkCommand::SetNmeaOutput,
        MtkCommand::SetNavSpeedThreshold,
    ];

    pub fn code(&self) -> u16 {
        match self {
            MtkCommand::HotStart => 101,
            MtkCommand::WarmStart => 102,
            MtkCommand::ColdStart => 103,
            MtkCommand::FullColdStart => 104,
            MtkCommand::SetNmeaUpdateRate => 220,
            MtkCommand::SetNmeaBaudRate => 251,
            MtkCommand::SetFixControl => 300,
            MtkCommand::SetNmeaOutput => 314,
            MtkCommand::SetNavSpeedThreshold => 386,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MtkCommand::HotStart => "CMD_HOT_START",
            MtkCommand::WarmStart => "CMD_WARM_START",
            MtkCommand::ColdStart => "CMD_COLD_START",
            MtkCommand::FullColdStart => "CMD_FULL_COLD_START",
            MtkCommand::SetNmeaUpdateRate => "SET_NMEA_UPDATERATE",
            MtkCommand::SetNmeaBaudRate => "SET_NMEA_BAUDRATE",
            MtkCommand::SetFixControl => "API_SET_FIX_CTL",
            MtkCommand::SetNmeaOutput => "API_SET_NMEA_OUTPUT",
            MtkCommand::SetNavSpeedThreshold => "SET_NAV_SPEED_TRESHOLD",
        }
    }
}

impl FromStr for MtkCommand {
    type Err = GpsError;

    fn from_str(s: &str) -> Result<Self> {
        MtkCommand::ALL
            .into_iter()
            .find(|command| command.name() == s)
            .ok_or_else(|| GpsError::UnknownCommand(s.to_string()))
    }
}

impl fmt::Display for MtkCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A complete command line, `$PMTK<code><params>*<CC>\r\n`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MtkSentence {
    command: MtkCommand,
    text: String,
}

impl MtkSentence {
    /// `params` is passed through untouched and must already carry its
    /// leading comma, e.g. `",9600"`.
    pub fn new(command: MtkCommand, params: &str) -> Self {
        let payload = format!("PMTK{}{}", command.code(), params);
        let text = format!("${}*{:02X}\r\n", payload, checksum(payload.as_bytes()));
        Self { command, text }
    }

    pub fn command(&self) -> MtkCommand {
        self.command
    }

    /// Everything between `$` and `*`
    pub fn payload(&self) -> &str {
        let end = self.text.len() - "*00\r\n".len();
        &self.text[1..end]
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }
}

impl fmt::Display for MtkSentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text.trim_end())
    }
}

/// Build a command sentence from its symbolic name
pub fn build(command_name: &str, params: &str) -> Result<MtkSentence> {
    let command = command_name.parse::<MtkCommand>()?;
    // The checksum is over single-byte characters and `*` ends the payload
    if !params.is_ascii() || params.contains(['$', '*', '\r', '\n']) {
        return Err(GpsError::InvalidParameter(format!(
            "{} parameters must be plain ASCII: {:?}",
            command.name(),
            params
        )));
    }
    Ok(MtkSentence::new(command, params))
}
