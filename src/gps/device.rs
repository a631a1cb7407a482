// src/gps/device.rs
//! Startup configuration of the GPS module over its serial port

use super::mtk::{MtkCommand, MtkSentence};
use crate::error::{GpsError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio_serial::{SerialPort, SerialStream};
use tracing::{debug, info};

/// Baud rates the module can switch to; 0 resets to the default speed
pub const BAUD_RATES: [u32; 8] = [0, 4800, 9600, 14400, 19200, 38400, 57600, 115200];

/// Navigation speed thresholds in m/s, as the module expects them written
pub const SPEED_THRESHOLDS: [(f64, &str); 8] = [
    (0.0, "0"),
    (0.2, "0.2"),
    (0.4, "0.4"),
    (0.6, "0.6"),
    (0.8, "0.8"),
    (1.0, "1.0"),
    (1.5, "1.5"),
    (2.0, "2.0"),
];

/// Time the module needs to digest one command before the next arrives
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);

pub const DEFAULT_BAUD_RATE: u32 = 9600;
const MAX_OUTPUT_FREQUENCY: u8 = 5;

/// The module reports 0 as "default", which is 9600 baud
pub fn host_baud_rate(device_rate: u32) -> u32 {
    if device_rate == 0 {
        DEFAULT_BAUD_RATE
    } else {
        device_rate
    }
}

/// Host end of the link to the module
pub trait LineSpeed {
    /// Switch the host side to `baud_rate`
    fn set_line_speed(&mut self, baud_rate: u32) -> Result<()>;
}

impl LineSpeed for SerialStream {
    fn set_line_speed(&mut self, baud_rate: u32) -> Result<()> {
        self.set_baud_rate(baud_rate)?;
        Ok(())
    }
}

/// In-memory link, no line speed to follow
impl LineSpeed for DuplexStream {
    fn set_line_speed(&mut self, _baud_rate: u32) -> Result<()> {
        Ok(())
    }
}

/// Output frequency per NMEA sentence type.
///
/// 0 disables a sentence, 1 emits it on every fix, n on every nth fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NmeaOutput {
    pub gll: u8,
    pub rmc: u8,
    pub vtg: u8,
    pub gga: u8,
    pub gsa: u8,
    pub gsv: u8,
}

impl Default for NmeaOutput {
    fn default() -> Self {
        Self {
            gll: 0,
            rmc: 1,
            vtg: 0,
            gga: 1,
            gsa: 0,
            gsv: 0,
        }
    }
}

impl NmeaOutput {
    fn entries(&self) -> [(&'static str, u8); 6] {
        [
            ("gll", self.gll),
            ("rmc", self.rmc),
            ("vtg", self.vtg),
            ("gga", self.gga),
            ("gsa", self.gsa),
            ("gsv", self.gsv),
        ]
    }

    pub fn validate(&self) -> Result<()> {
        for (name, frequency) in self.entries() {
            if frequency > MAX_OUTPUT_FREQUENCY {
                return Err(GpsError::InvalidParameter(format!(
                    "{} output frequency {} is outside 0..={}",
                    name, frequency, MAX_OUTPUT_FREQUENCY
                )));
            }
        }
        Ok(())
    }

    fn params(&self) -> String {
        let mut params: String = self
            .entries()
            .iter()
            .map(|(_, frequency)| format!(",{}", frequency))
            .collect();
        // Remaining 13 slots are reserved or unsupported on the MT3339
        params.push_str(&",0".repeat(13));
        params
    }
}

pub fn validate_baud_rate(rate: u32) -> Result<()> {
    if !BAUD_RATES.contains(&rate) {
        return Err(GpsError::InvalidParameter(format!(
            "baud rate {} is not one of {:?}",
            rate, BAUD_RATES
        )));
    }
    Ok(())
}

pub fn validate_update_rate(ms: u32) -> Result<()> {
    if !(100..10_000).contains(&ms) {
        return Err(GpsError::InvalidParameter(format!(
            "update rate {} ms is outside 100..10000",
            ms
        )));
    }
    Ok(())
}

pub fn validate_fix_update_rate(ms: u32) -> Result<()> {
    if ms < 200 {
        return Err(GpsError::InvalidParameter(format!(
            "fix update rate {} ms is below 200",
            ms
        )));
    }
    Ok(())
}

/// Map a threshold to its wire form, rejecting values the module does not offer
pub fn speed_threshold_param(threshold: f64) -> Result<&'static str> {
    SPEED_THRESHOLDS
        .iter()
        .find(|(value, _)| (value - threshold).abs() < 1e-9)
        .map(|(_, param)| *param)
        .ok_or_else(|| {
            GpsError::InvalidParameter(format!(
                "speed threshold {} m/s is not one of 0, 0.2, 0.4, 0.6, 0.8, 1.0, 1.5, 2.0",
                threshold
            ))
        })
}

/// Everything the startup sequence sends to the module
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSettings {
    pub baud_rate: u32,
    pub update_rate: u32,
    pub fix_update_rate: Option<u32>,
    pub speed_threshold: Option<f64>,
    pub output: NmeaOutput,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            update_rate: 1000,
            fix_update_rate: None,
            speed_threshold: None,
            output: NmeaOutput::default(),
        }
    }
}

/// Sends PMTK commands to the module.
///
/// Stateless apart from the baud rate the module was last told to use.
/// A successful baud rate change retunes the host side of the port before
/// the next command goes out.
pub struct DeviceConfigurator<W> {
    port: W,
    baud_rate: u32,
    settle_delay: Duration,
}

impl<W: AsyncWrite + LineSpeed + Unpin> DeviceConfigurator<W> {
    pub fn new(port: W) -> Self {
        Self::with_baud_rate(port, DEFAULT_BAUD_RATE)
    }

    /// Start from a port already talking to the module at `baud_rate`
    pub fn with_baud_rate(port: W, baud_rate: u32) -> Self {
        Self {
            port,
            baud_rate,
            settle_delay: SETTLE_DELAY,
        }
    }

    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn current_baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn into_inner(self) -> W {
        self.port
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.port
    }

    /// Run the full startup sequence, stopping at the first failure
    pub async fn apply(&mut self, settings: &DeviceSettings) -> Result<()> {
        // Validate everything up front so a bad setting sends nothing
        validate_baud_rate(settings.baud_rate)?;
        validate_update_rate(settings.update_rate)?;
        if let Some(rate) = settings.fix_update_rate {
            validate_fix_update_rate(rate)?;
        }
        if let Some(threshold) = settings.speed_threshold {
            speed_threshold_param(threshold)?;
        }
        settings.output.validate()?;

        info!(
            baud_rate = settings.baud_rate,
            update_rate = settings.update_rate,
            "Configuring GPS module"
        );
        self.set_baud_rate(settings.baud_rate).await?;
        self.set_update_rate(settings.update_rate).await?;
        if let Some(rate) = settings.fix_update_rate {
            self.set_fix_update_rate(rate).await?;
        }
        if let Some(threshold) = settings.speed_threshold {
            self.set_speed_threshold(threshold).await?;
        }
        self.set_output_sentences(&settings.output).await
    }

    pub async fn set_baud_rate(&mut self, rate: u32) -> Result<()> {
        validate_baud_rate(rate)?;
        self.send(MtkSentence::new(MtkCommand::SetNmeaBaudRate, &format!(",{}", rate)))
            .await?;
        // The module has switched; later commands only reach it at the new speed
        self.baud_rate = rate;
        let line_rate = host_baud_rate(rate);
        self.port.set_line_speed(line_rate)?;
        debug!("Serial port retuned to {} baud", line_rate);
        Ok(())
    }

    pub async fn set_update_rate(&mut self, ms: u32) -> Result<()> {
        validate_update_rate(ms)?;
        self.send(MtkSentence::new(MtkCommand::SetNmeaUpdateRate, &format!(",{}", ms)))
            .await
    }

    pub async fn set_fix_update_rate(&mut self, ms: u32) -> Result<()> {
        validate_fix_update_rate(ms)?;
        self.send(MtkSentence::new(
            MtkCommand::SetFixControl,
            &format!(",{},0,0,0,0", ms),
        ))
        .await
    }

    /// Below the threshold the reported position stays frozen
    pub async fn set_speed_threshold(&mut self, threshold: f64) -> Result<()> {
        let param = speed_threshold_param(threshold)?;
        self.send(MtkSentence::new(
            MtkCommand::SetNavSpeedThreshold,
            &format!(",{}", param),
        ))
        .await
    }

    pub async fn set_output_sentences(&mut self, output: &NmeaOutput) -> Result<()> {
        output.validate()?;
        self.send(MtkSentence::new(MtkCommand::SetNmeaOutput, &output.params()))
            .await
    }

    pub async fn hot_start(&mut self) -> Result<()> {
        self.send(MtkSentence::new(MtkCommand::HotStart, "")).await
    }

    pub async fn warm_start(&mut self) -> Result<()> {
        self.send(MtkSentence::new(MtkCommand::WarmStart, "")).await
    }

    pub async fn cold_start(&mut self) -> Result<()> {
        self.send(MtkSentence::new(MtkCommand::ColdStart, "")).await
    }

    pub async fn factory_reset(&mut self) -> Result<()> {
        self.send(MtkSentence::new(MtkCommand::FullColdStart, "")).await
    }

    async fn send(&mut self, sentence: MtkSentence) -> Result<()> {
        debug!(command = %sentence.command(), sentence = %sentence, "Sending PMTK command");
        self.port
            .write_all(sentence.as_bytes())
            .await
            .map_err(GpsError::DeviceWrite)?;
        self.port.flush().await.map_err(GpsError::DeviceWrite)?;
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
        Ok(())
    }
}
