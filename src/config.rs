// src/config.rs
//! Configuration file loading and validation

use crate::{
    error::{GpsError, Result},
    gps::{
        data::FixField,
        device::{self, DeviceSettings, NmeaOutput},
    },
    sink::FieldMapping,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::info;

/// Where the config file lives unless `--config` says otherwise
pub const DEFAULT_CONFIG_PATH: &str = "/etc/umg/conf.json";

/// The file holds other services' settings too; ours are under `gps`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    gps: GpsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GpsConfig {
    pub serial_port: String,
    /// Speed the module is talking at before it is configured
    pub device_baud_rate: u32,
    /// Speed the module is switched to; the host port follows it
    pub baud_rate: u32,
    /// NMEA update rate in ms
    pub update_rate: u32,
    /// Skip when the module ships pre-configured
    pub configure_device: bool,
    pub fix_update_rate: Option<u32>,
    pub speed_threshold: Option<f64>,
    pub output_sentences: NmeaOutput,
    pub read_timeout_ms: u64,
    pub chunk_size: usize,
    pub fields: Vec<FixField>,
    pub influx: Option<InfluxConfig>,
    pub mqtt: Option<MqttConfig>,
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            serial_port: "/dev/ttyAMA0".to_string(),
            device_baud_rate: 9600,
            baud_rate: 9600,
            update_rate: 1000,
            configure_device: true,
            fix_update_rate: None,
            speed_threshold: None,
            output_sentences: NmeaOutput::default(),
            read_timeout_ms: 5000,
            chunk_size: 16,
            fields: FieldMapping::default().fields().to_vec(),
            influx: None,
            mqtt: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InfluxTransport {
    Udp,
    Http,
}

impl fmt::Display for InfluxTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InfluxTransport::Udp => f.write_str("udp"),
            InfluxTransport::Http => f.write_str("http"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InfluxConfig {
    pub host: String,
    /// HTTP API port
    pub port: u16,
    pub transport: InfluxTransport,
    /// Must match a `[[udp]]` listener in influxdb.conf
    pub udp_port: u16,
    pub database: String,
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8086,
            transport: InfluxTransport::Udp,
            udp_port: 8089,
            database: "gps".to_string(),
            measurement: "gps".to_string(),
            tags: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// `{field}` is replaced by each mapped field name
    pub topic_template: String,
    /// Explicit topics, one per mapped field in the same order
    pub topics: Option<Vec<String>>,
    pub qos: u8,
    pub retain: bool,
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "gps-relay".to_string(),
            username: None,
            password: None,
            topic_template: "gps/{field}".to_string(),
            topics: None,
            qos: 1,
            retain: false,
            keep_alive_secs: 30,
        }
    }
}

impl MqttConfig {
    /// Resolve one topic per mapped field, in mapping order
    pub fn topics(&self, mapping: &FieldMapping) -> Result<Vec<String>> {
        if let Some(topics) = &self.topics {
            if topics.len() != mapping.len() {
                return Err(GpsError::Config(format!(
                    "{} MQTT topics configured for {} mapped fields",
                    topics.len(),
                    mapping.len()
                )));
            }
            return Ok(topics.clone());
        }

        if mapping.len() > 1 && !self.topic_template.contains("{field}") {
            return Err(GpsError::Config(format!(
                "MQTT topic template {:?} has no {{field}} placeholder",
                self.topic_template
            )));
        }
        Ok(mapping
            .fields()
            .iter()
            .map(|field| self.topic_template.replace("{field}", field.name()))
            .collect())
    }
}

impl GpsConfig {
    pub fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a config file, falling back to defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            GpsError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        Self::from_json(&contents).map_err(|e| {
            GpsError::Config(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let file: ConfigFile = serde_json::from_str(contents)?;
        Ok(file.gps)
    }

    /// Effective configuration in config file form
    pub fn to_json(&self) -> Result<String> {
        let file = ConfigFile { gps: self.clone() };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    /// Check every setting before anything touches the device or network
    pub fn validate(&self) -> Result<()> {
        if self.serial_port.is_empty() {
            return Err(GpsError::Config("serial port is not set".to_string()));
        }
        if self.device_baud_rate == 0 {
            return Err(GpsError::InvalidParameter(
                "device baud rate must be an actual speed".to_string(),
            ));
        }
        device::validate_baud_rate(self.device_baud_rate)?;
        device::validate_baud_rate(self.baud_rate)?;
        device::validate_update_rate(self.update_rate)?;
        if let Some(rate) = self.fix_update_rate {
            device::validate_fix_update_rate(rate)?;
        }
        if let Some(threshold) = self.speed_threshold {
            device::speed_threshold_param(threshold)?;
        }
        self.output_sentences.validate()?;

        if self.chunk_size == 0 {
            return Err(GpsError::Config("chunk size must be at least 1".to_string()));
        }
        if self.read_timeout_ms == 0 {
            return Err(GpsError::Config("read timeout must be at least 1 ms".to_string()));
        }

        let mapping = self.mapping()?;
        if self.influx.is_none() && self.mqtt.is_none() {
            return Err(GpsError::Config(
                "no sink configured, set influx and/or mqtt".to_string(),
            ));
        }
        if let Some(mqtt) = &self.mqtt {
            mqtt.topics(&mapping)?;
            if mqtt.qos > 2 {
                return Err(GpsError::Config(format!("MQTT QoS {} is not 0, 1 or 2", mqtt.qos)));
            }
            if mqtt.keep_alive_secs < 5 {
                return Err(GpsError::Config(
                    "MQTT keep alive must be at least 5 seconds".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn mapping(&self) -> Result<FieldMapping> {
        FieldMapping::new(self.fields.clone())
    }

    pub fn device_settings(&self) -> DeviceSettings {
        DeviceSettings {
            baud_rate: self.baud_rate,
            update_rate: self.update_rate,
            fix_update_rate: self.fix_update_rate,
            speed_threshold: self.speed_threshold,
            output: self.output_sentences,
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Speed to open the port at. Without configuration nothing switches
    /// the module, so it is expected to talk at `baudRate` already.
    pub fn open_baud_rate(&self) -> u32 {
        if self.configure_device {
            self.device_baud_rate
        } else {
            device::host_baud_rate(self.baud_rate)
        }
    }

    /// Update serial port settings
    pub fn update_serial(&mut self, port: Option<String>, baud_rate: Option<u32>, update_rate: Option<u32>) {
        if let Some(port) = port {
            self.serial_port = port;
        }
        if let Some(baud_rate) = baud_rate {
            self.baud_rate = baud_rate;
        }
        if let Some(update_rate) = update_rate {
            self.update_rate = update_rate;
        }
    }

    /// Update InfluxDB settings, enabling the sink if any value is given
    pub fn update_influx(&mut self, host: Option<String>, port: Option<u16>, udp_port: Option<u16>) {
        if host.is_none() && port.is_none() && udp_port.is_none() {
            return;
        }
        let influx = self.influx.get_or_insert_with(InfluxConfig::default);
        if let Some(host) = host {
            influx.host = host;
        }
        if let Some(port) = port {
            influx.port = port;
        }
        if let Some(udp_port) = udp_port {
            influx.udp_port = udp_port;
            influx.transport = InfluxTransport::Udp;
        }
    }

    /// Update MQTT settings, enabling the sink if any value is given
    pub fn update_mqtt(&mut self, host: Option<String>, port: Option<u16>) {
        if host.is_none() && port.is_none() {
            return;
        }
        let mqtt = self.mqtt.get_or_insert_with(MqttConfig::default);
        if let Some(host) = host {
            mqtt.host = host;
        }
        if let Some(port) = port {
            mqtt.port = port;
        }
    }
}
