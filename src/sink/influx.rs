// src/sink/influx.rs
//! InfluxDB sink speaking line protocol over UDP or HTTP

use super::{Reading, Sink};
use crate::{
    config::{InfluxConfig, InfluxTransport},
    error::{GpsError, Result},
    gps::data::FieldValue,
};
use async_trait::async_trait;
use std::{
    collections::BTreeMap,
    fmt::Write,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use tokio::net::UdpSocket;
use tracing::{debug, info};

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

enum Transport {
    Udp(UdpSocket),
    Http { client: reqwest::Client, url: String },
}

pub struct InfluxSink {
    name: String,
    measurement: String,
    tags: BTreeMap<String, String>,
    transport: Transport,
    closed: AtomicBool,
}

impl InfluxSink {
    pub async fn connect(config: &InfluxConfig) -> Result<Self> {
        let transport = match config.transport {
            InfluxTransport::Udp => {
                let socket = UdpSocket::bind("0.0.0.0:0").await?;
                socket
                    .connect((config.host.as_str(), config.udp_port))
                    .await
                    .map_err(|e| {
                        GpsError::Config(format!(
                            "Failed to resolve InfluxDB UDP endpoint {}:{}: {}",
                            config.host, config.udp_port, e
                        ))
                    })?;
                info!(host = %config.host, port = config.udp_port, "InfluxDB UDP sink ready");
                Transport::Udp(socket)
            }
            InfluxTransport::Http => {
                let client = reqwest::Client::builder()
                    .timeout(HTTP_TIMEOUT)
                    .build()
                    .map_err(|e| GpsError::Other(format!("Failed to build HTTP client: {}", e)))?;
                let url = format!(
                    "http://{}:{}/write?db={}&precision=ns",
                    config.host, config.port, config.database
                );
                info!(%url, "InfluxDB HTTP sink ready");
                Transport::Http { client, url }
            }
        };

        Ok(Self {
            name: format!("influxdb-{}", config.transport),
            measurement: config.measurement.clone(),
            tags: config.tags.clone(),
            transport,
            closed: AtomicBool::new(false),
        })
    }

    /// Render a reading as one line protocol point
    pub fn line(&self, reading: &Reading) -> Option<String> {
        line_protocol(&self.measurement, &self.tags, reading)
    }
}

/// `gps,type=RMC lat=48.1,lon=11.5,status=1i 1700000000000000000`
///
/// Returns `None` when no mapped field has a value, since a point needs at
/// least one field.
pub fn line_protocol(
    measurement: &str,
    tags: &BTreeMap<String, String>,
    reading: &Reading,
) -> Option<String> {
    let mut fields = String::new();
    for (field, value) in reading.present() {
        if !fields.is_empty() {
            fields.push(',');
        }
        let written = match value {
            FieldValue::Float(v) => write!(fields, "{}={}", field.name(), v),
            FieldValue::Integer(v) => write!(fields, "{}={}i", field.name(), v),
        };
        written.ok()?;
    }
    if fields.is_empty() {
        return None;
    }

    let mut line = escape(measurement, &[',', ' ']);
    write!(line, ",type={}", reading.kind).ok()?;
    for (key, value) in tags {
        write!(
            line,
            ",{}={}",
            escape(key, &[',', '=', ' ']),
            escape(value, &[',', '=', ' '])
        )
        .ok()?;
    }
    write!(line, " {}", fields).ok()?;
    if let Some(nanos) = reading.timestamp.timestamp_nanos_opt() {
        write!(line, " {}", nanos).ok()?;
    }
    Some(line)
}

fn escape(text: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl Sink for InfluxSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, reading: &Reading) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(GpsError::sink_publish(&self.name, "sink is closed"));
        }
        let Some(line) = self.line(reading) else {
            debug!("Reading has no field values, nothing to write");
            return Ok(());
        };

        match &self.transport {
            Transport::Udp(socket) => {
                socket
                    .send(line.as_bytes())
                    .await
                    .map_err(|e| GpsError::sink_publish(&self.name, e))?;
            }
            Transport::Http { client, url } => {
                let response = client
                    .post(url.as_str())
                    .body(line)
                    .send()
                    .await
                    .map_err(|e| GpsError::sink_publish(&self.name, e))?;
                let status = response.status();
                if !status.is_success() {
                    return Err(GpsError::sink_publish(
                        &self.name,
                        format!("InfluxDB answered {}", status),
                    ));
                }
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}
