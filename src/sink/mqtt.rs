// src/sink/mqtt.rs
//! MQTT sink, one topic per mapped fix field

use super::{FieldMapping, Reading, Sink};
use crate::{
    config::MqttConfig,
    error::{GpsError, Result},
    gps::data::FieldValue,
};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use serde_json::json;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const REQUEST_CAPACITY: usize = 64;
const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// One message of a publish call
#[derive(Debug, Clone, PartialEq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

pub fn qos_from_level(level: u8) -> Result<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(GpsError::Config(format!("MQTT QoS {} is not 0, 1 or 2", other))),
    }
}

/// Pair each mapped value with its topic. Fields without a value are left out.
pub fn messages(topics: &[String], qos: QoS, retain: bool, reading: &Reading) -> Vec<MqttMessage> {
    let ts = reading.timestamp.timestamp_millis();
    reading
        .values
        .iter()
        .zip(topics)
        .filter_map(|((_, value), topic)| {
            let value = (*value)?;
            let value = match value {
                FieldValue::Float(v) => json!(v),
                FieldValue::Integer(v) => json!(v),
            };
            Some(MqttMessage {
                topic: topic.clone(),
                payload: json!({ "ts": ts, "type": reading.kind.tag(), "value": value }).to_string(),
                qos,
                retain,
            })
        })
        .collect()
}

pub struct MqttSink {
    name: String,
    client: AsyncClient,
    topics: Vec<String>,
    qos: QoS,
    retain: bool,
    connected: Arc<AtomicBool>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl MqttSink {
    /// Create the client and start its network task. The broker connection
    /// is established in the background; publishing fails until it is up.
    pub fn connect(config: &MqttConfig, mapping: &FieldMapping) -> Result<Self> {
        let topics = config.topics(mapping)?;
        let qos = qos_from_level(config.qos)?;

        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let name = format!("mqtt-{}:{}", config.host, config.port);
        let sink = Self::with_client(name, client, topics, qos, config.retain);
        let handle = tokio::spawn(drive(
            event_loop,
            Arc::clone(&sink.connected),
            sink.shutdown.clone(),
        ));
        if let Ok(mut guard) = sink.event_loop.lock() {
            *guard = Some(handle);
        }

        info!(host = %config.host, port = config.port, topics = ?sink.topics, "MQTT sink started");
        Ok(sink)
    }

    fn with_client(name: String, client: AsyncClient, topics: Vec<String>, qos: QoS, retain: bool) -> Self {
        Self {
            name,
            client,
            topics,
            qos,
            retain,
            connected: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            event_loop: Mutex::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }
}

/// Poll the rumqttc event loop until shutdown; it reconnects on the next poll
/// after an error.
async fn drive(mut event_loop: EventLoop, connected: Arc<AtomicBool>, shutdown: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = event_loop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected.store(true, Ordering::Relaxed);
                info!("Connected to MQTT broker");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                connected.store(false, Ordering::Relaxed);
                debug!("MQTT disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if connected.swap(false, Ordering::Relaxed) {
                    warn!("MQTT connection lost: {}", e);
                } else {
                    debug!("MQTT broker unreachable: {}", e);
                }
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }
}

#[async_trait]
impl Sink for MqttSink {
    fn name(&self) -> &str {
        &self.name
    }

    /// Queue one message per mapped value on the client.
    ///
    /// Messages are queued in topic order and a full request queue stops
    /// the call. Topics queued before that point are still delivered; the
    /// error says how many made it.
    async fn publish(&self, reading: &Reading) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(GpsError::sink_publish(&self.name, "sink is closed"));
        }
        if !self.is_connected() {
            return Err(GpsError::sink_publish(&self.name, "not connected to broker"));
        }

        let messages = messages(&self.topics, self.qos, self.retain, reading);
        let total = messages.len();
        for (queued, message) in messages.into_iter().enumerate() {
            self.client
                .try_publish(message.topic, message.qos, message.retain, message.payload)
                .map_err(|e| {
                    GpsError::sink_publish(&self.name, format!("queued {} of {} topics: {}", queued, total, e))
                })?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        let handle = self.event_loop.lock().ok().and_then(|mut guard| guard.take());
        let Some(mut handle) = handle else {
            return Ok(());
        };

        if self.is_connected() && self.client.try_disconnect().is_ok() {
            if tokio::time::timeout(DISCONNECT_GRACE, &mut handle).await.is_ok() {
                info!("MQTT sink closed");
                return Ok(());
            }
        }
        self.shutdown.cancel();
        let _ = handle.await;
        info!("MQTT sink closed");
        Ok(())
    }
}
