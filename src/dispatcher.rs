// src/dispatcher.rs
//! Fan a decoded fix out to every configured sink

use crate::{
    config::GpsConfig,
    error::Result,
    gps::data::Fix,
    sink::{FieldMapping, InfluxSink, MqttSink, Sink},
};
use futures::future::join_all;
use tracing::{debug, info, warn};

/// How a single sink fared with one fix
#[derive(Debug)]
pub struct SinkOutcome {
    pub sink: String,
    pub result: Result<()>,
}

impl SinkOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug)]
pub enum Dispatch {
    /// Receiver has no position yet (0,0); nothing was published
    Skipped,
    /// One outcome per sink, in the order the sinks were added
    Published(Vec<SinkOutcome>),
}

impl Dispatch {
    pub fn failures(&self) -> usize {
        match self {
            Dispatch::Skipped => 0,
            Dispatch::Published(outcomes) => outcomes.iter().filter(|o| !o.is_ok()).count(),
        }
    }
}

/// Publishes fixes to a fixed set of sinks.
///
/// Each sink is tried once per fix, concurrently with the others, and a
/// failure is only reported; it never stops the other sinks or later fixes.
pub struct FixDispatcher {
    mapping: FieldMapping,
    sinks: Vec<Box<dyn Sink>>,
}

impl FixDispatcher {
    pub fn new(mapping: FieldMapping) -> Self {
        Self {
            mapping,
            sinks: Vec::new(),
        }
    }

    /// Connect every sink the config enables, in the order influx, mqtt
    pub async fn from_config(config: &GpsConfig) -> Result<Self> {
        let mut dispatcher = Self::new(config.mapping()?);
        if let Some(influx) = &config.influx {
            dispatcher.add_sink(Box::new(InfluxSink::connect(influx).await?));
        }
        if let Some(mqtt) = &config.mqtt {
            let sink = MqttSink::connect(mqtt, &dispatcher.mapping)?;
            dispatcher.add_sink(Box::new(sink));
        }
        Ok(dispatcher)
    }

    pub fn with_sink(mut self, sink: Box<dyn Sink>) -> Self {
        self.add_sink(sink);
        self
    }

    pub fn add_sink(&mut self, sink: Box<dyn Sink>) {
        info!("Publishing to {}", sink.name());
        self.sinks.push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    pub async fn dispatch(&self, fix: &Fix) -> Dispatch {
        if fix.is_placeholder() {
            info!("GPS location not yet available");
            return Dispatch::Skipped;
        }

        let reading = self.mapping.reading(fix);
        debug!(kind = %reading.kind, lat = fix.latitude, lon = fix.longitude, "Dispatching fix");

        let results = join_all(self.sinks.iter().map(|sink| sink.publish(&reading))).await;

        let outcomes = self
            .sinks
            .iter()
            .zip(results)
            .map(|(sink, result)| {
                if let Err(e) = &result {
                    warn!("{}", e);
                }
                SinkOutcome {
                    sink: sink.name().to_string(),
                    result,
                }
            })
            .collect();

        Dispatch::Published(outcomes)
    }

    /// Close every sink, even if some fail to close
    pub async fn close(&self) {
        let results = join_all(self.sinks.iter().map(|sink| sink.close())).await;
        for (sink, result) in self.sinks.iter().zip(results) {
            if let Err(e) = result {
                warn!("Failed to close {}: {}", sink.name(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::GpsError,
        gps::{nmea::parse_sentence, Fix},
        sink::Reading,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    #[derive(Clone, Default)]
    struct RecordingSink {
        name: &'static str,
        fail: bool,
        delay: Option<Duration>,
        readings: Arc<Mutex<Vec<Reading>>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Sink for RecordingSink {
        fn name(&self) -> &str {
            self.name
        }

        async fn publish(&self, reading: &Reading) -> Result<()> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(GpsError::sink_publish(self.name, "unreachable"));
            }
            self.readings.lock().unwrap().push(reading.clone());
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    fn fix(line: &str) -> Fix {
        Fix::from_sentence(&parse_sentence(line).unwrap(), Utc::now()).unwrap()
    }

    fn rmc() -> Fix {
        fix("$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A")
    }

    #[tokio::test]
    async fn test_placeholder_fix_is_not_dispatched() {
        let sink = RecordingSink {
            name: "memory",
            ..Default::default()
        };
        let dispatcher = FixDispatcher::new(FieldMapping::default()).with_sink(Box::new(sink.clone()));

        let dispatch = dispatcher
            .dispatch(&fix("$GPRMC,235316.000,V,0000.0000,N,00000.0000,E,0.00,0.00,030118,,,N*7D"))
            .await;

        assert!(matches!(dispatch, Dispatch::Skipped));
        assert!(sink.readings.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_every_sink_gets_the_same_reading() {
        let a = RecordingSink {
            name: "a",
            ..Default::default()
        };
        let b = RecordingSink {
            name: "b",
            ..Default::default()
        };
        let dispatcher = FixDispatcher::new(FieldMapping::default())
            .with_sink(Box::new(a.clone()))
            .with_sink(Box::new(b.clone()));
        let fix = rmc();

        let dispatch = dispatcher.dispatch(&fix).await;

        assert_eq!(dispatch.failures(), 0);
        let a = a.readings.lock().unwrap();
        let b = b.readings.lock().unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(*a, *b);
        assert_eq!(a[0].timestamp, fix.timestamp);
    }

    #[tokio::test]
    async fn test_failing_sink_is_isolated() {
        let bus = RecordingSink {
            name: "bus",
            fail: true,
            ..Default::default()
        };
        let store = RecordingSink {
            name: "store",
            ..Default::default()
        };
        let dispatcher = FixDispatcher::new(FieldMapping::default())
            .with_sink(Box::new(bus))
            .with_sink(Box::new(store.clone()));

        let Dispatch::Published(outcomes) = dispatcher.dispatch(&rmc()).await else {
            panic!("fix should have been published");
        };

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].sink, "bus");
        assert!(matches!(outcomes[0].result, Err(GpsError::SinkPublish { .. })));
        assert_eq!(outcomes[1].sink, "store");
        assert!(outcomes[1].is_ok());
        assert_eq!(store.readings.lock().unwrap().len(), 1);

        // The next fix goes through the same way
        assert_eq!(dispatcher.dispatch(&rmc()).await.failures(), 1);
        assert_eq!(store.readings.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sinks_run_concurrently() {
        let slow = |name| RecordingSink {
            name,
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        };
        let dispatcher = FixDispatcher::new(FieldMapping::default())
            .with_sink(Box::new(slow("one")))
            .with_sink(Box::new(slow("two")))
            .with_sink(Box::new(slow("three")));

        let started = std::time::Instant::now();
        dispatcher.dispatch(&rmc()).await;

        assert!(started.elapsed() < Duration::from_millis(550));
    }

    #[tokio::test]
    async fn test_from_config_builds_enabled_sinks() {
        let mut config = GpsConfig::default();
        config.update_influx(Some("127.0.0.1".to_string()), None, Some(8089));

        let dispatcher = FixDispatcher::from_config(&config).await.unwrap();

        assert_eq!(dispatcher.sink_count(), 1);
        assert_eq!(dispatcher.mapping().len(), 4);
        dispatcher.close().await;
    }

    #[tokio::test]
    async fn test_close_reaches_every_sink() {
        let a = RecordingSink {
            name: "a",
            ..Default::default()
        };
        let b = RecordingSink {
            name: "b",
            ..Default::default()
        };
        let dispatcher = FixDispatcher::new(FieldMapping::default())
            .with_sink(Box::new(a.clone()))
            .with_sink(Box::new(b.clone()));

        dispatcher.close().await;

        assert!(a.closed.load(Ordering::Relaxed));
        assert!(b.closed.load(Ordering::Relaxed));
    }
}
