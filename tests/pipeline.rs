// tests/pipeline.rs
//! Serial bytes in, sink publishes out, with an in-memory serial link

use async_trait::async_trait;
use gps_relay::{
    config::{InfluxConfig, InfluxTransport},
    gps::{DeviceConfigurator, DeviceSettings},
    sink::InfluxSink,
    FieldMapping, FixDispatcher, GpsError, GpsMonitor, Reading, Result, RunSummary, Sink,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{
    io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream},
    net::UdpSocket,
};
use tokio_util::sync::CancellationToken;

const RMC: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r\n";
const RMC_NEXT: &str = "$GPRMC,123520,A,4807.040,N,01131.010,E,022.5,084.5,230394,003.1,W*6E\r\n";
const GGA: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n";
const GSA: &str = "$GPGSA,A,3,04,05,,09,12,,,24,,,,,2.5,1.3,2.1*39\r\n";
const NO_FIX: &str = "$GPRMC,235316.000,V,0000.0000,N,00000.0000,E,0.00,0.00,030118,,,N*7D\r\n";
const CORRUPTED: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6B\r\n";

#[derive(Clone, Default)]
struct MemorySink {
    name: &'static str,
    fail: bool,
    readings: Arc<Mutex<Vec<Reading>>>,
    closed: Arc<AtomicBool>,
}

impl MemorySink {
    fn named(name: &'static str) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    fn failing(name: &'static str) -> Self {
        Self {
            name,
            fail: true,
            ..Default::default()
        }
    }

    fn count(&self) -> usize {
        self.readings.lock().unwrap().len()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &str {
        self.name
    }

    async fn publish(&self, reading: &Reading) -> Result<()> {
        if self.fail {
            return Err(GpsError::sink_publish(self.name, "connection refused"));
        }
        self.readings.lock().unwrap().push(reading.clone());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Write `data` to the device end a few bytes at a time
async fn trickle(device: &mut DuplexStream, data: &str, chunk: usize) {
    for piece in data.as_bytes().chunks(chunk) {
        device.write_all(piece).await.unwrap();
        tokio::task::yield_now().await;
    }
}

async fn read_lines(device: &mut DuplexStream, count: usize) -> Vec<String> {
    let mut received = Vec::new();
    let mut buf = [0u8; 256];
    while received.iter().filter(|&&b| b == b'\n').count() < count {
        let n = device.read(&mut buf).await.unwrap();
        assert!(n > 0, "configurator closed the link early");
        received.extend_from_slice(&buf[..n]);
    }
    String::from_utf8(received)
        .unwrap()
        .split_terminator("\r\n")
        .map(str::to_string)
        .collect()
}

#[test_log::test(tokio::test)]
async fn test_configure_then_relay() {
    let (host, mut device) = duplex(4096);

    let settings = DeviceSettings {
        baud_rate: 38400,
        update_rate: 200,
        ..DeviceSettings::default()
    };
    let mut configurator = DeviceConfigurator::new(host).settle_delay(Duration::ZERO);
    configurator.apply(&settings).await.unwrap();
    assert_eq!(configurator.current_baud_rate(), 38400);

    assert_eq!(
        read_lines(&mut device, 3).await,
        vec![
            "$PMTK251,38400*27".to_string(),
            "$PMTK220,200*2C".to_string(),
            "$PMTK314,0,1,0,1,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0*28".to_string(),
        ]
    );

    let bus = MemorySink::failing("bus");
    let store = MemorySink::named("store");
    let dispatcher = FixDispatcher::new(FieldMapping::default())
        .with_sink(Box::new(bus.clone()))
        .with_sink(Box::new(store.clone()));
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(
        GpsMonitor::new(configurator.into_inner(), dispatcher)
            .chunk_size(16)
            .run(shutdown.clone()),
    );

    let stream = [NO_FIX, RMC, GSA, CORRUPTED, GGA].concat();
    trickle(&mut device, &stream, 7).await;
    wait_until(|| store.count() == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.cancel();

    let summary = handle.await.unwrap().unwrap();
    assert_eq!(
        summary,
        RunSummary {
            lines: 4,
            dispatched: 2,
            skipped: 1,
            decode_errors: 1,
            publish_failures: 2,
        }
    );
    assert!(bus.is_closed());
    assert!(store.is_closed());

    let readings = store.readings.lock().unwrap();
    assert_eq!(readings[0].kind.tag(), "RMC");
    assert_eq!(readings[1].kind.tag(), "GGA");
    assert!(readings.iter().all(|r| r.values.len() == 4));
}

#[test_log::test(tokio::test)]
async fn test_chunking_does_not_change_the_result() {
    let stream = ["\0\0noise", RMC, GSA, RMC_NEXT, NO_FIX, GGA].concat();
    let mut results = Vec::new();

    for chunk in [1, 3, 16, 64, stream.len()] {
        let (host, mut device) = duplex(4096);
        let sink = MemorySink::named("memory");
        let dispatcher =
            FixDispatcher::new(FieldMapping::default()).with_sink(Box::new(sink.clone()));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(GpsMonitor::new(host, dispatcher).run(shutdown.clone()));

        trickle(&mut device, &stream, chunk).await;
        wait_until(|| sink.count() == 3).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();

        let summary = handle.await.unwrap().unwrap();
        let readings = sink.readings.lock().unwrap();
        let positions: Vec<_> = readings
            .iter()
            .map(|r| (r.kind, r.values[0].1, r.values[1].1))
            .collect();
        results.push((summary, positions));
    }

    assert_eq!(results[0].0.dispatched, 3);
    assert_eq!(results[0].0.skipped, 1);
    assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
}

#[test_log::test(tokio::test)]
async fn test_link_loss_stops_the_loop() {
    let (host, mut device) = duplex(1024);
    let sink = MemorySink::named("memory");
    let dispatcher = FixDispatcher::new(FieldMapping::default()).with_sink(Box::new(sink.clone()));

    device.write_all(RMC.as_bytes()).await.unwrap();
    drop(device);

    let result = GpsMonitor::new(host, dispatcher)
        .run(CancellationToken::new())
        .await;

    assert!(matches!(result, Err(GpsError::Channel(_))));
    assert_eq!(sink.count(), 1);
    assert!(sink.is_closed());
}

#[test_log::test(tokio::test)]
async fn test_influx_udp_receives_line_protocol() {
    let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let config = InfluxConfig {
        host: "127.0.0.1".to_string(),
        transport: InfluxTransport::Udp,
        udp_port: receiver.local_addr().unwrap().port(),
        ..InfluxConfig::default()
    };
    let influx = InfluxSink::connect(&config).await.unwrap();
    let dispatcher = FixDispatcher::new(FieldMapping::default()).with_sink(Box::new(influx));

    let (host, mut device) = duplex(1024);
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(GpsMonitor::new(host, dispatcher).run(shutdown.clone()));
    device
        .write_all([NO_FIX, RMC].concat().as_bytes())
        .await
        .unwrap();

    let mut buf = [0u8; 512];
    let n = tokio::time::timeout(Duration::from_secs(3), receiver.recv(&mut buf))
        .await
        .expect("no datagram received")
        .unwrap();
    shutdown.cancel();
    handle.await.unwrap().unwrap();

    let line = std::str::from_utf8(&buf[..n]).unwrap();
    assert!(line.starts_with("gps,type=RMC lat=48.117"), "{}", line);
    assert!(line.contains(",lon=11.516"), "{}", line);
    assert!(line.contains(",sog=22.4,cog=84.4 "), "{}", line);
}
