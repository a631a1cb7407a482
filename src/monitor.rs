// src/monitor.rs
//! Serial read loop: bytes in, fixes out to the sinks

use crate::{
    config::GpsConfig,
    dispatcher::{Dispatch, FixDispatcher},
    error::{GpsError, Result},
    gps::{
        data::Fix,
        decoder::StreamDecoder,
        device::DeviceConfigurator,
        nmea::NmeaSentence,
    },
};
use chrono::Utc;
use std::{fmt, future::Future, time::Duration};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_CHUNK_SIZE: usize = 16;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Counters reported when the loop ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub lines: u64,
    pub dispatched: u64,
    pub skipped: u64,
    pub decode_errors: u64,
    pub publish_failures: u64,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} sentences, {} fixes published, {} skipped, {} bad lines, {} failed publishes",
            self.lines, self.dispatched, self.skipped, self.decode_errors, self.publish_failures
        )
    }
}

/// Owns the serial channel, the decoder and the dispatcher for one run
pub struct GpsMonitor<S> {
    channel: S,
    decoder: StreamDecoder,
    dispatcher: FixDispatcher,
    read_timeout: Duration,
    chunk_size: usize,
    state: MonitorState,
}

impl<S: AsyncRead + AsyncWrite + Unpin> GpsMonitor<S> {
    pub fn new(channel: S, dispatcher: FixDispatcher) -> Self {
        Self {
            channel,
            decoder: StreamDecoder::new(),
            dispatcher,
            read_timeout: DEFAULT_READ_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            state: MonitorState::Starting,
        }
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    fn transition(&mut self, state: MonitorState) {
        debug!("Monitor {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Read until cancelled or the channel fails.
    ///
    /// The channel is shut down and every sink closed before this returns,
    /// whichever way the loop ended.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut buf = vec![0u8; self.chunk_size];

        self.transition(MonitorState::Running);
        info!("Reading GPS data");

        let outcome = loop {
            let read = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break Ok(()),
                read = tokio::time::timeout(self.read_timeout, self.channel.read(&mut buf)) => read,
            };

            let n = match read {
                Err(_) => {
                    debug!("No data within {:?}", self.read_timeout);
                    continue;
                }
                Ok(Ok(0)) => break Err(GpsError::Channel("serial channel closed".to_string())),
                Ok(Ok(n)) => n,
                Ok(Err(e)) => break Err(GpsError::Channel(format!("read failed: {}", e))),
            };

            for result in self.decoder.feed(&buf[..n]) {
                self.process(result, &mut summary).await;
            }
        };

        self.transition(MonitorState::Stopping);
        if let Err(e) = &outcome {
            error!("{}", e);
        }
        if let Err(e) = self.channel.shutdown().await {
            debug!("Channel shutdown: {}", e);
        }
        self.dispatcher.close().await;
        self.transition(MonitorState::Stopped);
        info!("Stopped: {}", summary);

        outcome.map(|()| summary)
    }

    async fn process(&self, result: Result<NmeaSentence>, summary: &mut RunSummary) {
        let sentence = match result {
            Ok(sentence) => sentence,
            Err(e) => {
                summary.decode_errors += 1;
                warn!("Dropped line: {}", e);
                return;
            }
        };
        summary.lines += 1;
        debug!(kind = sentence.kind(), "Sentence");

        let Some(fix) = Fix::from_sentence(&sentence, Utc::now()) else {
            return;
        };
        match self.dispatcher.dispatch(&fix).await {
            Dispatch::Skipped => summary.skipped += 1,
            dispatch => {
                summary.dispatched += 1;
                summary.publish_failures += dispatch.failures() as u64;
            }
        }
    }
}

/// Run a startup step unless shutdown is requested first
pub async fn unless_cancelled<F: Future>(shutdown: &CancellationToken, step: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => None,
        output = step => Some(output),
    }
}

/// Open the configured serial port and, if enabled, configure the module.
///
/// The port is opened at the rate the module currently talks at and is
/// left at the rate the module was switched to.
pub async fn open_serial(config: &GpsConfig) -> Result<SerialStream> {
    let open_rate = config.open_baud_rate();
    info!(
        "Connecting to GPS on {} at {} baud",
        config.serial_port, open_rate
    );

    let port = tokio_serial::new(&config.serial_port, open_rate)
        .timeout(config.read_timeout())
        .open_native_async()
        .map_err(|e| {
            GpsError::Channel(format!(
                "failed to open serial port {}: {}",
                config.serial_port, e
            ))
        })?;

    if !config.configure_device {
        return Ok(port);
    }

    let mut configurator = DeviceConfigurator::with_baud_rate(port, open_rate);
    configurator.apply(&config.device_settings()).await?;
    Ok(configurator.into_inner())
}

/// Names of the serial ports found on this machine
pub fn list_serial_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| GpsError::Other(format!("Failed to list serial ports: {}", e)))?;
    Ok(ports.into_iter().map(|port| port.port_name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{FieldMapping, Reading, Sink};
    use async_trait::async_trait;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    };
    use tokio::io::{duplex, DuplexStream};

    const RMC: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r\n";
    const GGA: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n";
    const GSA: &str = "$GPGSA,A,3,04,05,,09,12,,,24,,,,,2.5,1.3,2.1*39\r\n";
    const NO_FIX: &str = "$GPRMC,235316.000,V,0000.0000,N,00000.0000,E,0.00,0.00,030118,,,N*7D\r\n";
    const BAD_CHECKSUM: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*00\r\n";

    #[derive(Clone, Default)]
    struct MemorySink {
        readings: Arc<Mutex<Vec<Reading>>>,
        closed: Arc<AtomicBool>,
    }

    impl MemorySink {
        fn count(&self) -> usize {
            self.readings.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Sink for MemorySink {
        fn name(&self) -> &str {
            "memory"
        }

        async fn publish(&self, reading: &Reading) -> Result<()> {
            self.readings.lock().unwrap().push(reading.clone());
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    fn monitor(sink: &MemorySink) -> (GpsMonitor<DuplexStream>, DuplexStream) {
        let (host, device) = duplex(1024);
        let dispatcher = FixDispatcher::new(FieldMapping::default()).with_sink(Box::new(sink.clone()));
        (GpsMonitor::new(host, dispatcher), device)
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_unless_cancelled_runs_step() {
        let shutdown = CancellationToken::new();
        assert_eq!(unless_cancelled(&shutdown, async { 7 }).await, Some(7));
    }

    #[tokio::test]
    async fn test_unless_cancelled_abandons_pending_step() {
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let step = std::future::pending::<Result<()>>();
        let result = tokio::time::timeout(Duration::from_secs(2), unless_cancelled(&shutdown, step))
            .await
            .expect("cancellation did not interrupt the step");

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_unless_cancelled_skips_step_after_shutdown() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        assert_eq!(unless_cancelled(&shutdown, async { 7 }).await, None);
    }

    #[tokio::test]
    async fn test_monitor_starts_in_starting_state() {
        let sink = MemorySink::default();
        let (monitor, _device) = monitor(&sink);
        assert_eq!(monitor.state(), MonitorState::Starting);
    }

    #[tokio::test]
    async fn test_run_counts_and_dispatches() {
        let sink = MemorySink::default();
        let (monitor, mut device) = monitor(&sink);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(monitor.run(shutdown.clone()));

        let stream = [RMC, GSA, BAD_CHECKSUM, NO_FIX, GGA].concat();
        device.write_all(stream.as_bytes()).await.unwrap();
        wait_until(|| sink.count() == 2).await;
        // Let the loop finish the last chunk before stopping it
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
                publish_failures: 0,
            }
        );
        assert!(sink.closed.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_eof_is_fatal_and_closes_sinks() {
        let sink = MemorySink::default();
        let (monitor, mut device) = monitor(&sink);

        device.write_all(RMC.as_bytes()).await.unwrap();
        drop(device);

        let result = monitor.run(CancellationToken::new()).await;

        assert!(matches!(result, Err(GpsError::Channel(_))));
        assert_eq!(sink.count(), 1);
        assert!(sink.closed.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_read_timeout_keeps_running() {
        let sink = MemorySink::default();
        let (monitor, mut device) = monitor(&sink);
        let monitor = monitor.read_timeout(Duration::from_millis(20));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(monitor.run(shutdown.clone()));

        // Several timeouts pass before any data shows up
        tokio::time::sleep(Duration::from_millis(100)).await;
        device.write_all(RMC.as_bytes()).await.unwrap();
        wait_until(|| sink.count() == 1).await;
        shutdown.cancel();

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.dispatched, 1);
    }

    #[tokio::test]
    async fn test_cancel_before_any_data() {
        let sink = MemorySink::default();
        let (monitor, _device) = monitor(&sink);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let summary = monitor.run(shutdown).await.unwrap();

        assert_eq!(summary, RunSummary::default());
        assert!(sink.closed.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_channel_shut_down_on_exit() {
        let sink = MemorySink::default();
        let (monitor, mut device) = monitor(&sink);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        monitor.run(shutdown).await.unwrap();

        // The host side is gone, so the device side sees end of stream
        let mut buf = [0u8; 8];
        assert_eq!(device.read(&mut buf).await.unwrap(), 0);
    }
}
