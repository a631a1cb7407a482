// src/main.rs
//! gps-relay: read an MTK3339 GPS module and relay its fixes

use anyhow::Context;
use clap::Parser;
use gps_relay::{
    config::GpsConfig,
    monitor::{self, GpsMonitor},
    FixDispatcher,
};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file with a top-level "gps" object
    #[arg(short, long, default_value_os_t = GpsConfig::default_path())]
    config: PathBuf,
    /// Serial port the GPS module is attached to
    #[arg(long)]
    serialport: Option<String>,
    /// Baud rate to switch the module to
    #[arg(long)]
    baudrate: Option<u32>,
    /// Baud rate the module talks at before configuration
    #[arg(long)]
    device_baudrate: Option<u32>,
    /// NMEA update rate in milliseconds
    #[arg(long)]
    updaterate: Option<u32>,
    #[arg(long)]
    db_host: Option<String>,
    #[arg(long)]
    db_port: Option<u16>,
    /// Send InfluxDB lines over UDP to this port
    #[arg(long)]
    udp_port: Option<u16>,
    #[arg(long)]
    mqtt_host: Option<String>,
    #[arg(long)]
    mqtt_port: Option<u16>,
    /// Leave the module's settings alone
    #[arg(long)]
    skip_configure: bool,
    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

impl Cli {
    fn config(&self) -> anyhow::Result<GpsConfig> {
        let mut config = GpsConfig::load(&self.config)
            .with_context(|| format!("loading {}", self.config.display()))?;
        config.update_serial(self.serialport.clone(), self.baudrate, self.updaterate);
        config.update_influx(self.db_host.clone(), self.db_port, self.udp_port);
        config.update_mqtt(self.mqtt_host.clone(), self.mqtt_port);
        if let Some(rate) = self.device_baudrate {
            config.device_baud_rate = rate;
        }
        if self.skip_configure {
            config.configure_device = false;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if cli.list_ports {
        let ports = monitor::list_serial_ports()?;
        if ports.is_empty() {
            println!("No serial ports found.");
        }
        for port in ports {
            println!("{}", port);
        }
        return Ok(());
    }

    let config = cli.config()?;
    if cli.print_config {
        println!("{}", config.to_json()?);
        return Ok(());
    }
    config.validate().context("invalid configuration")?;

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted, shutting down");
                ctrl_c.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    let Some(dispatcher) = monitor::unless_cancelled(&shutdown, FixDispatcher::from_config(&config)).await
    else {
        return Ok(());
    };
    let dispatcher = dispatcher.context("connecting sinks")?;
    let port = match monitor::unless_cancelled(&shutdown, monitor::open_serial(&config)).await {
        Some(Ok(port)) => port,
        Some(Err(e)) => {
            dispatcher.close().await;
            return Err(e).context("opening GPS serial port");
        }
        None => {
            dispatcher.close().await;
            return Ok(());
        }
    };

    let summary = GpsMonitor::new(port, dispatcher)
        .read_timeout(config.read_timeout())
        .chunk_size(config.chunk_size)
        .run(shutdown)
        .await
        .context("GPS read loop failed")?;

    info!("{}", summary);
    Ok(())
}
