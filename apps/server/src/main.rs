//! ONVIF Server - Standalone headless camera management server.
//!
//! Runs the ONVIF driver against an in-memory host: devices and secrets are
//! seeded from the configuration file, readings and discovered cameras are
//! logged, and camera push notifications are received over HTTP.

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use onvif_core::{
    bootstrap, start_server, Device, DeviceRegistry, DiscoveredDevice, DiscoveredSender, Driver,
    HostServices, InMemoryDeviceRegistry, ReadingsSender, StaticSecretStore,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;

/// ONVIF Server - Headless ONVIF camera discovery, status and event server.
#[derive(Parser, Debug)]
#[command(name = "onvif-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "ONVIF_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "ONVIF_BIND_PORT")]
    port: Option<u16>,

    /// Run one discovery right after startup.
    #[arg(long)]
    discover: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("ONVIF Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    log::info!(
        "Configuration: bind={}:{}, {} seeded device(s), {} secret(s)",
        config.bind_address,
        config.bind_port,
        config.devices.len(),
        config.secrets.len()
    );

    // In-memory host
    let devices = Arc::new(InMemoryDeviceRegistry::with_devices(config.devices.clone()));
    let secrets = Arc::new(StaticSecretStore::new());
    for (name, secret) in &config.secrets {
        secrets.insert(name.clone(), secret.clone());
    }
    let (readings, mut readings_rx) = ReadingsSender::new(256);
    let (discovered, mut discovered_rx) = DiscoveredSender::new(16);

    let driver = Arc::new(bootstrap(
        config.driver.clone(),
        HostServices {
            devices: Arc::clone(&devices) as Arc<dyn DeviceRegistry>,
            secrets,
            readings,
            discovered,
        },
    ));
    for device in &config.devices {
        driver.add_device(device).await;
    }
    driver.start();

    log::info!("Driver started");

    let shutdown = CancellationToken::new();

    // Readings sink
    tokio::spawn(async move {
        while let Some(reading) = readings_rx.recv().await {
            log::info!(
                "Reading {}/{}: {:?}",
                reading.device_name,
                reading.resource_name,
                reading.value
            );
        }
    });

    // Discovered devices are adopted into the registry
    tokio::spawn({
        let driver = Arc::clone(&driver);
        let devices = Arc::clone(&devices);
        async move {
            while let Some(batch) = discovered_rx.recv().await {
                log::info!("Discovered {} new camera(s)", batch.len());
                for found in batch {
                    adopt(&driver, &devices, found).await;
                }
            }
        }
    });

    // Scheduled discovery
    if args.discover {
        driver.discover();
    }
    if config.discovery_interval > 0 {
        let driver = Arc::clone(&driver);
        let token = shutdown.clone();
        let period = Duration::from_secs(config.discovery_interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => driver.discover(),
                }
            }
        });
    }

    // Notification ingress
    let addr = SocketAddr::new(config.bind_address, config.bind_port);
    let server_handle = tokio::spawn({
        let state = driver.app_state();
        let token = shutdown.clone();
        async move {
            if let Err(e) = start_server(addr, state, token).await {
                log::error!("Server error: {}", e);
            }
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    shutdown.cancel();
    driver.stop(false).await;
    if let Err(e) = server_handle.await {
        log::warn!("Server task ended abnormally: {}", e);
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// Adds a discovered camera to the host registry and creates its client.
async fn adopt(
    driver: &Driver,
    devices: &InMemoryDeviceRegistry,
    found: DiscoveredDevice,
) {
    let mut device = Device::new(found.name, found.onvif);
    device.labels = found.labels;
    log::info!(
        "Adding {} at {}",
        device.name,
        device.onvif.xaddr().unwrap_or_default()
    );
    if let Err(e) = devices.add_device(device.clone()).await {
        log::warn!("Could not add {}: {}", device.name, e);
        return;
    }
    driver.add_device(&device).await;
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
