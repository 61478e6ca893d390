//! Discovery runs: probe, de-duplicate, enrich, filter, publish.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{join_all, BoxFuture};
use futures::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::netscan::{NetScanParams, NetScanner};
use super::types::ProbeResult;
use super::wsdiscovery::multicast_probe;
use crate::config::Config;
use crate::credentials::CredentialResolver;
use crate::host::{DeviceRegistry, DiscoveredSender};
use crate::model::{
    discovered_name, endpoint_ref_id, sanitize_mac, sanitize_name, Device, DiscoveredDevice,
    OnvifProperties,
};
use crate::onvif::{ClientKey, OnvifClient};
use crate::protocol_constants::AUTO_DISCOVERY_LABEL;

/// Probe results enriched concurrently per run.
const ENRICH_CONCURRENCY: usize = 16;

impl NetScanParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            subnets: config.subnets(),
            ports: config.scan_ports.clone(),
            transport: config.probe_transport,
            probe_timeout: config.probe_timeout(),
            async_limit: config.probe_async_limit,
            max_timeouts_per_host: config.max_timeouts_per_host,
        }
    }
}

/// One way of finding cameras; each source decides from config whether it runs.
#[async_trait]
pub trait ProbeSource: Send + Sync {
    async fn probe(&self, config: &Config, cancel: &CancellationToken) -> Vec<ProbeResult>;
}

/// WS-Discovery multicast from the configured interface.
#[derive(Debug, Clone, Copy, Default)]
pub struct MulticastSource;

#[async_trait]
impl ProbeSource for MulticastSource {
    async fn probe(&self, config: &Config, cancel: &CancellationToken) -> Vec<ProbeResult> {
        if !config.discovery_mode.multicast() {
            return Vec::new();
        }
        match multicast_probe(&config.discovery_ethernet_interface, cancel).await {
            Ok(results) => results,
            Err(e) => {
                log::warn!("[Discovery] Multicast probe failed: {}", e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl ProbeSource for NetScanner {
    async fn probe(&self, config: &Config, cancel: &CancellationToken) -> Vec<ProbeResult> {
        if !config.discovery_mode.netscan() {
            return Vec::new();
        }
        self.scan(&NetScanParams::from_config(config), cancel).await
    }
}

/// Keeps the first result per `host:port`, then the first per endpoint reference.
pub fn dedup(results: Vec<ProbeResult>) -> Vec<ProbeResult> {
    let mut xaddrs = HashSet::new();
    let mut refs = HashSet::new();
    results
        .into_iter()
        .filter(|r| xaddrs.insert(r.xaddr()))
        .filter(|r| refs.insert(r.endpoint_ref.clone()))
        .collect()
}

/// Runs discovery and publishes new cameras on the discovered channel.
pub struct DiscoveryService {
    config: Arc<RwLock<Config>>,
    devices: Arc<dyn DeviceRegistry>,
    resolver: Arc<CredentialResolver>,
    discovered: DiscoveredSender,
    sources: Vec<Arc<dyn ProbeSource>>,
    running: AtomicBool,
}

impl DiscoveryService {
    pub fn new(
        config: Arc<RwLock<Config>>,
        devices: Arc<dyn DeviceRegistry>,
        resolver: Arc<CredentialResolver>,
        discovered: DiscoveredSender,
    ) -> Self {
        Self::with_scanner(config, devices, resolver, discovered, NetScanner::default())
    }

    /// Uses a custom scanner (protocol or port filter).
    pub fn with_scanner(
        config: Arc<RwLock<Config>>,
        devices: Arc<dyn DeviceRegistry>,
        resolver: Arc<CredentialResolver>,
        discovered: DiscoveredSender,
        scanner: NetScanner,
    ) -> Self {
        Self::with_sources(
            config,
            devices,
            resolver,
            discovered,
            vec![Arc::new(MulticastSource), Arc::new(scanner)],
        )
    }

    pub fn with_sources(
        config: Arc<RwLock<Config>>,
        devices: Arc<dyn DeviceRegistry>,
        resolver: Arc<CredentialResolver>,
        discovered: DiscoveredSender,
        sources: Vec<Arc<dyn ProbeSource>>,
    ) -> Self {
        Self {
            config,
            devices,
            resolver,
            discovered,
            sources,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs one discovery pass and returns the devices published.
    ///
    /// Overlapping calls are skipped. Probe failures never fail the run;
    /// they are logged and contribute nothing.
    pub async fn discover(&self, cancel: &CancellationToken) -> Vec<DiscoveredDevice> {
        if self.running.swap(true, Ordering::SeqCst) {
            log::info!("[Discovery] Run already in progress, skipping");
            return Vec::new();
        }
        let found = self.run(cancel).await;
        self.running.store(false, Ordering::SeqCst);
        found
    }

    async fn run(&self, cancel: &CancellationToken) -> Vec<DiscoveredDevice> {
        let config = self.config.read().clone();
        let run = cancel.child_token();

        let cap = config.max_discover_duration();
        let timer = tokio::spawn({
            let run = run.clone();
            async move {
                tokio::select! {
                    _ = run.cancelled() => {}
                    _ = tokio::time::sleep(cap) => {
                        log::warn!("[Discovery] Run exceeded {:?}, cancelling", cap);
                        run.cancel();
                    }
                }
            }
        });

        let results: Vec<ProbeResult> =
            join_all(self.sources.iter().map(|source| source.probe(&config, &run)))
                .await
                .into_iter()
                .flatten()
                .collect();

        let probed = results.len();
        let unique = dedup(results);
        log::info!(
            "[Discovery] {} response(s), {} unique camera(s)",
            probed,
            unique.len()
        );

        let known = self.known_endpoint_refs().await;
        let fresh: Vec<ProbeResult> = unique
            .into_iter()
            .filter(|r| !known.contains(&r.endpoint_ref))
            .collect();

        let timeout = config.request_timeout();
        let discovered: Vec<DiscoveredDevice> = stream::iter(fresh)
            .map(|result| self.enrich(result, timeout))
            .buffer_unordered(ENRICH_CONCURRENCY)
            .collect()
            .await;

        run.cancel();
        timer.abort();

        if discovered.is_empty() {
            log::info!("[Discovery] No new cameras");
            return discovered;
        }
        log::info!("[Discovery] Publishing {} new camera(s)", discovered.len());
        if let Err(e) = self.discovered.send(discovered.clone()).await {
            log::warn!("[Discovery] Could not publish discovered cameras: {}", e);
        }
        discovered
    }

    async fn known_endpoint_refs(&self) -> HashSet<String> {
        match self.devices.list_devices().await {
            Ok(devices) => devices
                .into_iter()
                .map(|d| d.onvif.endpoint_ref)
                .filter(|r| !r.is_empty())
                .collect(),
            Err(e) => {
                log::warn!("[Discovery] Could not list known devices: {}", e);
                HashSet::new()
            }
        }
    }

    /// Names a probed camera from `GetDeviceInformation`, or from its
    /// endpoint reference when the camera cannot be queried.
    async fn enrich(&self, result: ProbeResult, timeout: Duration) -> DiscoveredDevice {
        let mut onvif = OnvifProperties {
            address: result.host.clone(),
            port: Some(result.port),
            endpoint_ref: result.endpoint_ref.clone(),
            ..Default::default()
        };
        let fallback_name = sanitize_name(endpoint_ref_id(&result.endpoint_ref));
        let probe_device = Device::new(fallback_name.clone(), onvif.clone());
        let credentials = self.resolver.for_device(&probe_device).await;

        let info = match ClientKey::for_device(&probe_device, credentials)
            .and_then(|key| OnvifClient::new(&fallback_name, key, timeout))
        {
            Ok(client) => match client.get_device_information().await {
                Ok(info) => Some((client, info)),
                Err(e) => {
                    log::debug!(
                        "[Discovery] GetDeviceInformation failed for {}: {}",
                        result.xaddr(),
                        e
                    );
                    None
                }
            },
            Err(e) => {
                log::debug!("[Discovery] No client for {}: {}", result.xaddr(), e);
                None
            }
        };

        let Some((client, info)) = info else {
            onvif.secret_name = result.endpoint_ref.clone();
            return DiscoveredDevice {
                name: fallback_name,
                labels: vec![AUTO_DISCOVERY_LABEL.to_string()],
                onvif,
                scopes: result.scopes,
            };
        };

        if let Ok(interfaces) = client.get_network_interfaces().await {
            if let Some(mac) = interfaces
                .iter()
                .map(|i| i.hw_address.as_str())
                .find(|m| !m.is_empty())
            {
                onvif.mac = sanitize_mac(mac);
                self.resolver.macs().remember_mac(&result.endpoint_ref, mac);
            }
        }

        let name = discovered_name(&info.manufacturer, &info.model, &result.endpoint_ref);
        let labels = [AUTO_DISCOVERY_LABEL, &info.manufacturer, &info.model]
            .into_iter()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        onvif.manufacturer = info.manufacturer;
        onvif.model = info.model;
        onvif.firmware = info.firmware_version;
        onvif.serial = info.serial_number;
        onvif.hardware_id = info.hardware_id;

        DiscoveredDevice {
            name,
            labels,
            onvif,
            scopes: result.scopes,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Debounce
// ─────────────────────────────────────────────────────────────────────────────

type Action = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Runs an action once a burst of triggers has been quiet for `delay`.
///
/// Each trigger pushes the deadline out; at most one timer task exists.
pub struct Debouncer {
    delay: Duration,
    action: Action,
    pending: Arc<Mutex<Option<watch::Sender<Instant>>>>,
}

impl Debouncer {
    pub fn new(delay: Duration, action: Action) -> Self {
        Self {
            delay,
            action,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    /// Schedules the action, or resets the deadline of the pending one.
    pub fn trigger(&self) {
        let deadline = Instant::now() + self.delay;
        let mut slot = self.pending.lock();
        if let Some(tx) = slot.as_ref() {
            if tx.send(deadline).is_ok() {
                log::debug!("[Debounce] Deadline reset");
                return;
            }
        }

        let (tx, mut rx) = watch::channel(deadline);
        *slot = Some(tx);
        drop(slot);

        let pending = Arc::clone(&self.pending);
        let action = Arc::clone(&self.action);
        tokio::spawn(async move {
            loop {
                let target = *rx.borrow_and_update();
                tokio::select! {
                    _ = tokio::time::sleep_until(target) => {
                        let mut slot = pending.lock();
                        match rx.has_changed() {
                            Ok(true) => continue,
                            Ok(false) => {
                                slot.take();
                                break;
                            }
                            Err(_) => return,
                        }
                    }
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
            log::debug!("[Debounce] Quiet period elapsed, running action");
            (action)().await;
        });
    }

    /// Drops the pending run, if any.
    pub fn cancel(&self) {
        if self.pending.lock().take().is_some() {
            log::debug!("[Debounce] Pending run cancelled");
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().is_some()
    }
}
