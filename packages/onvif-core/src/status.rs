//! Periodic reachability classification of every camera.
//!
//! Each tick classifies all devices concurrently and waits for the whole
//! batch before sleeping again. Tiers, best first:
//!
//! | Tier            | Check                                          |
//! |-----------------|------------------------------------------------|
//! | `UpWithAuth`    | authenticated `GetDeviceInformation` succeeds   |
//! | `UpWithoutAuth` | unauthenticated `GetSystemDateAndTime` succeeds |
//! | `Reachable`     | TCP connect to the xaddr within probe timeout   |
//! | `Unreachable`   | none of the above                              |

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::credentials::CredentialResolver;
use crate::error::OnvifResult;
use crate::host::DeviceRegistry;
use crate::model::{build_name, sanitize_mac, Device, DevicePatch, DeviceStatus, OnvifProperties};
use crate::registry::ClientRegistry;
use crate::utils::now_millis;

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Background task keeping `device_status` current.
pub struct StatusPoller {
    config: Arc<RwLock<Config>>,
    devices: Arc<dyn DeviceRegistry>,
    registry: Arc<ClientRegistry>,
    resolver: Arc<CredentialResolver>,
    running: Mutex<Option<Running>>,
}

impl StatusPoller {
    pub fn new(
        config: Arc<RwLock<Config>>,
        devices: Arc<dyn DeviceRegistry>,
        registry: Arc<ClientRegistry>,
        resolver: Arc<CredentialResolver>,
    ) -> Self {
        Self {
            config,
            devices,
            registry,
            resolver,
            running: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Starts the ticker unless disabled by config or already running.
    pub fn start(self: &Arc<Self>) {
        if !self.config.read().enable_status_check {
            log::info!("[StatusPoller] Status checks disabled");
            return;
        }
        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let poller = Arc::clone(self);
        let handle = tokio::spawn(async move {
            log::info!("[StatusPoller] Started");
            let mut refreshes: Vec<JoinHandle<()>> = Vec::new();
            loop {
                let period = poller.config.read().status_interval();
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(period) => {
                        let spawned = tokio::select! {
                            _ = token.cancelled() => break,
                            spawned = poller.poll_once() => spawned,
                        };
                        refreshes.retain(|handle| !handle.is_finished());
                        refreshes.extend(spawned);
                    }
                }
            }
            for handle in &refreshes {
                handle.abort();
            }
            join_all(refreshes).await;
            log::info!("[StatusPoller] Stopped");
        });
        *running = Some(Running { cancel, handle });
    }

    /// Stops the ticker and waits for the in-progress tick to end.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        if let Some(Running { cancel, handle }) = running {
            cancel.cancel();
            if let Err(e) = handle.await {
                log::warn!("[StatusPoller] Task ended abnormally: {}", e);
            }
        }
    }

    /// Runs one tick over every device.
    ///
    /// Returns the refresh tasks spawned for devices that just became
    /// `UpWithAuth`; the ticker aborts unfinished ones when stopped.
    pub async fn poll_once(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let devices = match self.devices.list_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                log::warn!("[StatusPoller] Could not list devices: {}", e);
                return Vec::new();
            }
        };
        log::debug!("[StatusPoller] Checking {} device(s)", devices.len());

        join_all(devices.into_iter().map(|device| self.check_device(device)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn check_device(self: &Arc<Self>, mut device: Device) -> Option<JoinHandle<()>> {
        if device.is_unidentified() && device.onvif.mac.is_empty() {
            if let Some(mac) = self
                .resolver
                .macs()
                .mac_for_endpoint(&device.onvif.endpoint_ref)
            {
                log::debug!("[StatusPoller] Using learned MAC {} for {}", mac, device.name);
                device.onvif.mac = mac;
            }
        }

        let previous = device.onvif.device_status;
        let status = self.classify(&device).await;
        if status == previous {
            return None;
        }

        log::info!(
            "[StatusPoller] {} changed from {} to {}",
            device.name,
            previous,
            status
        );
        let mut onvif = device.onvif.clone();
        onvif.device_status = status;
        if status != DeviceStatus::Unreachable {
            onvif.last_seen = Some(now_millis());
        }
        let patched = match self
            .devices
            .patch_device(
                &device.name,
                DevicePatch {
                    onvif: Some(onvif),
                    ..Default::default()
                },
            )
            .await
        {
            Ok(patched) => patched,
            Err(e) => {
                log::warn!("[StatusPoller] Could not update {}: {}", device.name, e);
                return None;
            }
        };

        (status == DeviceStatus::UpWithAuth).then(|| {
            let poller = Arc::clone(self);
            tokio::spawn(async move {
                let name = patched.name.clone();
                if let Err(e) = poller.refresh(patched).await {
                    log::warn!("[StatusPoller] Refresh of {} failed: {}", name, e);
                }
            })
        })
    }

    /// Determines the best tier a device currently reaches.
    pub async fn classify(&self, device: &Device) -> DeviceStatus {
        let client = match self.registry.get_or_create(device).await {
            Ok(client) => client,
            Err(e) => {
                log::debug!("[StatusPoller] No client for {}: {}", device.name, e);
                return DeviceStatus::Unreachable;
            }
        };

        match client.get_device_information().await {
            Ok(_) => return DeviceStatus::UpWithAuth,
            Err(e) => log::trace!("[StatusPoller] {} auth check: {}", device.name, e),
        }
        match client.probe_unauthenticated().await {
            Ok(_) => return DeviceStatus::UpWithoutAuth,
            Err(e) => log::trace!("[StatusPoller] {} unauth check: {}", device.name, e),
        }

        let probe_timeout = self.config.read().probe_timeout();
        if tcp_reachable(client.xaddr(), probe_timeout).await {
            DeviceStatus::Reachable
        } else {
            DeviceStatus::Unreachable
        }
    }

    /// Re-reads identifying properties after a device becomes `UpWithAuth`.
    ///
    /// Placeholder-named devices are re-added under their canonical name.
    async fn refresh(&self, device: Device) -> OnvifResult<()> {
        let client = self.registry.get_or_create(&device).await?;
        let info = client.get_device_information().await?;

        let mut onvif = device.onvif.clone();
        onvif.manufacturer = info.manufacturer;
        onvif.model = info.model;
        onvif.firmware = info.firmware_version;
        onvif.serial = info.serial_number;
        onvif.hardware_id = info.hardware_id;

        match client.get_network_interfaces().await {
            Ok(interfaces) => {
                if let Some(mac) = interfaces
                    .iter()
                    .map(|i| i.hw_address.as_str())
                    .find(|m| !m.is_empty())
                {
                    onvif.mac = sanitize_mac(mac);
                }
            }
            Err(e) => log::debug!("[StatusPoller] No interfaces for {}: {}", device.name, e),
        }
        match client.get_endpoint_reference().await {
            Ok(endpoint_ref) if !endpoint_ref.is_empty() => onvif.endpoint_ref = endpoint_ref,
            Ok(_) => {}
            Err(e) => log::debug!("[StatusPoller] No endpoint ref for {}: {}", device.name, e),
        }
        if !onvif.mac.is_empty() {
            self.resolver.macs().remember_mac(&onvif.endpoint_ref, &onvif.mac);
        }

        if device.is_unidentified() && !onvif.endpoint_ref.is_empty() {
            let name = build_name(&onvif.manufacturer, &onvif.model, &onvif.endpoint_ref);
            if name != device.name {
                return self.rename(device, name, onvif).await;
            }
        }

        if onvif != device.onvif {
            log::info!("[StatusPoller] Updating properties of {}", device.name);
            self.devices
                .patch_device(
                    &device.name,
                    DevicePatch {
                        onvif: Some(onvif),
                        ..Default::default()
                    },
                )
                .await?;
        }
        Ok(())
    }

    async fn rename(
        &self,
        device: Device,
        name: String,
        onvif: OnvifProperties,
    ) -> OnvifResult<()> {
        log::info!("[StatusPoller] Renaming {} to {}", device.name, name);
        self.devices.remove_device(&device.name).await?;
        self.registry.remove(&device.name);
        let renamed = Device {
            name,
            onvif,
            ..device
        };
        self.devices.add_device(renamed).await?;
        Ok(())
    }
}

async fn tcp_reachable(xaddr: &str, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(xaddr)).await,
        Ok(Ok(_))
    )
}
