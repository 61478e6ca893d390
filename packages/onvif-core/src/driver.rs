//! Driver composition root and host callbacks.
//!
//! [`bootstrap`] is the single place where every component is instantiated
//! and wired together. The resulting [`Driver`] is what the host calls into:
//! commands, discovery, device lifecycle, config and secret updates, and
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::api::AppState;
use crate::commands::{CommandFacade, CommandRequest};
use crate::config::Config;
use crate::context::UrlBuilder;
use crate::credentials::{CredentialResolver, MacAddressMapper};
use crate::discovery::{Debouncer, DiscoveryService};
use crate::error::{OnvifError, OnvifResult};
use crate::host::{DeviceRegistry, DiscoveredSender, ReadingsSender, SecretStore};
use crate::model::{CommandValue, Device, DiscoveredDevice};
use crate::protocol_constants::DISCOVERY_DEBOUNCE_SECS;
use crate::registry::ClientRegistry;
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::status::StatusPoller;

/// Collaborators supplied by the host platform.
#[derive(Clone)]
pub struct HostServices {
    pub devices: Arc<dyn DeviceRegistry>,
    pub secrets: Arc<dyn SecretStore>,
    pub readings: ReadingsSender,
    pub discovered: DiscoveredSender,
}

/// Every wired component of a running driver.
pub struct Driver {
    config: Arc<RwLock<Config>>,
    devices: Arc<dyn DeviceRegistry>,
    readings: ReadingsSender,
    macs: Arc<MacAddressMapper>,
    registry: Arc<ClientRegistry>,
    discovery: Arc<DiscoveryService>,
    debouncer: Debouncer,
    poller: Arc<StatusPoller>,
    commands: CommandFacade,
    spawner: TokioSpawner,
    cancel_token: CancellationToken,
}

/// Wires the driver. Must be called from within a Tokio runtime.
///
/// Components are created in dependency order:
///
/// 1. Shared config and the MAC mapper
/// 2. Credential resolver (secrets, config, MACs)
/// 3. Client registry (resolver)
/// 4. Discovery service and its debouncer
/// 5. Status poller (registry, resolver)
/// 6. Command facade (registry, readings, URL builder)
pub fn bootstrap(config: Config, host: HostServices) -> Driver {
    let config = config.normalized();
    let spawner = TokioSpawner::current();
    let cancel_token = CancellationToken::new();

    let macs = Arc::new(MacAddressMapper::new());
    macs.update_from_config(&config);
    let request_timeout = config.request_timeout();
    let config = Arc::new(RwLock::new(config));

    let resolver = Arc::new(CredentialResolver::new(
        Arc::clone(&host.secrets),
        Arc::clone(&config),
        Arc::clone(&macs),
    ));
    let registry = Arc::new(ClientRegistry::new(Arc::clone(&resolver), request_timeout));

    let discovery = Arc::new(DiscoveryService::new(
        Arc::clone(&config),
        Arc::clone(&host.devices),
        Arc::clone(&resolver),
        host.discovered.clone(),
    ));
    let debouncer = Debouncer::new(Duration::from_secs(DISCOVERY_DEBOUNCE_SECS), {
        let discovery = Arc::clone(&discovery);
        let cancel = cancel_token.clone();
        Arc::new(move || {
            let discovery = Arc::clone(&discovery);
            let cancel = cancel.clone();
            Box::pin(async move {
                drop(discovery.discover(&cancel).await);
            })
        })
    });

    let poller = Arc::new(StatusPoller::new(
        Arc::clone(&config),
        Arc::clone(&host.devices),
        Arc::clone(&registry),
        resolver,
    ));

    let commands = CommandFacade::new(
        Arc::clone(&host.devices),
        Arc::clone(&registry),
        host.readings.clone(),
        UrlBuilder::new(Arc::clone(&config)),
    );

    Driver {
        config,
        devices: host.devices,
        readings: host.readings,
        macs,
        registry,
        discovery,
        debouncer,
        poller,
        commands,
        spawner,
        cancel_token,
    }
}

impl Driver {
    /// Starts background work (the status poller).
    pub fn start(&self) {
        log::info!(
            "[Driver] Starting (discovery mode {:?}, status checks {})",
            self.config.read().discovery_mode,
            self.config.read().enable_status_check
        );
        self.poller.start();
    }

    pub fn config(&self) -> Config {
        self.config.read().clone()
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn discovery(&self) -> &Arc<DiscoveryService> {
        &self.discovery
    }

    pub fn poller(&self) -> &Arc<StatusPoller> {
        &self.poller
    }

    pub fn commands(&self) -> &CommandFacade {
        &self.commands
    }

    /// State for the HTTP router.
    pub fn app_state(&self) -> AppState {
        AppState::new(
            Arc::clone(&self.devices),
            self.readings.clone(),
            self.config.read().api_route.clone(),
        )
    }

    async fn device(&self, name: &str) -> OnvifResult<Device> {
        self.devices
            .get_device(name)
            .await
            .map_err(|e| OnvifError::NotFound(e.to_string()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────────

    /// Executes reads in order; the first failure aborts the batch.
    pub async fn handle_read_commands(
        &self,
        device_name: &str,
        requests: &[CommandRequest],
    ) -> OnvifResult<Vec<CommandValue>> {
        let device = self.device(device_name).await?;
        let mut values = Vec::with_capacity(requests.len());
        for request in requests {
            values.push(self.commands.read(&device, request).await?);
        }
        Ok(values)
    }

    /// Executes writes in order; the first failure aborts the batch.
    pub async fn handle_write_commands(
        &self,
        device_name: &str,
        requests: &[(CommandRequest, Value)],
    ) -> OnvifResult<()> {
        let device = self.device(device_name).await?;
        for (request, data) in requests {
            self.commands.write(&device, request, data.clone()).await?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Discovery
    // ─────────────────────────────────────────────────────────────────────────

    /// Starts a discovery run in the background.
    pub fn discover(&self) {
        let discovery = Arc::clone(&self.discovery);
        let cancel = self.cancel_token.clone();
        self.spawner.spawn(async move {
            drop(discovery.discover(&cancel).await);
        });
    }

    /// Runs discovery and waits for its result.
    pub async fn discover_now(&self) -> Vec<DiscoveredDevice> {
        self.discovery.discover(&self.cancel_token).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Device lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Creates the client of a newly added device.
    ///
    /// Failures are logged; the client is retried lazily on first use.
    pub async fn add_device(&self, device: &Device) {
        log::info!("[Driver] Device added: {}", device.name);
        if let Err(e) = self.registry.get_or_create(device).await {
            log::warn!("[Driver] Could not create client for {}: {}", device.name, e);
        }
    }

    /// Replaces the client of a device whose address or credentials changed.
    pub async fn update_device(&self, device: &Device) {
        log::info!("[Driver] Device updated: {}", device.name);
        if let Err(e) = self.registry.update(device).await {
            log::warn!("[Driver] Could not update client for {}: {}", device.name, e);
        }
    }

    /// Drops the client of a removed device and stops its subscriptions.
    pub fn remove_device(&self, name: &str) {
        log::info!("[Driver] Device removed: {}", name);
        self.registry.remove(name);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Config and secrets
    // ─────────────────────────────────────────────────────────────────────────

    /// Applies a new configuration.
    ///
    /// Discovery-relevant changes schedule a debounced run; credential map
    /// and timeout changes refresh existing clients.
    pub async fn update_config(&self, new: Config) {
        let new = new.normalized();
        let old = std::mem::replace(&mut *self.config.write(), new.clone());
        if old == new {
            return;
        }
        log::info!("[Driver] Configuration updated");

        self.macs.update_from_config(&new);
        let timeout_changed = old.request_timeout != new.request_timeout;
        if timeout_changed {
            self.registry.set_timeout(new.request_timeout());
        }

        if old.discovery_changed(&new) {
            log::info!(
                "[Driver] Discovery settings changed, running discovery in {}s",
                DISCOVERY_DEBOUNCE_SECS
            );
            self.debouncer.trigger();
        }

        if old.enable_status_check != new.enable_status_check {
            if new.enable_status_check {
                self.poller.start();
            } else {
                self.poller.stop().await;
            }
        }

        if timeout_changed
            || old.credentials_map != new.credentials_map
            || old.default_secret_name != new.default_secret_name
        {
            self.refresh_clients().await;
        }
    }

    /// Re-resolves credentials after a secret changed in the store.
    pub async fn secret_updated(&self, secret_name: &str) {
        log::info!("[Driver] Secret updated: {}", secret_name);
        self.refresh_clients().await;
    }

    async fn refresh_clients(&self) {
        match self.devices.list_devices().await {
            Ok(devices) => self.registry.refresh_credentials(&devices).await,
            Err(e) => log::warn!("[Driver] Could not list devices: {}", e),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Shutdown
    // ─────────────────────────────────────────────────────────────────────────

    /// Stops every background task.
    ///
    /// Without `force`, subscription loops get up to the request timeout
    /// to unsubscribe before being aborted. On return no subscription task
    /// is running.
    pub async fn stop(&self, force: bool) {
        log::info!("[Driver] Stopping (force: {})", force);
        self.cancel_token.cancel();
        self.debouncer.cancel();
        self.readings.close();

        // The poller creates and refreshes clients, so it stops first
        self.poller.stop().await;
        let mut handles = self.registry.clear();

        if !force {
            let wait = self.config.read().request_timeout();
            let finished = tokio::time::timeout(wait, join_all(handles.iter_mut()))
                .await
                .is_ok();
            if finished {
                log::info!("[Driver] {} subscription task(s) finished", handles.len());
                return;
            }
            log::warn!("[Driver] Subscriptions did not stop within {:?}, aborting", wait);
        }

        for handle in &handles {
            handle.abort();
        }
        join_all(handles).await;
        log::info!("[Driver] Stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{InMemoryDeviceRegistry, StaticSecretStore};
    use crate::model::OnvifProperties;

    fn driver(config: Config) -> (Driver, Arc<InMemoryDeviceRegistry>) {
        let devices = Arc::new(InMemoryDeviceRegistry::new());
        let (readings, _readings_rx) = ReadingsSender::new(8);
        let (discovered, _discovered_rx) = DiscoveredSender::new(8);
        let driver = bootstrap(
            config,
            HostServices {
                devices: Arc::clone(&devices) as Arc<dyn DeviceRegistry>,
                secrets: Arc::new(StaticSecretStore::new()),
                readings,
                discovered,
            },
        );
        (driver, devices)
    }

    #[tokio::test]
    async fn add_then_remove_leaves_no_client() {
        let (driver, _devices) = driver(Config::default());
        let device = Device::new(
            "cam",
            OnvifProperties {
                address: "127.0.0.1".into(),
                port: Some(9),
                secret_name: "noauth".into(),
                ..Default::default()
            },
        );

        driver.add_device(&device).await;
        assert_eq!(driver.registry().len(), 1);
        driver.remove_device("cam");
        assert!(driver.registry().is_empty());
    }

    #[tokio::test]
    async fn request_timeout_change_replaces_clients() {
        let (driver, devices) = driver(Config {
            enable_status_check: false,
            ..Default::default()
        });
        let device = Device::new(
            "cam",
            OnvifProperties {
                address: "127.0.0.1".into(),
                port: Some(9),
                secret_name: "noauth".into(),
                ..Default::default()
            },
        );
        devices.add_device(device.clone()).await.unwrap();
        driver.add_device(&device).await;
        let before = driver.registry().get("cam").unwrap();
        assert_eq!(before.timeout(), Duration::from_secs(5));

        let mut config = driver.config();
        config.request_timeout = 30;
        driver.update_config(config).await;
        driver.update_device(&device).await;

        let after = driver.registry().get("cam").unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.timeout(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn unknown_device_commands_are_not_found() {
        let (driver, _devices) = driver(Config::default());
        let err = driver
            .handle_read_commands("ghost", &[CommandRequest::default()])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn only_discovery_changes_schedule_a_run() {
        let (driver, _devices) = driver(Config {
            enable_status_check: false,
            ..Default::default()
        });

        let mut config = driver.config();
        config.check_status_interval = 60;
        driver.update_config(config.clone()).await;
        assert!(!driver.debouncer.is_pending());

        config.discovery_subnets = "10.0.0.0/30".into();
        driver.update_config(config).await;
        assert!(driver.debouncer.is_pending());

        driver.stop(true).await;
        assert!(!driver.debouncer.is_pending());
    }

    #[tokio::test]
    async fn stop_closes_readings() {
        let (driver, _devices) = driver(Config::default());
        driver.start();
        assert!(driver.poller().is_running());
        driver.stop(false).await;
        assert!(!driver.poller().is_running());
        assert!(driver.readings.is_closed());
    }
}
