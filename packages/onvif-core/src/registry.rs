//! Registry of per-device ONVIF clients.
//!
//! Reads take the read lock, mutations the write lock. Clients are built
//! outside any lock and inserted with a double check, so concurrent callers
//! converge on one client per device.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;

use crate::credentials::CredentialResolver;
use crate::error::OnvifResult;
use crate::model::Device;
use crate::onvif::{ClientKey, OnvifClient};

/// `device_name → OnvifClient`.
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, Arc<OnvifClient>>>,
    resolver: Arc<CredentialResolver>,
    timeout: RwLock<Duration>,
}

impl ClientRegistry {
    pub fn new(resolver: Arc<CredentialResolver>, timeout: Duration) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            resolver,
            timeout: RwLock::new(timeout),
        }
    }

    /// Sets the HTTP timeout. Existing clients are replaced on their next
    /// `get_or_create` or `update`.
    pub fn set_timeout(&self, timeout: Duration) {
        *self.timeout.write() = timeout;
    }

    pub fn get(&self, name: &str) -> Option<Arc<OnvifClient>> {
        self.clients.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.clients.read().keys().cloned().collect()
    }

    pub fn all(&self) -> Vec<Arc<OnvifClient>> {
        self.clients.read().values().cloned().collect()
    }

    /// Returns the client of `device`, creating it on first use.
    ///
    /// An existing client is reused while its address, credentials and
    /// timeout are unchanged; otherwise it is replaced.
    pub async fn get_or_create(&self, device: &Device) -> OnvifResult<Arc<OnvifClient>> {
        let credentials = self.resolver.for_device(device).await;
        let key = ClientKey::for_device(device, credentials)?;
        let timeout = *self.timeout.read();

        if let Some(existing) = self.get(&device.name) {
            if is_current(&existing, &key, timeout) {
                return Ok(existing);
            }
        }

        let built = Arc::new(OnvifClient::connect(device, key.credentials.clone(), timeout).await?);
        Ok(self.install(&device.name, &key, built))
    }

    /// Replaces the client of `device` if its key changed.
    ///
    /// Devices without a client are left alone; creation stays lazy.
    pub async fn update(&self, device: &Device) -> OnvifResult<()> {
        if self.get(&device.name).is_none() {
            return Ok(());
        }
        self.get_or_create(device).await.map(|_| ())
    }

    /// Inserts `built` unless a client with the same key won the race.
    fn install(&self, name: &str, key: &ClientKey, built: Arc<OnvifClient>) -> Arc<OnvifClient> {
        let replaced = {
            let mut clients = self.clients.write();
            if let Some(current) = clients.get(name) {
                if is_current(current, key, built.timeout()) {
                    return Arc::clone(current);
                }
            }
            clients.insert(name.to_string(), Arc::clone(&built))
        };

        if let Some(old) = replaced {
            log::info!("[Registry] Replaced client of {}", name);
            drop(old.unsubscribe_all());
        } else {
            log::debug!("[Registry] Created client for {}", name);
        }
        built
    }

    /// Removes a device's client and signals its subscriptions to stop.
    pub fn remove(&self, name: &str) -> Option<Arc<OnvifClient>> {
        let removed = self.clients.write().remove(name)?;
        let handles = removed.unsubscribe_all();
        log::info!(
            "[Registry] Removed client of {} ({} subscription task(s) signalled)",
            name,
            handles.len()
        );
        Some(removed)
    }

    /// Re-resolves credentials of every listed device that has a client.
    pub async fn refresh_credentials(&self, devices: &[Device]) {
        for device in devices {
            if let Err(e) = self.update(device).await {
                log::warn!(
                    "[Registry] Could not refresh client of {}: {}",
                    device.name,
                    e
                );
            }
        }
    }

    /// Empties the registry, returning the subscription tasks still running.
    pub fn clear(&self) -> Vec<JoinHandle<()>> {
        let drained: Vec<Arc<OnvifClient>> =
            self.clients.write().drain().map(|(_, c)| c).collect();
        drained
            .iter()
            .flat_map(|client| client.unsubscribe_all())
            .collect()
    }
}

fn is_current(client: &OnvifClient, key: &ClientKey, timeout: Duration) -> bool {
    client.key() == key && client.timeout() == timeout
}
