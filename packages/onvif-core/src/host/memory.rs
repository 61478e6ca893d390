//! In-memory host collaborators for the standalone server and tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use super::{DeviceRegistry, HostError, HostResult, Secret, SecretStore};
use crate::model::{Device, DevicePatch};

/// Device registry backed by a locked ordered map.
#[derive(Default)]
pub struct InMemoryDeviceRegistry {
    devices: RwLock<BTreeMap<String, Device>>,
}

impl InMemoryDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the registry with existing devices.
    pub fn with_devices(devices: impl IntoIterator<Item = Device>) -> Self {
        let map = devices.into_iter().map(|d| (d.name.clone(), d)).collect();
        Self {
            devices: RwLock::new(map),
        }
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.devices.read().keys().cloned().collect()
    }
}

#[async_trait]
impl DeviceRegistry for InMemoryDeviceRegistry {
    async fn get_device(&self, name: &str) -> HostResult<Device> {
        self.devices
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| HostError::DeviceNotFound(name.to_string()))
    }

    async fn list_devices(&self) -> HostResult<Vec<Device>> {
        Ok(self.devices.read().values().cloned().collect())
    }

    async fn add_device(&self, device: Device) -> HostResult<()> {
        let mut devices = self.devices.write();
        if devices.contains_key(&device.name) {
            return Err(HostError::DeviceExists(device.name));
        }
        devices.insert(device.name.clone(), device);
        Ok(())
    }

    async fn remove_device(&self, name: &str) -> HostResult<()> {
        self.devices
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| HostError::DeviceNotFound(name.to_string()))
    }

    async fn patch_device(&self, name: &str, patch: DevicePatch) -> HostResult<Device> {
        let mut devices = self.devices.write();
        let device = devices
            .get_mut(name)
            .ok_or_else(|| HostError::DeviceNotFound(name.to_string()))?;
        if let Some(onvif) = patch.onvif {
            device.onvif = onvif;
        }
        if let Some(metadata) = patch.custom_metadata {
            device.custom_metadata = metadata;
        }
        if let Some(labels) = patch.labels {
            device.labels = labels;
        }
        Ok(device.clone())
    }
}

/// Secret store backed by a concurrent map.
#[derive(Default)]
pub struct StaticSecretStore {
    secrets: DashMap<String, Secret>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a secret.
    pub fn insert(&self, name: impl Into<String>, secret: Secret) {
        self.secrets.insert(name.into(), secret);
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn get_secret(&self, name: &str) -> HostResult<Secret> {
        self.secrets
            .get(name)
            .map(|s| s.value().clone())
            .ok_or_else(|| HostError::SecretNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OnvifProperties;

    #[tokio::test]
    async fn patch_replaces_only_given_parts() {
        let mut device = Device::new("cam", OnvifProperties::default());
        device.custom_metadata.insert("Location".into(), "Front".into());
        let registry = InMemoryDeviceRegistry::with_devices([device]);

        let patched = registry
            .patch_device(
                "cam",
                DevicePatch {
                    labels: Some(vec!["x".into()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(patched.labels, vec!["x".to_string()]);
        assert_eq!(patched.custom_metadata.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_add_is_rejected() {
        let registry = InMemoryDeviceRegistry::new();
        registry
            .add_device(Device::new("cam", OnvifProperties::default()))
            .await
            .unwrap();
        let err = registry
            .add_device(Device::new("cam", OnvifProperties::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::DeviceExists(_)));
        registry.remove_device("cam").await.unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn missing_secret_is_reported() {
        let store = StaticSecretStore::new();
        assert!(matches!(
            store.get_secret("nope").await,
            Err(HostError::SecretNotFound(_))
        ));
    }
}
