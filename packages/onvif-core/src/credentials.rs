//! Credential resolution: MAC → secret name → credentials.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::config::Config;
use crate::host::SecretStore;
use crate::model::{is_valid_mac, sanitize_mac, Device};
use crate::protocol_constants::NO_AUTH_SECRET;
use crate::soap::{AuthMode, Credentials};

/// MAC lookups used by credential resolution and the status poller.
///
/// Holds the inverted `credentials_map` and the `endpoint_ref → mac` pairs
/// learned from `GetNetworkInterfaces`.
#[derive(Default)]
pub struct MacAddressMapper {
    mac_to_secret: RwLock<HashMap<String, String>>,
    endpoint_macs: DashMap<String, String>,
}

impl MacAddressMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the MAC → secret map from config.
    pub fn update_from_config(&self, config: &Config) {
        let map = config.mac_secret_map();
        log::debug!("[Credentials] {} MAC mapping(s) loaded", map.len());
        *self.mac_to_secret.write() = map;
    }

    /// Returns the secret mapped to `mac`, if any.
    pub fn secret_for_mac(&self, mac: &str) -> Option<String> {
        if !is_valid_mac(mac) {
            return None;
        }
        self.mac_to_secret.read().get(&sanitize_mac(mac)).cloned()
    }

    /// Records the MAC learned for an endpoint reference.
    pub fn remember_mac(&self, endpoint_ref: &str, mac: &str) {
        if endpoint_ref.is_empty() || !is_valid_mac(mac) {
            return;
        }
        self.endpoint_macs
            .insert(endpoint_ref.to_string(), sanitize_mac(mac));
    }

    /// Returns the MAC previously learned for an endpoint reference.
    pub fn mac_for_endpoint(&self, endpoint_ref: &str) -> Option<String> {
        self.endpoint_macs.get(endpoint_ref).map(|m| m.value().clone())
    }
}

/// Resolves the credentials a device should be contacted with.
pub struct CredentialResolver {
    secrets: Arc<dyn SecretStore>,
    config: Arc<RwLock<Config>>,
    macs: Arc<MacAddressMapper>,
}

impl CredentialResolver {
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        config: Arc<RwLock<Config>>,
        macs: Arc<MacAddressMapper>,
    ) -> Self {
        Self {
            secrets,
            config,
            macs,
        }
    }

    pub fn macs(&self) -> &Arc<MacAddressMapper> {
        &self.macs
    }

    /// Picks the secret name: default, then the device's own, then its MAC mapping.
    pub fn secret_name_for(&self, device: &Device) -> String {
        let mut name = self.config.read().default_secret_name.clone();
        if !device.onvif.secret_name.trim().is_empty() {
            name = device.onvif.secret_name.trim().to_string();
        }
        if let Some(mapped) = self.macs.secret_for_mac(&device.onvif.mac) {
            name = mapped;
        }
        name
    }

    /// Resolves credentials for a device. Never fails: problems fall back to no auth.
    pub async fn for_device(&self, device: &Device) -> Credentials {
        let secret_name = self.secret_name_for(device);
        self.from_secret(&secret_name).await
    }

    /// Fetches and validates a secret by name.
    pub async fn from_secret(&self, secret_name: &str) -> Credentials {
        if secret_name.eq_ignore_ascii_case(NO_AUTH_SECRET) || secret_name.is_empty() {
            return Credentials::none();
        }

        let secret = match self.secrets.get_secret(secret_name).await {
            Ok(secret) => secret,
            Err(e) => {
                log::warn!(
                    "[Credentials] Secret {:?} unavailable, using no auth: {}",
                    secret_name,
                    e
                );
                return Credentials::none();
            }
        };

        let mode = match secret.mode.parse::<AuthMode>() {
            Ok(mode) => mode,
            Err(_) => {
                log::warn!(
                    "[Credentials] Secret {:?} has invalid mode {:?}, using {}",
                    secret_name,
                    secret.mode,
                    AuthMode::UsernameToken
                );
                AuthMode::UsernameToken
            }
        };
        Credentials::new(secret.username, secret.password, mode)
    }
}
