//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;

use anyhow::{Context, Result};
use onvif_core::{Config, Device, Secret};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port the notification ingress listens on.
    /// Override: `ONVIF_BIND_PORT`
    pub bind_port: u16,

    /// Address the ingress binds to.
    pub bind_address: IpAddr,

    /// Seconds between scheduled discovery runs (0 disables them).
    /// Override: `ONVIF_DISCOVERY_INTERVAL`
    pub discovery_interval: u64,

    /// Driver settings.
    pub driver: Config,

    /// Devices known at startup.
    pub devices: Vec<Device>,

    /// Named camera credentials.
    pub secrets: BTreeMap<String, Secret>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_port: 59984,
            bind_address: IpAddr::from([0, 0, 0, 0]),
            discovery_interval: 0,
            driver: Config::default(),
            devices: Vec::new(),
            secrets: BTreeMap::new(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ONVIF_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }

        if let Ok(val) = std::env::var("ONVIF_DISCOVERY_INTERVAL") {
            if let Ok(interval) = val.parse() {
                self.discovery_interval = interval;
            }
        }

        if let Ok(val) = std::env::var("ONVIF_DISCOVERY_MODE") {
            match val.parse() {
                Ok(mode) => self.driver.discovery_mode = mode,
                Err(e) => log::warn!("Ignoring ONVIF_DISCOVERY_MODE: {}", e),
            }
        }

        if let Ok(val) = std::env::var("ONVIF_DISCOVERY_SUBNETS") {
            self.driver.discovery_subnets = val;
        }

        if let Ok(val) = std::env::var("ONVIF_DISCOVERY_INTERFACE") {
            self.driver.discovery_ethernet_interface = val;
        }

        if let Ok(val) = std::env::var("ONVIF_BASE_NOTIFICATION_URL") {
            self.driver.base_notification_url = val;
        }

        if let Ok(val) = std::env::var("ONVIF_DEFAULT_SECRET_NAME") {
            self.driver.default_secret_name = val;
        }
    }
}
