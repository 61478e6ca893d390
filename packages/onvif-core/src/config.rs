//! Driver configuration.
//!
//! [`Config`] is consumed as a typed snapshot; loading it from files or the
//! environment is the embedding application's job. Values are normalised
//! once via [`Config::normalized`] before being shared behind a lock.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::model::{is_valid_mac, sanitize_mac};
use crate::protocol_constants::{MAX_STATUS_INTERVAL_SECS, WS_DISCOVERY_PORT};

/// Which discovery strategies run on `discover`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    #[default]
    Netscan,
    Multicast,
    Both,
}

impl DiscoveryMode {
    pub fn netscan(self) -> bool {
        matches!(self, Self::Netscan | Self::Both)
    }

    pub fn multicast(self) -> bool {
        matches!(self, Self::Multicast | Self::Both)
    }
}

impl FromStr for DiscoveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "netscan" => Ok(Self::Netscan),
            "multicast" => Ok(Self::Multicast),
            "both" => Ok(Self::Both),
            other => Err(format!("unknown discovery mode: {other}")),
        }
    }
}

/// Transport used for unicast netscan probes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeTransport {
    #[default]
    Udp,
    Tcp,
}

impl fmt::Display for ProbeTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp => write!(f, "udp"),
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

/// Configuration for the ONVIF driver.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    // Requests
    /// HTTP timeout for every SOAP call (seconds).
    pub request_timeout: u64,

    /// Secret used when no per-device or MAC mapping applies.
    pub default_secret_name: String,

    // Events
    /// Base URL cameras use to reach the ingress route (e.g. `http://10.0.0.2:59984`).
    pub base_notification_url: String,

    /// Path prefix of the HTTP API, without surrounding slashes.
    pub api_route: String,

    // Discovery
    /// Interface used for multicast probes (e.g. `eth0`).
    pub discovery_ethernet_interface: String,

    pub discovery_mode: DiscoveryMode,

    /// Comma-separated CIDR list scanned in netscan mode.
    pub discovery_subnets: String,

    /// Maximum concurrent probes.
    pub probe_async_limit: usize,

    pub probe_timeout_millis: u64,

    pub max_discover_duration_seconds: u64,

    /// Ports probed on every host during netscan.
    pub scan_ports: Vec<u16>,

    pub probe_transport: ProbeTransport,

    /// Timeouts tolerated per host before skipping its remaining ports (0 = unlimited).
    pub max_timeouts_per_host: usize,

    // Status
    pub enable_status_check: bool,

    /// Seconds between status polls (capped at 300).
    pub check_status_interval: u64,

    // Credentials
    /// `secret_name -> "mac1,mac2,..."`.
    pub credentials_map: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout: 5,
            default_secret_name: "credentials001".to_string(),
            base_notification_url: "http://localhost:59984".to_string(),
            api_route: "api/v3".to_string(),
            discovery_ethernet_interface: "eth0".to_string(),
            discovery_mode: DiscoveryMode::Netscan,
            discovery_subnets: String::new(),
            probe_async_limit: 4000,
            probe_timeout_millis: 2000,
            max_discover_duration_seconds: 300,
            scan_ports: vec![WS_DISCOVERY_PORT],
            probe_transport: ProbeTransport::Udp,
            max_timeouts_per_host: 0,
            enable_status_check: true,
            check_status_interval: 30,
            credentials_map: HashMap::new(),
        }
    }
}

impl Config {
    /// Returns a copy with out-of-range values clamped and logged.
    pub fn normalized(mut self) -> Self {
        if self.check_status_interval > MAX_STATUS_INTERVAL_SECS {
            log::warn!(
                "[Config] check_status_interval {} exceeds maximum, using {}",
                self.check_status_interval,
                MAX_STATUS_INTERVAL_SECS
            );
            self.check_status_interval = MAX_STATUS_INTERVAL_SECS;
        }
        if self.check_status_interval == 0 {
            log::warn!("[Config] check_status_interval must be >= 1, using 1");
            self.check_status_interval = 1;
        }
        if self.probe_async_limit == 0 {
            log::warn!("[Config] probe_async_limit must be >= 1, using 1");
            self.probe_async_limit = 1;
        }
        if self.request_timeout == 0 {
            log::warn!("[Config] request_timeout must be >= 1, using 1");
            self.request_timeout = 1;
        }
        if self.scan_ports.is_empty() {
            self.scan_ports = vec![WS_DISCOVERY_PORT];
        }
        self.api_route = self.api_route.trim_matches('/').to_string();
        self.base_notification_url = self.base_notification_url.trim_end_matches('/').to_string();
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_millis)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.check_status_interval.clamp(1, MAX_STATUS_INTERVAL_SECS))
    }

    pub fn max_discover_duration(&self) -> Duration {
        Duration::from_secs(self.max_discover_duration_seconds)
    }

    /// Parses `discovery_subnets` into networks, logging entries that fail.
    ///
    /// IPv6 networks are returned as-is; the scanner skips them.
    pub fn subnets(&self) -> Vec<IpNetwork> {
        self.discovery_subnets
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| match s.parse::<IpNetwork>() {
                Ok(net) => Some(net),
                Err(e) => {
                    log::warn!("[Config] Ignoring invalid subnet {:?}: {}", s, e);
                    None
                }
            })
            .collect()
    }

    /// Inverts `credentials_map` into `mac -> secret_name`.
    ///
    /// Invalid MACs are skipped with a warning.
    pub fn mac_secret_map(&self) -> HashMap<String, String> {
        let mut out = HashMap::new();
        for (secret, macs) in &self.credentials_map {
            for mac in macs.split(',').map(str::trim).filter(|m| !m.is_empty()) {
                if !is_valid_mac(mac) {
                    log::warn!(
                        "[Config] Invalid MAC {:?} for secret {:?}, skipping",
                        mac,
                        secret
                    );
                    continue;
                }
                out.insert(sanitize_mac(mac), secret.clone());
            }
        }
        out
    }

    /// True when any field that influences a discovery run differs.
    pub fn discovery_changed(&self, other: &Config) -> bool {
        self.discovery_mode != other.discovery_mode
            || self.discovery_subnets != other.discovery_subnets
            || self.discovery_ethernet_interface != other.discovery_ethernet_interface
            || self.probe_async_limit != other.probe_async_limit
            || self.probe_timeout_millis != other.probe_timeout_millis
            || self.scan_ports != other.scan_ports
            || self.probe_transport != other.probe_transport
            || self.max_timeouts_per_host != other.max_timeouts_per_host
    }
}
