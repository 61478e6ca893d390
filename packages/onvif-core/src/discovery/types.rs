//! Shared types for camera discovery.

use thiserror::Error;

/// Errors that can occur during discovery.
///
/// Discovery never fails a run: these are logged and the affected method
/// contributes no results.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Failed to create or bind the probe socket.
    #[error("failed to bind UDP socket: {0}")]
    SocketBind(#[source] std::io::Error),

    /// Failed to send the WS-Discovery probe.
    #[error("failed to send WS-Discovery probe: {0}")]
    SendProbe(#[source] std::io::Error),

    /// No usable network interfaces found.
    #[error("no usable network interfaces found")]
    NoInterfaces,

    /// The configured discovery interface has no IPv4 address.
    #[error("network interface not found: {0}")]
    InterfaceNotFound(String),
}

/// Convenient Result alias for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// One device answering a probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    /// Host taken from the first usable XAddr.
    pub host: String,
    pub port: u16,
    /// `EndpointReference/Address`, e.g. `urn:uuid:...`.
    pub endpoint_ref: String,
    /// Every advertised XAddr.
    pub xaddrs: Vec<String>,
    pub scopes: Vec<String>,
    /// The `ProbeMatch` element as received.
    pub raw: String,
}

impl ProbeResult {
    /// Returns `host:port`, the key results are de-duplicated by.
    pub fn xaddr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
