//! Camera discovery.
//!
//! Two probe strategies feed one pipeline:
//! - [`wsdiscovery`]: a WS-Discovery multicast probe from one interface
//! - [`netscan`]: unicast probes to every host of the configured subnets
//!
//! [`DiscoveryService`] merges, de-duplicates and names the results, and
//! [`Debouncer`] coalesces config-triggered runs.

pub mod netscan;
mod service;
mod types;
pub mod wsdiscovery;

pub use netscan::{AllPorts, NetScanParams, NetScanner, ProbeFilter, ProbeProtocol, WsDiscoveryProtocol};
pub use service::{dedup, Debouncer, DiscoveryService, MulticastSource, ProbeSource};
pub use types::{DiscoveryError, DiscoveryResult, ProbeResult};
