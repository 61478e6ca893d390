//! ONVIF Core - camera management library.
//!
//! This crate discovers ONVIF cameras, keeps one authenticated client per
//! camera, tracks reachability, streams camera events to a host platform and
//! exposes ONVIF operations plus a handful of custom functions as commands.
//! It is embedded by a host that owns device storage and secrets, and is
//! also run headless by the standalone server.
//!
//! # Architecture
//!
//! - [`soap`]: SOAP 1.2 transport with Digest and WS-UsernameToken auth
//! - [`onvif`]: typed ONVIF client over the SOAP engine
//! - [`discovery`]: WS-Discovery multicast and subnet scanning
//! - [`events`]: PullPoint and BaseNotification subscriptions
//! - [`status`]: periodic reachability classification
//! - [`credentials`] and [`registry`]: credential resolution and client cache
//! - [`commands`]: read/write command façade and custom functions
//! - [`api`]: HTTP ingress for pushed notifications
//! - [`driver`]: composition root and host callbacks
//!
//! # Host Traits
//!
//! - [`DeviceRegistry`](host::DeviceRegistry): persisted device records
//! - [`SecretStore`](host::SecretStore): named credentials
//! - [`TaskSpawner`](runtime::TaskSpawner): spawning detached tasks
//!
//! In-memory implementations of the host traits live in [`host::memory`].

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod commands;
pub mod config;
pub mod context;
pub mod credentials;
pub mod discovery;
pub mod driver;
pub mod duration;
pub mod error;
pub mod events;
pub mod host;
pub mod model;
pub mod onvif;
pub mod protocol_constants;
pub mod registry;
pub mod runtime;
pub mod soap;
pub mod status;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_fixtures;

pub use api::{create_router, start_server, AppState, ServerError};
pub use commands::{CommandFacade, CommandRequest};
pub use config::{Config, DiscoveryMode, ProbeTransport};
pub use context::UrlBuilder;
pub use credentials::{CredentialResolver, MacAddressMapper};
pub use discovery::{DiscoveryService, NetScanner, ProbeResult};
pub use driver::{bootstrap, Driver, HostServices};
pub use error::{ErrorCode, ErrorKind, OnvifError, OnvifResult};
pub use host::{
    DeviceRegistry, DiscoveredSender, HostError, InMemoryDeviceRegistry, ReadingsSender, Secret,
    SecretStore, StaticSecretStore,
};
pub use model::{
    CommandValue, Device, DevicePatch, DeviceStatus, DiscoveredDevice, OnvifProperties,
    ReadingValue, Resource,
};
pub use onvif::{OnvifClient, OnvifService};
pub use registry::ClientRegistry;
pub use runtime::{TaskSpawner, TokioSpawner};
pub use soap::{AuthMode, Credentials, SoapEngine};
pub use status::StatusPoller;
pub use utils::now_millis;
