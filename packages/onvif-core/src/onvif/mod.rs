//! ONVIF client layer.
//!
//! - [`services`]: service namespaces and envelope prefixes
//! - [`endpoints`]: endpoint map resolved from capabilities
//! - [`operations`]: typed responses for the operations the core inspects
//! - [`client`]: the per-camera facade

mod client;
pub mod endpoints;
pub mod operations;
pub mod services;

pub use client::{ClientKey, OnvifClient};
pub use endpoints::Endpoints;
pub use operations::{
    DeviceInformation, NetworkInterface, OperationResponse, SubscriptionReference,
    SystemDateAndTime,
};
pub use services::OnvifService;
