//! Camera event subscriptions.
//!
//! Two delivery modes share one bookkeeping skeleton ([`SubscriptionManager`]):
//! - [`pullpoint`]: the driver long-polls `PullMessages` and publishes readings
//! - [`base_notification`]: the camera pushes `Notify` to the ingress route
//!   while the driver keeps the subscription renewed
//!
//! Each client owns one manager per mode; at most one task runs per
//! (device, resource).

pub mod base_notification;
mod manager;
pub mod parser;
pub mod pullpoint;
mod request;

pub use manager::{Registration, SubscriptionKind, SubscriptionManager};
pub use request::{SubscribeType, SubscriptionRequest};
