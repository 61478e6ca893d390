//! Callback URLs handed to cameras.
//!
//! BaseNotification subscriptions tell the camera where to push `Notify`
//! messages. The URL is derived from the configured base URL and API route
//! at subscribe time, so config updates apply to new subscriptions only.

use std::sync::Arc;

use parking_lot::RwLock;
use reqwest::Url;

use crate::config::Config;
use crate::error::{OnvifError, OnvifResult};

/// Last path segment before `{device}/{resource}` on the ingress route.
pub const NOTIFICATION_SEGMENT: &str = "onvifevent";

/// Builds ingress paths and consumer URLs from the live config.
#[derive(Clone)]
pub struct UrlBuilder {
    config: Arc<RwLock<Config>>,
}

impl UrlBuilder {
    pub fn new(config: Arc<RwLock<Config>>) -> Self {
        Self { config }
    }

    /// Axum route pattern of the ingress endpoint.
    #[must_use]
    pub fn ingress_route(api_route: &str) -> String {
        let api = api_route.trim_matches('/');
        if api.is_empty() {
            format!("/{NOTIFICATION_SEGMENT}/{{device}}/{{resource}}")
        } else {
            format!("/{api}/{NOTIFICATION_SEGMENT}/{{device}}/{{resource}}")
        }
    }

    /// Route pattern of the ping endpoint.
    #[must_use]
    pub fn ping_route(api_route: &str) -> String {
        let api = api_route.trim_matches('/');
        if api.is_empty() {
            "/ping".to_string()
        } else {
            format!("/{api}/ping")
        }
    }

    /// URL a camera should push notifications for `(device, resource)` to.
    ///
    /// Path segments are percent-encoded.
    pub fn notification_url(&self, device: &str, resource: &str) -> OnvifResult<String> {
        let (base, api_route) = {
            let config = self.config.read();
            (config.base_notification_url.clone(), config.api_route.clone())
        };

        let mut url = Url::parse(&base).map_err(|e| {
            OnvifError::contract(format!("invalid base_notification_url {base:?}: {e}"))
        })?;
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                OnvifError::contract(format!("base_notification_url {base:?} cannot carry a path"))
            })?;
            segments.pop_if_empty();
            segments.extend(api_route.split('/').filter(|s| !s.is_empty()));
            segments.push(NOTIFICATION_SEGMENT);
            segments.push(device);
            segments.push(resource);
        }
        Ok(url.to_string())
    }
}
