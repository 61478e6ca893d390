//! Service endpoint map resolved from `GetCapabilities` and `GetServices`.

use std::collections::BTreeMap;

use super::operations::{list, text};
use super::services::OnvifService;
use crate::protocol_constants::DEVICE_SERVICE_PATH;
use crate::soap::xml::xml_to_json;
use crate::soap::{SoapError, SoapResult};

/// Service → URL map for one camera.
///
/// Capability of a service is its presence in the map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoints {
    xaddr: String,
    urls: BTreeMap<OnvifService, String>,
}

impl Endpoints {
    /// Creates a map holding only the well-known device service URL.
    pub fn for_xaddr(xaddr: &str) -> Self {
        let mut urls = BTreeMap::new();
        urls.insert(OnvifService::Device, device_service_url(xaddr));
        Self {
            xaddr: xaddr.to_string(),
            urls,
        }
    }

    /// Looks up the endpoint of a service.
    pub fn get(&self, service: OnvifService) -> SoapResult<&str> {
        self.urls
            .get(&service)
            .map(String::as_str)
            .ok_or_else(|| SoapError::EndpointNotFound(service.to_string()))
    }

    pub fn contains(&self, service: OnvifService) -> bool {
        self.urls.contains_key(&service)
    }

    pub fn services(&self) -> impl Iterator<Item = OnvifService> + '_ {
        self.urls.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Records an endpoint, rewriting its host to the camera's xaddr.
    ///
    /// Cameras behind NAT or with several interfaces often report an
    /// address the driver cannot reach.
    pub fn insert(&mut self, service: OnvifService, url: &str) {
        let url = url.trim();
        if url.is_empty() {
            return;
        }
        self.urls.insert(service, canonicalize(url, &self.xaddr));
    }

    /// Merges the body of a `GetCapabilities` response.
    ///
    /// Returns the number of services found.
    pub fn merge_capabilities(&mut self, body: &str) -> SoapResult<usize> {
        let json = xml_to_json(body)?;
        let caps = json
            .get("GetCapabilitiesResponse")
            .and_then(|r| r.get("Capabilities"))
            .ok_or_else(|| SoapError::Decode("missing Capabilities element".into()))?;

        let mut found = 0;
        for service in OnvifService::ALL {
            let Some(element) = service.capability_name().and_then(|n| caps.get(n)) else {
                continue;
            };
            let url = text(element, "XAddr");
            if !url.is_empty() {
                self.insert(service, &url);
                found += 1;
            }
        }
        Ok(found)
    }

    /// Merges the body of a `GetServices` response.
    ///
    /// Unknown namespaces are ignored. Returns the number of services found.
    pub fn merge_services(&mut self, body: &str) -> SoapResult<usize> {
        let json = xml_to_json(body)?;
        let services = json
            .get("GetServicesResponse")
            .ok_or_else(|| SoapError::Decode("missing GetServicesResponse element".into()))?;

        let mut found = 0;
        for entry in list(services.get("Service")) {
            let Some(service) = OnvifService::from_namespace(&text(entry, "Namespace")) else {
                continue;
            };
            let url = text(entry, "XAddr");
            if !url.is_empty() {
                self.insert(service, &url);
                found += 1;
            }
        }
        Ok(found)
    }
}

/// Returns `http://<xaddr>/onvif/device_service`.
pub fn device_service_url(xaddr: &str) -> String {
    format!("http://{xaddr}{DEVICE_SERVICE_PATH}")
}

/// Replaces the host and port of `url` with `xaddr`, keeping scheme and path.
pub fn canonicalize(url: &str, xaddr: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => {
            let mut out = format!("{}://{}{}", parsed.scheme(), xaddr, parsed.path());
            if let Some(q) = parsed.query() {
                out.push('?');
                out.push_str(q);
            }
            out
        }
        Err(_) => {
            log::debug!("[ONVIF] Keeping unparsable endpoint {:?}", url);
            url.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{GET_CAPABILITIES_BODY, GET_SERVICES_BODY};

    #[test]
    fn default_map_only_has_device_service() {
        let endpoints = Endpoints::for_xaddr("10.0.0.9:8080");
        assert_eq!(
            endpoints.get(OnvifService::Device).unwrap(),
            "http://10.0.0.9:8080/onvif/device_service"
        );
        assert!(matches!(
            endpoints.get(OnvifService::Media),
            Err(SoapError::EndpointNotFound(_))
        ));
    }

    #[test]
    fn capabilities_are_canonicalised_to_xaddr() {
        let mut endpoints = Endpoints::for_xaddr("127.0.0.1:8000");
        let found = endpoints.merge_capabilities(GET_CAPABILITIES_BODY).unwrap();
        assert_eq!(found, 6);
        assert_eq!(
            endpoints.get(OnvifService::Event).unwrap(),
            "http://127.0.0.1:8000/onvif/event_service"
        );
        assert_eq!(
            endpoints.get(OnvifService::Ptz).unwrap(),
            "http://127.0.0.1:8000/onvif/ptz_service"
        );
        assert!(!endpoints.contains(OnvifService::Media2));
    }

    #[test]
    fn services_add_media2_and_skip_unknown_namespaces() {
        let mut endpoints = Endpoints::for_xaddr("127.0.0.1:8000");
        let found = endpoints.merge_services(GET_SERVICES_BODY).unwrap();
        assert_eq!(found, 2);
        assert_eq!(
            endpoints.get(OnvifService::Media2).unwrap(),
            "http://127.0.0.1:8000/onvif/media2_service"
        );
        assert_eq!(endpoints.len(), 2);
    }

    #[test]
    fn canonicalize_keeps_path_and_query() {
        assert_eq!(
            canonicalize("http://192.168.0.4:81/onvif/media?x=1", "10.1.1.1:80"),
            "http://10.1.1.1:80/onvif/media?x=1"
        );
        assert_eq!(canonicalize("not a url", "10.1.1.1:80"), "not a url");
    }
}
