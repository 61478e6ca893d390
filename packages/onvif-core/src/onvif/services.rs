//! ONVIF service definitions.
//!
//! Single source of truth for service namespaces and the XML prefixes used
//! when serializing operations for each service.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// ONVIF services an operation can be addressed to.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum OnvifService {
    /// Device management (identity, network, time, reboot).
    Device,
    /// Media profiles and stream/snapshot URIs.
    Media,
    /// Media2 (Profile T); only advertised through `GetServices`.
    Media2,
    #[serde(rename = "PTZ")]
    Ptz,
    Imaging,
    Analytics,
    /// Events (PullPoint and BaseNotification).
    Event,
}

impl OnvifService {
    pub const ALL: [OnvifService; 7] = [
        Self::Device,
        Self::Media,
        Self::Media2,
        Self::Ptz,
        Self::Imaging,
        Self::Analytics,
        Self::Event,
    ];

    /// Returns the WSDL namespace advertised by `GetServices`.
    #[must_use]
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::Device => "http://www.onvif.org/ver10/device/wsdl",
            Self::Media => "http://www.onvif.org/ver10/media/wsdl",
            Self::Media2 => "http://www.onvif.org/ver20/media/wsdl",
            Self::Ptz => "http://www.onvif.org/ver20/ptz/wsdl",
            Self::Imaging => "http://www.onvif.org/ver20/imaging/wsdl",
            Self::Analytics => "http://www.onvif.org/ver20/analytics/wsdl",
            Self::Event => "http://www.onvif.org/ver10/events/wsdl",
        }
    }

    /// Returns the envelope prefix bound to [`namespace`](Self::namespace).
    #[must_use]
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Device => "tds",
            Self::Media => "trt",
            Self::Media2 => "tr2",
            Self::Ptz => "tptz",
            Self::Imaging => "timg",
            Self::Analytics => "tan",
            Self::Event => "tev",
        }
    }

    /// Element name of this service inside a `GetCapabilities` response.
    ///
    /// Media2 has no capability element and returns `None`.
    #[must_use]
    pub fn capability_name(&self) -> Option<&'static str> {
        match self {
            Self::Device => Some("Device"),
            Self::Media => Some("Media"),
            Self::Media2 => None,
            Self::Ptz => Some("PTZ"),
            Self::Imaging => Some("Imaging"),
            Self::Analytics => Some("Analytics"),
            Self::Event => Some("Events"),
        }
    }

    /// Resolves a `GetServices` namespace to a service.
    #[must_use]
    pub fn from_namespace(ns: &str) -> Option<Self> {
        let ns = ns.trim();
        Self::ALL.into_iter().find(|s| s.namespace() == ns)
    }

    /// Human-readable name, as used in resource attributes.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Device => "Device",
            Self::Media => "Media",
            Self::Media2 => "Media2",
            Self::Ptz => "PTZ",
            Self::Imaging => "Imaging",
            Self::Analytics => "Analytics",
            Self::Event => "Event",
        }
    }
}

impl fmt::Display for OnvifService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OnvifService {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "device" => Ok(Self::Device),
            "media" => Ok(Self::Media),
            "media2" => Ok(Self::Media2),
            "ptz" => Ok(Self::Ptz),
            "imaging" => Ok(Self::Imaging),
            "analytics" => Ok(Self::Analytics),
            "event" | "events" => Ok(Self::Event),
            other => Err(format!("unknown ONVIF service: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!("ptz".parse::<OnvifService>().unwrap(), OnvifService::Ptz);
        assert_eq!("Events".parse::<OnvifService>().unwrap(), OnvifService::Event);
        assert!("Custom".parse::<OnvifService>().is_err());
    }

    #[test]
    fn namespaces_round_trip() {
        for service in OnvifService::ALL {
            assert_eq!(OnvifService::from_namespace(service.namespace()), Some(service));
        }
        assert_eq!(OnvifService::from_namespace("http://example.com/x"), None);
    }
}
