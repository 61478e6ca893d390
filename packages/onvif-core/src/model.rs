//! Device data model shared between the host and the core.
//!
//! Devices are owned by the host registry; the core only ever holds
//! snapshots and writes back through `patch_device`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::protocol_constants::{DEFAULT_ONVIF_PORT, UNKNOWN_DEVICE_PREFIX, URN_UUID_SCHEME};
use crate::utils::starts_with_ignore_ascii_case;

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

/// Reachability tier of a camera, ordered from worst to best.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    #[default]
    Unreachable,
    Reachable,
    UpWithoutAuth,
    UpWithAuth,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unreachable => "UNREACHABLE",
            Self::Reachable => "REACHABLE",
            Self::UpWithoutAuth => "UP_WITHOUT_AUTH",
            Self::UpWithAuth => "UP_WITH_AUTH",
        };
        f.write_str(s)
    }
}

impl FromStr for DeviceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UNREACHABLE" => Ok(Self::Unreachable),
            "REACHABLE" => Ok(Self::Reachable),
            "UP_WITHOUT_AUTH" => Ok(Self::UpWithoutAuth),
            "UP_WITH_AUTH" => Ok(Self::UpWithAuth),
            other => Err(format!("unknown device status: {other}")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Device
// ─────────────────────────────────────────────────────────────────────────────

/// ONVIF protocol properties stored on every camera device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OnvifProperties {
    pub address: String,
    pub port: Option<u16>,
    pub mac: String,
    pub endpoint_ref: String,
    pub manufacturer: String,
    pub model: String,
    pub firmware: String,
    pub serial: String,
    pub hardware_id: String,
    pub friendly_name: String,
    /// Secret used when no MAC mapping applies. Empty = config default.
    pub secret_name: String,
    pub device_status: DeviceStatus,
    /// Unix millis of the last successful contact.
    pub last_seen: Option<u64>,
}

impl OnvifProperties {
    /// Returns `address:port` (port defaults to 80), or `None` without an address.
    pub fn xaddr(&self) -> Option<String> {
        let address = self.address.trim();
        if address.is_empty() {
            return None;
        }
        Some(build_xaddr(address, self.port))
    }
}

/// A resource exposed by a device profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resource {
    pub name: String,
    /// Free-form attributes (`service`, `getFunction`, `setFunction`, ...).
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// A camera as known to the host registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Device {
    pub name: String,
    pub labels: Vec<String>,
    pub resources: Vec<Resource>,
    pub onvif: OnvifProperties,
    pub custom_metadata: BTreeMap<String, String>,
}

impl Device {
    /// Creates a device with the given name and protocol properties.
    pub fn new(name: impl Into<String>, onvif: OnvifProperties) -> Self {
        Self {
            name: name.into(),
            onvif,
            ..Default::default()
        }
    }

    /// Looks up a resource by name.
    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.name == name)
    }

    /// Returns true while the device still carries a placeholder name.
    pub fn is_unidentified(&self) -> bool {
        self.name.starts_with(UNKNOWN_DEVICE_PREFIX)
    }
}

/// Partial update applied through the host's `patch_device`.
#[derive(Debug, Clone, Default)]
pub struct DevicePatch {
    pub onvif: Option<OnvifProperties>,
    pub custom_metadata: Option<BTreeMap<String, String>>,
    pub labels: Option<Vec<String>>,
}

/// A device surfaced by discovery, not yet provisioned by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredDevice {
    pub name: String,
    pub labels: Vec<String>,
    pub onvif: OnvifProperties,
    /// Raw WS-Discovery scopes (`onvif://www.onvif.org/...`).
    pub scopes: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Readings
// ─────────────────────────────────────────────────────────────────────────────

/// Value carried by a reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum ReadingValue {
    Object(serde_json::Value),
    String(String),
    Bool(bool),
    Binary(Vec<u8>),
}

/// One reading pushed to the host (command result or async event).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandValue {
    pub device_name: String,
    pub resource_name: String,
    pub value: ReadingValue,
    /// Unix millis when the value was produced.
    pub origin: u64,
}

impl CommandValue {
    pub fn new(
        device_name: impl Into<String>,
        resource_name: impl Into<String>,
        value: ReadingValue,
    ) -> Self {
        Self {
            device_name: device_name.into(),
            resource_name: resource_name.into(),
            value,
            origin: crate::utils::now_millis(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Naming
// ─────────────────────────────────────────────────────────────────────────────

fn reserved_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9\-_~]+").expect("static regex"))
}

/// Replaces runs of reserved URI characters with `-` and trims dashes.
pub fn sanitize_name(s: &str) -> String {
    reserved_chars()
        .replace_all(s, "-")
        .trim_matches('-')
        .to_string()
}

/// Builds `<manufacturer>-<model>-<endpoint-ref>` with every token sanitized.
pub fn build_name(manufacturer: &str, model: &str, endpoint_ref: &str) -> String {
    format!(
        "{}-{}-{}",
        sanitize_name(manufacturer),
        sanitize_name(model),
        sanitize_name(endpoint_ref)
    )
}

/// Endpoint reference without its `urn:uuid:` scheme.
pub fn endpoint_ref_id(endpoint_ref: &str) -> &str {
    let trimmed = endpoint_ref.trim();
    if starts_with_ignore_ascii_case(trimmed, URN_UUID_SCHEME) {
        &trimmed[URN_UUID_SCHEME.len()..]
    } else {
        trimmed
    }
}

/// Name given to a newly discovered camera: [`build_name`] over the bare
/// endpoint id, so `urn:uuid:A` yields `<mfr>-<model>-A`.
pub fn discovered_name(manufacturer: &str, model: &str, endpoint_ref: &str) -> String {
    build_name(manufacturer, model, endpoint_ref_id(endpoint_ref))
}

// ─────────────────────────────────────────────────────────────────────────────
// Addresses
// ─────────────────────────────────────────────────────────────────────────────

/// Formats `address:port`, defaulting the port to 80.
pub fn build_xaddr(address: &str, port: Option<u16>) -> String {
    format!("{}:{}", address, port.unwrap_or(DEFAULT_ONVIF_PORT))
}

/// Splits `host[:port]` or a full `http://host[:port]/path` URL.
///
/// The port defaults to 80 when absent.
pub fn split_host_port(s: &str) -> Option<(String, u16)> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if s.contains("://") {
        let url = reqwest::Url::parse(s).ok()?;
        let host = url.host_str()?.to_string();
        return Some((host, url.port().unwrap_or(DEFAULT_ONVIF_PORT)));
    }
    match s.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            let port = port.parse().ok()?;
            Some((host.to_string(), port))
        }
        _ => Some((s.to_string(), DEFAULT_ONVIF_PORT)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MAC addresses
// ─────────────────────────────────────────────────────────────────────────────

fn mac_digits(s: &str) -> Option<String> {
    let s = s.trim();
    let digits: String = match s.len() {
        12 => s.to_string(),
        17 => {
            let sep = s.as_bytes()[2];
            if sep != b':' && sep != b'-' {
                return None;
            }
            let parts: Vec<&str> = s.split(sep as char).collect();
            if parts.len() != 6 || parts.iter().any(|p| p.len() != 2) {
                return None;
            }
            parts.concat()
        }
        _ => return None,
    };
    digits
        .chars()
        .all(|c| c.is_ascii_hexdigit())
        .then(|| digits.to_ascii_lowercase())
}

/// Accepts `aa:bb:cc:dd:ee:ff`, `aa-bb-cc-dd-ee-ff` and `aabbccddeeff` in any case.
pub fn is_valid_mac(s: &str) -> bool {
    mac_digits(s).is_some()
}

/// Canonicalises a MAC to lowercase colon form.
///
/// Input that is not a MAC is returned trimmed and lowercased, so the
/// function stays idempotent on any string.
pub fn sanitize_mac(s: &str) -> String {
    match mac_digits(s) {
        Some(digits) => digits
            .as_bytes()
            .chunks(2)
            .map(|pair| String::from_utf8_lossy(pair).into_owned())
            .collect::<Vec<_>>()
            .join(":"),
        None => s.trim().to_ascii_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_tiers_are_ordered() {
        assert!(DeviceStatus::Unreachable < DeviceStatus::Reachable);
        assert!(DeviceStatus::Reachable < DeviceStatus::UpWithoutAuth);
        assert!(DeviceStatus::UpWithoutAuth < DeviceStatus::UpWithAuth);
        assert_eq!(
            "up_with_auth".parse::<DeviceStatus>().unwrap(),
            DeviceStatus::UpWithAuth
        );
    }

    #[test]
    fn sanitize_replaces_reserved_runs_and_trims() {
        assert_eq!(sanitize_name("urn:uuid:abc"), "urn-uuid-abc");
        assert_eq!(sanitize_name("  Acme Corp.  "), "Acme-Corp");
        assert_eq!(sanitize_name("a~b_c-d"), "a~b_c-d");
    }

    #[test]
    fn build_name_is_stable_under_sanitize() {
        let (m, n, e) = ("Acme, Inc.", "Cam/1", "urn:uuid:abc");
        assert_eq!(
            build_name(&sanitize_name(m), &sanitize_name(n), &sanitize_name(e)),
            build_name(m, n, e)
        );
        assert_eq!(build_name("Acme", "Cam1", "urn:uuid:abc"), "Acme-Cam1-urn-uuid-abc");
    }

    #[test]
    fn discovered_names_drop_the_uuid_scheme() {
        assert_eq!(endpoint_ref_id("urn:uuid:A"), "A");
        assert_eq!(endpoint_ref_id("URN:UUID:a-b"), "a-b");
        assert_eq!(endpoint_ref_id("uuid-only"), "uuid-only");
        assert_eq!(discovered_name("Acme", "Cam1", "urn:uuid:A"), "Acme-Cam1-A");
        assert_eq!(
            discovered_name("Acme", "Cam 1", "urn:uuid:1234-ab"),
            "Acme-Cam-1-1234-ab"
        );
    }

    #[test]
    fn xaddr_defaults_port() {
        let props = OnvifProperties {
            address: "10.0.0.5".into(),
            ..Default::default()
        };
        assert_eq!(props.xaddr().as_deref(), Some("10.0.0.5:80"));
        assert_eq!(OnvifProperties::default().xaddr(), None);
    }

    #[test]
    fn split_host_port_handles_urls_and_pairs() {
        assert_eq!(
            split_host_port("http://10.0.0.5:8080/onvif/device_service"),
            Some(("10.0.0.5".into(), 8080))
        );
        assert_eq!(split_host_port("10.0.0.5"), Some(("10.0.0.5".into(), 80)));
        assert_eq!(split_host_port("10.0.0.5:81"), Some(("10.0.0.5".into(), 81)));
        assert_eq!(split_host_port(""), None);
    }

    #[test]
    fn mac_forms_are_accepted() {
        assert!(is_valid_mac("AA:bb:cc:dd:ee:ff"));
        assert!(is_valid_mac("aa-bb-cc-dd-ee-ff"));
        assert!(is_valid_mac("AABBCCDDEEFF"));
        assert!(!is_valid_mac("aa:bb:cc:dd:ee"));
        assert!(!is_valid_mac("aa:bb-cc:dd:ee:ff"));
        assert!(!is_valid_mac("zz:bb:cc:dd:ee:ff"));
    }

    #[test]
    fn sanitize_mac_is_idempotent() {
        for input in ["AA-BB-CC-DD-EE-FF", "aabbccddeeff", " not-a-mac "] {
            let once = sanitize_mac(input);
            assert_eq!(sanitize_mac(&once), once);
        }
        assert_eq!(sanitize_mac("AABBCCDDEEFF"), "aa:bb:cc:dd:ee:ff");
    }
}
