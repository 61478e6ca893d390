//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by external specifications (ONVIF, WS-Discovery,
//! WS-BaseNotification) or by the subscription engine's renew contract.

// ─────────────────────────────────────────────────────────────────────────────
// SOAP / XML Namespaces
// ─────────────────────────────────────────────────────────────────────────────

/// SOAP 1.2 envelope namespace.
pub const NS_SOAP_ENV: &str = "http://www.w3.org/2003/05/soap-envelope";

/// Namespace prefixes declared on every outgoing envelope.
///
/// Order is preserved in the serialized `Envelope` element.
pub const ENVELOPE_NAMESPACES: &[(&str, &str)] = &[
    ("s", NS_SOAP_ENV),
    ("tds", "http://www.onvif.org/ver10/device/wsdl"),
    ("trt", "http://www.onvif.org/ver10/media/wsdl"),
    ("tr2", "http://www.onvif.org/ver20/media/wsdl"),
    ("tev", "http://www.onvif.org/ver10/events/wsdl"),
    ("tptz", "http://www.onvif.org/ver20/ptz/wsdl"),
    ("tan", "http://www.onvif.org/ver20/analytics/wsdl"),
    ("timg", "http://www.onvif.org/ver20/imaging/wsdl"),
    ("tt", "http://www.onvif.org/ver10/schema"),
    ("wsnt", "http://docs.oasis-open.org/wsn/b-2"),
    ("wsa", "http://www.w3.org/2005/08/addressing"),
    (
        "wsse",
        "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd",
    ),
    (
        "wsu",
        "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd",
    ),
    ("tns1", "http://www.onvif.org/ver10/topics"),
];

/// WS-Security password digest type URI.
pub const WSSE_PASSWORD_DIGEST: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest";

/// WS-Security nonce encoding type URI.
pub const WSSE_BASE64_ENCODING: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary";

/// Content type for SOAP 1.2 requests.
pub const SOAP_CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";

// ─────────────────────────────────────────────────────────────────────────────
// WS-Discovery
// ─────────────────────────────────────────────────────────────────────────────

/// WS-Discovery multicast group and port.
pub const WS_DISCOVERY_MULTICAST_ADDR: &str = "239.255.255.250:3702";

/// Default WS-Discovery unicast port probed during netscan.
pub const WS_DISCOVERY_PORT: u16 = 3702;

/// Read deadline for multicast probe responses (milliseconds).
pub const MULTICAST_READ_DEADLINE_MS: u64 = 1000;

/// WS-Discovery 2005/04 namespace used by ONVIF devices.
pub const NS_WS_DISCOVERY: &str = "http://schemas.xmlsoap.org/ws/2005/04/discovery";

/// WS-Addressing namespace used by WS-Discovery 2005/04.
pub const NS_WS_ADDRESSING_2004: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";

/// Device type searched for in WS-Discovery probes.
pub const NVT_DEVICE_TYPE: &str = "dn:NetworkVideoTransmitter";

/// Namespace of the `dn:` prefix in probe types.
pub const NS_NETWORK_VIDEO: &str = "http://www.onvif.org/ver10/network/wsdl";

/// Maximum UDP datagram size accepted from probe responses.
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

// ─────────────────────────────────────────────────────────────────────────────
// Device addressing
// ─────────────────────────────────────────────────────────────────────────────

/// Default HTTP port when a device address carries none.
pub const DEFAULT_ONVIF_PORT: u16 = 80;

/// Path of the device management service on every ONVIF device.
pub const DEVICE_SERVICE_PATH: &str = "/onvif/device_service";

/// Name prefix for devices that have not been identified yet.
pub const UNKNOWN_DEVICE_PREFIX: &str = "unknown_unknown_";

/// Scheme of WS-Discovery endpoint references, dropped from discovered names.
pub const URN_UUID_SCHEME: &str = "urn:uuid:";

/// Label attached to devices created by discovery without enrichment.
pub const AUTO_DISCOVERY_LABEL: &str = "auto-discovery";

/// Secret name that disables authentication.
pub const NO_AUTH_SECRET: &str = "noauth";

// ─────────────────────────────────────────────────────────────────────────────
// Subscriptions
// ─────────────────────────────────────────────────────────────────────────────

/// Renew is sent this long before the termination time elapses (seconds).
pub const RENEW_BUFFER_SECS: u64 = 10;

/// Smallest accepted initial termination time (seconds).
pub const MIN_TERMINATION_SECS: u64 = RENEW_BUFFER_SECS + 1;

/// Largest accepted `PullMessages` long-poll timeout (seconds).
pub const MAX_MESSAGE_TIMEOUT_SECS: u64 = 3600;

/// Pause before retrying a failed subscription create (milliseconds).
pub const SUBSCRIPTION_RETRY_DELAY_MS: u64 = 1000;

/// Maximum size of an inbound notification body (bytes).
pub const MAX_NOTIFY_BODY_SIZE: usize = 1024 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Status poller / discovery scheduling
// ─────────────────────────────────────────────────────────────────────────────

/// Upper bound for `check_status_interval` (seconds).
pub const MAX_STATUS_INTERVAL_SECS: u64 = 300;

/// Debounce applied to discovery-relevant config changes (seconds).
pub const DISCOVERY_DEBOUNCE_SECS: u64 = 10;

/// Capacity of the netscan address channel.
pub const NETSCAN_CHANNEL_CAPACITY: usize = 256;

// ─────────────────────────────────────────────────────────────────────────────
// Custom functions
// ─────────────────────────────────────────────────────────────────────────────

/// Marker returned by `GetCustomMetadata` for unknown keys.
pub const METADATA_MISSING_MARKER: &str = "does not exist";

/// Service attribute value that routes a resource to the custom functions.
pub const CUSTOM_SERVICE: &str = "Custom";

/// Resource events are published on when the subscribing resource names none.
pub const DEFAULT_EVENT_RESOURCE: &str = "CameraEvent";

/// Query parameter carrying base64-encoded JSON command input.
pub const JSON_OBJECT_PARAM: &str = "jsonObject";

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Service identifier returned by the ping route.
pub const SERVICE_ID: &str = "onvif-camera";
