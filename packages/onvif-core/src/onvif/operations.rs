//! Typed responses for the operations the core inspects.
//!
//! Every other operation is passed through as [`OperationResponse::Unknown`]
//! and only converted to JSON when handed back to the host.

use chrono::{NaiveDate, SecondsFormat};
use serde::Serialize;
use serde_json::Value;

use crate::soap::xml::xml_to_json;
use crate::soap::{SoapError, SoapResult};

/// Response of `GetDeviceInformation`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceInformation {
    pub manufacturer: String,
    pub model: String,
    pub firmware_version: String,
    pub serial_number: String,
    pub hardware_id: String,
}

/// One entry of `GetNetworkInterfaces`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkInterface {
    pub token: String,
    pub enabled: bool,
    pub name: String,
    pub hw_address: String,
    #[serde(rename = "MTU")]
    pub mtu: Option<u32>,
}

/// Response of `GetSystemDateAndTime`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SystemDateAndTime {
    pub date_time_type: String,
    /// RFC 3339 UTC timestamp, when the camera reports one.
    #[serde(rename = "UTCDateTime")]
    pub utc_date_time: Option<String>,
}

/// Subscription handle returned by `CreatePullPointSubscription` and `Subscribe`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubscriptionReference {
    pub address: String,
    pub current_time: Option<String>,
    pub termination_time: Option<String>,
}

/// Decoded operation response.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResponse {
    DeviceInformation(DeviceInformation),
    NetworkInterfaces(Vec<NetworkInterface>),
    EndpointReference(String),
    SystemDateAndTime(SystemDateAndTime),
    SnapshotUri(String),
    SetNetworkInterfaces { reboot_needed: bool },
    SystemReboot { message: String },
    Subscription(SubscriptionReference),
    /// Any other operation: the raw inner XML of `Envelope/Body`.
    Unknown(String),
}

impl OperationResponse {
    /// Decodes the body of `operation`'s response.
    pub fn parse(operation: &str, body: &str) -> SoapResult<Self> {
        let parsed = match operation {
            "GetDeviceInformation" => {
                let r = response_element(operation, body)?;
                Self::DeviceInformation(DeviceInformation {
                    manufacturer: text(&r, "Manufacturer"),
                    model: text(&r, "Model"),
                    firmware_version: text(&r, "FirmwareVersion"),
                    serial_number: text(&r, "SerialNumber"),
                    hardware_id: text(&r, "HardwareId"),
                })
            }
            "GetNetworkInterfaces" => {
                let r = response_element(operation, body)?;
                let interfaces = list(r.get("NetworkInterfaces"))
                    .into_iter()
                    .map(|ni| {
                        let info = ni.get("Info").cloned().unwrap_or(Value::Null);
                        NetworkInterface {
                            token: text(ni, "@token"),
                            enabled: text(ni, "Enabled").eq_ignore_ascii_case("true"),
                            name: text(&info, "Name"),
                            hw_address: text(&info, "HwAddress"),
                            mtu: text(&info, "MTU").parse().ok(),
                        }
                    })
                    .collect();
                Self::NetworkInterfaces(interfaces)
            }
            "GetEndpointReference" => {
                let r = response_element(operation, body)?;
                Self::EndpointReference(text(&r, "GUID"))
            }
            "GetSystemDateAndTime" => {
                let r = response_element(operation, body)?;
                let sdt = r.get("SystemDateAndTime").cloned().unwrap_or(Value::Null);
                Self::SystemDateAndTime(SystemDateAndTime {
                    date_time_type: text(&sdt, "DateTimeType"),
                    utc_date_time: sdt.get("UTCDateTime").and_then(utc_timestamp),
                })
            }
            "GetSnapshotUri" => {
                let r = response_element(operation, body)?;
                let media_uri = r.get("MediaUri").cloned().unwrap_or(Value::Null);
                Self::SnapshotUri(text(&media_uri, "Uri"))
            }
            "SetNetworkInterfaces" => {
                let r = response_element(operation, body)?;
                Self::SetNetworkInterfaces {
                    reboot_needed: text(&r, "RebootNeeded").eq_ignore_ascii_case("true"),
                }
            }
            "SystemReboot" => {
                let r = response_element(operation, body)?;
                Self::SystemReboot {
                    message: text(&r, "Message"),
                }
            }
            "CreatePullPointSubscription" | "Subscribe" => {
                let r = response_element(operation, body)?;
                let reference = r.get("SubscriptionReference").cloned().unwrap_or(Value::Null);
                let address = text(&reference, "Address");
                if address.is_empty() {
                    return Err(SoapError::Decode(format!(
                        "{operation} response carries no subscription address"
                    )));
                }
                Self::Subscription(SubscriptionReference {
                    address,
                    current_time: non_empty(text(&r, "CurrentTime")),
                    termination_time: non_empty(text(&r, "TerminationTime")),
                })
            }
            _ => Self::Unknown(body.trim().to_string()),
        };
        Ok(parsed)
    }

    /// Converts the response into the JSON handed back to the host.
    pub fn to_json(&self) -> SoapResult<Value> {
        let value = match self {
            Self::DeviceInformation(info) => serde_json::to_value(info),
            Self::NetworkInterfaces(list) => serde_json::to_value(list),
            Self::EndpointReference(guid) => Ok(serde_json::json!({ "GUID": guid })),
            Self::SystemDateAndTime(sdt) => serde_json::to_value(sdt),
            Self::SnapshotUri(uri) => Ok(serde_json::json!({ "Uri": uri })),
            Self::SetNetworkInterfaces { reboot_needed } => {
                Ok(serde_json::json!({ "RebootNeeded": reboot_needed }))
            }
            Self::SystemReboot { message } => Ok(serde_json::json!({ "Message": message })),
            Self::Subscription(reference) => serde_json::to_value(reference),
            Self::Unknown(xml) => return xml_to_json(xml),
        };
        value.map_err(|e| SoapError::Decode(e.to_string()))
    }
}

/// Returns the `<operation>Response` element of a body as JSON.
fn response_element(operation: &str, body: &str) -> SoapResult<Value> {
    let key = format!("{operation}Response");
    let mut json = xml_to_json(body)?;
    json.get_mut(&key)
        .map(Value::take)
        .ok_or_else(|| SoapError::Decode(format!("missing {key} element")))
}

/// Returns the text of `key` under `node`, whether a leaf or `#text`.
pub(crate) fn text(node: &Value, key: &str) -> String {
    match node.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(map)) => map
            .get("#text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

/// Treats a single element or an array of elements uniformly.
pub(crate) fn list(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
        None => Vec::new(),
    }
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

fn utc_timestamp(utc: &Value) -> Option<String> {
    let time = utc.get("Time")?;
    let date = utc.get("Date")?;
    let num = |node: &Value, key: &str| text(node, key).parse::<u32>().ok();
    let year = text(date, "Year").parse::<i32>().ok()?;
    let datetime = NaiveDate::from_ymd_opt(year, num(date, "Month")?, num(date, "Day")?)?
        .and_hms_opt(num(time, "Hour")?, num(time, "Minute")?, num(time, "Second")?)?
        .and_utc();
    Some(datetime.to_rfc3339_opts(SecondsFormat::Secs, true))
}
