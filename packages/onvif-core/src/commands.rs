//! Read/write command dispatch.
//!
//! A resource's `service` attribute selects the target: an ONVIF service
//! name routes to a SOAP call on the device's client, `Custom` routes to the
//! in-process functions below. The function comes from `getFunction` (reads)
//! or `setFunction` (writes).

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use serde_json::{Map, Value};

use crate::context::UrlBuilder;
use crate::error::{OnvifError, OnvifResult};
use crate::events::{base_notification, pullpoint, SubscribeType, SubscriptionRequest};
use crate::host::{DeviceRegistry, ReadingsSender};
use crate::model::{
    is_valid_mac, sanitize_mac, CommandValue, Device, DevicePatch, OnvifProperties, ReadingValue,
};
use crate::onvif::{OnvifClient, OnvifService};
use crate::protocol_constants::{
    CUSTOM_SERVICE, DEFAULT_EVENT_RESOURCE, JSON_OBJECT_PARAM, METADATA_MISSING_MARKER,
};
use crate::registry::ClientRegistry;

/// One command addressed to a device resource.
#[derive(Debug, Clone, Default)]
pub struct CommandRequest {
    pub resource_name: String,
    /// Attributes of the resource (`service`, `getFunction`, `setFunction`, ...).
    pub attributes: Map<String, Value>,
    /// Raw URL query of a read, e.g. `jsonObject=eyJ...`.
    pub query: String,
}

impl CommandRequest {
    pub fn new(resource_name: impl Into<String>, attributes: Map<String, Value>) -> Self {
        Self {
            resource_name: resource_name.into(),
            attributes,
            query: String::new(),
        }
    }

    /// Builds a request from the device's resource definition.
    pub fn for_resource(device: &Device, resource_name: &str) -> OnvifResult<Self> {
        let resource = device.resource(resource_name).ok_or_else(|| {
            OnvifError::NotFound(format!(
                "resource {resource_name} not found on device {}",
                device.name
            ))
        })?;
        Ok(Self::new(resource_name, resource.attributes.clone()))
    }

    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn function(&self, key: &str) -> OnvifResult<&str> {
        self.attribute(key).ok_or_else(|| {
            OnvifError::contract(format!(
                "resource {} has no {key} attribute",
                self.resource_name
            ))
        })
    }

    fn target(&self) -> OnvifResult<Target> {
        let service = self.attribute("service").ok_or_else(|| {
            OnvifError::contract(format!(
                "resource {} has no service attribute",
                self.resource_name
            ))
        })?;
        if service.eq_ignore_ascii_case(CUSTOM_SERVICE) {
            return Ok(Target::Custom);
        }
        service
            .parse::<OnvifService>()
            .map(Target::Onvif)
            .map_err(OnvifError::ContractInvalid)
    }

    /// Resource events of a subscription are published on.
    fn event_resource(&self) -> String {
        self.attribute("eventResource")
            .unwrap_or(DEFAULT_EVENT_RESOURCE)
            .to_string()
    }
}

enum Target {
    Onvif(OnvifService),
    Custom,
}

/// Decodes the `jsonObject=<base64>` query parameter into JSON.
///
/// A missing parameter yields `Value::Null`.
pub fn decode_json_query(query: &str) -> OnvifResult<Value> {
    let encoded = query
        .trim_start_matches('?')
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == JSON_OBJECT_PARAM)
        .map(|(_, value)| value.trim());

    let Some(encoded) = encoded.filter(|v| !v.is_empty()) else {
        return Ok(Value::Null);
    };
    let bytes = STANDARD
        .decode(encoded)
        .or_else(|_| URL_SAFE.decode(encoded))
        .map_err(|e| OnvifError::contract(format!("{JSON_OBJECT_PARAM} is not base64: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| OnvifError::contract(format!("{JSON_OBJECT_PARAM} is not JSON: {e}")))
}

/// Executes commands against devices.
pub struct CommandFacade {
    devices: Arc<dyn DeviceRegistry>,
    registry: Arc<ClientRegistry>,
    readings: ReadingsSender,
    urls: UrlBuilder,
}

impl CommandFacade {
    pub fn new(
        devices: Arc<dyn DeviceRegistry>,
        registry: Arc<ClientRegistry>,
        readings: ReadingsSender,
        urls: UrlBuilder,
    ) -> Self {
        Self {
            devices,
            registry,
            readings,
            urls,
        }
    }

    /// Executes a read and returns its reading.
    pub async fn read(&self, device: &Device, request: &CommandRequest) -> OnvifResult<CommandValue> {
        let function = request.function("getFunction")?;
        let data = decode_json_query(&request.query)?;
        log::debug!(
            "[Commands] Read {}/{} via {}",
            device.name,
            request.resource_name,
            function
        );

        let value = match request.target()? {
            Target::Onvif(service) => {
                let client = self.registry.get_or_create(device).await?;
                let response = client.call(service, function, &data).await?;
                ReadingValue::Object(response.to_json()?)
            }
            Target::Custom => self.call_custom(device, request, function, data).await?,
        };
        Ok(CommandValue::new(&device.name, &request.resource_name, value))
    }

    /// Executes a write with the given parameter.
    pub async fn write(&self, device: &Device, request: &CommandRequest, data: Value) -> OnvifResult<()> {
        let function = request.function("setFunction")?;
        log::debug!(
            "[Commands] Write {}/{} via {}",
            device.name,
            request.resource_name,
            function
        );

        match request.target()? {
            Target::Onvif(service) => {
                let client = self.registry.get_or_create(device).await?;
                client.call(service, function, &data).await?;
            }
            Target::Custom => {
                self.call_custom(device, request, function, data).await?;
            }
        }
        Ok(())
    }

    /// Runs one of the in-process custom functions.
    pub async fn call_custom(
        &self,
        device: &Device,
        request: &CommandRequest,
        function: &str,
        data: Value,
    ) -> OnvifResult<ReadingValue> {
        match function {
            "GetFriendlyName" => Ok(ReadingValue::String(device.onvif.friendly_name.clone())),
            "SetFriendlyName" => self.set_friendly_name(device, &data).await,
            "GetMACAddress" => Ok(ReadingValue::String(device.onvif.mac.clone())),
            "SetMACAddress" => self.set_mac_address(device, &data).await,
            "GetCustomMetadata" => get_custom_metadata(&device.custom_metadata, &data),
            "SetCustomMetadata" => self.set_custom_metadata(device, &data).await,
            "DeleteCustomMetadata" => self.delete_custom_metadata(device, &data).await,
            "RebootNeeded" => {
                let client = self.registry.get_or_create(device).await?;
                Ok(ReadingValue::Bool(client.reboot_needed()))
            }
            "SubscribeCameraEvent" => self.subscribe(device, request, &data).await,
            "UnsubscribeCameraEvent" => self.unsubscribe(device).await,
            "GetSnapshot" => {
                let token = profile_token(&data)?;
                let client = self.registry.get_or_create(device).await?;
                let bytes = client.get_snapshot(&token).await?;
                Ok(ReadingValue::Binary(bytes.to_vec()))
            }
            other => Err(OnvifError::NotFound(format!("unsupported custom function {other}"))),
        }
    }

    async fn set_friendly_name(&self, device: &Device, data: &Value) -> OnvifResult<ReadingValue> {
        let name = raw_string(data);
        let name = name.trim();
        if name.is_empty() {
            return Err(OnvifError::contract("friendly name must not be empty"));
        }
        let mut onvif = self.devices.get_device(&device.name).await?.onvif;
        onvif.friendly_name = name.to_string();
        self.patch_onvif(&device.name, onvif).await?;
        Ok(ReadingValue::String(name.to_string()))
    }

    async fn set_mac_address(&self, device: &Device, data: &Value) -> OnvifResult<ReadingValue> {
        let mac = raw_string(data);
        if !is_valid_mac(&mac) {
            return Err(OnvifError::contract(format!("invalid MAC address {mac:?}")));
        }
        let mac = sanitize_mac(&mac);
        let mut onvif = self.devices.get_device(&device.name).await?.onvif;
        onvif.mac = mac.clone();
        let updated = self.patch_onvif(&device.name, onvif).await?;

        // The MAC may select a different secret.
        if let Err(e) = self.registry.update(&updated).await {
            log::warn!("[Commands] Could not refresh client of {}: {}", device.name, e);
        }
        Ok(ReadingValue::String(mac))
    }

    async fn patch_onvif(&self, name: &str, onvif: OnvifProperties) -> OnvifResult<Device> {
        Ok(self
            .devices
            .patch_device(
                name,
                DevicePatch {
                    onvif: Some(onvif),
                    ..Default::default()
                },
            )
            .await?)
    }

    async fn set_custom_metadata(&self, device: &Device, data: &Value) -> OnvifResult<ReadingValue> {
        let Value::Object(changes) = data else {
            return Err(OnvifError::contract("custom metadata must be a JSON object"));
        };
        let mut metadata = self.devices.get_device(&device.name).await?.custom_metadata;
        merge_custom_metadata(&mut metadata, changes);
        self.store_metadata(&device.name, metadata).await
    }

    async fn delete_custom_metadata(&self, device: &Device, data: &Value) -> OnvifResult<ReadingValue> {
        let keys = string_list(data)?;
        let mut metadata = self.devices.get_device(&device.name).await?.custom_metadata;
        for key in &keys {
            metadata.remove(key);
        }
        self.store_metadata(&device.name, metadata).await
    }

    async fn store_metadata(
        &self,
        name: &str,
        metadata: BTreeMap<String, String>,
    ) -> OnvifResult<ReadingValue> {
        let stored = self
            .devices
            .patch_device(
                name,
                DevicePatch {
                    custom_metadata: Some(metadata),
                    ..Default::default()
                },
            )
            .await?;
        Ok(ReadingValue::Object(serde_json::to_value(&stored.custom_metadata)?))
    }

    async fn subscribe(
        &self,
        device: &Device,
        request: &CommandRequest,
        data: &Value,
    ) -> OnvifResult<ReadingValue> {
        let subscription = SubscriptionRequest::from_parts(&request.attributes, data)?;
        let resource = request.event_resource();
        let client: Arc<OnvifClient> = self.registry.get_or_create(device).await?;

        match subscription.subscribe_type {
            SubscribeType::PullPoint => {
                pullpoint::subscribe(client, &resource, subscription, self.readings.clone()).await?
            }
            SubscribeType::BaseNotification => {
                let consumer = self.urls.notification_url(&device.name, &resource)?;
                base_notification::subscribe(client, &resource, subscription, consumer).await?
            }
        }
        Ok(ReadingValue::Bool(true))
    }

    async fn unsubscribe(&self, device: &Device) -> OnvifResult<ReadingValue> {
        let client = self.registry.get_or_create(device).await?;
        // Loops send their own Unsubscribe; do not block the command on them.
        tokio::spawn(async move {
            let handles = client.unsubscribe_all();
            log::info!(
                "[Commands] Signalled {} subscription(s) of {}",
                handles.len(),
                client.device_name()
            );
        });
        Ok(ReadingValue::Bool(true))
    }
}

/// Returns the selected metadata fields; an empty selection returns all.
fn get_custom_metadata(metadata: &BTreeMap<String, String>, data: &Value) -> OnvifResult<ReadingValue> {
    let keys = string_list(data)?;
    let selected: Map<String, Value> = if keys.is_empty() {
        metadata
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect()
    } else {
        keys.into_iter()
            .map(|k| {
                let value = metadata
                    .get(&k)
                    .cloned()
                    .unwrap_or_else(|| METADATA_MISSING_MARKER.to_string());
                (k, Value::String(value))
            })
            .collect()
    };
    Ok(ReadingValue::Object(Value::Object(selected)))
}

/// Merges `changes` into `metadata`; an empty string removes the key.
pub fn merge_custom_metadata(metadata: &mut BTreeMap<String, String>, changes: &Map<String, Value>) {
    for (key, value) in changes {
        let value = match value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        if value.is_empty() {
            metadata.remove(key);
        } else {
            metadata.insert(key.clone(), value);
        }
    }
}

fn string_list(data: &Value) -> OnvifResult<Vec<String>> {
    match data {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| OnvifError::contract("expected an array of strings"))
            })
            .collect(),
        _ => Err(OnvifError::contract("expected an array of strings")),
    }
}

fn raw_string(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn profile_token(data: &Value) -> OnvifResult<String> {
    let token = match data {
        Value::Object(map) => map
            .get("ProfileToken")
            .or_else(|| map.get("profileToken"))
            .and_then(Value::as_str),
        Value::String(s) => Some(s.as_str()),
        _ => None,
    };
    token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| OnvifError::contract("GetSnapshot requires a ProfileToken"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::credentials::{CredentialResolver, MacAddressMapper};
    use crate::error::ErrorKind;
    use crate::host::{InMemoryDeviceRegistry, SecretStore, StaticSecretStore};
    use crate::model::Resource;
    use parking_lot::RwLock;
    use serde_json::json;
    use std::time::Duration;

    fn custom(function_key: &str, function: &str) -> Map<String, Value> {
        let mut attributes = Map::new();
        attributes.insert("service".into(), json!("Custom"));
        attributes.insert(function_key.into(), json!(function));
        attributes
    }

    fn camera() -> Device {
        let mut device = Device::new(
            "cam",
            OnvifProperties {
                address: "127.0.0.1".into(),
                port: Some(9),
                secret_name: "noauth".into(),
                friendly_name: "Porch".into(),
                ..Default::default()
            },
        );
        device.custom_metadata.insert("Location".into(), "Front".into());
        device.custom_metadata.insert("Color".into(), "Black".into());
        device.resources.push(Resource {
            name: "CustomMetadata".into(),
            attributes: {
                let mut a = custom("getFunction", "GetCustomMetadata");
                a.insert("setFunction".into(), json!("SetCustomMetadata"));
                a
            },
        });
        device
    }

    fn facade() -> (CommandFacade, Arc<InMemoryDeviceRegistry>) {
        let config = Arc::new(RwLock::new(Config::default()));
        let resolver = Arc::new(CredentialResolver::new(
            Arc::new(StaticSecretStore::new()) as Arc<dyn SecretStore>,
            Arc::clone(&config),
            Arc::new(MacAddressMapper::new()),
        ));
        let registry = Arc::new(ClientRegistry::new(resolver, Duration::from_millis(200)));
        let devices = Arc::new(InMemoryDeviceRegistry::with_devices([camera()]));
        let (readings, _rx) = ReadingsSender::new(8);
        (
            CommandFacade::new(
                Arc::clone(&devices) as Arc<dyn DeviceRegistry>,
                registry,
                readings,
                UrlBuilder::new(config),
            ),
            devices,
        )
    }

    #[test]
    fn json_query_is_base64_decoded() {
        let encoded = STANDARD.encode(r#"["Location"]"#);
        let value = decode_json_query(&format!("foo=1&jsonObject={encoded}")).unwrap();
        assert_eq!(value, json!(["Location"]));
        assert_eq!(decode_json_query("").unwrap(), Value::Null);
        assert_eq!(
            decode_json_query("jsonObject=!!!").unwrap_err().kind(),
            ErrorKind::ContractInvalid
        );
    }

    #[tokio::test]
    async fn set_custom_metadata_merges_and_deletes() {
        let (facade, devices) = facade();
        let device = camera();
        let request = CommandRequest::for_resource(&device, "CustomMetadata").unwrap();

        facade
            .write(&device, &request, json!({"Color": "", "Weather": "Rain"}))
            .await
            .unwrap();

        let stored = devices.get_device("cam").await.unwrap();
        let expected: BTreeMap<String, String> = [("Location", "Front"), ("Weather", "Rain")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(stored.custom_metadata, expected);
    }

    #[tokio::test]
    async fn get_custom_metadata_marks_missing_keys() {
        let (facade, _devices) = facade();
        let device = camera();
        let query = format!("jsonObject={}", STANDARD.encode(r#"["Location","Owner"]"#));
        let request = CommandRequest::for_resource(&device, "CustomMetadata")
            .unwrap()
            .with_query(query);

        let reading = facade.read(&device, &request).await.unwrap();
        assert_eq!(
            reading.value,
            ReadingValue::Object(json!({"Location": "Front", "Owner": "does not exist"}))
        );

        let all = facade
            .read(&device, &CommandRequest::for_resource(&device, "CustomMetadata").unwrap())
            .await
            .unwrap();
        assert_eq!(
            all.value,
            ReadingValue::Object(json!({"Color": "Black", "Location": "Front"}))
        );
    }

    #[tokio::test]
    async fn friendly_name_and_mac_are_validated() {
        let (facade, devices) = facade();
        let device = camera();

        let set_name = CommandRequest::new("FriendlyName", custom("setFunction", "SetFriendlyName"));
        let err = facade.write(&device, &set_name, json!("   ")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContractInvalid);
        facade.write(&device, &set_name, json!("  Garage ")).await.unwrap();

        let set_mac = CommandRequest::new("MACAddress", custom("setFunction", "SetMACAddress"));
        let err = facade.write(&device, &set_mac, json!("zz:zz")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContractInvalid);
        facade
            .write(&device, &set_mac, json!("AA-BB-CC-DD-EE-FF"))
            .await
            .unwrap();

        let stored = devices.get_device("cam").await.unwrap();
        assert_eq!(stored.onvif.friendly_name, "Garage");
        assert_eq!(stored.onvif.mac, "aa:bb:cc:dd:ee:ff");
    }

    #[tokio::test]
    async fn unknown_targets_are_rejected() {
        let (facade, _devices) = facade();
        let device = camera();

        let unknown_fn = CommandRequest::new("X", custom("getFunction", "Teleport"));
        assert_eq!(
            facade.read(&device, &unknown_fn).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );

        let mut attributes = custom("getFunction", "GetThing");
        attributes.insert("service".into(), json!("Telepathy"));
        let unknown_service = CommandRequest::new("Y", attributes);
        assert_eq!(
            facade.read(&device, &unknown_service).await.unwrap_err().kind(),
            ErrorKind::ContractInvalid
        );

        assert_eq!(
            CommandRequest::for_resource(&device, "Missing").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn snapshot_token_accepts_object_or_string() {
        assert_eq!(profile_token(&json!({"ProfileToken": "p1"})).unwrap(), "p1");
        assert_eq!(profile_token(&json!("p2")).unwrap(), "p2");
        assert!(profile_token(&Value::Null).is_err());
    }
}
