//! Per-camera ONVIF client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use super::endpoints::Endpoints;
use super::operations::{
    DeviceInformation, NetworkInterface, OperationResponse, SystemDateAndTime,
};
use super::services::OnvifService;
use crate::error::{OnvifError, OnvifResult};
use crate::events::{SubscriptionKind, SubscriptionManager};
use crate::model::Device;
use crate::soap::xml::operation_to_xml;
use crate::soap::{Credentials, SoapEngine, SoapError, SoapResult};

/// Identity of a client: a replacement is only built when this changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub xaddr: String,
    pub credentials: Credentials,
}

impl ClientKey {
    /// Computes the key of `device` under the given credentials.
    pub fn for_device(device: &Device, credentials: Credentials) -> OnvifResult<Self> {
        let xaddr = device.onvif.xaddr().ok_or_else(|| {
            OnvifError::contract(format!("device {} has no ONVIF address", device.name))
        })?;
        Ok(Self { xaddr, credentials })
    }
}

/// Facade over one camera: endpoint map, auth, and subscription managers.
pub struct OnvifClient {
    device_name: String,
    key: ClientKey,
    engine: SoapEngine,
    endpoints: RwLock<Endpoints>,
    reboot_needed: AtomicBool,
    pull_point: Arc<SubscriptionManager>,
    base_notification: Arc<SubscriptionManager>,
}

impl OnvifClient {
    /// Builds a client and resolves its service endpoints.
    ///
    /// A failing `GetCapabilities` still yields a client that only knows
    /// the device service; `GetServices` is merged best-effort.
    pub async fn connect(
        device: &Device,
        credentials: Credentials,
        timeout: Duration,
    ) -> OnvifResult<Self> {
        let key = ClientKey::for_device(device, credentials)?;
        let client = Self::new(&device.name, key, timeout)?;
        client.resolve_endpoints().await;
        Ok(client)
    }

    /// Builds a client with only the device service endpoint, without I/O.
    pub fn new(device_name: &str, key: ClientKey, timeout: Duration) -> OnvifResult<Self> {
        let engine = SoapEngine::new(timeout)?;
        let endpoints = Endpoints::for_xaddr(&key.xaddr);
        Ok(Self {
            device_name: device_name.to_string(),
            key,
            engine,
            endpoints: RwLock::new(endpoints),
            reboot_needed: AtomicBool::new(false),
            pull_point: Arc::new(SubscriptionManager::new(
                device_name,
                SubscriptionKind::PullPoint,
            )),
            base_notification: Arc::new(SubscriptionManager::new(
                device_name,
                SubscriptionKind::BaseNotification,
            )),
        })
    }

    async fn resolve_endpoints(&self) {
        let device_service = self.device_service();

        match operation_to_xml("tds", "GetCapabilities", &json!({ "Category": "All" })) {
            Ok(body) => match self.send(&device_service, &body, None).await {
                Ok(xml) => {
                    let merged = self.endpoints.write().merge_capabilities(&xml);
                    if let Err(e) = merged {
                        log::warn!(
                            "[ONVIF] Unreadable capabilities from {}: {}",
                            self.device_name,
                            e
                        );
                    }
                }
                Err(e) => log::warn!(
                    "[ONVIF] GetCapabilities failed for {}, using device service only: {}",
                    self.device_name,
                    e
                ),
            },
            Err(e) => log::warn!("[ONVIF] Could not build GetCapabilities: {}", e),
        }

        let services = operation_to_xml(
            "tds",
            "GetServices",
            &json!({ "IncludeCapability": false }),
        );
        if let Ok(body) = services {
            match self.send(&device_service, &body, None).await {
                Ok(xml) => {
                    if let Err(e) = self.endpoints.write().merge_services(&xml) {
                        log::debug!("[ONVIF] Unreadable services from {}: {}", self.device_name, e);
                    }
                }
                Err(e) => log::debug!("[ONVIF] GetServices failed for {}: {}", self.device_name, e),
            }
        }

        log::info!(
            "[ONVIF] Client for {} ready with {} service(s)",
            self.device_name,
            self.endpoints.read().len()
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn key(&self) -> &ClientKey {
        &self.key
    }

    pub fn xaddr(&self) -> &str {
        &self.key.xaddr
    }

    pub fn credentials(&self) -> &Credentials {
        &self.key.credentials
    }

    /// HTTP timeout fixed at creation.
    pub fn timeout(&self) -> Duration {
        self.engine.timeout()
    }

    /// Snapshot of the endpoint map.
    pub fn endpoints(&self) -> Endpoints {
        self.endpoints.read().clone()
    }

    pub fn has_service(&self, service: OnvifService) -> bool {
        self.endpoints.read().contains(service)
    }

    /// Resolves the endpoint of a service; a missing one is a contract error.
    pub fn endpoint(&self, service: OnvifService) -> OnvifResult<String> {
        Ok(self.endpoints.read().get(service)?.to_string())
    }

    fn device_service(&self) -> String {
        super::endpoints::device_service_url(&self.key.xaddr)
    }

    pub fn reboot_needed(&self) -> bool {
        self.reboot_needed.load(Ordering::SeqCst)
    }

    pub fn pull_point(&self) -> &Arc<SubscriptionManager> {
        &self.pull_point
    }

    pub fn base_notification(&self) -> &Arc<SubscriptionManager> {
        &self.base_notification
    }

    /// Signals every subscription of both managers without waiting.
    pub fn unsubscribe_all(&self) -> Vec<JoinHandle<()>> {
        let mut handles = self.pull_point.unsubscribe_all();
        handles.extend(self.base_notification.unsubscribe_all());
        handles
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Calls `function` on `service` with a JSON payload.
    pub async fn call(
        &self,
        service: OnvifService,
        function: &str,
        data: &Value,
    ) -> OnvifResult<OperationResponse> {
        let endpoint = self.endpoint(service)?;
        let body = operation_to_xml(service.prefix(), function, data)?;
        let xml = self.send(&endpoint, &body, None).await?;
        let response = OperationResponse::parse(function, &xml)?;

        match &response {
            OperationResponse::SetNetworkInterfaces {
                reboot_needed: true,
            } => {
                log::info!("[ONVIF] {} reports reboot needed", self.device_name);
                self.reboot_needed.store(true, Ordering::SeqCst);
            }
            OperationResponse::SystemReboot { .. } => {
                self.reboot_needed.store(false, Ordering::SeqCst);
            }
            _ => {}
        }
        Ok(response)
    }

    /// Sends a prepared body to an arbitrary address (subscription managers).
    pub(crate) async fn send(
        &self,
        address: &str,
        body: &str,
        timeout: Option<Duration>,
    ) -> SoapResult<String> {
        self.engine
            .call_with_timeout(address, body, &self.key.credentials, timeout)
            .await
    }

    pub async fn get_device_information(&self) -> OnvifResult<DeviceInformation> {
        match self
            .call(OnvifService::Device, "GetDeviceInformation", &Value::Null)
            .await?
        {
            OperationResponse::DeviceInformation(info) => Ok(info),
            other => Err(unexpected("GetDeviceInformation", &other)),
        }
    }

    pub async fn get_network_interfaces(&self) -> OnvifResult<Vec<NetworkInterface>> {
        match self
            .call(OnvifService::Device, "GetNetworkInterfaces", &Value::Null)
            .await?
        {
            OperationResponse::NetworkInterfaces(list) => Ok(list),
            other => Err(unexpected("GetNetworkInterfaces", &other)),
        }
    }

    pub async fn get_endpoint_reference(&self) -> OnvifResult<String> {
        match self
            .call(OnvifService::Device, "GetEndpointReference", &Value::Null)
            .await?
        {
            OperationResponse::EndpointReference(guid) => Ok(guid),
            other => Err(unexpected("GetEndpointReference", &other)),
        }
    }

    pub async fn get_system_date_and_time(&self) -> OnvifResult<SystemDateAndTime> {
        match self
            .call(OnvifService::Device, "GetSystemDateAndTime", &Value::Null)
            .await?
        {
            OperationResponse::SystemDateAndTime(sdt) => Ok(sdt),
            other => Err(unexpected("GetSystemDateAndTime", &other)),
        }
    }

    /// `GetSystemDateAndTime` without credentials; ONVIF requires it to be open.
    pub async fn probe_unauthenticated(&self) -> OnvifResult<SystemDateAndTime> {
        let body = operation_to_xml("tds", "GetSystemDateAndTime", &Value::Null)?;
        let xml = self
            .engine
            .call(&self.device_service(), &body, &Credentials::none())
            .await?;
        match OperationResponse::parse("GetSystemDateAndTime", &xml)? {
            OperationResponse::SystemDateAndTime(sdt) => Ok(sdt),
            other => Err(unexpected("GetSystemDateAndTime", &other)),
        }
    }

    /// Resolves the snapshot URI of a media profile and downloads the image.
    ///
    /// Media is preferred; Media2 is used when it is the only media service.
    pub async fn get_snapshot(&self, profile_token: &str) -> OnvifResult<Bytes> {
        let service = if self.has_service(OnvifService::Media)
            || !self.has_service(OnvifService::Media2)
        {
            OnvifService::Media
        } else {
            OnvifService::Media2
        };
        let uri = match self
            .call(service, "GetSnapshotUri", &json!({ "ProfileToken": profile_token }))
            .await?
        {
            OperationResponse::SnapshotUri(uri) if !uri.is_empty() => uri,
            OperationResponse::SnapshotUri(_) => {
                return Err(OnvifError::ServerError {
                    status: None,
                    message: "camera returned an empty snapshot URI".into(),
                })
            }
            other => return Err(unexpected("GetSnapshotUri", &other)),
        };
        log::debug!("[ONVIF] Fetching snapshot for {} from {}", self.device_name, uri);
        Ok(self.engine.get_snapshot(&uri, &self.key.credentials).await?)
    }
}

fn unexpected(operation: &str, response: &OperationResponse) -> OnvifError {
    SoapError::Decode(format!("unexpected {operation} response: {response:?}")).into()
}
