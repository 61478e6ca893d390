//! HTTP route handlers.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::api::AppState;
use crate::context::UrlBuilder;
use crate::events::parser::notify_messages;
use crate::model::{CommandValue, ReadingValue};
use crate::protocol_constants::{MAX_NOTIFY_BODY_SIZE, SERVICE_ID};

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Ingress failure, answered with the message as a plain-text body.
#[derive(Debug)]
struct IngressError {
    status: StatusCode,
    message: String,
}

impl IngressError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(&UrlBuilder::ping_route(&state.api_route), get(ping))
        .route(
            &UrlBuilder::ingress_route(&state.api_route),
            post(handle_notify),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn ping() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Receives a camera's `Notify` and publishes it as one reading.
async fn handle_notify(
    State(state): State<AppState>,
    Path((device_name, resource_name)): Path<(String, String)>,
    req: Request<Body>,
) -> Result<StatusCode, IngressError> {
    let device = state.devices.get_device(&device_name).await.map_err(|e| {
        log::warn!("[Ingress] Notification for unknown device {}: {}", device_name, e);
        IngressError::bad_request(format!("device {device_name} not found"))
    })?;
    if device.resource(&resource_name).is_none() {
        log::warn!(
            "[Ingress] Notification for unknown resource {}/{}",
            device_name,
            resource_name
        );
        return Err(IngressError::bad_request(format!(
            "resource {resource_name} not found on device {device_name}"
        )));
    }

    let body = axum::body::to_bytes(req.into_body(), MAX_NOTIFY_BODY_SIZE)
        .await
        .map_err(|e| {
            log::warn!("[Ingress] Failed to read notification body: {}", e);
            IngressError::bad_request("failed to read body")
        })?;
    if body.is_empty() {
        return Err(IngressError::bad_request("empty notification body"));
    }

    let messages = notify_messages(&String::from_utf8_lossy(&body)).map_err(|e| {
        log::warn!("[Ingress] Unreadable notification for {}: {}", device_name, e);
        IngressError::bad_request(e.to_string())
    })?;
    log::debug!(
        "[Ingress] {} message(s) for {}/{}",
        messages.len(),
        device_name,
        resource_name
    );

    let reading = CommandValue::new(
        device_name,
        resource_name,
        ReadingValue::Object(Value::Array(messages)),
    );
    state.readings.send(reading).await.map_err(|e| IngressError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        message: e.to_string(),
    })?;
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::host::{DeviceRegistry, InMemoryDeviceRegistry, ReadingsSender};
    use crate::model::{Device, OnvifProperties, Resource};
    use crate::test_fixtures::{serve, NOTIFY_ENVELOPE};
    use tokio::sync::mpsc;

    async fn ingress() -> (String, ReadingsSender, mpsc::Receiver<CommandValue>) {
        let mut device = Device::new("cam", OnvifProperties::default());
        device.resources.push(Resource {
            name: "CameraEvent".into(),
            ..Default::default()
        });
        let devices = Arc::new(InMemoryDeviceRegistry::with_devices([device]));
        let (readings, rx) = ReadingsSender::new(4);
        let state = AppState::new(
            devices as Arc<dyn DeviceRegistry>,
            readings.clone(),
            "api/v3",
        );
        let addr = serve(create_router(state)).await;
        (format!("http://{addr}/api/v3"), readings, rx)
    }

    #[tokio::test]
    async fn notification_is_published_as_one_reading() {
        let (base, _readings, mut rx) = ingress().await;
        let res = reqwest::Client::new()
            .post(format!("{base}/onvifevent/cam/CameraEvent"))
            .body(NOTIFY_ENVELOPE)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status().as_u16(), 200);

        let reading = rx.recv().await.unwrap();
        assert_eq!(reading.device_name, "cam");
        assert_eq!(reading.resource_name, "CameraEvent");
        assert!(matches!(
            reading.value,
            ReadingValue::Object(Value::Array(ref messages)) if messages.len() == 1
        ));
    }

    #[tokio::test]
    async fn unknown_targets_and_empty_bodies_are_rejected() {
        let (base, _readings, mut rx) = ingress().await;
        let client = reqwest::Client::new();

        for (path, body) in [
            ("onvifevent/ghost/CameraEvent", NOTIFY_ENVELOPE),
            ("onvifevent/cam/Other", NOTIFY_ENVELOPE),
            ("onvifevent/cam/CameraEvent", ""),
        ] {
            let res = client
                .post(format!("{base}/{path}"))
                .body(body)
                .send()
                .await
                .unwrap();
            assert_eq!(res.status().as_u16(), 400, "{path}");
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_readings_channel_is_unavailable() {
        let (base, readings, _rx) = ingress().await;
        readings.close();
        let res = reqwest::Client::new()
            .post(format!("{base}/onvifevent/cam/CameraEvent"))
            .body(NOTIFY_ENVELOPE)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status().as_u16(), 503);
    }

    #[tokio::test]
    async fn ping_reports_service() {
        let (base, _readings, _rx) = ingress().await;
        let body: Value = reqwest::get(format!("{base}/ping"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], SERVICE_ID);
    }
}
