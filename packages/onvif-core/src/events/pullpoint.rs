//! PullPoint subscriptions: create, long-poll, recover on expiry.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};

use super::manager::Registration;
use super::parser;
use super::request::SubscriptionRequest;
use crate::error::{OnvifError, OnvifResult};
use crate::host::ReadingsSender;
use crate::model::{CommandValue, ReadingValue};
use crate::onvif::{OnvifClient, OnvifService, OperationResponse};
use crate::protocol_constants::SUBSCRIPTION_RETRY_DELAY_MS;
use crate::soap::xml::operation_to_xml;
use crate::soap::SoapError;

/// Creates a PullPoint subscription for `resource` and starts its pull loop.
///
/// The initial create is awaited so its failure reaches the caller; any
/// existing subscription of the resource is replaced.
pub async fn subscribe(
    client: Arc<OnvifClient>,
    resource: &str,
    request: SubscriptionRequest,
    readings: ReadingsSender,
) -> OnvifResult<()> {
    let address = create(&client, &request).await?;
    log::info!(
        "[PullPoint] Subscribed {}/{} at {}",
        client.device_name(),
        resource,
        address
    );

    let registration = client.pull_point().register(resource);
    let task_client = Arc::clone(&client);
    let task_registration = registration.clone();
    let handle = tokio::spawn(async move {
        run(task_client, task_registration, request, address, readings).await;
    });
    client.pull_point().attach(&registration, handle);
    Ok(())
}

async fn create(client: &OnvifClient, request: &SubscriptionRequest) -> OnvifResult<String> {
    let mut data = Map::new();
    if let Some(filter) = request.filter() {
        data.insert("Filter".into(), filter);
    }
    data.insert(
        "InitialTerminationTime".into(),
        Value::String(request.initial_termination_time.clone()),
    );
    if let Some(policy) = &request.subscription_policy {
        data.insert("SubscriptionPolicy".into(), policy.clone());
    }

    match client
        .call(
            OnvifService::Event,
            "CreatePullPointSubscription",
            &Value::Object(data),
        )
        .await?
    {
        OperationResponse::Subscription(reference) => Ok(reference.address),
        other => Err(SoapError::Decode(format!(
            "unexpected CreatePullPointSubscription response: {other:?}"
        ))
        .into()),
    }
}

/// True when the camera no longer knows the subscription.
fn is_expired(err: &SoapError) -> bool {
    matches!(err.http_status(), Some(400) | Some(404))
}

async fn run(
    client: Arc<OnvifClient>,
    registration: Registration,
    request: SubscriptionRequest,
    mut address: String,
    readings: ReadingsSender,
) {
    let device = client.device_name().to_string();
    let resource = registration.resource.clone();
    let cancel = registration.cancel.clone();
    let retry_delay = Duration::from_millis(SUBSCRIPTION_RETRY_DELAY_MS);

    let message_timeout = request
        .message_timeout()
        .unwrap_or(Duration::from_secs(5));
    let http_timeout = message_timeout.saturating_add(client.timeout());
    let pull_body = operation_to_xml(
        "tev",
        "PullMessages",
        &json!({
            "Timeout": request.message_timeout,
            "MessageLimit": request.message_limit,
        }),
    );
    let pull_body = match pull_body {
        Ok(body) => body,
        Err(e) => {
            log::error!("[PullPoint] Could not build PullMessages: {}", e);
            client.pull_point().remove(&resource, registration.id);
            return;
        }
    };

    let mut subscribed = true;
    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = client.send(&address, &pull_body, Some(http_timeout)) => result,
        };

        match result {
            Ok(xml) => match parser::pull_messages(&xml) {
                Ok(messages) if !messages.is_empty() => {
                    log::debug!(
                        "[PullPoint] {} message(s) for {}/{}",
                        messages.len(),
                        device,
                        resource
                    );
                    let value = ReadingValue::Object(Value::Array(messages));
                    readings
                        .publish(CommandValue::new(&device, &resource, value))
                        .await;
                }
                Ok(_) => {}
                Err(e) => log::warn!("[PullPoint] Unreadable messages from {}: {}", device, e),
            },
            Err(e) if is_expired(&e) => {
                if !request.auto_renew {
                    log::info!(
                        "[PullPoint] Subscription {}/{} expired: {}",
                        device,
                        resource,
                        e
                    );
                    subscribed = false;
                    break;
                }
                log::info!(
                    "[PullPoint] Subscription {}/{} expired, recreating",
                    device,
                    resource
                );
                match recreate(&client, &request, &cancel, retry_delay).await {
                    Some(new_address) => address = new_address,
                    None => break,
                }
            }
            Err(e) => {
                log::warn!("[PullPoint] PullMessages to {} failed: {}", device, e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(retry_delay) => {}
                }
            }
        }
    }

    if subscribed {
        unsubscribe(&client, &address).await;
    }
    client.pull_point().remove(&resource, registration.id);
    log::info!("[PullPoint] Stopped {}/{}", device, resource);
}

/// Retries the create until it succeeds; `None` when cancelled first.
async fn recreate(
    client: &OnvifClient,
    request: &SubscriptionRequest,
    cancel: &tokio_util::sync::CancellationToken,
    retry_delay: Duration,
) -> Option<String> {
    loop {
        let created = tokio::select! {
            _ = cancel.cancelled() => return None,
            created = create(client, request) => created,
        };
        match created {
            Ok(address) => return Some(address),
            Err(e) => {
                log::warn!(
                    "[PullPoint] Recreate for {} failed, retrying: {}",
                    client.device_name(),
                    e
                );
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(retry_delay) => {}
                }
            }
        }
    }
}

async fn unsubscribe(client: &OnvifClient, address: &str) {
    let body = match operation_to_xml("wsnt", "Unsubscribe", &Value::Null) {
        Ok(body) => body,
        Err(e) => {
            log::debug!("[PullPoint] Could not build Unsubscribe: {}", e);
            return;
        }
    };
    if let Err(e) = client.send(address, &body, None).await {
        log::debug!(
            "[PullPoint] Unsubscribe of {} at {} failed: {}",
            client.device_name(),
            address,
            OnvifError::from(e)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Device, OnvifProperties};
    use crate::soap::Credentials;
    use crate::test_fixtures::{
        operation_name, serve, soap_ok, EMPTY_PULL_MESSAGES_BODY, GET_CAPABILITIES_BODY,
        PULL_MESSAGES_BODY,
    };
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::Router;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Camera {
        base: Mutex<String>,
        creates: AtomicUsize,
        pulls: Mutex<Vec<usize>>,
        unsubscribes: AtomicUsize,
    }

    /// The first subscription answers one pull and then reports 404.
    async fn expiring_camera() -> (Arc<Camera>, u16) {
        let camera = Arc::new(Camera::default());
        let device = |body: String| async move {
            match operation_name(&body).as_str() {
                "GetCapabilities" => soap_ok(GET_CAPABILITIES_BODY),
                _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            }
        };
        let events = {
            let camera = Arc::clone(&camera);
            move |_body: String| {
                let camera = Arc::clone(&camera);
                async move {
                    let n = camera.creates.fetch_add(1, Ordering::SeqCst) + 1;
                    let base = camera.base.lock().clone();
                    soap_ok(&format!(
                        r#"<tev:CreatePullPointSubscriptionResponse><tev:SubscriptionReference><wsa5:Address>{base}/onvif/pullpoint/{n}</wsa5:Address></tev:SubscriptionReference><wsnt:CurrentTime>2024-03-09T10:04:05Z</wsnt:CurrentTime><wsnt:TerminationTime>2024-03-09T10:05:05Z</wsnt:TerminationTime></tev:CreatePullPointSubscriptionResponse>"#
                    ))
                }
            }
        };
        let pullpoint = {
            let camera = Arc::clone(&camera);
            move |Path(n): Path<usize>, body: String| {
                let camera = Arc::clone(&camera);
                async move {
                    if operation_name(&body) == "Unsubscribe" {
                        camera.unsubscribes.fetch_add(1, Ordering::SeqCst);
                        return soap_ok("<wsnt:UnsubscribeResponse/>");
                    }
                    let served = {
                        let mut pulls = camera.pulls.lock();
                        pulls.push(n);
                        pulls.iter().filter(|p| **p == n).count()
                    };
                    match (n, served) {
                        (_, 1) => soap_ok(PULL_MESSAGES_BODY),
                        (1, _) => StatusCode::NOT_FOUND.into_response(),
                        _ => {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            soap_ok(EMPTY_PULL_MESSAGES_BODY)
                        }
                    }
                }
            }
        };

        let router = Router::new()
            .route("/onvif/device_service", post(device))
            .route("/onvif/event_service", post(events))
            .route("/onvif/pullpoint/{n}", post(pullpoint));
        let addr = serve(router).await;
        *camera.base.lock() = format!("http://{addr}");
        (camera, addr.port())
    }

    async fn client(port: u16) -> Arc<OnvifClient> {
        let device = Device::new(
            "cam",
            OnvifProperties {
                address: "127.0.0.1".into(),
                port: Some(port),
                ..Default::default()
            },
        );
        Arc::new(
            OnvifClient::connect(&device, Credentials::none(), Duration::from_secs(2))
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn expired_subscription_is_recreated() {
        let (camera, port) = expiring_camera().await;
        let client = client(port).await;
        let (readings, mut rx) = ReadingsSender::new(8);
        let request = SubscriptionRequest {
            message_timeout: "PT1S".into(),
            ..Default::default()
        };

        subscribe(Arc::clone(&client), "CameraEvent", request, readings)
            .await
            .unwrap();

        for _ in 0..2 {
            let reading = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(reading.device_name, "cam");
            assert_eq!(reading.resource_name, "CameraEvent");
            assert!(matches!(
                reading.value,
                ReadingValue::Object(Value::Array(ref messages)) if messages.len() == 2
            ));
        }
        assert_eq!(camera.creates.load(Ordering::SeqCst), 2);
        assert!(client.pull_point().contains("CameraEvent"));

        for handle in client.unsubscribe_all() {
            handle.await.unwrap();
        }
        assert!(client.pull_point().is_empty());
        assert_eq!(camera.unsubscribes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_create_is_reported_to_the_caller() {
        let router = Router::new().route(
            "/onvif/device_service",
            post(|body: String| async move {
                match operation_name(&body).as_str() {
                    "GetCapabilities" => soap_ok(GET_CAPABILITIES_BODY),
                    _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
                }
            }),
        );
        let addr = serve(router).await;
        let client = client(addr.port()).await;
        let (readings, _rx) = ReadingsSender::new(8);

        let err = subscribe(
            Arc::clone(&client),
            "CameraEvent",
            SubscriptionRequest::default(),
            readings,
        )
        .await
        .unwrap_err();
        assert_eq!(err.http_status(), Some(404));
        assert!(client.pull_point().is_empty());
    }
}
