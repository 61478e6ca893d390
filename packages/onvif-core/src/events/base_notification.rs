//! BaseNotification subscriptions: the camera pushes `Notify` to the ingress
//! route, the driver keeps the subscription alive with `Renew`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};

use super::manager::Registration;
use super::request::SubscriptionRequest;
use crate::error::OnvifResult;
use crate::onvif::{OnvifClient, OnvifService, OperationResponse};
use crate::protocol_constants::{RENEW_BUFFER_SECS, SUBSCRIPTION_RETRY_DELAY_MS};
use crate::soap::xml::operation_to_xml;
use crate::soap::SoapError;

/// Interval between renewals for a termination time.
///
/// Termination times are validated to at least 11s, so this is never zero.
pub fn renew_period(termination: Duration) -> Duration {
    termination
        .saturating_sub(Duration::from_secs(RENEW_BUFFER_SECS))
        .max(Duration::from_secs(1))
}

/// Subscribes `resource` with `consumer_url` as the push target and starts
/// the renew ticker.
pub async fn subscribe(
    client: Arc<OnvifClient>,
    resource: &str,
    request: SubscriptionRequest,
    consumer_url: String,
) -> OnvifResult<()> {
    let period = renew_period(request.termination()?);
    let address = create(&client, &request, &consumer_url).await?;
    log::info!(
        "[BaseNotification] Subscribed {}/{} at {}, consumer {}",
        client.device_name(),
        resource,
        address,
        consumer_url
    );

    let registration = client.base_notification().register(resource);
    let task_client = Arc::clone(&client);
    let task_registration = registration.clone();
    let handle = tokio::spawn(async move {
        run(
            task_client,
            task_registration,
            request,
            consumer_url,
            address,
            period,
        )
        .await;
    });
    client.base_notification().attach(&registration, handle);
    Ok(())
}

async fn create(
    client: &OnvifClient,
    request: &SubscriptionRequest,
    consumer_url: &str,
) -> OnvifResult<String> {
    let endpoint = client.endpoint(OnvifService::Event)?;

    let mut data = Map::new();
    data.insert(
        "ConsumerReference".into(),
        json!({ "wsa:Address": consumer_url }),
    );
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

    let body = operation_to_xml("wsnt", "Subscribe", &Value::Object(data))?;
    let xml = client.send(&endpoint, &body, None).await?;
    match OperationResponse::parse("Subscribe", &xml)? {
        OperationResponse::Subscription(reference) => Ok(reference.address),
        other => Err(SoapError::Decode(format!("unexpected Subscribe response: {other:?}")).into()),
    }
}

async fn run(
    client: Arc<OnvifClient>,
    registration: Registration,
    request: SubscriptionRequest,
    consumer_url: String,
    mut address: String,
    period: Duration,
) {
    let device = client.device_name().to_string();
    let resource = registration.resource.clone();
    let cancel = registration.cancel.clone();

    // The termination is sent as configured, not recomputed
    let renew_body = operation_to_xml(
        "wsnt",
        "Renew",
        &json!({ "TerminationTime": request.initial_termination_time }),
    );
    let renew_body = match renew_body {
        Ok(body) => body,
        Err(e) => {
            log::error!("[BaseNotification] Could not build Renew: {}", e);
            client.base_notification().remove(&resource, registration.id);
            return;
        }
    };

    let mut wait = period;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
        wait = period;

        let renewed = tokio::select! {
            _ = cancel.cancelled() => break,
            renewed = client.send(&address, &renew_body, None) => renewed,
        };
        match renewed {
            Ok(_) => log::debug!("[BaseNotification] Renewed {}/{}", device, resource),
            Err(e) => {
                log::warn!(
                    "[BaseNotification] Renew of {}/{} failed, resubscribing: {}",
                    device,
                    resource,
                    e
                );
                let created = tokio::select! {
                    _ = cancel.cancelled() => break,
                    created = create(&client, &request, &consumer_url) => created,
                };
                match created {
                    Ok(new_address) => address = new_address,
                    Err(e) => {
                        log::warn!(
                            "[BaseNotification] Resubscribe of {}/{} failed: {}",
                            device,
                            resource,
                            e
                        );
                        wait = Duration::from_millis(SUBSCRIPTION_RETRY_DELAY_MS);
                    }
                }
            }
        }
    }

    client
        .base_notification()
        .remove(&resource, registration.id);
    log::info!("[BaseNotification] Stopped {}/{}", device, resource);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Device, OnvifProperties};
    use crate::soap::Credentials;
    use crate::test_fixtures::{operation_name, serve, soap_ok, GET_CAPABILITIES_BODY};
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::Router;
    use parking_lot::Mutex;

    const CONSUMER: &str = "http://10.0.0.9:59984/api/v3/onvifevent/cam/CameraEvent";

    #[test]
    fn renew_runs_ten_seconds_before_termination() {
        assert_eq!(renew_period(Duration::from_secs(60)), Duration::from_secs(50));
        assert_eq!(renew_period(Duration::from_secs(11)), Duration::from_secs(1));
    }

    #[derive(Default)]
    struct Camera {
        base: Mutex<String>,
        subscribes: Mutex<Vec<String>>,
        /// `(subscription number, request body)` of every Renew.
        renews: Mutex<Vec<(usize, String)>>,
    }

    /// Rejects every Renew of the first subscription with 404.
    async fn renewing_camera() -> (Arc<Camera>, u16) {
        let camera = Arc::new(Camera::default());
        let device = |body: String| async move {
            match operation_name(&body).as_str() {
                "GetCapabilities" => soap_ok(GET_CAPABILITIES_BODY),
                _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            }
        };
        let events = {
            let camera = Arc::clone(&camera);
            move |body: String| {
                let camera = Arc::clone(&camera);
                async move {
                    let n = {
                        let mut subscribes = camera.subscribes.lock();
                        subscribes.push(body);
                        subscribes.len()
                    };
                    let base = camera.base.lock().clone();
                    soap_ok(&format!(
                        r#"<wsnt:SubscribeResponse><wsnt:SubscriptionReference><wsa5:Address>{base}/onvif/subscription/{n}</wsa5:Address></wsnt:SubscriptionReference></wsnt:SubscribeResponse>"#
                    ))
                }
            }
        };
        let subscription = {
            let camera = Arc::clone(&camera);
            move |Path(n): Path<usize>, body: String| {
                let camera = Arc::clone(&camera);
                async move {
                    camera.renews.lock().push((n, body));
                    if n == 1 {
                        StatusCode::NOT_FOUND.into_response()
                    } else {
                        soap_ok("<wsnt:RenewResponse/>")
                    }
                }
            }
        };

        let router = Router::new()
            .route("/onvif/device_service", post(device))
            .route("/onvif/event_service", post(events))
            .route("/onvif/subscription/{n}", post(subscription));
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
    async fn failed_renew_resubscribes_and_keeps_renewing() {
        let (camera, port) = renewing_camera().await;
        let client = client(port).await;
        let request = SubscriptionRequest {
            initial_termination_time: "PT11S".into(),
            topic_filter: Some("tns1:VideoSource".into()),
            ..Default::default()
        };

        subscribe(
            Arc::clone(&client),
            "CameraEvent",
            request,
            CONSUMER.to_string(),
        )
        .await
        .unwrap();
        assert!(client.base_notification().contains("CameraEvent"));
        {
            let subscribes = camera.subscribes.lock();
            assert_eq!(subscribes.len(), 1);
            assert_eq!(operation_name(&subscribes[0]), "Subscribe");
            assert!(subscribes[0].contains(CONSUMER));
            assert!(subscribes[0].contains(">PT11S<"));
            assert!(subscribes[0].contains("tns1:VideoSource"));
        }

        // Renews run every second: the first fails, the resubscribe succeeds,
        // and the next renew goes to the new subscription.
        tokio::time::timeout(Duration::from_secs(8), async {
            while !camera.renews.lock().iter().any(|(n, _)| *n == 2) {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(camera.subscribes.lock().len(), 2);
        for (_, body) in camera.renews.lock().iter() {
            assert_eq!(operation_name(body), "Renew");
            assert!(body.contains(">PT11S<"));
        }

        for handle in client.unsubscribe_all() {
            handle.await.unwrap();
        }
        assert!(client.base_notification().is_empty());
    }

    #[tokio::test]
    async fn invalid_termination_is_rejected_before_subscribing() {
        let (camera, port) = renewing_camera().await;
        let client = client(port).await;
        let request = SubscriptionRequest {
            initial_termination_time: "bogus".into(),
            ..Default::default()
        };

        let err = subscribe(Arc::clone(&client), "CameraEvent", request, CONSUMER.to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ContractInvalid);
        assert!(camera.subscribes.lock().is_empty());
        assert!(client.base_notification().is_empty());
    }
}
