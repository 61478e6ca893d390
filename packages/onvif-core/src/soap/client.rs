//! HTTP transport for SOAP requests, including the digest handshake.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Client, Method, StatusCode};

use super::auth::{new_cnonce, username_token_header, AuthMode, Credentials, DigestChallenge};
use super::envelope::{body_xml, build_envelope, fault_text, has_fault};
use super::{SoapError, SoapResult};
use crate::protocol_constants::SOAP_CONTENT_TYPE;

/// HTTP response as received from the camera.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: Bytes,
    /// Every `WWW-Authenticate` header value.
    challenges: Vec<String>,
}

impl RawResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    fn digest_challenge(&self) -> Option<DigestChallenge> {
        self.challenges.iter().find_map(|h| DigestChallenge::parse(h))
    }
}

/// Per-camera SOAP transport.
///
/// Owns the HTTP client (whose timeout is fixed at creation) and the digest
/// nonce counter, which increases monotonically for the engine's lifetime.
pub struct SoapEngine {
    http: Client,
    timeout: Duration,
    nonce_count: AtomicU32,
}

impl SoapEngine {
    /// Creates an engine whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> SoapResult<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            timeout,
            nonce_count: AtomicU32::new(0),
        })
    }

    /// Returns the request timeout fixed at creation.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends an operation body and returns the raw inner XML of `Envelope/Body`.
    ///
    /// 2xx decodes; 401 (after the digest retry) is `Unauthorized`; 400 is
    /// `BadRequest`; any other status is a `ServerFault` carrying the status.
    pub async fn call(
        &self,
        endpoint: &str,
        body: &str,
        credentials: &Credentials,
    ) -> SoapResult<String> {
        self.call_with_timeout(endpoint, body, credentials, None)
            .await
    }

    /// Like [`call`](Self::call) but overrides the request timeout.
    pub async fn call_with_timeout(
        &self,
        endpoint: &str,
        body: &str,
        credentials: &Credentials,
        timeout: Option<Duration>,
    ) -> SoapResult<String> {
        let raw = self.send_raw(endpoint, body, credentials, timeout).await?;
        classify(&raw)
    }

    /// Sends an operation body and returns the unclassified HTTP response.
    pub async fn send_raw(
        &self,
        endpoint: &str,
        body: &str,
        credentials: &Credentials,
        timeout: Option<Duration>,
    ) -> SoapResult<RawResponse> {
        let envelope = || {
            let header = credentials
                .mode
                .uses_username_token()
                .then(|| username_token_header(&credentials.username, &credentials.password));
            build_envelope(header.as_deref(), body)
        };

        let start = Instant::now();
        let first = self
            .send_once(Method::POST, endpoint, Some(envelope()), None, timeout)
            .await?;

        let response = if first.status == StatusCode::UNAUTHORIZED && credentials.mode.uses_digest()
        {
            match self.digest_authorization(&first, Method::POST, endpoint, credentials) {
                Some(auth) => {
                    log::debug!("[SOAP] Digest challenge from {}, retrying", endpoint);
                    self.send_once(Method::POST, endpoint, Some(envelope()), Some(auth), timeout)
                        .await?
                }
                None => first,
            }
        } else {
            first
        };

        log::debug!(
            "[SOAP] POST {} completed in {:?}: {}",
            endpoint,
            start.elapsed(),
            response.status
        );
        Ok(response)
    }

    /// Fetches snapshot bytes, answering a digest challenge if one is issued.
    pub async fn get_snapshot(&self, url: &str, credentials: &Credentials) -> SoapResult<Bytes> {
        let first = self.send_once(Method::GET, url, None, None, None).await?;
        let response =
            if first.status == StatusCode::UNAUTHORIZED && credentials.mode != AuthMode::None {
                match self.digest_authorization(&first, Method::GET, url, credentials) {
                    Some(auth) => {
                        self.send_once(Method::GET, url, None, Some(auth), None)
                            .await?
                    }
                    None => first,
                }
            } else {
                first
            };

        match response.status.as_u16() {
            200..=299 => Ok(response.body),
            401 => Err(SoapError::Unauthorized(format!("snapshot {url}"))),
            400 => Err(SoapError::BadRequest(format!("snapshot {url}"))),
            status => Err(SoapError::ServerFault {
                status,
                message: format!("snapshot request to {url} failed"),
            }),
        }
    }

    fn digest_authorization(
        &self,
        challenged: &RawResponse,
        method: Method,
        url: &str,
        credentials: &Credentials,
    ) -> Option<String> {
        let challenge = challenged.digest_challenge()?;
        let nc = self.nonce_count.fetch_add(1, Ordering::SeqCst) + 1;
        let cnonce = new_cnonce();
        Some(challenge.authorization(
            &credentials.username,
            &credentials.password,
            method.as_str(),
            &request_uri(url),
            nc,
            &cnonce,
        ))
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<String>,
        authorization: Option<String>,
        timeout: Option<Duration>,
    ) -> SoapResult<RawResponse> {
        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, SOAP_CONTENT_TYPE).body(body);
        }
        if let Some(auth) = authorization {
            request = request.header(AUTHORIZATION, auth);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let res = request.send().await?;
        let status = res.status();
        let challenges = res
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();
        let body = res.bytes().await?;
        Ok(RawResponse {
            status,
            body,
            challenges,
        })
    }
}

/// Path and query of a URL, as used in the digest `uri` field.
fn request_uri(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => match parsed.query() {
            Some(q) => format!("{}?{}", parsed.path(), q),
            None => parsed.path().to_string(),
        },
        Err(_) => "/".to_string(),
    }
}

/// Maps an HTTP response to the body XML or a classified error.
pub(super) fn classify(raw: &RawResponse) -> SoapResult<String> {
    let text = raw.text();
    let status = raw.status.as_u16();

    if raw.status.is_success() {
        if has_fault(&text) {
            return Err(SoapError::ServerFault {
                status,
                message: fault_text(&text).unwrap_or_else(|| "unknown SOAP fault".into()),
            });
        }
        return body_xml(&text).map(str::to_string);
    }

    let message = fault_text(&text).unwrap_or_else(|| format!("HTTP {status}"));
    match status {
        401 => Err(SoapError::Unauthorized(message)),
        400 => Err(SoapError::BadRequest(message)),
        _ => Err(SoapError::ServerFault { status, message }),
    }
}
