//! SOAP 1.2 engine for ONVIF communication.
//!
//! This module handles envelope building, authentication, HTTP transport,
//! and response classification. For typed ONVIF operations, see
//! [`crate::onvif`].

use thiserror::Error;

pub mod auth;
mod client;
pub mod envelope;
pub mod xml;

pub use auth::{AuthMode, Credentials, DigestChallenge};
pub use client::{RawResponse, SoapEngine};

// ─────────────────────────────────────────────────────────────────────────────
// Error Types
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur during SOAP operations with cameras.
#[derive(Debug, Error)]
pub enum SoapError {
    /// Camera answered 401 (after the digest retry, if any).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Camera answered 400; the request did not match its contract.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Camera returned a SOAP fault or another non-success status.
    #[error("SOAP fault (HTTP {status}): {message}")]
    ServerFault { status: u16, message: String },

    /// HTTP request to the camera failed.
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response body could not be decoded.
    #[error("failed to decode SOAP response: {0}")]
    Decode(String),

    /// The device exposes no endpoint for the requested service.
    #[error("no endpoint for service {0}")]
    EndpointNotFound(String),

    /// The request could not be built from the supplied data.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Convenient Result alias for SOAP operations.
pub type SoapResult<T> = Result<T, SoapError>;

impl SoapError {
    /// Returns the HTTP status the camera answered with, if any.
    #[must_use]
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized(_) => Some(401),
            Self::BadRequest(_) => Some(400),
            Self::ServerFault { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// True when the error is a request timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }
}

/// Escapes XML special characters for embedding in XML content.
///
/// This escapes all five XML special characters as required by the XML spec:
/// `&`, `<`, `>`, `"` and `'`.
pub fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}
