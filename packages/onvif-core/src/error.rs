//! Centralized error types for the ONVIF core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Classifies every failure into one of six [`ErrorKind`]s
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::discovery::DiscoveryError;
use crate::duration::DurationError;
use crate::host::HostError;
use crate::soap::SoapError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for DiscoveryError {
    fn code(&self) -> &'static str {
        match self {
            Self::SocketBind(_) => "socket_bind_failed",
            Self::SendProbe(_) => "probe_send_failed",
            Self::NoInterfaces => "no_network_interfaces",
            Self::InterfaceNotFound(_) => "interface_not_found",
        }
    }
}

impl ErrorCode for SoapError {
    fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::BadRequest(_) => "contract_invalid",
            Self::ServerFault { .. } => "soap_fault",
            Self::Transport(_) => "http_request_failed",
            Self::Decode(_) => "soap_decode_error",
            Self::EndpointNotFound(_) => "endpoint_not_found",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }
}

impl ErrorCode for HostError {
    fn code(&self) -> &'static str {
        match self {
            Self::DeviceNotFound(_) => "device_not_found",
            Self::DeviceExists(_) => "device_exists",
            Self::SecretNotFound(_) => "secret_not_found",
            Self::Store(_) => "host_store_error",
            Self::ChannelClosed => "readings_channel_closed",
        }
    }
}

/// Classification shared by every error surfaced to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Missing attributes, bad JSON, bad MAC, missing xaddr, bad duration.
    ContractInvalid,
    /// Credentials rejected by the camera.
    Unauthorized,
    /// A collaborator (host, network, socket) is not available.
    ServiceUnavailable,
    /// The camera answered with a fault or an unexpected status.
    ServerError,
    /// The request never produced an HTTP response.
    Transport,
    /// Unknown device, resource or function.
    NotFound,
}

/// Application-wide error type for the ONVIF core.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum OnvifError {
    /// Caller supplied something the contract does not accept.
    #[error("Contract invalid: {0}")]
    ContractInvalid(String),

    /// Camera rejected the credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A required collaborator is unavailable.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Camera returned a fault or non-success status.
    ///
    /// `status` keeps the HTTP status so callers can recognise 404 expiry.
    #[error("Server error: {message}")]
    ServerError {
        status: Option<u16>,
        message: String,
    },

    /// Network-level failure (connect, timeout, reset).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Device, resource or function is unknown.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl OnvifError {
    /// Returns the error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ContractInvalid(_) => ErrorKind::ContractInvalid,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            Self::ServerError { .. } => ErrorKind::ServerError,
            Self::Transport(_) => ErrorKind::Transport,
            Self::NotFound(_) => ErrorKind::NotFound,
        }
    }

    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ContractInvalid(_) => "contract_invalid",
            Self::Unauthorized(_) => "unauthorized",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::ServerError { .. } => "server_error",
            Self::Transport(_) => "transport_error",
            Self::NotFound(_) => "not_found",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ContractInvalid(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::ServerError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the camera's HTTP status for server errors.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::ServerError { status, .. } => *status,
            _ => None,
        }
    }

    pub(crate) fn contract(msg: impl Into<String>) -> Self {
        Self::ContractInvalid(msg.into())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result Type Aliases
// ─────────────────────────────────────────────────────────────────────────────

// Re-export Result type aliases from their defining modules
pub use crate::discovery::DiscoveryResult;
pub use crate::soap::SoapResult;

/// Convenient Result alias for application-wide operations.
pub type OnvifResult<T> = Result<T, OnvifError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    kind: ErrorKind,
    message: String,
    status: u16,
}

impl IntoResponse for OnvifError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            kind: self.kind(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<SoapError> for OnvifError {
    fn from(err: SoapError) -> Self {
        match err {
            SoapError::Unauthorized(msg) => Self::Unauthorized(msg),
            SoapError::BadRequest(msg) | SoapError::EndpointNotFound(msg) => {
                Self::ContractInvalid(msg)
            }
            SoapError::InvalidRequest(msg) => Self::ContractInvalid(msg),
            SoapError::ServerFault { status, message } => Self::ServerError {
                status: Some(status),
                message,
            },
            SoapError::Decode(msg) => Self::ServerError {
                status: None,
                message: format!("failed to decode response: {msg}"),
            },
            SoapError::Transport(e) => Self::Transport(e.to_string()),
        }
    }
}

impl From<DiscoveryError> for OnvifError {
    fn from(err: DiscoveryError) -> Self {
        Self::ServiceUnavailable(err.to_string())
    }
}

impl From<HostError> for OnvifError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::DeviceNotFound(name) => Self::NotFound(format!("device {name}")),
            HostError::SecretNotFound(name) => Self::NotFound(format!("secret {name}")),
            HostError::DeviceExists(name) => {
                Self::ContractInvalid(format!("device {name} already exists"))
            }
            other => Self::ServiceUnavailable(other.to_string()),
        }
    }
}

impl From<DurationError> for OnvifError {
    fn from(err: DurationError) -> Self {
        Self::ContractInvalid(err.to_string())
    }
}

impl From<serde_json::Error> for OnvifError {
    fn from(err: serde_json::Error) -> Self {
        Self::ContractInvalid(format!("invalid JSON: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soap_unauthorized_maps_to_unauthorized_kind() {
        let err: OnvifError = SoapError::Unauthorized("digest rejected".into()).into();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn server_fault_keeps_http_status() {
        let err: OnvifError = SoapError::ServerFault {
            status: 404,
            message: "not found".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::ServerError);
        assert_eq!(err.http_status(), Some(404));
    }

    #[test]
    fn missing_endpoint_is_a_contract_error() {
        let err: OnvifError = SoapError::EndpointNotFound("PTZ".into()).into();
        assert_eq!(err.kind(), ErrorKind::ContractInvalid);
        assert_eq!(err.code(), "contract_invalid");
    }

    #[test]
    fn host_not_found_maps_to_not_found() {
        let err: OnvifError = HostError::DeviceNotFound("cam".into()).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }
}
