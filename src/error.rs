//! Client-facing error taxonomy.
//!
//! Every failure a caller can observe maps to one [`GatewayError`] variant with a
//! stable `kind` string and an HTTP status. Errors render as a JSON envelope:
//!
//! ```text
//! {"error": {"kind": "NoRouteMatch", "message": "...", "field": "..."}}
//! ```
//!
//! Configuration errors are not part of this taxonomy; they live in
//! [`crate::config::ConfigError`] and never reach a client.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Failures surfaced to gateway clients.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("no route matches path '{path}'")]
    NoRouteMatch { path: String },

    #[error("field '{field}' is not supported by the {dialect} dialect of backend '{backend}'")]
    UnsupportedDialectField {
        field: String,
        backend: String,
        dialect: &'static str,
    },

    #[error("invalid request body: {message}")]
    InvalidRequestBody { message: String },

    #[error("request body exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize },

    #[error("rate limit exceeded for route '{route}'")]
    RateLimited { route: String },

    #[error("backend '{backend}' did not respond within {timeout:?} ({attempts} attempt(s))")]
    UpstreamTimeout {
        backend: String,
        attempts: u32,
        timeout: Duration,
    },

    #[error("connection to backend '{backend}' failed after {attempts} attempt(s): {message}")]
    UpstreamConnectionFailed {
        backend: String,
        attempts: u32,
        message: String,
    },

    #[error("backend '{backend}' returned a response that could not be translated: {message}")]
    UpstreamProtocolError { backend: String, message: String },

    #[error("credentials for backend '{backend}' could not be resolved: {reason}")]
    AuthResolutionFailed { backend: String, reason: String },
}

impl GatewayError {
    /// Stable machine-readable identifier.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::NoRouteMatch { .. } => "NoRouteMatch",
            GatewayError::UnsupportedDialectField { .. } => "UnsupportedDialectField",
            GatewayError::InvalidRequestBody { .. } => "InvalidRequestBody",
            GatewayError::PayloadTooLarge { .. } => "PayloadTooLarge",
            GatewayError::RateLimited { .. } => "RateLimited",
            GatewayError::UpstreamTimeout { .. } => "UpstreamTimeout",
            GatewayError::UpstreamConnectionFailed { .. } => "UpstreamConnectionFailed",
            GatewayError::UpstreamProtocolError { .. } => "UpstreamProtocolError",
            GatewayError::AuthResolutionFailed { .. } => "AuthResolutionFailed",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NoRouteMatch { .. } => StatusCode::NOT_FOUND,
            GatewayError::UnsupportedDialectField { .. }
            | GatewayError::InvalidRequestBody { .. } => StatusCode::BAD_REQUEST,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UpstreamConnectionFailed { .. }
            | GatewayError::UpstreamProtocolError { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::AuthResolutionFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// The offending field or path, when the error names one.
    pub fn field(&self) -> Option<&str> {
        match self {
            GatewayError::NoRouteMatch { path } => Some(path),
            GatewayError::UnsupportedDialectField { field, .. } => Some(field),
            _ => None,
        }
    }

    /// True for failures caused by the caller rather than the gateway or upstream.
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }

    /// Render the JSON envelope without the HTTP framing.
    pub fn to_body(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorBody {
                kind: self.kind(),
                message: self.to_string(),
                field: self.field().map(str::to_string),
            },
        }
    }
}

/// Wire shape of an error response.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_body())).into_response()
    }
}
