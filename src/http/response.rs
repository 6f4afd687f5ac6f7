//! Response assembly.
//!
//! # Responsibilities
//! - Build the caller response from an upstream response head
//! - Add gateway headers (request ID, translation loss, fail-open)
//!
//! # Design Decisions
//! - Hop-by-hop headers are stripped from upstream responses
//! - A body the gateway rewrote loses its upstream Content-Length
//! - Upstream error statuses are forwarded, never remapped

use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;

use crate::security::headers::sanitize_response_headers;

/// Comma-separated caller fields a translation had to drop.
pub const X_GATEWAY_TRANSLATION_LOSS: HeaderName = HeaderName::from_static("x-gateway-translation-loss");
/// Present when every candidate backend was unhealthy.
pub const X_GATEWAY_FAIL_OPEN: HeaderName = HeaderName::from_static("x-gateway-fail-open");
/// Backend that served the request.
pub const X_GATEWAY_BACKEND: HeaderName = HeaderName::from_static("x-gateway-backend");

/// Build a response from an upstream head and a (possibly rewritten) body.
pub fn from_upstream(status: StatusCode, upstream_headers: &HeaderMap, body: Body, rewritten: bool) -> Response {
    let mut headers = upstream_headers.clone();
    sanitize_response_headers(&mut headers);
    if rewritten {
        headers.remove(CONTENT_LENGTH);
    }

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Force the caller-facing content type after translation.
pub fn set_content_type(response: &mut Response, value: &'static str) {
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(value));
}

/// Gateway metadata attached to every proxied response.
#[derive(Debug, Default)]
pub struct GatewayHeaders<'a> {
    pub backend: Option<&'a str>,
    pub dropped: &'a [String],
    pub fail_open: bool,
}

impl GatewayHeaders<'_> {
    pub fn apply(&self, headers: &mut HeaderMap) {
        if let Some(value) = self.backend.and_then(|b| HeaderValue::from_str(b).ok()) {
            headers.insert(X_GATEWAY_BACKEND, value);
        }
        if !self.dropped.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&self.dropped.join(",")) {
                headers.insert(X_GATEWAY_TRANSLATION_LOSS, value);
            }
        }
        if self.fail_open {
            headers.insert(X_GATEWAY_FAIL_OPEN, HeaderValue::from_static("true"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_upstream_strips_and_rewrites() {
        let mut upstream = HeaderMap::new();
        upstream.insert("content-length", HeaderValue::from_static("42"));
        upstream.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        upstream.insert("x-upstream", HeaderValue::from_static("1"));

        let response = from_upstream(StatusCode::CREATED, &upstream, Body::empty(), true);
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.headers().get("content-length").is_none());
        assert!(response.headers().get("transfer-encoding").is_none());
        assert_eq!(response.headers()["x-upstream"], "1");
    }

    #[test]
    fn test_gateway_headers() {
        let dropped = vec!["logit_bias".to_string(), "seed".to_string()];
        let mut headers = HeaderMap::new();
        GatewayHeaders {
            backend: Some("anthropic-main"),
            dropped: &dropped,
            fail_open: true,
        }
        .apply(&mut headers);

        assert_eq!(headers[X_GATEWAY_TRANSLATION_LOSS], "logit_bias,seed");
        assert_eq!(headers[X_GATEWAY_FAIL_OPEN], "true");
        assert_eq!(headers[X_GATEWAY_BACKEND], "anthropic-main");

        let mut headers = HeaderMap::new();
        GatewayHeaders::default().apply(&mut headers);
        assert!(headers.is_empty());
    }
}
