//! Per-request context.
//!
//! # Responsibilities
//! - Capture the request ID set by the request-id layer
//! - Extract routing-relevant information (host, path, query)
//! - Carry the client address for rate limiting and X-Forwarded-For
//!
//! The context is built once in the handler and passed explicitly through
//! matching, translation and dispatch.

use std::net::SocketAddr;
use std::time::Instant;

use axum::http::header::HOST;
use axum::http::request::Parts;
use axum::http::Method;

pub const X_REQUEST_ID: &str = "x-request-id";

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub listener: String,
    pub client: SocketAddr,
    pub method: Method,
    pub host: Option<String>,
    pub path: String,
    pub query: Option<String>,
    pub started: Instant,
}

impl RequestContext {
    pub fn new(listener: &str, client: SocketAddr, parts: &Parts) -> Self {
        let request_id = parts
            .headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        // HTTP/2 requests carry the authority in the URI instead of a Host header.
        let host = parts
            .headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| parts.uri.authority().map(|a| a.to_string()));

        Self {
            request_id,
            listener: listener.to_string(),
            client,
            method: parts.method.clone(),
            host,
            path: parts.uri.path().to_string(),
            query: parts.uri.query().map(str::to_string),
            started: Instant::now(),
        }
    }

    /// Upstream path with the caller's query string re-attached.
    pub fn with_query(&self, path: &str) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", path, query),
            None => path.to_string(),
        }
    }
}
