//! Request spans.
//!
//! Every inbound request runs inside a `gateway_request` span. Route and backend
//! are unknown when the span opens and are recorded once resolved.

use tracing::Span;

pub fn request_span(request_id: &str, listener: &str, method: &str, path: &str) -> Span {
    tracing::info_span!(
        "gateway_request",
        request_id = %request_id,
        listener = %listener,
        method = %method,
        path = %path,
        route = tracing::field::Empty,
        backend = tracing::field::Empty,
    )
}

pub fn record_route(span: &Span, route: &str) {
    span.record("route", route);
}

pub fn record_backend(span: &Span, backend: &str) {
    span.record("backend", backend);
}
