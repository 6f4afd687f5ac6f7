//! HTTP server setup and the proxy handler.
//!
//! # Responsibilities
//! - Create the Axum router for one listener
//! - Wire up middleware (request ID, tracing)
//! - Resolve the live snapshot once per request and hold it to completion
//! - Apply route policies, select a backend, translate and dispatch
//! - Wrap the forwarding service in the route's CORS layer, if any
//! - Record per-request metrics and counters

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::header::{ACCEPT_ENCODING, CONTENT_TYPE};
use axum::http::request::Parts;
use axum::http::{HeaderValue, Request};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use tokio::net::TcpListener;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::config::{ConfigSnapshot, ConfigStore};
use crate::dispatch::{pump_body, Dispatcher, OutboundRequest};
use crate::error::GatewayError;
use crate::http::request::{RequestContext, X_REQUEST_ID};
use crate::http::response::{from_upstream, set_content_type, GatewayHeaders};
use crate::load_balancer::{LoadBalancer, PowerOfTwoChoices};
use crate::observability::metrics::{self, RequestCounters};
use crate::observability::tracing::{record_backend, record_route, request_span};
use crate::routing::Route;
use crate::security::headers::sanitize_request_headers;
use crate::security::limits::read_body;
use crate::translate::{stream_translation, translate_request, translate_response};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Name of the listener this state serves; selects the router in each snapshot.
    pub listener: Arc<str>,
    pub store: Arc<ConfigStore>,
    pub dispatcher: Dispatcher,
    pub balancer: Arc<dyn LoadBalancer>,
    pub counters: Arc<RequestCounters>,
}

impl AppState {
    pub fn new(
        listener: &str,
        store: Arc<ConfigStore>,
        dispatcher: Dispatcher,
        counters: Arc<RequestCounters>,
    ) -> Self {
        Self {
            listener: Arc::from(listener),
            store,
            dispatcher,
            balancer: Arc::new(PowerOfTwoChoices::new()),
            counters,
        }
    }
}

/// HTTP server for one gateway listener.
pub struct FrontDoor {
    router: axum::Router,
}

impl FrontDoor {
    pub fn new(state: AppState) -> Self {
        Self {
            router: Self::build_router(state),
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> axum::Router {
        axum::Router::new()
            .route("/", any(proxy_handler))
            .route("/{*path}", any(proxy_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    pub fn router(&self) -> axum::Router {
        self.router.clone()
    }

    /// Serve connections from `listener` until `shutdown` resolves, then drain.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!(address = %addr, "HTTP server stopped");
        Ok(())
    }
}

/// Route and backend names for metrics; filled in as the request progresses.
struct Outcome {
    route: String,
    backend: String,
}

/// Name of the backend that served a response, carried through the CORS layer.
#[derive(Clone)]
struct ServedBy(String);

/// Main proxy handler.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let (parts, body) = request.into_parts();
    let ctx = RequestContext::new(&state.listener, client, &parts);
    let span = request_span(&ctx.request_id, &ctx.listener, ctx.method.as_str(), &ctx.path);

    handle(state, ctx, parts, body).instrument(span).await
}

async fn handle(state: AppState, ctx: RequestContext, parts: Parts, body: Body) -> Response {
    // One snapshot for the whole request, even if a reload lands meanwhile.
    let snapshot = state.store.snapshot();
    let mut outcome = Outcome {
        route: "none".to_string(),
        backend: "none".to_string(),
    };

    let mut response = match serve(&state, &snapshot, &ctx, parts, body, &mut outcome).await {
        Ok(response) => response,
        Err(e) => error_response(e),
    };

    if !response.headers().contains_key(X_REQUEST_ID) {
        if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
            response.headers_mut().insert(X_REQUEST_ID, value);
        }
    }

    let status = response.status().as_u16();
    metrics::record_request(&outcome.route, &outcome.backend, status, ctx.started);
    state.counters.record(status);
    tracing::info!(
        status,
        route = %outcome.route,
        backend = %outcome.backend,
        elapsed_ms = ctx.started.elapsed().as_millis() as u64,
        "Request completed"
    );

    response
}

fn error_response(error: GatewayError) -> Response {
    if error.is_client_error() {
        tracing::info!(kind = error.kind(), error = %error, "Request rejected");
    } else {
        tracing::warn!(kind = error.kind(), error = %error, "Request failed");
    }
    error.into_response()
}

/// Match the route and run the request through its forwarding service.
async fn serve(
    state: &AppState,
    snapshot: &ConfigSnapshot,
    ctx: &RequestContext,
    parts: Parts,
    body: Body,
    outcome: &mut Outcome,
) -> Result<Response, GatewayError> {
    // A listener removed by a reload keeps draining with an empty route table.
    let router = snapshot.router(&ctx.listener).ok_or_else(|| GatewayError::NoRouteMatch {
        path: ctx.path.clone(),
    })?;
    let matched = router.route(ctx.host.as_deref(), &ctx.path)?;
    let route = matched.route.as_ref();
    let sub_path = matched.sub_path.as_str();
    outcome.route = route.name.clone();
    record_route(&tracing::Span::current(), &route.name);

    let forwarding = tower::service_fn(move |request: Request<Body>| async move {
        let mut served_by = None;
        let mut response = forward(state, snapshot, route, sub_path, ctx, request, &mut served_by)
            .await
            .unwrap_or_else(error_response);
        if let Some(name) = served_by {
            response.extensions_mut().insert(ServedBy(name));
        }
        Ok::<_, Infallible>(response)
    });

    // Preflights are answered by the CORS layer and never reach `forward`.
    let response = ServiceBuilder::new()
        .option_layer(route.cors.clone())
        .service(forwarding)
        .oneshot(Request::from_parts(parts, body))
        .await
        .unwrap_or_else(|never| match never {});

    if let Some(ServedBy(name)) = response.extensions().get::<ServedBy>() {
        outcome.backend = name.clone();
    }
    Ok(response)
}

#[allow(clippy::too_many_arguments)]
async fn forward(
    state: &AppState,
    snapshot: &ConfigSnapshot,
    route: &Route,
    sub_path: &str,
    ctx: &RequestContext,
    request: Request<Body>,
    served_by: &mut Option<String>,
) -> Result<Response, GatewayError> {
    if let Some(limiter) = &route.rate_limiter {
        if !limiter.check(ctx.client.ip()) {
            metrics::record_rate_limited(&route.name);
            return Err(GatewayError::RateLimited {
                route: route.name.clone(),
            });
        }
    }

    let (parts, body) = request.into_parts();
    let body = read_body(&parts.headers, body, snapshot.config.security.max_body_size).await?;

    let selection = state
        .balancer
        .select(&route.backends)
        .ok_or_else(|| GatewayError::NoRouteMatch {
            path: ctx.path.clone(),
        })?;
    let backend = selection.backend;
    *served_by = Some(backend.name.clone());
    record_backend(&tracing::Span::current(), &backend.name);
    if selection.fail_open {
        state.counters.record_fail_open();
    }

    // The backend's native route table decides whether the sub-path exists at all.
    let mode = backend
        .routes
        .lookup(sub_path)
        .ok_or_else(|| GatewayError::NoRouteMatch {
            path: ctx.path.clone(),
        })?;

    let mut headers = parts.headers;
    sanitize_request_headers(&mut headers, Some(ctx.client.ip()));
    let health = &snapshot.config.health_check;

    let (mut response, dropped) = match mode.surface() {
        None => {
            let outbound = OutboundRequest {
                method: parts.method,
                path_and_query: ctx.with_query(sub_path),
                headers,
                body,
                request_id: ctx.request_id.clone(),
            };
            let dispatched = state.dispatcher.dispatch(&backend, outbound, health).await?;
            let status = dispatched.status();
            let upstream_headers = dispatched.response.headers().clone();
            let sse = dispatched.is_event_stream();
            let body = pump_body(&backend, dispatched, None, sse, health.clone());
            (from_upstream(status, &upstream_headers, body, false), Vec::new())
        }
        Some(surface) => {
            let translated = translate_request(&body, surface, &backend)?;
            if !translated.dropped.is_empty() {
                tracing::warn!(
                    backend = %backend.name,
                    dropped = ?translated.dropped,
                    "Translation dropped caller fields"
                );
                for field in &translated.dropped {
                    metrics::record_translation_loss(field);
                }
            }

            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            // The response body is re-encoded, so it must arrive uncompressed.
            headers.remove(ACCEPT_ENCODING);

            let outbound = OutboundRequest {
                method: parts.method,
                path_and_query: ctx.with_query(translated.path),
                headers,
                body: translated.body,
                request_id: ctx.request_id.clone(),
            };
            let dispatched = state.dispatcher.dispatch(&backend, outbound, health).await?;
            let status = dispatched.status();
            let upstream_headers = dispatched.response.headers().clone();

            let response = if !status.is_success() {
                // Upstream errors are forwarded in the backend's own dialect.
                let sse = dispatched.is_event_stream();
                let body = pump_body(&backend, dispatched, None, sse, health.clone());
                from_upstream(status, &upstream_headers, body, false)
            } else if dispatched.is_event_stream() {
                let translation = stream_translation(backend.dialect, surface);
                let rewritten = translation.is_some();
                let body = pump_body(&backend, dispatched, translation, true, health.clone());
                from_upstream(status, &upstream_headers, body, rewritten)
            } else {
                let raw = state.dispatcher.read_body(&backend, dispatched).await?;
                let body = translate_response(&raw, &backend, surface)?;
                let mut response = from_upstream(status, &upstream_headers, Body::from(body), true);
                set_content_type(&mut response, "application/json");
                response
            };
            (response, translated.dropped)
        }
    };

    GatewayHeaders {
        backend: Some(&backend.name),
        dropped: &dropped,
        fail_open: selection.fail_open,
    }
    .apply(response.headers_mut());
    Ok(response)
}
