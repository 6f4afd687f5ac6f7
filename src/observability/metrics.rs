//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by route, backend, status
//! - `gateway_request_duration_seconds` (histogram): latency by route
//! - `gateway_backend_health` (gauge): 1=healthy, 0=unhealthy
//! - `gateway_rate_limited_total` (counter): rejections by route
//! - `gateway_translation_loss_total` (counter): dropped fields by name
//! - `gateway_config_reloads_total` (counter): reloads by outcome
//!
//! # Design Decisions
//! - The Prometheus exporter is optional; the `metrics` macros are no-ops without it
//! - `RequestCounters` back the admin status endpoint regardless of the exporter

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use serde::Serialize;

/// Install the Prometheus recorder and its scrape listener. Requires a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(route: &str, backend: &str, status: u16, started: Instant) {
    metrics::counter!(
        "gateway_requests_total",
        "route" => route.to_string(),
        "backend" => backend.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "route" => route.to_string())
        .record(started.elapsed().as_secs_f64());
}

pub fn record_backend_health(backend: &str, healthy: bool) {
    metrics::gauge!("gateway_backend_health", "backend" => backend.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_rate_limited(route: &str) {
    metrics::counter!("gateway_rate_limited_total", "route" => route.to_string()).increment(1);
}

pub fn record_translation_loss(field: &str) {
    metrics::counter!("gateway_translation_loss_total", "field" => field.to_string()).increment(1);
}

pub fn record_config_reload(outcome: &'static str) {
    metrics::counter!("gateway_config_reloads_total", "outcome" => outcome).increment(1);
}

/// In-process request tallies shared by every listener.
#[derive(Debug)]
pub struct RequestCounters {
    started_at: Instant,
    total: AtomicU64,
    client_errors: AtomicU64,
    upstream_errors: AtomicU64,
    fail_open: AtomicU64,
}

/// Point-in-time copy of [`RequestCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub uptime_secs: u64,
    pub total: u64,
    pub client_errors: u64,
    pub upstream_errors: u64,
    pub fail_open: u64,
}

impl RequestCounters {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total: AtomicU64::new(0),
            client_errors: AtomicU64::new(0),
            upstream_errors: AtomicU64::new(0),
            fail_open: AtomicU64::new(0),
        }
    }

    /// Count a finished request by the status returned to the caller.
    pub fn record(&self, status: u16) {
        self.total.fetch_add(1, Ordering::Relaxed);
        match status {
            400..=499 => {
                self.client_errors.fetch_add(1, Ordering::Relaxed);
            }
            500..=599 => {
                self.upstream_errors.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn record_fail_open(&self) {
        self.fail_open.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs(),
            total: self.total.load(Ordering::Relaxed),
            client_errors: self.client_errors.load(Ordering::Relaxed),
            upstream_errors: self.upstream_errors.load(Ordering::Relaxed),
            fail_open: self.fail_open.load(Ordering::Relaxed),
        }
    }
}

impl Default for RequestCounters {
    fn default() -> Self {
        Self::new()
    }
}
