//! Passive health checking (failure detection).
//!
//! # Responsibilities
//! - Observe request outcomes on the dispatch path
//! - Feed them into the backend's state machine
//!
//! # Design Decisions
//! - Connection errors and timeouts are failures
//! - Upstream 502/503/504 are failures; other statuses count as success
//! - 4xx are NOT failures (client error, not backend)

use axum::http::StatusCode;

use crate::config::schema::HealthCheckConfig;
use crate::health::state::BackendHealth;

/// Outcome of one upstream attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Responded(StatusCode),
    ConnectionFailed,
    TimedOut,
}

/// Apply an observed outcome to a backend's health.
pub fn observe(health: &BackendHealth, outcome: Outcome, config: &HealthCheckConfig) {
    let failed = match outcome {
        Outcome::Responded(status) => matches!(
            status,
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
        ),
        Outcome::ConnectionFailed | Outcome::TimedOut => true,
    };

    if failed {
        health.mark_failure(config.unhealthy_threshold as usize);
    } else {
        health.mark_success(config.healthy_threshold as usize);
    }
}
