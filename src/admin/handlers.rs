use std::time::UNIX_EPOCH;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use serde_json::json;

use crate::admin::AdminState;
use crate::config::{ConfigError, ReloadOutcome};
use crate::health::HealthState;
use crate::observability::metrics::CounterSnapshot;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub config_version: u64,
    /// Seconds since the epoch at which the live snapshot was built.
    pub config_loaded_at: u64,
    pub listeners: Vec<String>,
    pub requests: CounterSnapshot,
}

#[derive(Serialize)]
pub struct BackendStatus {
    pub name: String,
    pub dialect: &'static str,
    pub base_url: String,
    pub model: Option<String>,
    pub health: HealthState,
    pub in_flight: usize,
    pub consecutive_failures: usize,
    pub auth_resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_error: Option<String>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let snapshot = state.store.snapshot();
    let mut listeners: Vec<String> = snapshot.listener_names().map(str::to_string).collect();
    listeners.sort();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        config_version: snapshot.version,
        config_loaded_at: snapshot
            .loaded_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
        listeners,
        requests: state.counters.snapshot(),
    })
}

pub async fn get_backends(State(state): State<AdminState>) -> Json<Vec<BackendStatus>> {
    let snapshot = state.store.snapshot();
    let mut statuses: Vec<BackendStatus> = snapshot
        .backends
        .all()
        .map(|b| BackendStatus {
            name: b.name.clone(),
            dialect: b.dialect.as_str(),
            base_url: b.base_url.to_string(),
            model: b.model.clone(),
            health: b.health.state(),
            in_flight: b.health.in_flight(),
            consecutive_failures: b.health.consecutive_failures(),
            auth_resolved: b.auth.is_resolved(),
            auth_error: b.auth.unresolved_reason().map(str::to_string),
        })
        .collect();
    statuses.sort_by(|a, b| a.name.cmp(&b.name));

    Json(statuses)
}

pub async fn post_reload(State(state): State<AdminState>) -> (StatusCode, Json<serde_json::Value>) {
    match state.store.reload().await {
        Ok(ReloadOutcome::Applied(version)) => (
            StatusCode::OK,
            Json(json!({"outcome": "applied", "version": version})),
        ),
        Ok(ReloadOutcome::Unchanged(version)) => (
            StatusCode::OK,
            Json(json!({"outcome": "unchanged", "version": version})),
        ),
        Err(ConfigError::Validation(errors)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "error": {
                    "kind": "ConfigValidationFailed",
                    "message": "configuration rejected; previous configuration still active",
                    "errors": errors.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
                }
            })),
        ),
        Err(ConfigError::NoSource) => (
            StatusCode::CONFLICT,
            Json(json!({"error": {"kind": "NoConfigSource", "message": ConfigError::NoSource.to_string()}})),
        ),
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"error": {"kind": "ConfigLoadFailed", "message": e.to_string()}})),
        ),
    }
}
