//! Active health checking.
//!
//! # Responsibilities
//! - Periodically check every backend of the live snapshot
//! - Update backend health state based on results
//!
//! Backends without a health path (MCP by default) or with unresolved
//! credentials are not checked; passive observations still apply to them.

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::time;

use crate::backend::BackendDescriptor;
use crate::config::schema::HealthCheckConfig;
use crate::config::ConfigStore;
use crate::observability::metrics;

const USER_AGENT: &str = "llm-gateway-health-check";

pub struct HealthMonitor {
    store: Arc<ConfigStore>,
    client: reqwest::Client,
}

impl HealthMonitor {
    pub fn new(store: Arc<ConfigStore>, client: reqwest::Client) -> Self {
        Self { store, client }
    }

    /// Check on the configured interval until shutdown. The interval and
    /// thresholds are re-read from the live snapshot before every round.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("Health monitor starting");

        loop {
            let config = self.store.snapshot().config.health_check.clone();
            let interval = Duration::from_secs(config.interval_secs.max(1));

            tokio::select! {
                _ = time::sleep(interval) => {
                    if config.enabled {
                        self.check_all().await;
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Run one check round against the current snapshot.
    pub async fn check_all(&self) {
        let snapshot = self.store.snapshot();
        let config = &snapshot.config.health_check;

        let checks = snapshot
            .backends
            .all()
            .filter(|backend| backend.health_path.is_some() && backend.auth.is_resolved())
            .map(|backend| self.check_one(backend, config));
        join_all(checks).await;
    }

    async fn check_one(&self, backend: &Arc<BackendDescriptor>, config: &HealthCheckConfig) {
        let Some(path) = backend.health_path.as_deref() else {
            return;
        };
        let mut url = match backend.url_for(path) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(backend = %backend.name, error = %e, "Failed to build health check URL");
                return;
            }
        };

        let mut headers = HeaderMap::new();
        backend.prepare_headers(&mut headers);
        if backend.auth.apply(&backend.name, &mut headers, &mut url).is_err() {
            return;
        }

        let request = self
            .client
            .get(url)
            .headers(headers)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send();

        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let healthy = match time::timeout(timeout, request).await {
            Ok(Ok(response)) => {
                let success = response.status().is_success();
                if !success {
                    tracing::warn!(backend = %backend.name, status = %response.status(), "Health check failed: non-success status");
                }
                success
            }
            Ok(Err(e)) => {
                tracing::warn!(backend = %backend.name, error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::warn!(backend = %backend.name, "Health check failed: timeout");
                false
            }
        };

        if healthy {
            backend.health.mark_success(config.healthy_threshold as usize);
        } else {
            backend.health.mark_failure(config.unhealthy_threshold as usize);
        }

        metrics::record_backend_health(&backend.name, backend.health.is_healthy());
    }
}
