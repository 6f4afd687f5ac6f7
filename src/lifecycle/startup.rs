//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Initialize all subsystems in dependency order
//! - Start background tasks (watcher, reload loop, health checks, bucket sweeps)
//! - Bind listeners and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::admin::{setup_admin_router, AdminState};
use crate::config::watcher::{run_reload_loop, ConfigWatcher, ReloadTrigger};
use crate::config::{load_config, ConfigError, ConfigSnapshot, ConfigStore};
use crate::dispatch::Dispatcher;
use crate::health::active::HealthMonitor;
use crate::health::HealthTable;
use crate::lifecycle::shutdown::{Shutdown, DRAIN_TIMEOUT};
use crate::lifecycle::signals::{reload_on_sighup, shutdown_on_signal};
use crate::net::{ListenerError, ListenerSet};
use crate::observability::{init_logging, init_metrics, RequestCounters};
use crate::security::rate_limit::{run_sweeper, RateLimitTable};

/// Error type for gateway startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),

    #[error("metrics: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("{field}: '{address}' is not a socket address")]
    InvalidAddress { field: &'static str, address: String },

    #[error("upstream client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("config watcher: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("admin listener: {0}")]
    Admin(#[source] std::io::Error),
}

/// Load, validate and compile a configuration file without serving it.
pub fn check_config(path: &Path) -> Result<ConfigSnapshot, ConfigError> {
    let config = load_config(path)?;
    ConfigSnapshot::build(config, 1, &HealthTable::new(), &RateLimitTable::new())
}

/// Run the gateway from `config_path` until Ctrl-C or SIGTERM.
pub async fn run(config_path: &Path) -> Result<(), StartupError> {
    // Logging first, so warnings raised while compiling the snapshot are emitted.
    let loaded = load_config(config_path)?;
    init_logging(&loaded.observability)?;

    let store = Arc::new(ConfigStore::loaded_from(loaded, config_path)?);
    let snapshot = store.snapshot();
    let config = &snapshot.config;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        listeners = config.listeners.len(),
        backends = config.backends.len(),
        "llm-gateway starting"
    );

    if config.observability.metrics_enabled {
        let addr = parse_addr("observability.metricsAddress", &config.observability.metrics_address)?;
        init_metrics(addr)?;
    }

    let dispatcher = Dispatcher::new(&config.timeouts)?;
    let counters = Arc::new(RequestCounters::new());
    let shutdown = Shutdown::new();
    let mut tasks = Vec::new();

    // Config reloads: file watcher and SIGHUP both feed the coalescing trigger.
    let trigger = Arc::new(ReloadTrigger::new());
    let _watcher = ConfigWatcher::new(config_path, Arc::clone(&trigger)).run()?;
    tasks.push(tokio::spawn(run_reload_loop(
        Arc::clone(&store),
        Arc::clone(&trigger),
        shutdown.subscribe(),
    )));
    tasks.push(tokio::spawn(reload_on_sighup(Arc::clone(&trigger), shutdown.clone())));

    let monitor = HealthMonitor::new(Arc::clone(&store), dispatcher.client().clone());
    tasks.push(tokio::spawn(monitor.run(shutdown.subscribe())));
    tasks.push(tokio::spawn(run_sweeper(Arc::clone(&store), shutdown.subscribe())));

    if config.admin.enabled {
        let addr = parse_addr("admin.bindAddress", &config.admin.bind_address)?;
        let socket = TcpListener::bind(addr).await.map_err(StartupError::Admin)?;
        let router = setup_admin_router(AdminState {
            store: Arc::clone(&store),
            counters: Arc::clone(&counters),
        });
        let drained = shutdown.signalled();
        tracing::info!(address = %addr, "Admin API listening");
        tasks.push(tokio::spawn(async move {
            if let Err(e) = axum::serve(socket, router).with_graceful_shutdown(drained).await {
                tracing::error!(error = %e, "Admin server failed");
            }
        }));
    }

    let mut listeners = ListenerSet::new(Arc::clone(&store), dispatcher, counters, DRAIN_TIMEOUT);
    if let Err(e) = listeners.start().await {
        shutdown.trigger();
        return Err(e.into());
    }
    tracing::info!(count = listeners.len(), "Listeners started");
    let serving = tokio::spawn(listeners.run(shutdown.subscribe()));

    shutdown_on_signal(shutdown.clone()).await;
    tracing::info!("Shutdown signal received, draining listeners");

    if let Err(e) = serving.await {
        tracing::error!(error = %e, "Listener supervisor failed");
    }
    futures_util::future::join_all(tasks).await;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn parse_addr(field: &'static str, address: &str) -> Result<SocketAddr, StartupError> {
    address.parse().map_err(|_| StartupError::InvalidAddress {
        field,
        address: address.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_check_config_reports_every_error() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            "listeners:\n  - name: main\n    bindAddress: nowhere\n    routes:\n      - {{ name: r, pathPrefix: /x, backends: [ghost] }}\n"
        )
        .unwrap();

        let Err(ConfigError::Validation(errors)) = check_config(file.path()) else {
            panic!("expected validation errors");
        };
        let text: Vec<String> = errors.iter().map(ToString::to_string).collect();
        assert!(text.iter().any(|e| e.contains("nowhere")), "{text:?}");
        assert!(text.iter().any(|e| e.contains("ghost")), "{text:?}");
    }

    #[test]
    fn test_parse_addr_names_field() {
        let err = parse_addr("admin.bindAddress", "localhost").unwrap_err();
        assert_eq!(err.to_string(), "admin.bindAddress: 'localhost' is not a socket address");
    }
}
