//! Live configuration store.
//!
//! # Responsibilities
//! - Hold the current snapshot behind a single atomic pointer
//! - Apply new configuration: validate, compile, swap
//! - Serialize writers; readers never block
//!
//! # Design Decisions
//! - `ArcSwap` for lock-free reads; in-flight requests keep their own `Arc`
//! - One tokio `Mutex` guards the build-and-swap section (single writer)
//! - A failed build leaves the current snapshot untouched
//! - An identical document is a no-op (no swap, no version bump) unless its
//!   credentials now resolve differently, e.g. an environment variable was set
//! - Health records and rate limiters outlive snapshots in shared tables

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::{watch, Mutex};

use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::GatewayConfig;
use crate::config::snapshot::ConfigSnapshot;
use crate::health::HealthTable;
use crate::observability::metrics;
use crate::security::rate_limit::RateLimitTable;

/// What a successful reload did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// A new snapshot with this version is live.
    Applied(u64),
    /// The document matched the live one; nothing changed.
    Unchanged(u64),
}

impl ReloadOutcome {
    pub fn version(&self) -> u64 {
        match self {
            ReloadOutcome::Applied(v) | ReloadOutcome::Unchanged(v) => *v,
        }
    }
}

pub struct ConfigStore {
    current: ArcSwap<ConfigSnapshot>,
    reload_lock: Mutex<()>,
    health: HealthTable,
    limits: RateLimitTable,
    source: Option<PathBuf>,
    version_tx: watch::Sender<u64>,
}

impl ConfigStore {
    /// Build the initial snapshot from an in-memory document.
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigError> {
        Self::with_source(config, None)
    }

    /// Load the initial snapshot from a file that later reloads re-read.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let config = load_config(path)?;
        Self::loaded_from(config, path)
    }

    /// Build the initial snapshot from a document already read from `path`.
    pub fn loaded_from(config: GatewayConfig, path: &Path) -> Result<Self, ConfigError> {
        Self::with_source(config, Some(path.to_path_buf()))
    }

    fn with_source(config: GatewayConfig, source: Option<PathBuf>) -> Result<Self, ConfigError> {
        let health = HealthTable::new();
        let limits = RateLimitTable::new();
        let snapshot = ConfigSnapshot::build(config, 1, &health, &limits)?;
        let (version_tx, _) = watch::channel(snapshot.version);

        Ok(Self {
            current: ArcSwap::from_pointee(snapshot),
            reload_lock: Mutex::new(()),
            health,
            limits,
            source,
            version_tx,
        })
    }

    /// The live snapshot. Hold the returned `Arc` for the whole request.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.current.load_full()
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn health(&self) -> &HealthTable {
        &self.health
    }

    pub fn rate_limits(&self) -> &RateLimitTable {
        &self.limits
    }

    /// Notified with the new version after every swap.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }

    /// Validate, compile and swap in a new document.
    pub async fn apply(&self, config: GatewayConfig) -> Result<ReloadOutcome, ConfigError> {
        let _guard = self.reload_lock.lock().await;
        let current = self.current.load_full();
        let unchanged = current.config == config;

        let version = current.version + 1;
        let snapshot = match ConfigSnapshot::build(config, version, &self.health, &self.limits) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    version = current.version,
                    "Configuration rejected, keeping current snapshot"
                );
                metrics::record_config_reload("rejected");
                return Err(e);
            }
        };

        if unchanged && snapshot.same_credentials(&current) {
            tracing::info!(version = current.version, "Configuration unchanged, keeping snapshot");
            metrics::record_config_reload("unchanged");
            return Ok(ReloadOutcome::Unchanged(current.version));
        }
        if unchanged {
            tracing::info!(version, "Configuration unchanged but credentials resolved differently");
        }

        self.health.retain_names(snapshot.backends.names());
        self.limits.retain_keys(snapshot.rate_limit_keys());
        self.current.store(Arc::new(snapshot));
        self.version_tx.send_replace(version);
        metrics::record_config_reload("applied");
        tracing::info!(version, "Configuration applied");

        Ok(ReloadOutcome::Applied(version))
    }

    /// Re-read the source file and apply it.
    pub async fn reload(&self) -> Result<ReloadOutcome, ConfigError> {
        let path = self.source.as_deref().ok_or(ConfigError::NoSource)?;
        let config = match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to reload configuration");
                metrics::record_config_reload("rejected");
                return Err(e);
            }
        };
        self.apply(config).await
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("version", &self.current.load().version)
            .field("source", &self.source)
            .finish()
    }
}
