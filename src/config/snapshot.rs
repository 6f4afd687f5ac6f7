//! Immutable configuration snapshots.
//!
//! A snapshot is everything a request needs to be served: the validated
//! document, the compiled router of each listener and the backend registry.
//! Requests clone the `Arc<ConfigSnapshot>` once and keep it until they finish.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::SystemTime;

use crate::backend::{BackendRegistry, ResolvedAuth};
use crate::config::loader::ConfigError;
use crate::config::schema::GatewayConfig;
use crate::config::validation::validate_config;
use crate::health::HealthTable;
use crate::routing::Router;
use crate::security::rate_limit::RateLimitTable;

#[derive(Debug)]
pub struct ConfigSnapshot {
    /// Monotonic; the first snapshot is version 1.
    pub version: u64,
    pub loaded_at: SystemTime,
    pub config: GatewayConfig,
    routers: HashMap<String, Arc<Router>>,
    pub backends: BackendRegistry,
}

impl ConfigSnapshot {
    /// Validate and compile a configuration document.
    ///
    /// Health records and rate limiters come from the shared tables, so they
    /// carry over from the snapshot this one replaces.
    pub fn build(
        config: GatewayConfig,
        version: u64,
        health: &HealthTable,
        limits: &RateLimitTable,
    ) -> Result<Self, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        let backends = BackendRegistry::build(&config, health).map_err(ConfigError::Validation)?;

        let mut routers = HashMap::with_capacity(config.listeners.len());
        let mut errors = Vec::new();
        for listener in &config.listeners {
            match Router::build(listener, &backends, &config, health, limits) {
                Ok(router) => {
                    routers.insert(listener.effective_name().to_string(), Arc::new(router));
                }
                Err(e) => errors.extend(e),
            }
        }
        if !errors.is_empty() {
            return Err(ConfigError::Validation(errors));
        }

        Ok(Self {
            version,
            loaded_at: SystemTime::now(),
            config,
            routers,
            backends,
        })
    }

    /// Router of a listener, by listener name.
    pub fn router(&self, listener: &str) -> Option<&Arc<Router>> {
        self.routers.get(listener)
    }

    pub fn listener_names(&self) -> impl Iterator<Item = &str> {
        self.routers.keys().map(String::as_str)
    }

    /// Keys of every route that has a rate limiter.
    pub fn rate_limit_keys(&self) -> Vec<String> {
        self.routers
            .values()
            .flat_map(|router| {
                router
                    .routes()
                    .iter()
                    .filter(|route| route.rate_limiter.is_some())
                    .map(|route| RateLimitTable::key(router.listener(), &route.name))
            })
            .collect()
    }

    /// Whether every descriptor, route-private ones included, resolved the
    /// same credentials as in `other`.
    pub fn same_credentials(&self, other: &ConfigSnapshot) -> bool {
        self.credentials() == other.credentials()
    }

    fn credentials(&self) -> BTreeMap<String, &ResolvedAuth> {
        let mut out: BTreeMap<String, &ResolvedAuth> = self
            .backends
            .all()
            .map(|backend| (backend.name.clone(), &backend.auth))
            .collect();
        for router in self.routers.values() {
            for route in router.routes() {
                for backend in &route.backends {
                    let key = format!("{}/{}/{}", router.listener(), route.name, backend.name);
                    out.insert(key, &backend.auth);
                }
            }
        }
        out
    }
}
