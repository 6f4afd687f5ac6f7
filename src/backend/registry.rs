//! Backend descriptor registry.
//!
//! Holds every backend of a snapshot by name. Route-level auth overrides produce
//! route-private descriptors that share the same health record.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::BackendDescriptor;
use crate::config::schema::{BackendConfig, GatewayConfig};
use crate::config::validation::ValidationError;
use crate::health::state::HealthTable;

#[derive(Debug, Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<BackendDescriptor>>,
    configs: HashMap<String, BackendConfig>,
}

impl BackendRegistry {
    /// Build descriptors for all top-level and inline backends.
    pub fn build(config: &GatewayConfig, health: &HealthTable) -> Result<Self, Vec<ValidationError>> {
        let mut registry = Self::default();
        let mut errors = Vec::new();

        let inline = config
            .listeners
            .iter()
            .flat_map(|l| l.routes.iter())
            .flat_map(|r| r.backends.iter())
            .filter_map(|b| match b {
                crate::config::schema::RouteBackend::Inline(backend) => Some(backend.as_ref()),
                crate::config::schema::RouteBackend::Reference(_) => None,
            });

        for backend in config.backends.iter().chain(inline) {
            match BackendDescriptor::from_config(backend, config, None, health.entry(&backend.name)) {
                Ok(descriptor) => {
                    registry
                        .backends
                        .insert(backend.name.clone(), Arc::new(descriptor));
                    registry.configs.insert(backend.name.clone(), backend.clone());
                }
                Err(e) => errors.push(e),
            }
        }

        if errors.is_empty() {
            Ok(registry)
        } else {
            Err(errors)
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<BackendDescriptor>> {
        self.backends.get(name)
    }

    /// Source configuration for a registered backend.
    pub fn config(&self, name: &str) -> Option<&BackendConfig> {
        self.configs.get(name)
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<BackendDescriptor>> {
        self.backends.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
