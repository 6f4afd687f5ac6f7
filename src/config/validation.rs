//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference existing backends)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check native route tables against the backend dialect
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system
//! - Identical prefixes on one listener are legal (declaration order decides); they only warn

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::backend::{Dialect, RouteMode};
use crate::config::schema::{BackendConfig, GatewayConfig, RetryConfig, RouteBackend};

/// A single semantic problem in a configuration document.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("no listeners configured")]
    NoListeners,

    #[error("duplicate listener '{name}'")]
    DuplicateListener { name: String },

    #[error("listener '{listener}': invalid bind address '{address}'")]
    InvalidBindAddress { listener: String, address: String },

    #[error("listener '{listener}': duplicate route '{route}'")]
    DuplicateRoute { listener: String, route: String },

    #[error("route '{route}': invalid path prefix '{prefix}' (must start with '/')")]
    InvalidPathPrefix { route: String, prefix: String },

    #[error("route '{route}': no backends")]
    EmptyRoute { route: String },

    #[error("route '{route}' references unknown backend '{backend}'")]
    UnknownBackend { route: String, backend: String },

    #[error("duplicate backend '{name}'")]
    DuplicateBackend { name: String },

    #[error("backend '{backend}': {reason}")]
    InvalidBackend { backend: String, reason: String },

    #[error("backend '{backend}': invalid native route table entry '{entry}': {reason}")]
    InvalidRouteTable {
        backend: String,
        entry: String,
        reason: String,
    },

    #[error("backend '{backend}': dialect '{dialect}' cannot serve translated mode '{mode:?}'")]
    TranslationUnsupported {
        backend: String,
        dialect: Dialect,
        mode: RouteMode,
    },

    #[error("{field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let backend_names = validate_backends(config, &mut errors);
    validate_listeners(config, &backend_names, &mut errors);
    validate_globals(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Collects every backend (top-level and inline) and checks each one.
fn validate_backends(config: &GatewayConfig, errors: &mut Vec<ValidationError>) -> HashSet<String> {
    let mut names = HashSet::new();

    let inline = config
        .listeners
        .iter()
        .flat_map(|l| l.routes.iter())
        .flat_map(|r| r.backends.iter())
        .filter_map(|b| match b {
            RouteBackend::Inline(backend) => Some(backend.as_ref()),
            RouteBackend::Reference(_) => None,
        });

    for backend in config.backends.iter().chain(inline) {
        if !names.insert(backend.name.clone()) {
            errors.push(ValidationError::DuplicateBackend {
                name: backend.name.clone(),
            });
            continue;
        }
        validate_backend(backend, errors);
    }

    names
}

fn validate_backend(backend: &BackendConfig, errors: &mut Vec<ValidationError>) {
    let invalid = |reason: String| ValidationError::InvalidBackend {
        backend: backend.name.clone(),
        reason,
    };

    if backend.name.trim().is_empty() {
        errors.push(invalid("name must not be empty".to_string()));
    }

    match Url::parse(&backend.base_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => errors.push(invalid(format!(
            "baseUrl scheme '{}' is not http or https",
            url.scheme()
        ))),
        Err(e) => errors.push(invalid(format!("invalid baseUrl '{}': {}", backend.base_url, e))),
    }

    if backend.request_timeout_ms == Some(0) {
        errors.push(invalid("requestTimeoutMs must be greater than 0".to_string()));
    }

    if let Some(retry) = &backend.retry {
        validate_retry(&format!("backends.{}.retry", backend.name), retry, errors);
    }

    let table = backend
        .native_route_table
        .clone()
        .unwrap_or_else(|| backend.protocol.default_route_table());

    for (entry, mode) in &table {
        let body = entry.strip_suffix("/*").unwrap_or(entry);
        let well_formed = entry == "*"
            || (entry.starts_with('/') && !entry.contains("//") && !body.contains('*'));
        if !well_formed {
            errors.push(ValidationError::InvalidRouteTable {
                backend: backend.name.clone(),
                entry: entry.clone(),
                reason: "expected '/path', '/prefix/*' or '*'".to_string(),
            });
        }

        if mode.surface().is_some() && !backend.protocol.translatable() {
            errors.push(ValidationError::TranslationUnsupported {
                backend: backend.name.clone(),
                dialect: backend.protocol,
                mode: *mode,
            });
        }
    }
}

fn validate_listeners(
    config: &GatewayConfig,
    backend_names: &HashSet<String>,
    errors: &mut Vec<ValidationError>,
) {
    if config.listeners.is_empty() {
        errors.push(ValidationError::NoListeners);
    }

    let mut listener_names = HashSet::new();
    for listener in &config.listeners {
        let name = listener.effective_name();
        if !listener_names.insert(name.to_string()) {
            errors.push(ValidationError::DuplicateListener {
                name: name.to_string(),
            });
        }

        if listener.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidBindAddress {
                listener: name.to_string(),
                address: listener.bind_address.clone(),
            });
        }

        let mut route_names = HashSet::new();
        let mut prefixes: HashMap<(Option<String>, String), &str> = HashMap::new();
        for route in &listener.routes {
            if !route_names.insert(route.name.as_str()) {
                errors.push(ValidationError::DuplicateRoute {
                    listener: name.to_string(),
                    route: route.name.clone(),
                });
            }

            if !route.path_prefix.starts_with('/') {
                errors.push(ValidationError::InvalidPathPrefix {
                    route: route.name.clone(),
                    prefix: route.path_prefix.clone(),
                });
            }

            let key = (
                route.host.as_ref().map(|h| h.to_lowercase()),
                crate::routing::matcher::normalize_path(&route.path_prefix).to_string(),
            );
            if let Some(first) = prefixes.get(&key) {
                tracing::warn!(
                    listener = %name,
                    route = %route.name,
                    shadowed_by = %first,
                    prefix = %route.path_prefix,
                    "Route prefix duplicates an earlier route; the earlier one wins"
                );
            } else {
                prefixes.insert(key, &route.name);
            }

            if route.backends.is_empty() {
                errors.push(ValidationError::EmptyRoute {
                    route: route.name.clone(),
                });
            }

            for backend in &route.backends {
                if let RouteBackend::Reference(reference) = backend {
                    if !backend_names.contains(reference) {
                        errors.push(ValidationError::UnknownBackend {
                            route: route.name.clone(),
                            backend: reference.clone(),
                        });
                    }
                }
            }

            if let Some(limit) = &route.policies.rate_limit {
                if limit.requests_per_second == 0 || limit.burst == 0 {
                    errors.push(ValidationError::InvalidValue {
                        field: format!("routes.{}.policies.rateLimit", route.name),
                        reason: "requestsPerSecond and burst must be greater than 0".to_string(),
                    });
                }
            }
        }
    }
}

fn validate_globals(config: &GatewayConfig, errors: &mut Vec<ValidationError>) {
    if config.timeouts.request_ms == 0 {
        errors.push(ValidationError::InvalidValue {
            field: "timeouts.requestMs".to_string(),
            reason: "must be greater than 0".to_string(),
        });
    }
    if config.timeouts.connect_ms == 0 {
        errors.push(ValidationError::InvalidValue {
            field: "timeouts.connectMs".to_string(),
            reason: "must be greater than 0".to_string(),
        });
    }

    validate_retry("retries", &config.retries, errors);

    let health = &config.health_check;
    if health.enabled && (health.interval_secs == 0 || health.timeout_secs == 0) {
        errors.push(ValidationError::InvalidValue {
            field: "healthCheck".to_string(),
            reason: "intervalSecs and timeoutSecs must be greater than 0".to_string(),
        });
    }

    if config.security.max_body_size == 0 {
        errors.push(ValidationError::InvalidValue {
            field: "security.maxBodySize".to_string(),
            reason: "must be greater than 0".to_string(),
        });
    }

    if config.admin.enabled && config.admin.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidValue {
            field: "admin.bindAddress".to_string(),
            reason: format!("'{}' is not a socket address", config.admin.bind_address),
        });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidValue {
            field: "observability.metricsAddress".to_string(),
            reason: format!("'{}' is not a socket address", config.observability.metrics_address),
        });
    }
}

fn validate_retry(field: &str, retry: &RetryConfig, errors: &mut Vec<ValidationError>) {
    if retry.max_attempts == 0 {
        errors.push(ValidationError::InvalidValue {
            field: format!("{}.maxAttempts", field),
            reason: "must be at least 1".to_string(),
        });
    }
    if retry.base_delay_ms > retry.max_delay_ms {
        errors.push(ValidationError::InvalidValue {
            field: format!("{}.baseDelayMs", field),
            reason: "must not exceed maxDelayMs".to_string(),
        });
    }
}
