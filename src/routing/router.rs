//! Route lookup.
//!
//! # Responsibilities
//! - Store compiled routes for one listener
//! - Look up the matching route for a request
//! - Return the matched route or an explicit `NoRouteMatch`
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) path prefix scan (acceptable for typical route counts)
//! - Longest prefix wins; equal prefixes fall back to declaration order

use std::sync::Arc;

use tower_http::cors::CorsLayer;

use crate::backend::{BackendDescriptor, BackendRegistry};
use crate::config::schema::{GatewayConfig, ListenerConfig, RouteConfig};
use crate::config::validation::ValidationError;
use crate::error::GatewayError;
use crate::health::HealthTable;
use crate::routing::matcher::{HostMatcher, Matcher, PathPrefixMatcher, RequestTarget};
use crate::security::cors::cors_layer;
use crate::security::rate_limit::{RateLimitTable, RateLimiter};

/// A compiled route.
#[derive(Debug)]
pub struct Route {
    pub name: String,
    host: Option<HostMatcher>,
    prefix: PathPrefixMatcher,
    /// Candidate backends in declaration order.
    pub backends: Vec<Arc<BackendDescriptor>>,
    pub cors: Option<CorsLayer>,
    /// Shared with the previous snapshot while the route's limits are unchanged.
    pub rate_limiter: Option<Arc<RateLimiter>>,
}

impl Route {
    /// Compile a route, resolving its backends against the registry.
    pub fn build(
        config: &RouteConfig,
        listener: &str,
        registry: &BackendRegistry,
        globals: &GatewayConfig,
        health: &HealthTable,
        limits: &RateLimitTable,
    ) -> Result<Self, ValidationError> {
        let mut backends = Vec::with_capacity(config.backends.len());
        for entry in &config.backends {
            let name = entry.name();
            let shared = registry.get(name).ok_or_else(|| ValidationError::UnknownBackend {
                route: config.name.clone(),
                backend: name.to_string(),
            })?;

            let descriptor = match (&config.policies.backend_auth, registry.config(name)) {
                // Route-private descriptor with the overriding credential; health stays shared.
                (Some(auth), Some(backend_config)) => Arc::new(BackendDescriptor::from_config(
                    backend_config,
                    globals,
                    Some(auth),
                    health.entry(name),
                )?),
                _ => Arc::clone(shared),
            };
            backends.push(descriptor);
        }

        let cors = config
            .policies
            .cors
            .as_ref()
            .map(|cors| cors_layer(&config.name, cors))
            .transpose()?;
        let rate_limiter = config
            .policies
            .rate_limit
            .as_ref()
            .map(|rate| limits.entry(&RateLimitTable::key(listener, &config.name), rate));

        Ok(Self {
            name: config.name.clone(),
            host: config.host.as_deref().map(HostMatcher::new),
            prefix: PathPrefixMatcher::new(&config.path_prefix),
            backends,
            cors,
            rate_limiter,
        })
    }

    pub fn prefix(&self) -> &str {
        self.prefix.prefix()
    }

    pub fn host(&self) -> Option<&HostMatcher> {
        self.host.as_ref()
    }

    /// Sub-path under this route, if the request matches it.
    fn match_target<'p>(&self, target: &RequestTarget<'p>) -> Option<&'p str> {
        if let Some(host) = &self.host {
            if !host.matches(target) {
                return None;
            }
        }
        self.prefix.strip(target.path)
    }
}

/// Result of a successful lookup.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    /// Path remaining after the route prefix; always starts with '/'.
    pub sub_path: String,
}

/// Immutable route table for one listener.
#[derive(Debug)]
pub struct Router {
    listener: String,
    routes: Vec<Arc<Route>>,
}

impl Router {
    pub fn new(listener: impl Into<String>, routes: Vec<Route>) -> Self {
        Self {
            listener: listener.into(),
            routes: routes.into_iter().map(Arc::new).collect(),
        }
    }

    /// Compile every route of a listener.
    pub fn build(
        listener: &ListenerConfig,
        registry: &BackendRegistry,
        globals: &GatewayConfig,
        health: &HealthTable,
        limits: &RateLimitTable,
    ) -> Result<Self, Vec<ValidationError>> {
        let mut routes = Vec::with_capacity(listener.routes.len());
        let mut errors = Vec::new();
        let name = listener.effective_name();

        for route in &listener.routes {
            match Route::build(route, name, registry, globals, health, limits) {
                Ok(route) => routes.push(route),
                Err(e) => errors.push(e),
            }
        }

        if errors.is_empty() {
            Ok(Self::new(name, routes))
        } else {
            Err(errors)
        }
    }

    pub fn listener(&self) -> &str {
        &self.listener
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    /// Find the best route for a request.
    pub fn route(&self, host: Option<&str>, path: &str) -> Result<RouteMatch, GatewayError> {
        let target = RequestTarget { host, path };
        let mut best: Option<(&Arc<Route>, &str)> = None;

        for route in &self.routes {
            let Some(sub_path) = route.match_target(&target) else {
                continue;
            };
            // Strictly longer only: an equal prefix keeps the earlier route.
            let better = best.map_or(true, |(current, _)| {
                route.prefix.specificity() > current.prefix.specificity()
            });
            if better {
                best = Some((route, sub_path));
            }
        }

        best.map(|(route, sub_path)| RouteMatch {
            route: Arc::clone(route),
            sub_path: sub_path.to_string(),
        })
        .ok_or_else(|| GatewayError::NoRouteMatch {
            path: path.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Dialect;
    use crate::config::schema::{
        AuthInjectionConfig, AuthSource, BackendConfig, PolicyConfig, RouteBackend,
    };
    use std::collections::BTreeMap;

    fn backend(name: &str) -> BackendConfig {
        BackendConfig {
            name: name.to_string(),
            protocol: Dialect::OpenAi,
            model: None,
            base_url: "http://127.0.0.1:9000".to_string(),
            native_route_table: None,
            auth_injection: AuthInjectionConfig {
                source: AuthSource::StaticKey { value: "sk-backend".into() },
                ..Default::default()
            },
            request_timeout_ms: None,
            retry: None,
            strict_translation: false,
            health_path: None,
            headers: BTreeMap::new(),
        }
    }

    fn route(name: &str, prefix: &str) -> RouteConfig {
        RouteConfig {
            name: name.to_string(),
            host: None,
            path_prefix: prefix.to_string(),
            backends: vec![RouteBackend::Reference("b".to_string())],
            policies: PolicyConfig::default(),
        }
    }

    fn router(routes: Vec<RouteConfig>) -> Router {
        let config = GatewayConfig {
            listeners: vec![ListenerConfig {
                name: Some("main".into()),
                routes,
                ..Default::default()
            }],
            backends: vec![backend("b")],
            ..Default::default()
        };
        let health = HealthTable::new();
        let registry = BackendRegistry::build(&config, &health).unwrap();
        Router::build(&config.listeners[0], &registry, &config, &health, &RateLimitTable::new()).unwrap()
    }

    #[test]
    fn test_longest_prefix_wins_regardless_of_order() {
        let router = router(vec![
            route("root", "/"),
            route("openai", "/openai"),
            route("openai-v2", "/openai/v2"),
        ]);

        let m = router.route(None, "/openai/v2/chat/completions").unwrap();
        assert_eq!(m.route.name, "openai-v2");
        assert_eq!(m.sub_path, "/chat/completions");

        let m = router.route(None, "/openai/v1/models").unwrap();
        assert_eq!(m.route.name, "openai");
        assert_eq!(m.sub_path, "/v1/models");

        let m = router.route(None, "/other").unwrap();
        assert_eq!(m.route.name, "root");
    }

    #[test]
    fn test_equal_prefix_keeps_declaration_order() {
        let router = router(vec![route("first", "/api"), route("second", "/api/")]);
        assert_eq!(router.route(None, "/api/x").unwrap().route.name, "first");
    }

    #[test]
    fn test_no_match_on_partial_segment() {
        let router = router(vec![route("openai", "/openai")]);
        let err = router.route(None, "/openaiX/v1").unwrap_err();
        assert_eq!(err, GatewayError::NoRouteMatch { path: "/openaiX/v1".into() });

        assert_eq!(router.route(None, "/openai/").unwrap().sub_path, "/");
    }

    #[test]
    fn test_host_predicate() {
        let mut scoped = route("scoped", "/v1");
        scoped.host = Some("internal.example.com".into());
        let router = router(vec![scoped, route("fallback", "/")]);

        assert_eq!(
            router.route(Some("internal.example.com:8080"), "/v1/models").unwrap().route.name,
            "scoped"
        );
        assert_eq!(router.route(Some("public.example.com"), "/v1/models").unwrap().route.name, "fallback");
        assert_eq!(router.route(None, "/v1/models").unwrap().route.name, "fallback");
    }

    #[test]
    fn test_backend_auth_override_is_route_private() {
        let mut overridden = route("override", "/a");
        overridden.policies.backend_auth = Some(AuthInjectionConfig {
            source: AuthSource::StaticKey { value: "sk-route".into() },
            ..Default::default()
        });
        let router = router(vec![overridden, route("plain", "/b")]);

        let a = &router.route(None, "/a").unwrap().route.backends[0];
        let b = &router.route(None, "/b").unwrap().route.backends[0];
        assert!(!Arc::ptr_eq(a, b));
        // Health is keyed by backend name and shared.
        assert!(Arc::ptr_eq(&a.health, &b.health));
    }
}
