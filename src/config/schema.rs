//! Configuration schema definitions.
//!
//! This module defines the complete configuration document for the gateway.
//! All types derive Serde traits for deserialization from YAML, JSON or TOML.
//! Keys are camelCase in every format.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::backend::{Dialect, RouteMode};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Listeners, each owning an ordered route list.
    pub listeners: Vec<ListenerConfig>,

    /// Shared backend definitions, referenced from routes by name.
    pub backends: Vec<BackendConfig>,

    /// Active health check settings.
    pub health_check: HealthCheckConfig,

    /// Default upstream timeouts.
    pub timeouts: TimeoutConfig,

    /// Default retry policy for backends without their own.
    pub retries: RetryConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,

    pub security: SecurityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ListenerConfig {
    /// Listener identifier; defaults to the bind address.
    pub name: Option<String>,

    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// Routes in declaration order.
    pub routes: Vec<RouteConfig>,
}

impl ListenerConfig {
    /// Name used to key this listener inside a snapshot.
    pub fn effective_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.bind_address)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            name: None,
            bind_address: "0.0.0.0:3000".to_string(),
            routes: Vec::new(),
        }
    }
}

/// Route configuration mapping a path prefix to backends.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Host header to match (exact match, case-insensitive).
    #[serde(default)]
    pub host: Option<String>,

    /// Path prefix to match.
    pub path_prefix: String,

    /// Backends serving this route, by name or inline.
    pub backends: Vec<RouteBackend>,

    #[serde(default)]
    pub policies: PolicyConfig,
}

/// A route's backend entry: a reference to a top-level backend or an inline definition.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum RouteBackend {
    Reference(String),
    Inline(Box<BackendConfig>),
}

impl RouteBackend {
    pub fn name(&self) -> &str {
        match self {
            RouteBackend::Reference(name) => name,
            RouteBackend::Inline(backend) => &backend.name,
        }
    }
}

/// Upstream provider definition.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Unique backend identifier.
    pub name: String,

    /// Wire dialect the provider speaks.
    pub protocol: Dialect,

    /// Model identifier sent on translated requests.
    #[serde(default)]
    pub model: Option<String>,

    /// Provider base URL (e.g., "https://api.openai.com").
    pub base_url: String,

    /// Sub-path handling table; dialect defaults when omitted.
    #[serde(default)]
    pub native_route_table: Option<BTreeMap<String, RouteMode>>,

    #[serde(default)]
    pub auth_injection: AuthInjectionConfig,

    /// Overrides `timeouts.requestMs`.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,

    /// Overrides the global `retries` section.
    #[serde(default)]
    pub retry: Option<RetryConfig>,

    /// Reject requests whose translation would drop fields.
    #[serde(default)]
    pub strict_translation: bool,

    /// Check path for active health checks; dialect default when omitted.
    #[serde(default)]
    pub health_path: Option<String>,

    /// Static headers added to every upstream request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// How a backend credential is obtained and where it is injected.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthInjectionConfig {
    #[serde(flatten)]
    pub source: AuthSource,

    /// Header to carry the credential; dialect default when omitted.
    #[serde(default)]
    pub header: Option<String>,

    /// Inject as this query parameter instead of a header.
    #[serde(default)]
    pub query_param: Option<String>,

    /// Forward the caller's Authorization header upstream.
    #[serde(default)]
    pub forward_client_auth: bool,
}

/// Credential source.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AuthSource {
    #[default]
    None,
    /// Literal key; a `$NAME` value is read from the environment.
    StaticKey { value: String },
    /// Environment variable name (with or without a leading `$`).
    EnvRef { name: String },
}

/// Per-route policies.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct PolicyConfig {
    pub cors: Option<CorsConfig>,
    pub rate_limit: Option<RateLimitConfig>,
    /// Replaces the auth injection of every backend on this route.
    pub backend_auth: Option<AuthInjectionConfig>,
}

/// CORS policy.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CorsConfig {
    /// Allowed origins; "*" allows any.
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub max_age_secs: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: Vec::new(),
            allow_methods: vec!["GET".to_string(), "POST".to_string(), "OPTIONS".to_string()],
            allow_headers: vec![
                "authorization".to_string(),
                "content-type".to_string(),
                "x-api-key".to_string(),
                "anthropic-version".to_string(),
            ],
            max_age_secs: Some(600),
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Maximum requests per second per client IP.
    pub requests_per_second: u32,

    /// Burst capacity.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10,
            burst: 20,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds.
    pub timeout_secs: u64,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            timeout_secs: 5,
            unhealthy_threshold: 1,
            healthy_threshold: 1,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct TimeoutConfig {
    /// Connection establishment timeout in milliseconds.
    pub connect_ms: u64,

    /// Default upstream request timeout in milliseconds.
    pub request_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 5_000,
            request_ms: 30_000,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryConfig {
    /// Enable retries of connection-level failures.
    pub enabled: bool,

    /// Total attempts including the first one.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AdminConfig {
    /// Enable admin endpoints.
    pub enabled: bool,

    /// API key for authentication (Bearer token). A `$NAME` value is read from the environment.
    pub api_key: String,

    /// Admin bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: "$GATEWAY_ADMIN_KEY".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Request hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityConfig {
    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 4 * 1024 * 1024, // 4MB
        }
    }
}
