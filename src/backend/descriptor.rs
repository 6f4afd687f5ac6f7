//! Backend descriptors.
//!
//! # Responsibilities
//! - Represent one upstream provider with its dialect and capabilities
//! - Decide, per sub-path, whether a request is passed through or translated
//! - Build upstream URLs from the provider base URL

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::backend::auth::ResolvedAuth;
use crate::config::schema::{AuthInjectionConfig, BackendConfig, GatewayConfig, RetryConfig};
use crate::config::validation::ValidationError;
use crate::health::state::BackendHealth;
use crate::resilience::RetryPolicy;

const ANTHROPIC_VERSION: &str = "anthropic-version";
const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

/// Wire dialect spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Dialect {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "mcp")]
    Mcp,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::OpenAi => "openai",
            Dialect::Anthropic => "anthropic",
            Dialect::Mcp => "mcp",
        }
    }

    /// Native endpoint translated chat requests are sent to.
    pub fn chat_path(&self) -> Option<&'static str> {
        match self {
            Dialect::OpenAi => Some("/v1/chat/completions"),
            Dialect::Anthropic => Some("/v1/messages"),
            Dialect::Mcp => None,
        }
    }

    /// Whether this dialect can be the target of request translation.
    pub fn translatable(&self) -> bool {
        self.chat_path().is_some()
    }

    pub fn default_health_path(&self) -> Option<&'static str> {
        match self {
            Dialect::OpenAi | Dialect::Anthropic => Some("/v1/models"),
            Dialect::Mcp => None,
        }
    }

    /// Header a credential is injected into when the config does not name one.
    pub fn default_auth_header(&self) -> HeaderName {
        match self {
            Dialect::Anthropic => HeaderName::from_static("x-api-key"),
            Dialect::OpenAi | Dialect::Mcp => axum::http::header::AUTHORIZATION,
        }
    }

    pub fn default_route_table(&self) -> BTreeMap<String, RouteMode> {
        let mut table = BTreeMap::new();
        match self {
            Dialect::OpenAi => {
                table.insert("/v1/chat/completions".to_string(), RouteMode::Passthrough);
                table.insert("/v1/messages".to_string(), RouteMode::Messages);
                table.insert("/v1/models".to_string(), RouteMode::Passthrough);
            }
            Dialect::Anthropic => {
                table.insert("/v1/messages".to_string(), RouteMode::Passthrough);
                table.insert("/v1/chat/completions".to_string(), RouteMode::Completions);
                table.insert("/v1/models".to_string(), RouteMode::Passthrough);
            }
            Dialect::Mcp => {
                table.insert("*".to_string(), RouteMode::Passthrough);
            }
        }
        table
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How requests on a sub-path are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteMode {
    /// Forward the caller's bytes unmodified.
    Passthrough,
    /// Caller speaks OpenAI chat completions; translate to the backend dialect.
    Completions,
    /// Caller speaks Anthropic messages; translate to the backend dialect.
    Messages,
}

impl RouteMode {
    /// Dialect of the caller's body for translated modes.
    pub fn surface(&self) -> Option<Dialect> {
        match self {
            RouteMode::Passthrough => None,
            RouteMode::Completions => Some(Dialect::OpenAi),
            RouteMode::Messages => Some(Dialect::Anthropic),
        }
    }
}

/// Sub-path lookup table.
///
/// Keys are exact sub-paths (`/v1/messages`), prefix patterns (`/mcp/*`) or the
/// catch-all `*`. Exact entries beat prefixes; longer prefixes beat shorter ones.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeRouteTable {
    exact: BTreeMap<String, RouteMode>,
    prefixes: Vec<(String, RouteMode)>,
    fallback: Option<RouteMode>,
}

impl NativeRouteTable {
    pub fn new(entries: &BTreeMap<String, RouteMode>) -> Self {
        let mut exact = BTreeMap::new();
        let mut prefixes = Vec::new();
        let mut fallback = None;

        for (path, mode) in entries {
            if path == "*" {
                fallback = Some(*mode);
            } else if let Some(prefix) = path.strip_suffix("/*") {
                prefixes.push((normalize(prefix).to_string(), *mode));
            } else {
                exact.insert(normalize(path).to_string(), *mode);
            }
        }
        prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        Self {
            exact,
            prefixes,
            fallback,
        }
    }

    /// Resolve the handling mode for a sub-path. `None` means the path is not served.
    pub fn lookup(&self, sub_path: &str) -> Option<RouteMode> {
        let path = normalize(sub_path);
        if let Some(mode) = self.exact.get(path) {
            return Some(*mode);
        }
        self.prefixes
            .iter()
            .find(|(prefix, _)| {
                prefix == "/"
                    || path == prefix
                    || path
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .map(|(_, mode)| *mode)
            .or(self.fallback)
    }

    /// All modes declared in the table.
    pub fn modes(&self) -> impl Iterator<Item = RouteMode> + '_ {
        self.exact
            .values()
            .copied()
            .chain(self.prefixes.iter().map(|(_, m)| *m))
            .chain(self.fallback)
    }
}

fn normalize(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

/// A fully resolved upstream target.
#[derive(Debug)]
pub struct BackendDescriptor {
    pub name: String,
    pub dialect: Dialect,
    pub model: Option<String>,
    pub base_url: Url,
    pub routes: NativeRouteTable,
    pub auth: ResolvedAuth,
    pub timeout: Duration,
    pub retry: RetryConfig,
    pub strict_translation: bool,
    pub health_path: Option<String>,
    pub headers: HeaderMap,
    /// Shared with every snapshot that contains a backend of the same name.
    pub health: Arc<BackendHealth>,
}

impl BackendDescriptor {
    /// Build a descriptor from validated configuration.
    ///
    /// `auth_override` replaces the backend's own auth injection (route `backendAuth` policy).
    pub fn from_config(
        config: &BackendConfig,
        globals: &GatewayConfig,
        auth_override: Option<&AuthInjectionConfig>,
        health: Arc<BackendHealth>,
    ) -> Result<Self, ValidationError> {
        let base_url = Url::parse(&config.base_url).map_err(|e| ValidationError::InvalidBackend {
            backend: config.name.clone(),
            reason: format!("invalid baseUrl '{}': {}", config.base_url, e),
        })?;

        let table = config
            .native_route_table
            .clone()
            .unwrap_or_else(|| config.protocol.default_route_table());

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::try_from(name.as_str()).map_err(|_| ValidationError::InvalidBackend {
                backend: config.name.clone(),
                reason: format!("invalid header name '{}'", name),
            })?;
            let value = HeaderValue::from_str(value).map_err(|_| ValidationError::InvalidBackend {
                backend: config.name.clone(),
                reason: format!("invalid value for header '{}'", name),
            })?;
            headers.insert(name, value);
        }

        let auth_config = auth_override.unwrap_or(&config.auth_injection);
        let auth = ResolvedAuth::resolve(auth_config, config.protocol);
        if let Some(reason) = auth.unresolved_reason() {
            tracing::warn!(
                backend = %config.name,
                reason = %reason,
                "Backend credentials unresolved; requests to this backend will fail"
            );
        }

        Ok(Self {
            name: config.name.clone(),
            dialect: config.protocol,
            model: config.model.clone(),
            base_url,
            routes: NativeRouteTable::new(&table),
            auth,
            timeout: Duration::from_millis(
                config.request_timeout_ms.unwrap_or(globals.timeouts.request_ms),
            ),
            retry: config.retry.clone().unwrap_or_else(|| globals.retries.clone()),
            strict_translation: config.strict_translation,
            health_path: config
                .health_path
                .clone()
                .or_else(|| config.protocol.default_health_path().map(str::to_string)),
            headers,
            health,
        })
    }

    /// Upstream URL for a path (with optional query) under the base URL.
    pub fn url_for(&self, path_and_query: &str) -> Result<Url, url::ParseError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        if path_and_query.starts_with('/') {
            Url::parse(&format!("{}{}", base, path_and_query))
        } else {
            Url::parse(&format!("{}/{}", base, path_and_query))
        }
    }

    /// Add configured static headers, and the API version Anthropic requires
    /// unless the caller already chose one.
    pub fn prepare_headers(&self, headers: &mut HeaderMap) {
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
        if self.dialect == Dialect::Anthropic && !headers.contains_key(ANTHROPIC_VERSION) {
            headers.insert(
                HeaderName::from_static(ANTHROPIC_VERSION),
                HeaderValue::from_static(DEFAULT_ANTHROPIC_VERSION),
            );
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.retry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(protocol: Dialect) -> BackendConfig {
        BackendConfig {
            name: "b1".into(),
            protocol,
            model: Some("m".into()),
            base_url: "https://api.example.com/".into(),
            native_route_table: None,
            auth_injection: AuthInjectionConfig::default(),
            request_timeout_ms: None,
            retry: None,
            strict_translation: false,
            health_path: None,
            headers: BTreeMap::new(),
        }
    }

    #[test]
    fn test_default_tables() {
        let openai = NativeRouteTable::new(&Dialect::OpenAi.default_route_table());
        assert_eq!(openai.lookup("/v1/chat/completions"), Some(RouteMode::Passthrough));
        assert_eq!(openai.lookup("/v1/messages"), Some(RouteMode::Messages));
        assert_eq!(openai.lookup("/v1/embeddings"), None);

        let anthropic = NativeRouteTable::new(&Dialect::Anthropic.default_route_table());
        assert_eq!(anthropic.lookup("/v1/messages/"), Some(RouteMode::Passthrough));
        assert_eq!(anthropic.lookup("/v1/chat/completions"), Some(RouteMode::Completions));

        let mcp = NativeRouteTable::new(&Dialect::Mcp.default_route_table());
        assert_eq!(mcp.lookup("/anything/at/all"), Some(RouteMode::Passthrough));
    }

    #[test]
    fn test_prefix_entries() {
        let mut entries = BTreeMap::new();
        entries.insert("/mcp/*".to_string(), RouteMode::Passthrough);
        entries.insert("/mcp/tools/*".to_string(), RouteMode::Passthrough);
        entries.insert("/v1/chat/completions".to_string(), RouteMode::Completions);
        let table = NativeRouteTable::new(&entries);

        assert_eq!(table.lookup("/mcp"), Some(RouteMode::Passthrough));
        assert_eq!(table.lookup("/mcp/sse"), Some(RouteMode::Passthrough));
        assert_eq!(table.lookup("/mcpx"), None);
        assert_eq!(table.lookup("/v1/chat/completions"), Some(RouteMode::Completions));
    }

    #[test]
    fn test_url_for_joins_base_path() {
        let mut config = backend(Dialect::OpenAi);
        config.base_url = "https://gateway.example.com/openai/".into();
        let descriptor = BackendDescriptor::from_config(
            &config,
            &GatewayConfig::default(),
            None,
            Arc::new(BackendHealth::new()),
        )
        .unwrap();

        let url = descriptor.url_for("/v1/chat/completions?x=1").unwrap();
        assert_eq!(url.as_str(), "https://gateway.example.com/openai/v1/chat/completions?x=1");
    }

    #[test]
    fn test_overrides_and_defaults() {
        let mut config = backend(Dialect::Anthropic);
        config.request_timeout_ms = Some(250);
        let mut globals = GatewayConfig::default();
        globals.retries.enabled = true;
        globals.retries.max_attempts = 4;

        let descriptor =
            BackendDescriptor::from_config(&config, &globals, None, Arc::new(BackendHealth::new()))
                .unwrap();
        assert_eq!(descriptor.timeout, Duration::from_millis(250));
        assert_eq!(descriptor.retry_policy().max_attempts(), 4);
        assert_eq!(descriptor.health_path.as_deref(), Some("/v1/models"));
    }

    #[test]
    fn test_prepare_headers_keeps_caller_version() {
        let mut config = backend(Dialect::Anthropic);
        config.headers.insert("x-team".into(), "core".into());
        let descriptor = BackendDescriptor::from_config(
            &config,
            &GatewayConfig::default(),
            None,
            Arc::new(BackendHealth::new()),
        )
        .unwrap();

        let mut headers = HeaderMap::new();
        descriptor.prepare_headers(&mut headers);
        assert_eq!(headers["anthropic-version"], "2023-06-01");
        assert_eq!(headers["x-team"], "core");

        let mut headers = HeaderMap::new();
        headers.insert("anthropic-version", HeaderValue::from_static("2024-01-01"));
        descriptor.prepare_headers(&mut headers);
        assert_eq!(headers["anthropic-version"], "2024-01-01");
    }

    #[test]
    fn test_invalid_base_url() {
        let mut config = backend(Dialect::OpenAi);
        config.base_url = "not a url".into();
        let result = BackendDescriptor::from_config(
            &config,
            &GatewayConfig::default(),
            None,
            Arc::new(BackendHealth::new()),
        );
        assert!(result.is_err());
    }
}
