//! Credential resolution and injection.
//!
//! # Responsibilities
//! - Resolve an auth descriptor (none / static key / env reference) once per load
//! - Inject the credential as a header or query parameter on outbound calls
//! - Strip caller credentials that must not reach the provider
//!
//! Resolved keys are held in [`Secret`] or sensitive `HeaderValue`s and are never
//! printed by `Debug`.

use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::backend::Dialect;
use crate::config::schema::{AuthInjectionConfig, AuthSource};
use crate::error::GatewayError;

/// A credential that must never be logged.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Where and what to inject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    None,
    Header { name: HeaderName, value: HeaderValue },
    Query { param: String, value: Secret },
    /// Resolution failed; the backend stays configured but refuses traffic.
    Unresolved { reason: String },
}

/// Auth descriptor after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAuth {
    pub credential: Credential,
    pub forward_client_auth: bool,
}

impl ResolvedAuth {
    /// Resolve against the process environment.
    pub fn resolve(config: &AuthInjectionConfig, dialect: Dialect) -> Self {
        Self::resolve_with(config, dialect, |name| std::env::var(name).ok())
    }

    /// Resolve with an explicit variable lookup.
    pub fn resolve_with<F>(config: &AuthInjectionConfig, dialect: Dialect, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let key = match &config.source {
            AuthSource::None => {
                return Self {
                    credential: Credential::None,
                    forward_client_auth: config.forward_client_auth,
                }
            }
            AuthSource::StaticKey { value } => resolve_env_token(value, &lookup),
            AuthSource::EnvRef { name } => {
                let name = name.trim_start_matches('$').trim_start_matches('{').trim_end_matches('}');
                lookup(name)
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| format!("environment variable '{}' is not set", name))
            }
        };

        let credential = match key {
            Err(reason) => Credential::Unresolved { reason },
            Ok(key) => place(config, dialect, key),
        };

        Self {
            credential,
            forward_client_auth: config.forward_client_auth,
        }
    }

    pub fn none() -> Self {
        Self {
            credential: Credential::None,
            forward_client_auth: false,
        }
    }

    pub fn unresolved_reason(&self) -> Option<&str> {
        match &self.credential {
            Credential::Unresolved { reason } => Some(reason),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.unresolved_reason().is_none()
    }

    /// Rewrite outbound headers/URL for the named backend.
    ///
    /// With `forwardClientAuth`, a caller `Authorization` header takes
    /// precedence over a credential configured for the same header; the
    /// configured one is injected only when the caller sent none.
    pub fn apply(&self, backend: &str, headers: &mut HeaderMap, url: &mut Url) -> Result<(), GatewayError> {
        let caller_auth = self.forward_client_auth && headers.contains_key(AUTHORIZATION);
        if !self.forward_client_auth {
            headers.remove(AUTHORIZATION);
        }

        match &self.credential {
            Credential::None => {}
            Credential::Header { name, .. } if caller_auth && *name == AUTHORIZATION => {}
            Credential::Header { name, value } => {
                headers.remove(name);
                headers.insert(name.clone(), value.clone());
            }
            Credential::Query { param, value } => {
                let retained: Vec<(String, String)> = url
                    .query_pairs()
                    .filter(|(k, _)| k != param.as_str())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect();
                let mut pairs = url.query_pairs_mut();
                pairs.clear();
                for (k, v) in &retained {
                    pairs.append_pair(k, v);
                }
                pairs.append_pair(param, value.expose());
            }
            Credential::Unresolved { reason } => {
                return Err(GatewayError::AuthResolutionFailed {
                    backend: backend.to_string(),
                    reason: reason.clone(),
                });
            }
        }
        Ok(())
    }
}

fn place(config: &AuthInjectionConfig, dialect: Dialect, key: String) -> Credential {
    if let Some(param) = &config.query_param {
        return Credential::Query {
            param: param.clone(),
            value: Secret::new(key),
        };
    }

    let name = match &config.header {
        Some(header) => match HeaderName::try_from(header.as_str()) {
            Ok(name) => name,
            Err(_) => {
                return Credential::Unresolved {
                    reason: format!("'{}' is not a valid header name", header),
                }
            }
        },
        None => dialect.default_auth_header(),
    };

    let raw = if name == AUTHORIZATION && !key.starts_with("Bearer ") {
        format!("Bearer {}", key)
    } else {
        key
    };

    match HeaderValue::from_str(&raw) {
        Ok(mut value) => {
            value.set_sensitive(true);
            Credential::Header { name, value }
        }
        Err(_) => Credential::Unresolved {
            reason: "credential contains characters not valid in a header".to_string(),
        },
    }
}

/// Resolve a `$NAME` / `${NAME}` token; other values are returned verbatim.
pub fn resolve_env_token<F>(value: &str, lookup: F) -> Result<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let name = if let Some(inner) = value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) {
        inner
    } else if let Some(inner) = value.strip_prefix('$') {
        inner
    } else {
        return Ok(value.to_string());
    };

    if name.is_empty() {
        return Err("empty environment variable reference".to_string());
    }
    lookup(name)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("environment variable '{}' is not set", name))
}
