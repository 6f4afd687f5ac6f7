//! Per-route CORS.
//!
//! A route's `cors` policy compiles into a `tower_http` [`CorsLayer`] when the
//! snapshot is built. The proxy wraps the route's forwarding service in it, so
//! preflights are answered without touching a backend and proxied responses
//! carry `access-control-allow-origin` for allowed origins only.

use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::schema::CorsConfig;
use crate::config::validation::ValidationError;

/// Build the layer for `route`. "*" in `allowOrigins` allows any origin.
pub fn cors_layer(route: &str, config: &CorsConfig) -> Result<CorsLayer, ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidValue {
        field: format!("routes.{}.policies.cors", route),
        reason,
    };

    let origin = if config.allow_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let origins = config
            .allow_origins
            .iter()
            .map(|o| HeaderValue::from_str(o).map_err(|_| invalid(format!("invalid origin '{}'", o))))
            .collect::<Result<Vec<_>, _>>()?;
        AllowOrigin::list(origins)
    };

    let methods = config
        .allow_methods
        .iter()
        .map(|m| Method::from_bytes(m.as_bytes()).map_err(|_| invalid(format!("invalid method '{}'", m))))
        .collect::<Result<Vec<_>, _>>()?;

    let headers = config
        .allow_headers
        .iter()
        .map(|h| HeaderName::try_from(h.as_str()).map_err(|_| invalid(format!("invalid header '{}'", h))))
        .collect::<Result<Vec<_>, _>>()?;

    let mut layer = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(methods)
        .allow_headers(headers);
    if let Some(secs) = config.max_age_secs {
        layer = layer.max_age(Duration::from_secs(secs));
    }
    Ok(layer)
}
