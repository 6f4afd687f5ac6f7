use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::admin::AdminState;
use crate::backend::auth::resolve_env_token;

/// Require `Authorization: Bearer <admin.apiKey>`.
///
/// The key is read from the live snapshot, so a reload can rotate it. A key
/// that cannot be resolved locks the admin API.
pub async fn admin_auth_middleware(
    State(state): State<AdminState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let snapshot = state.store.snapshot();
    let expected = match resolve_env_token(&snapshot.config.admin.api_key, |name| std::env::var(name).ok()) {
        Ok(key) if !key.is_empty() => key,
        Ok(_) | Err(_) => {
            tracing::warn!("Admin API key is not configured; rejecting admin request");
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    if presented == Some(expected.as_str()) {
        return Ok(next.run(request).await);
    }

    Err(StatusCode::UNAUTHORIZED)
}
