//! API key authentication middleware.
//!
//! A key is read from `X-API-Key`, or from `Authorization: Bearer <key>`
//! when that header is absent, and compared in constant time against every
//! configured key.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use subtle::{Choice, ConstantTimeEq};
use tracing::debug;

use super::handlers::{ApiError, AppState};
use super::middleware::X_API_KEY;

/// Paths served without a key.
pub const PUBLIC_PATHS: [&str; 2] = ["/api/v1/health", "/api/v1/ready"];

/// Extracts the caller's key from the request headers.
///
/// # Errors
///
/// [`ApiError::Unauthorized`] if neither header is present or the
/// `Authorization` header is not of the form `Bearer <key>`.
pub fn presented_key(headers: &HeaderMap) -> Result<&str, ApiError> {
    if let Some(key) = headers.get(X_API_KEY).and_then(|v| v.to_str().ok()) {
        if !key.is_empty() {
            return Ok(key);
        }
    }

    let header = headers
        .get(AUTHORIZATION)
        .ok_or(ApiError::Unauthorized("Authentication required"))?;
    let value = header
        .to_str()
        .map_err(|_| ApiError::Unauthorized("Invalid authorization format"))?;

    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(key), None) if !key.is_empty() => Ok(key),
        _ => Err(ApiError::Unauthorized("Invalid authorization format")),
    }
}

/// Compares `candidate` with every allowed key without short-circuiting.
#[must_use]
pub fn is_allowed(allowed: &[String], candidate: &str) -> bool {
    allowed
        .iter()
        .fold(Choice::from(0), |found, key| {
            found | key.as_bytes().ct_eq(candidate.as_bytes())
        })
        .into()
}

/// Rejects requests without a valid key, except on [`PUBLIC_PATHS`].
///
/// Authentication is off when no keys are configured.
///
/// # Errors
///
/// Returns [`ApiError::Unauthorized`], rendered as a 401 envelope.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let keys = &state.config.api_keys;
    if keys.is_empty() || PUBLIC_PATHS.contains(&request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let key = presented_key(request.headers())?;
    if !is_allowed(keys, key) {
        debug!(path = %request.uri().path(), "rejected request with unknown API key");
        return Err(ApiError::Unauthorized("Invalid API key"));
    }
    Ok(next.run(request).await)
}
