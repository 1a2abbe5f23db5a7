//! Admin bearer token authentication for operational endpoints.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use secrecy::ExposeSecret;
use subtle::ConstantTimeEq;
use tollgate_core::TollgateError;
use tracing::warn;

use crate::{error::ApiError, server::AppState};

/// Extracts the token from an `Authorization: Bearer <token>` header.
fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Constant-time token comparison.
fn token_matches(provided: &str, expected: &str) -> bool {
    provided.len() == expected.len() && bool::from(provided.as_bytes().ct_eq(expected.as_bytes()))
}

/// Axum middleware that admits requests carrying the admin token.
///
/// # Errors
///
/// Returns 401 when the header is missing, the token is wrong, or no admin
/// token is configured.
pub async fn require_admin(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Err(TollgateError::authentication("admin token not configured").into());
    };

    let provided = extract_bearer(req.headers())
        .ok_or_else(|| TollgateError::authentication("missing bearer token"))?;

    if !token_matches(provided, expected.expose_secret()) {
        warn!("admin request with invalid bearer token");
        return Err(TollgateError::authentication("invalid bearer token").into());
    }

    Ok(next.run(req).await)
}
