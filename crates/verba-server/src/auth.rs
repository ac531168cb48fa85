//! Principal resolution from session tokens.
//!
//! Session issuance lives with the identity provider; this server only
//! resolves `Authorization: Bearer <token>` against the sessions table
//! and threads the resulting principal explicitly into every engine
//! call. No ambient user state.

use axum::http::HeaderMap;
use verba_types::access::Principal;

use verba_db::queries::users;

use crate::error::ApiError;
use crate::AppState;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Resolve the caller if a valid session token is present. Absent or
/// unknown tokens are anonymous, not an error.
pub async fn optional_principal(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Option<Principal>, ApiError> {
    let Some(token) = bearer_token(headers) else {
        return Ok(None);
    };
    let conn = state.db.lock().await;
    Ok(users::principal_for_session(&conn, token)?)
}

/// Resolve the caller, rejecting anonymous requests.
pub async fn require_principal(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Principal, ApiError> {
    optional_principal(state, headers)
        .await?
        .ok_or(ApiError::Unauthorized)
}

/// Resolve the caller, rejecting anyone but admins.
pub async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<Principal, ApiError> {
    let principal = require_principal(state, headers).await?;
    if !principal.is_admin() {
        return Err(ApiError::Forbidden);
    }
    Ok(principal)
}
