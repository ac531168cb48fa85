//! Minimal registration endpoint.
//!
//! Identity proper (passwords, email verification mail-out) lives with
//! an external service; this endpoint creates the local account with
//! the trial policy applied and issues a session token.

use axum::extract::State;
use axum::Json;
use rand::RngCore;
use serde::Deserialize;

use verba_db::queries::users;
use verba_referral::trial;

use crate::error::ApiError;
use crate::{unix_now, AppState};

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub referral_code: Option<String>,
}

pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if request.email.trim().is_empty() || !request.email.contains('@') {
        return Err(ApiError::Validation("invalid email".into()));
    }
    let now = unix_now();
    let user_id = random_id();
    let token = random_id();

    let conn = state.db.lock().await;
    let outcome = trial::register_user(
        &conn,
        &user_id,
        request.email.trim(),
        request.referral_code.as_deref(),
        now,
    )
    .map_err(|e| match e {
        verba_referral::ReferralError::Db(db) if db.is_constraint_violation() => {
            ApiError::Conflict("email already registered".into())
        }
        other => other.into(),
    })?;
    users::insert_session(&conn, &token, &user_id, now)?;

    Ok(Json(serde_json::json!({
        "user_id": user_id,
        "token": token,
        "trial_expires_at": outcome.trial_expires_at,
        "referred": outcome.referred_by.is_some(),
    })))
}

fn random_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
