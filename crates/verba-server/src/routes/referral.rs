//! Referral endpoints: dashboard, code validation, claims, trial.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use verba_types::referral::{ReferralStats, RewardTier};
use verba_types::{CourseId, TierId};

use verba_db::queries::referrals;
use verba_referral::{code, events, stats as referral_stats, tiers as tier_engine, trial};

use crate::auth::require_principal;
use crate::error::ApiError;
use crate::{unix_now, AppState};

pub async fn stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ReferralStats>, ApiError> {
    let principal = require_principal(&state, &headers).await?;
    let conn = state.db.lock().await;
    Ok(Json(referral_stats::stats(
        &conn,
        &principal.user_id,
        unix_now(),
    )?))
}

#[derive(Deserialize)]
pub struct ValidateQuery {
    pub code: String,
}

/// Pre-signup code check. Unknown codes are a negative answer, not an
/// error.
pub async fn validate(
    State(state): State<AppState>,
    Query(query): Query<ValidateQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conn = state.db.lock().await;
    let valid = code::validate(&conn, &query.code)?.is_some();
    Ok(Json(serde_json::json!({ "valid": valid })))
}

/// Active reward ladder, public.
pub async fn tiers(State(state): State<AppState>) -> Result<Json<Vec<RewardTier>>, ApiError> {
    let conn = state.db.lock().await;
    Ok(Json(referrals::list_active_tiers(&conn)?))
}

#[derive(Deserialize)]
pub struct ClaimRequest {
    pub tier_id: TierId,
    pub course_id: Option<CourseId>,
}

pub async fn claim(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ClaimRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let principal = require_principal(&state, &headers).await?;
    let now = unix_now();

    let reward = {
        let mut conn = state.db.lock().await;
        tier_engine::claim_reward(
            &mut conn,
            &principal.user_id,
            request.tier_id,
            request.course_id,
            now,
        )?
    };

    state.event_bus.emit(
        "RewardGranted",
        now,
        serde_json::json!({ "user": principal.user_id, "tier": request.tier_id }),
    );
    Ok(Json(serde_json::json!({ "reward": reward })))
}

#[derive(Deserialize)]
pub struct TrialCourseRequest {
    pub course_id: CourseId,
}

pub async fn trial_course(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<TrialCourseRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let principal = require_principal(&state, &headers).await?;
    let conn = state.db.lock().await;
    trial::select_trial_course(&conn, &principal.user_id, request.course_id, unix_now())?;
    Ok(Json(serde_json::json!({ "status": "granted" })))
}

/// Invoked when the user finishes onboarding; credits the referrer.
pub async fn onboarding_complete(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let principal = require_principal(&state, &headers).await?;
    let conn = state.db.lock().await;
    events::complete_onboarding(&conn, &principal.user_id, unix_now())?;
    Ok(Json(serde_json::json!({ "status": "recorded" })))
}

/// Invoked by the identity service after email verification.
pub async fn email_verified(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let principal = require_principal(&state, &headers).await?;
    let conn = state.db.lock().await;
    events::verify_email(&conn, &principal.user_id, unix_now())?;
    Ok(Json(serde_json::json!({ "status": "recorded" })))
}
