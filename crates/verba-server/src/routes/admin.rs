//! Admin endpoints: manual grants and reward-tier management.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use verba_types::referral::{RewardTier, RewardType};
use verba_types::{CourseId, TierId, UserId};

use verba_db::queries::{access, referrals};

use crate::auth::require_admin;
use crate::error::ApiError;
use crate::{unix_now, AppState};

#[derive(Deserialize)]
pub struct GrantRequest {
    pub user_id: UserId,
    pub course_id: CourseId,
    pub start_date: Option<u64>,
    pub end_date: Option<u64>,
    pub chapter_limit: Option<u32>,
}

pub async fn grant_access(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<GrantRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&state, &headers).await?;
    let now = unix_now();

    let conn = state.db.lock().await;
    let grant_id = access::upsert(
        &conn,
        &access::GrantUpsert {
            user_id: &request.user_id,
            course_id: request.course_id,
            start_date: request.start_date.unwrap_or(now),
            end_date: request.end_date,
            chapter_limit: request.chapter_limit,
            external_subscription_id: None,
            external_customer_id: None,
            granted_at: now,
        },
    )?;
    Ok(Json(serde_json::json!({ "grant_id": grant_id })))
}

#[derive(Deserialize)]
pub struct UpdateGrantRequest {
    pub start_date: u64,
    pub end_date: Option<u64>,
    pub chapter_limit: Option<u32>,
}

pub async fn update_access(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(grant_id): Path<i64>,
    Json(request): Json<UpdateGrantRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&state, &headers).await?;
    let conn = state.db.lock().await;
    access::update_window(
        &conn,
        grant_id,
        request.start_date,
        request.end_date,
        request.chapter_limit,
    )?;
    Ok(Json(serde_json::json!({ "status": "updated" })))
}

pub async fn revoke_access(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(grant_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&state, &headers).await?;
    let conn = state.db.lock().await;
    access::revoke(&conn, grant_id)?;
    Ok(Json(serde_json::json!({ "status": "revoked" })))
}

pub async fn list_tiers(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<RewardTier>>, ApiError> {
    require_admin(&state, &headers).await?;
    let conn = state.db.lock().await;
    Ok(Json(referrals::list_all_tiers(&conn)?))
}

#[derive(Deserialize)]
pub struct TierRequest {
    pub required_invites: u32,
    pub reward_type: RewardType,
    pub reward_value: u32,
    pub chapter_limit: Option<u32>,
    #[serde(default)]
    pub display_order: u32,
}

pub async fn create_tier(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<TierRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&state, &headers).await?;
    let conn = state.db.lock().await;
    let tier_id = referrals::insert_tier(
        &conn,
        request.required_invites,
        request.reward_type,
        request.reward_value,
        request.chapter_limit,
        request.display_order,
    )
    .map_err(|e| {
        if e.is_constraint_violation() {
            ApiError::Conflict("a tier with this invite threshold already exists".into())
        } else {
            e.into()
        }
    })?;
    Ok(Json(serde_json::json!({ "tier_id": tier_id })))
}

#[derive(Deserialize)]
pub struct TierUpdateRequest {
    pub required_invites: u32,
    pub reward_type: RewardType,
    pub reward_value: u32,
    pub chapter_limit: Option<u32>,
    pub is_active: bool,
    #[serde(default)]
    pub display_order: u32,
}

pub async fn update_tier(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(tier_id): Path<TierId>,
    Json(request): Json<TierUpdateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&state, &headers).await?;
    let conn = state.db.lock().await;
    referrals::update_tier(
        &conn,
        &RewardTier {
            id: tier_id,
            required_invites: request.required_invites,
            reward_type: request.reward_type,
            reward_value: request.reward_value,
            chapter_limit: request.chapter_limit,
            is_active: request.is_active,
            display_order: request.display_order,
        },
    )?;
    Ok(Json(serde_json::json!({ "status": "updated" })))
}

/// Tiers are deactivated, never deleted: earned rewards reference them.
pub async fn deactivate_tier(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(tier_id): Path<TierId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&state, &headers).await?;
    let conn = state.db.lock().await;
    referrals::deactivate_tier(&conn, tier_id)?;
    Ok(Json(serde_json::json!({ "status": "deactivated" })))
}
