//! Subscription management endpoints.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use verba_types::subscription::SubscriptionView;
use verba_types::{CourseId, PlanId, SubscriptionId};

use verba_billing::provider::{PaymentProvider, RemoteCancelOutcome};
use verba_billing::reconciler::ReconcileOutcome;
use verba_billing::{checkout, reconciler, views};
use verba_db::queries::users;

use crate::auth::require_principal;
use crate::error::ApiError;
use crate::{unix_now, AppState};

#[derive(Deserialize)]
pub struct CreateRequest {
    pub plan_id: PlanId,
    pub course_ids: Vec<CourseId>,
}

/// Select a plan and courses; returns the checkout redirect URL.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let principal = require_principal(&state, &headers).await?;
    let now = unix_now();

    // Local phase under the lock; the provider call happens after it
    // is released.
    let (prepared, email) = {
        let conn = state.db.lock().await;
        let email = users::get(&conn, &principal.user_id)?.email;
        let prepared = checkout::prepare_subscription(
            &conn,
            &principal.user_id,
            request.plan_id,
            &request.course_ids,
            now,
        )?;
        (prepared, email)
    };

    let session = state
        .provider
        .create_checkout_session(&checkout::checkout_request(
            &prepared,
            &email,
            &state.config.checkout.success_url,
            &state.config.checkout.cancel_url,
        ))
        .await?;

    Ok(Json(serde_json::json!({
        "subscription_id": prepared.subscription_id,
        "checkout_url": session.url,
        "start_date": prepared.start_date,
    })))
}

/// Current user's subscriptions merged with plan metadata.
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<SubscriptionView>>, ApiError> {
    let principal = require_principal(&state, &headers).await?;
    let conn = state.db.lock().await;
    Ok(Json(views::list_subscriptions(&conn, &principal.user_id)?))
}

/// User-initiated cancel. The upstream call is best-effort; local state
/// transitions regardless and the remote outcome is reported.
pub async fn cancel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(subscription_id): Path<SubscriptionId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let principal = require_principal(&state, &headers).await?;
    let now = unix_now();

    let claim = {
        let conn = state.db.lock().await;
        reconciler::begin_user_cancel(&conn, &principal.user_id, subscription_id)?
    };

    let remote = reconciler::remote_cancel(state.provider.as_ref(), &claim).await;

    let receipt = {
        let mut conn = state.db.lock().await;
        reconciler::finish_user_cancel(&mut conn, &claim, remote, now)?
    };

    state.event_bus.emit(
        "SubscriptionCancelled",
        now,
        serde_json::json!({ "subscription": subscription_id }),
    );

    let remote = match receipt.remote {
        RemoteCancelOutcome::Cancelled => "cancelled",
        RemoteCancelOutcome::Skipped => "skipped",
        RemoteCancelOutcome::Failed(_) => "failed",
    };
    Ok(Json(serde_json::json!({
        "status": "cancelled",
        "end_date": receipt.end_date,
        "remote": remote,
    })))
}

#[derive(Deserialize)]
pub struct ConfirmQuery {
    pub session_id: String,
}

/// Client-polled fallback for the success page racing the webhook.
pub async fn confirm_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ConfirmQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let principal = require_principal(&state, &headers).await?;
    let now = unix_now();

    let session = state.provider.fetch_checkout_session(&query.session_id).await?;
    let outcome = {
        let mut conn = state.db.lock().await;
        checkout::apply_remote_session(&mut conn, &principal.user_id, &session, now)?
    };

    if outcome == ReconcileOutcome::Applied {
        state.event_bus.emit(
            "CheckoutConfirmed",
            now,
            serde_json::json!({ "session": query.session_id }),
        );
    }
    Ok(Json(serde_json::json!({
        "status": match outcome {
            ReconcileOutcome::Applied => "activated",
            ReconcileOutcome::AlreadyApplied => "already_active",
            _ => "pending",
        }
    })))
}
