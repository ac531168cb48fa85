//! HTTP route handlers.

pub mod access;
pub mod admin;
pub mod auth;
pub mod referral;
pub mod subscriptions;
pub mod webhook;

use axum::routing::{delete, get, post, put};
use axum::Router;

use crate::AppState;

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/payment", post(webhook::payment_webhook))
        .route("/api/auth/register", post(auth::register))
        .route("/api/access/course/:id", get(access::course_access))
        .route("/api/access/chapter/:id", get(access::chapter_access))
        .route("/api/courses/:id/chapters", get(access::course_chapters))
        .route("/api/subscriptions", post(subscriptions::create))
        .route("/api/subscriptions", get(subscriptions::list))
        .route("/api/subscriptions/:id", delete(subscriptions::cancel))
        .route("/api/checkout/confirm", get(subscriptions::confirm_checkout))
        .route("/api/referral/stats", get(referral::stats))
        .route("/api/referral/validate", get(referral::validate))
        .route("/api/referral/tiers", get(referral::tiers))
        .route("/api/referral/claim", post(referral::claim))
        .route("/api/referral/trial-course", post(referral::trial_course))
        .route(
            "/api/referral/onboarding-complete",
            post(referral::onboarding_complete),
        )
        .route("/api/referral/email-verified", post(referral::email_verified))
        .route("/api/admin/access", post(admin::grant_access))
        .route("/api/admin/access/:id", put(admin::update_access))
        .route("/api/admin/access/:id", delete(admin::revoke_access))
        .route("/api/admin/reward-tiers", get(admin::list_tiers))
        .route("/api/admin/reward-tiers", post(admin::create_tier))
        .route("/api/admin/reward-tiers/:id", put(admin::update_tier))
        .route("/api/admin/reward-tiers/:id", delete(admin::deactivate_tier))
        .with_state(state)
}
