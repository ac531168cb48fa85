//! Payment-provider webhook endpoint.
//!
//! Signature verification runs on the raw body before parsing. The
//! provider retries on any non-200, so: 401 for verification failures
//! (no side effects), 400 for malformed bodies, 500 only for local
//! database errors (a retry may succeed), and 200 for everything else
//! including idempotent skips — anything less invites a retry storm.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use verba_billing::event::ProviderEvent;
use verba_billing::reconciler::{self, ReconcileOutcome};
use verba_billing::{signature, BillingError};

use crate::{unix_now, AppState};

pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let now = unix_now();

    let Some(sig_header) = headers.get("signature").and_then(|v| v.to_str().ok()) else {
        return (StatusCode::UNAUTHORIZED, "missing signature").into_response();
    };
    if let Err(e) = signature::verify(&state.config.provider.webhook_secret, &body, sig_header, now)
    {
        tracing::warn!(error = %e, "rejecting webhook delivery");
        return (StatusCode::UNAUTHORIZED, "invalid signature").into_response();
    }

    let event = match ProviderEvent::parse(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "malformed webhook body");
            return (StatusCode::BAD_REQUEST, "malformed event").into_response();
        }
    };

    let outcome = {
        let mut conn = state.db.lock().await;
        reconciler::apply_event(&mut conn, &event, now)
    };

    match outcome {
        Ok(outcome) => {
            if outcome == ReconcileOutcome::Applied {
                emit_for(&state, &event, now);
            }
            Json(serde_json::json!({ "received": true })).into_response()
        }
        // A retry may succeed against a transient local failure; let
        // the provider redeliver.
        Err(BillingError::Db(e)) => {
            tracing::error!(error = %e, "webhook transaction failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "storage error").into_response()
        }
        // Recoverable processing errors must not loop forever.
        Err(e) => {
            tracing::warn!(error = %e, "webhook processing error, acknowledging anyway");
            Json(serde_json::json!({ "received": true })).into_response()
        }
    }
}

fn emit_for(state: &AppState, event: &ProviderEvent, now: u64) {
    match event {
        ProviderEvent::CheckoutCompleted {
            subscription_ref, ..
        } => state.event_bus.emit(
            "CheckoutConfirmed",
            now,
            serde_json::json!({ "subscription": subscription_ref }),
        ),
        ProviderEvent::InvoicePaid {
            external_subscription_id,
            ..
        } => state.event_bus.emit(
            "SubscriptionRenewed",
            now,
            serde_json::json!({ "external_subscription": external_subscription_id }),
        ),
        ProviderEvent::SubscriptionDeleted {
            external_subscription_id,
            ..
        } => state.event_bus.emit(
            "SubscriptionCancelled",
            now,
            serde_json::json!({ "external_subscription": external_subscription_id }),
        ),
        ProviderEvent::InvoicePaymentFailed { .. } | ProviderEvent::Unknown { .. } => {}
    }
}
