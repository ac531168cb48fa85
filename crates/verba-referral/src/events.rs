//! Referral event recording.
//!
//! The ledger is append-only and idempotent per (invited user, kind).
//! Self-referral is skipped silently; it must never fail the calling
//! flow.

use rusqlite::Connection;
use verba_types::referral::ReferralEventType;

use verba_db::queries::{referrals, users};

use crate::{tiers, Result};

/// Record an event. Returns true when a new row was written. Duplicate
/// (invited, kind) pairs and self-referrals return false.
pub fn record_event(
    conn: &Connection,
    referrer_user_id: &str,
    invited_user_id: &str,
    event_type: ReferralEventType,
    now: u64,
) -> Result<bool> {
    if referrer_user_id == invited_user_id {
        tracing::debug!(user = %invited_user_id, "skipping self-referral event");
        return Ok(false);
    }
    let inserted =
        referrals::insert_event(conn, referrer_user_id, invited_user_id, event_type, now)?;
    if inserted {
        tracing::info!(
            referrer = %referrer_user_id,
            invited = %invited_user_id,
            kind = event_type.as_str(),
            "referral event recorded"
        );
    }
    Ok(inserted)
}

/// Mark the invited user's onboarding complete and credit the referrer:
/// record the `completed_onboarding` event and materialize a pending
/// reward for the lowest tier the referrer newly qualifies for.
pub fn complete_onboarding(conn: &Connection, user_id: &str, now: u64) -> Result<()> {
    let user = users::get(conn, user_id)?;
    if user.onboarding_completed {
        return Ok(());
    }
    users::set_onboarding_completed(conn, user_id)?;

    if let Some(referrer) = user.referred_by.as_deref() {
        let recorded =
            record_event(conn, referrer, user_id, ReferralEventType::CompletedOnboarding, now)?;
        if recorded {
            tiers::auto_grant(conn, referrer, now)?;
        }
    }
    Ok(())
}

/// Mark the user's email verified, recording the event for the referrer
/// when there is one.
pub fn verify_email(conn: &Connection, user_id: &str, now: u64) -> Result<()> {
    let user = users::get(conn, user_id)?;
    if user.email_verified {
        return Ok(());
    }
    users::set_email_verified(conn, user_id)?;

    if let Some(referrer) = user.referred_by.as_deref() {
        record_event(conn, referrer, user_id, ReferralEventType::EmailVerified, now)?;
    }
    Ok(())
}
