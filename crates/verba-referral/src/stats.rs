//! Referral dashboard assembly.

use rusqlite::Connection;
use verba_types::referral::{ReferralEventType, ReferralStats};

use verba_db::queries::{access, credits, referrals, settings, users};

use crate::{code, tiers, ReferralError, Result};

/// Build the referral dashboard for a user. Generates the referral code
/// on first view.
pub fn stats(conn: &Connection, user_id: &str, now: u64) -> Result<ReferralStats> {
    let user = match users::get(conn, user_id) {
        Ok(user) => user,
        Err(verba_db::DbError::NotFound(_)) => {
            return Err(ReferralError::UserNotFound(user_id.to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    let referral_code = code::ensure_code(conn, user_id)?;
    let base_url = settings::get(conn, "referral_base_url")
        .unwrap_or_else(|_| "https://verba.app/ref/".to_string());

    let total_invites = referrals::count_events(conn, user_id, ReferralEventType::Signup)?;
    let successful_invites = tiers::successful_invites(conn, user_id)?;
    let invites_until_next_reward = referrals::next_threshold(conn, successful_invites)?
        .map(|needed| needed - successful_invites)
        .unwrap_or(0);

    Ok(ReferralStats {
        referral_link: format!("{base_url}{referral_code}"),
        referral_code,
        trial_expires_at: user.trial_expires_at,
        has_trial_access: user.trial_expires_at.is_some_and(|end| end > now),
        has_selected_trial_course: access::has_unbacked_grant(conn, user_id)?,
        total_invites,
        successful_invites,
        invites_until_next_reward,
        credits_balance: credits::balance(conn, user_id)?,
        rewards: referrals::list_rewards(conn, user_id)?,
        available_tiers: tiers::eligible_tiers(conn, user_id)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trial;
    use verba_types::access::Role;
    use verba_types::referral::RewardType;
    use verba_types::DAY_SECS;

    const NOW: u64 = 1_000_000;

    #[test]
    fn test_dashboard_shape() {
        let conn = verba_db::open_memory().expect("open test db");
        users::insert(&conn, "ref", "ref@example.com", Role::User, None, Some(NOW + DAY_SECS), 0)
            .expect("user");
        referrals::insert_tier(&conn, 3, RewardType::FreeDays, 30, Some(10), 0).expect("tier");

        let code = code::ensure_code(&conn, "ref").expect("code");
        trial::register_user(&conn, "inv1", "i1@example.com", Some(&code), NOW).expect("signup");
        crate::events::complete_onboarding(&conn, "inv1", NOW).expect("onboard");

        let s = stats(&conn, "ref", NOW).expect("stats");
        assert_eq!(s.referral_code, code);
        assert!(s.referral_link.ends_with(&code));
        assert!(s.has_trial_access);
        assert!(!s.has_selected_trial_course);
        assert_eq!(s.total_invites, 1);
        assert_eq!(s.successful_invites, 1);
        assert_eq!(s.invites_until_next_reward, 2);
        assert_eq!(s.credits_balance, 0);
        assert!(s.rewards.is_empty());
        assert!(s.available_tiers.is_empty(), "threshold not reached yet");
    }

    #[test]
    fn test_no_tiers_means_zero_until_next() {
        let conn = verba_db::open_memory().expect("open test db");
        users::insert(&conn, "ref", "ref@example.com", Role::User, None, None, 0).expect("user");
        let s = stats(&conn, "ref", NOW).expect("stats");
        assert_eq!(s.invites_until_next_reward, 0);
        assert!(!s.has_trial_access);
    }
}
