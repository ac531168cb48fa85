//! Reward tier eligibility, granting, and claiming.

use rusqlite::Connection;
use verba_types::referral::{ReferralEventType, Reward, RewardStatus, RewardTier, RewardType};
use verba_types::{CourseId, TierId, DAY_SECS};

use verba_db::queries::{access, courses, credits, referrals};

use crate::{ReferralError, Result};

/// Invites that count toward tiers: completed onboarding, not mere
/// signups.
pub fn successful_invites(conn: &Connection, user_id: &str) -> Result<u32> {
    Ok(referrals::count_events(conn, user_id, ReferralEventType::CompletedOnboarding)?)
}

/// Active tiers the user has reached and not yet been rewarded for,
/// lowest threshold first.
pub fn eligible_tiers(conn: &Connection, user_id: &str) -> Result<Vec<RewardTier>> {
    let invites = successful_invites(conn, user_id)?;
    Ok(referrals::eligible_tiers(conn, user_id, invites)?)
}

/// Materialize a pending reward for the lowest tier the user newly
/// qualifies for. Called after each counted invite; a no-op when
/// nothing new is reached.
pub fn auto_grant(conn: &Connection, user_id: &str, now: u64) -> Result<Option<Reward>> {
    let Some(tier) = eligible_tiers(conn, user_id)?.into_iter().next() else {
        return Ok(None);
    };
    let invites = successful_invites(conn, user_id)?;
    let Some(reward_id) = referrals::insert_reward(conn, user_id, &tier, invites, now)? else {
        return Ok(None);
    };
    tracing::info!(
        user = %user_id,
        tier = tier.id,
        invites,
        "reward tier reached, pending reward created"
    );
    Ok(Some(referrals::get_reward(conn, reward_id)?))
}

/// Claim a tier's reward.
///
/// `free_days` rewards are not self-activating: the claim must carry a
/// course selection, and the grant window opens today for the tier's
/// value in days under the tier's chapter cap. `credits` rewards post
/// to the ledger immediately with no course involved.
pub fn claim_reward(
    conn: &mut Connection,
    user_id: &str,
    tier_id: TierId,
    course_id: Option<CourseId>,
    now: u64,
) -> Result<Reward> {
    let tier = match referrals::get_tier(conn, tier_id) {
        Ok(tier) => tier,
        Err(verba_db::DbError::NotFound(_)) => return Err(ReferralError::TierNotFound(tier_id)),
        Err(e) => return Err(e.into()),
    };
    if !tier.is_active {
        return Err(ReferralError::TierInactive(tier_id));
    }

    let invites = successful_invites(conn, user_id)?;
    if invites < tier.required_invites {
        return Err(ReferralError::NotEligible {
            tier_id,
            have: invites,
            need: tier.required_invites,
        });
    }

    let tx = conn.transaction().map_err(verba_db::DbError::Sqlite)?;

    // Reuse a pending auto-granted reward; otherwise create the row
    // now. Either way a granted one means the claim already happened.
    let reward = match referrals::reward_for_tier(&tx, user_id, tier_id)? {
        Some(reward) if reward.status == RewardStatus::Granted => {
            return Err(ReferralError::AlreadyClaimed(tier_id));
        }
        Some(reward) => reward,
        None => {
            let reward_id = referrals::insert_reward(&tx, user_id, &tier, invites, now)?
                .ok_or(ReferralError::AlreadyClaimed(tier_id))?;
            referrals::get_reward(&tx, reward_id)?
        }
    };

    match reward.reward_type {
        RewardType::FreeDays => {
            let course_id = course_id.ok_or(ReferralError::CourseSelectionRequired)?;
            if courses::get_opt(&tx, course_id)?.is_none() {
                return Err(ReferralError::CourseNotFound(course_id));
            }
            access::upsert(
                &tx,
                &access::GrantUpsert {
                    user_id,
                    course_id,
                    start_date: now,
                    end_date: Some(now + u64::from(reward.reward_value) * DAY_SECS),
                    chapter_limit: reward.chapter_limit,
                    external_subscription_id: None,
                    external_customer_id: None,
                    granted_at: now,
                },
            )?;
            referrals::mark_granted(&tx, reward.id, Some(course_id), now)?;
        }
        RewardType::Credits => {
            credits::append_earned(
                &tx,
                user_id,
                i64::from(reward.reward_value),
                "referral reward",
                Some(reward.id),
                now,
            )?;
            referrals::mark_granted(&tx, reward.id, None, now)?;
        }
    }

    let claimed = referrals::get_reward(&tx, reward.id)?;
    tx.commit().map_err(verba_db::DbError::Sqlite)?;

    tracing::info!(
        user = %user_id,
        tier = tier_id,
        reward = claimed.id,
        kind = claimed.reward_type.as_str(),
        "reward claimed"
    );
    Ok(claimed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use verba_db::queries::users;
    use verba_types::access::Role;
    use verba_types::course::CourseStatus;

    const NOW: u64 = 1_000_000;

    fn test_db() -> Connection {
        let conn = verba_db::open_memory().expect("open test db");
        users::insert(&conn, "ref", "ref@example.com", Role::User, None, None, 0).expect("user");
        conn
    }

    fn invite(conn: &Connection, n: u32) {
        for i in 0..n {
            let id = format!("inv{i}");
            users::insert(conn, &id, &format!("{id}@example.com"), Role::User, Some("ref"), None, 0)
                .expect("user");
            referrals::insert_event(conn, "ref", &id, ReferralEventType::CompletedOnboarding, 10)
                .expect("event");
        }
    }

    #[test]
    fn test_three_invites_unlock_free_days_tier() {
        let conn = test_db();
        let tier_id = referrals::insert_tier(&conn, 3, RewardType::FreeDays, 30, Some(10), 0)
            .expect("tier");

        invite(&conn, 2);
        assert!(eligible_tiers(&conn, "ref").expect("tiers").is_empty());

        users::insert(&conn, "inv_last", "last@example.com", Role::User, Some("ref"), None, 0)
            .expect("user");
        referrals::insert_event(&conn, "ref", "inv_last", ReferralEventType::CompletedOnboarding, 10)
            .expect("event");

        let tiers = eligible_tiers(&conn, "ref").expect("tiers");
        assert_eq!(tiers.len(), 1);
        assert_eq!(tiers[0].id, tier_id);
    }

    #[test]
    fn test_claim_free_days_requires_course() {
        let mut conn = test_db();
        let tier_id = referrals::insert_tier(&conn, 3, RewardType::FreeDays, 30, Some(10), 0)
            .expect("tier");
        invite(&conn, 3);

        let err = claim_reward(&mut conn, "ref", tier_id, None, NOW).expect_err("no course");
        assert!(matches!(err, ReferralError::CourseSelectionRequired));

        let course_id = courses::insert(&conn, "Spanish A1", CourseStatus::Published, Some(990), None, 0)
            .expect("course");
        let reward = claim_reward(&mut conn, "ref", tier_id, Some(course_id), NOW).expect("claim");
        assert_eq!(reward.status, RewardStatus::Granted);
        assert_eq!(reward.course_id, Some(course_id));

        let grant = access::get(&conn, "ref", course_id).expect("get").expect("grant");
        assert_eq!(grant.end_date, Some(NOW + 30 * DAY_SECS));
        assert_eq!(grant.chapter_limit, Some(10));
    }

    #[test]
    fn test_claim_credits_posts_to_ledger_immediately() {
        let mut conn = test_db();
        let tier_id =
            referrals::insert_tier(&conn, 1, RewardType::Credits, 500, None, 0).expect("tier");
        invite(&conn, 1);

        let reward = claim_reward(&mut conn, "ref", tier_id, None, NOW).expect("claim");
        assert_eq!(reward.status, RewardStatus::Granted);
        assert_eq!(credits::balance(&conn, "ref").expect("balance"), 500);

        let entries = credits::recent_entries(&conn, "ref", 5).expect("entries");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].reference_id, Some(reward.id));
    }

    #[test]
    fn test_double_claim_conflicts() {
        let mut conn = test_db();
        let tier_id =
            referrals::insert_tier(&conn, 1, RewardType::Credits, 500, None, 0).expect("tier");
        invite(&conn, 1);

        claim_reward(&mut conn, "ref", tier_id, None, NOW).expect("first");
        let err = claim_reward(&mut conn, "ref", tier_id, None, NOW).expect_err("second");
        assert!(matches!(err, ReferralError::AlreadyClaimed(_)));
        assert_eq!(credits::balance(&conn, "ref").expect("balance"), 500, "no double credit");
    }

    #[test]
    fn test_claim_before_threshold_rejected() {
        let mut conn = test_db();
        let tier_id = referrals::insert_tier(&conn, 3, RewardType::Credits, 500, None, 0)
            .expect("tier");
        invite(&conn, 2);

        let err = claim_reward(&mut conn, "ref", tier_id, None, NOW).expect_err("early");
        assert!(matches!(err, ReferralError::NotEligible { have: 2, need: 3, .. }));
    }

    #[test]
    fn test_claim_inactive_tier_rejected() {
        let mut conn = test_db();
        let tier_id =
            referrals::insert_tier(&conn, 1, RewardType::Credits, 500, None, 0).expect("tier");
        referrals::deactivate_tier(&conn, tier_id).expect("deactivate");
        invite(&conn, 1);

        let err = claim_reward(&mut conn, "ref", tier_id, None, NOW).expect_err("inactive");
        assert!(matches!(err, ReferralError::TierInactive(_)));
    }

    #[test]
    fn test_auto_grant_picks_lowest_unclaimed_tier() {
        let conn = test_db();
        referrals::insert_tier(&conn, 1, RewardType::Credits, 100, None, 0).expect("t1");
        referrals::insert_tier(&conn, 3, RewardType::FreeDays, 30, None, 1).expect("t3");
        invite(&conn, 3);

        let first = auto_grant(&conn, "ref", NOW).expect("grant").expect("reward");
        assert_eq!(first.reward_value, 100, "lowest tier first");
        let second = auto_grant(&conn, "ref", NOW).expect("grant").expect("reward");
        assert_eq!(second.reward_value, 30);
        assert!(auto_grant(&conn, "ref", NOW).expect("grant").is_none());
    }
}
