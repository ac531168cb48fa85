//! Referral events, reward tiers, and the credit ledger.

use serde::{Deserialize, Serialize};

use crate::{CourseId, RewardId, TierId, UserId};

/// Kind of invite event in the append-only referral ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ReferralEventType {
    Signup,
    EmailVerified,
    CompletedOnboarding,
}

impl ReferralEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferralEventType::Signup => "signup",
            ReferralEventType::EmailVerified => "email_verified",
            ReferralEventType::CompletedOnboarding => "completed_onboarding",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "signup" => Some(ReferralEventType::Signup),
            "email_verified" => Some(ReferralEventType::EmailVerified),
            "completed_onboarding" => Some(ReferralEventType::CompletedOnboarding),
            _ => None,
        }
    }
}

/// What a reward tier pays out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum RewardType {
    /// Days of course access; claiming requires a course selection.
    FreeDays,
    /// Credits added to the ledger at claim time, no course needed.
    Credits,
}

impl RewardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardType::FreeDays => "free_days",
            RewardType::Credits => "credits",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "free_days" => Some(RewardType::FreeDays),
            "credits" => Some(RewardType::Credits),
            _ => None,
        }
    }
}

/// A configurable referral threshold mapped to a payout.
#[derive(Clone, Debug, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct RewardTier {
    pub id: TierId,
    /// Unique across tiers; orders the ladder.
    pub required_invites: u32,
    pub reward_type: RewardType,
    pub reward_value: u32,
    /// Cap applied to free_days grants; None = unlimited.
    pub chapter_limit: Option<u32>,
    pub is_active: bool,
    pub display_order: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum RewardStatus {
    Pending,
    Granted,
}

impl RewardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardStatus::Pending => "pending",
            RewardStatus::Granted => "granted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RewardStatus::Pending),
            "granted" => Some(RewardStatus::Granted),
            _ => None,
        }
    }
}

/// A reward earned by a referrer. At most one per (user, tier), ever.
#[derive(Clone, Debug, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct Reward {
    pub id: RewardId,
    pub user_id: UserId,
    pub tier_id: TierId,
    pub reward_type: RewardType,
    pub reward_value: u32,
    pub chapter_limit: Option<u32>,
    pub status: RewardStatus,
    /// Audit snapshot of the invite count when the reward was created.
    pub invites_at_grant: u32,
    /// Course chosen when a free_days reward was claimed.
    pub course_id: Option<CourseId>,
    pub created_at: u64,
    pub claimed_at: Option<u64>,
}

/// One append-only credit ledger row. The current balance is the
/// `balance_after` of the newest row.
#[derive(Clone, Debug, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct CreditEntry {
    pub id: i64,
    pub user_id: UserId,
    pub entry_type: CreditEntryType,
    /// Positive for earned, negative for spent.
    pub amount: i64,
    pub balance_after: i64,
    pub description: String,
    pub reference_id: Option<i64>,
    pub created_at: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CreditEntryType {
    Earned,
    Spent,
}

impl CreditEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditEntryType::Earned => "earned",
            CreditEntryType::Spent => "spent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "earned" => Some(CreditEntryType::Earned),
            "spent" => Some(CreditEntryType::Spent),
            _ => None,
        }
    }
}

/// Referral dashboard payload for the authenticated user.
#[derive(Clone, Debug, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct ReferralStats {
    pub referral_code: String,
    pub referral_link: String,
    pub trial_expires_at: Option<u64>,
    pub has_trial_access: bool,
    pub has_selected_trial_course: bool,
    pub total_invites: u32,
    pub successful_invites: u32,
    pub invites_until_next_reward: u32,
    pub credits_balance: i64,
    pub rewards: Vec<Reward>,
    pub available_tiers: Vec<RewardTier>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_roundtrip() {
        for s in ["signup", "email_verified", "completed_onboarding"] {
            let parsed = ReferralEventType::parse(s).expect("parse");
            assert_eq!(parsed.as_str(), s);
        }
    }

    #[test]
    fn test_reward_type_parse() {
        assert_eq!(RewardType::parse("free_days"), Some(RewardType::FreeDays));
        assert_eq!(RewardType::parse("credits"), Some(RewardType::Credits));
        assert_eq!(RewardType::parse("free_month"), None);
    }
}
