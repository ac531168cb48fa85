//! Subscription plans and per-user subscription instances.

use serde::{Deserialize, Serialize};

use crate::{CourseId, PlanId, SubscriptionId, UserId};

/// Lifecycle status of a subscription instance.
///
/// `Cancelled` and `Expired` are terminal for the instance; a new
/// instance for the same plan may be created afterward (succession,
/// not resurrection).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    None,
    Pending,
    Active,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::None => "none",
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            // Legacy rows may carry an empty status; normalize to none.
            "" | "none" => Some(SubscriptionStatus::None),
            "pending" => Some(SubscriptionStatus::Pending),
            "active" => Some(SubscriptionStatus::Active),
            "cancelled" => Some(SubscriptionStatus::Cancelled),
            "expired" => Some(SubscriptionStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Cancelled | SubscriptionStatus::Expired
        )
    }
}

/// A plan: a bundle of N course slots at a monthly price.
#[derive(Clone, Debug, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    pub num_courses: u32,
    pub price_monthly: i64,
    pub currency: String,
    /// Price id on the payment provider side.
    pub external_price_id: Option<String>,
    pub is_active: bool,
}

/// One billing relationship between a user and a plan, distinct from the
/// payment provider's own subscription object.
#[derive(Clone, Debug, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct SubscriptionInstance {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub start_date: u64,
    pub end_date: Option<u64>,
    pub status: SubscriptionStatus,
    /// Cleared once superseded by a newer active sibling.
    pub external_subscription_id: Option<String>,
    /// Last renewal invoice applied; replays of it are no-ops.
    pub last_invoice_id: Option<String>,
    pub slots_total: u32,
    pub created_at: u64,
}

/// Subscription merged with plan metadata for listing views.
#[derive(Clone, Debug, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct SubscriptionView {
    pub id: SubscriptionId,
    pub plan_id: PlanId,
    pub plan_name: String,
    pub num_courses: u32,
    pub price_monthly: i64,
    pub currency: String,
    pub status: SubscriptionStatus,
    pub start_date: u64,
    /// Derived from the grant rows; None for none/pending instances.
    pub end_date: Option<u64>,
    /// Derived from the grant rows; None for none/pending instances.
    pub external_subscription_id: Option<String>,
    pub courses: Vec<CourseId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for s in ["none", "pending", "active", "cancelled", "expired"] {
            let parsed = SubscriptionStatus::parse(s).expect("parse");
            assert_eq!(parsed.as_str(), s);
        }
    }

    #[test]
    fn test_empty_status_normalizes_to_none() {
        assert_eq!(SubscriptionStatus::parse(""), Some(SubscriptionStatus::None));
    }

    #[test]
    fn test_terminal_states() {
        assert!(SubscriptionStatus::Cancelled.is_terminal());
        assert!(SubscriptionStatus::Expired.is_terminal());
        assert!(!SubscriptionStatus::Active.is_terminal());
        assert!(!SubscriptionStatus::Pending.is_terminal());
    }
}
