//! Entitlement grants and access decisions.

use serde::{Deserialize, Serialize};

use crate::{CourseId, UserId};

/// Platform role carried by an authenticated principal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Editor,
    Admin,
}

/// The authenticated caller, threaded explicitly through every resolver
/// and engine call. Never ambient state.
#[derive(Clone, Debug, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct Principal {
    pub user_id: UserId,
    pub role: Role,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Lifecycle status of an entitlement grant row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    Active,
    Cancelled,
}

impl GrantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantStatus::Active => "active",
            GrantStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(GrantStatus::Active),
            "cancelled" => Some(GrantStatus::Cancelled),
            _ => None,
        }
    }
}

/// A persisted per-user-per-course access grant. At most one row exists
/// per (user, course) pair.
#[derive(Clone, Debug, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct EntitlementGrant {
    pub id: i64,
    pub user_id: UserId,
    pub course_id: CourseId,
    pub start_date: u64,
    /// None = unbounded.
    pub end_date: Option<u64>,
    /// None = unlimited chapters.
    pub chapter_limit: Option<u32>,
    pub status: GrantStatus,
    pub external_subscription_id: Option<String>,
    pub external_customer_id: Option<String>,
    pub granted_at: u64,
}

/// Why access was granted or denied. Machine-readable so front-ends can
/// distinguish upgrade prompts from error states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum AccessReason {
    /// Admin role bypasses all checks.
    Admin,
    /// Course has no price.
    FreeCourse,
    /// Grant-less user under the TrialByDefault policy.
    Trial,
    /// An explicit grant row permits access.
    Granted,
    /// Grant end_date is in the past.
    Expired,
    /// Grant start_date is in the future.
    NotStarted,
    /// Anonymous caller on a priced course, or chapter beyond the cap.
    NoAccess,
    /// Course is not published.
    NotPublished,
}

/// Result of resolving (user, course[, chapter]) access.
#[derive(Clone, Debug, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct AccessDecision {
    pub allowed: bool,
    /// None = unbounded.
    pub chapter_limit: Option<u32>,
    pub reason: AccessReason,
    pub end_date: Option<u64>,
}

impl AccessDecision {
    pub fn allowed(chapter_limit: Option<u32>, reason: AccessReason) -> Self {
        Self {
            allowed: true,
            chapter_limit,
            reason,
            end_date: None,
        }
    }

    pub fn denied(reason: AccessReason) -> Self {
        Self {
            allowed: false,
            chapter_limit: Some(0),
            reason,
            end_date: None,
        }
    }

    pub fn with_end_date(mut self, end_date: Option<u64>) -> Self {
        self.end_date = end_date;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_status_roundtrip() {
        assert_eq!(GrantStatus::parse("active"), Some(GrantStatus::Active));
        assert_eq!(
            GrantStatus::parse(GrantStatus::Cancelled.as_str()),
            Some(GrantStatus::Cancelled)
        );
        assert_eq!(GrantStatus::parse("bogus"), None);
    }

    #[test]
    fn test_reason_serializes_snake_case() {
        let json = serde_json::to_string(&AccessReason::NotStarted).expect("serialize");
        assert_eq!(json, "\"not_started\"");
    }
}
