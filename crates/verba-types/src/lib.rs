//! # verba-types
//!
//! Shared domain types used across the Verba workspace: principals,
//! courses, entitlement grants, subscription instances, referral events,
//! and reward tiers. All timestamps are Unix epoch seconds (u64).

pub mod access;
pub mod course;
pub mod referral;
pub mod subscription;

/// Opaque user identifier (32 hex chars, assigned at registration).
pub type UserId = String;
pub type CourseId = i64;
pub type ChapterId = i64;
pub type PlanId = i64;
pub type SubscriptionId = i64;
pub type TierId = i64;
pub type RewardId = i64;

/// Seconds in one day.
pub const DAY_SECS: u64 = 86_400;

/// One billing period (a month of access, normalized to 30 days).
pub const BILLING_PERIOD_SECS: u64 = 30 * DAY_SECS;

/// Chapter cap applied when an authenticated user has no grant row.
/// This is the TrialByDefault policy: absence of a grant is implicit
/// trial access, not denial.
pub const DEFAULT_TRIAL_CHAPTER_LIMIT: u32 = 5;

/// Maximum accepted clock drift for webhook signature timestamps.
pub const SIGNATURE_TOLERANCE_SECS: u64 = 300;

/// Length of a generated referral code.
pub const REFERRAL_CODE_LEN: usize = 10;
