//! Referral ledger, reward tiers, trial policy, and the credit ledger.

pub mod code;
pub mod events;
pub mod stats;
pub mod tiers;
pub mod trial;

use verba_types::{CourseId, TierId};

#[derive(Debug, thiserror::Error)]
pub enum ReferralError {
    #[error("user {0} not found")]
    UserNotFound(String),

    #[error("reward tier {0} not found")]
    TierNotFound(TierId),

    #[error("reward tier {0} is no longer active")]
    TierInactive(TierId),

    #[error("not enough completed invites for tier {tier_id}: have {have}, need {need}")]
    NotEligible {
        tier_id: TierId,
        have: u32,
        need: u32,
    },

    #[error("reward for tier {0} was already claimed")]
    AlreadyClaimed(TierId),

    #[error("a free-days reward needs a course selection")]
    CourseSelectionRequired,

    #[error("course {0} not found")]
    CourseNotFound(CourseId),

    #[error("trial period is over")]
    TrialExpired,

    #[error("a trial course was already selected")]
    TrialCourseAlreadySelected,

    #[error("could not generate a unique referral code")]
    CodeExhausted,

    #[error(transparent)]
    Db(#[from] verba_db::DbError),
}

pub type Result<T> = std::result::Result<T, ReferralError>;
