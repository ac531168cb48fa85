//! Subscription ledger and lifecycle reconciler.
//!
//! Payment-provider webhooks are verified, parsed into a closed event
//! union, and applied to the subscription and grant tables as
//! idempotent transactional transitions. Local state is the source of
//! truth for access; provider calls are best-effort.

pub mod checkout;
pub mod event;
pub mod provider;
pub mod reconciler;
pub mod signature;
pub mod views;

use verba_types::SubscriptionId;

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("signature verification failed: {0}")]
    Signature(#[from] signature::SignatureError),

    #[error("malformed event payload: {0}")]
    MalformedEvent(String),

    #[error("subscription {0} not found")]
    SubscriptionNotFound(SubscriptionId),

    #[error("plan {0} not found")]
    PlanNotFound(i64),

    #[error("not the subscription owner")]
    NotOwner,

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("payment provider call failed: {0}")]
    Provider(String),

    #[error(transparent)]
    Db(#[from] verba_db::DbError),
}

pub type Result<T> = std::result::Result<T, BillingError>;
