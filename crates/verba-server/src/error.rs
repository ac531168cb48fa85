//! HTTP error mapping.
//!
//! Crate-level errors from the resolver, reconciler, and referral
//! engine are translated into one taxonomy with a machine-readable
//! reason code, so front-ends can tell upgrade prompts from error
//! states.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use verba_billing::BillingError;
use verba_entitlements::EntitlementError;
use verba_referral::ReferralError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("upstream provider error: {0}")]
    Upstream(String),

    #[error("internal error")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Upstream(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation",
            ApiError::Unauthorized => "unauthorized",
            ApiError::Forbidden => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::Upstream(_) => "upstream",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(detail) = &self {
            tracing::error!(detail = %detail, "internal error");
        }
        let body = Json(serde_json::json!({
            "error": self.reason(),
            "message": self.to_string(),
        }));
        (self.status(), body).into_response()
    }
}

impl From<verba_db::DbError> for ApiError {
    fn from(e: verba_db::DbError) -> Self {
        match e {
            verba_db::DbError::NotFound(what) => ApiError::NotFound(what),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<EntitlementError> for ApiError {
    fn from(e: EntitlementError) -> Self {
        match e {
            EntitlementError::CourseNotFound(_) | EntitlementError::ChapterNotFound(_) => {
                ApiError::NotFound(e.to_string())
            }
            EntitlementError::Db(db) => db.into(),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::Signature(_) => ApiError::Unauthorized,
            BillingError::MalformedEvent(msg) => ApiError::Validation(msg),
            BillingError::SubscriptionNotFound(_) | BillingError::PlanNotFound(_) => {
                ApiError::NotFound(e.to_string())
            }
            BillingError::NotOwner => ApiError::Forbidden,
            BillingError::Conflict(msg) => ApiError::Conflict(msg),
            BillingError::Validation(msg) => ApiError::Validation(msg),
            BillingError::Provider(msg) => ApiError::Upstream(msg),
            BillingError::Db(db) => db.into(),
        }
    }
}

impl From<ReferralError> for ApiError {
    fn from(e: ReferralError) -> Self {
        match e {
            ReferralError::UserNotFound(_)
            | ReferralError::TierNotFound(_)
            | ReferralError::CourseNotFound(_) => ApiError::NotFound(e.to_string()),
            ReferralError::TierInactive(_)
            | ReferralError::NotEligible { .. }
            | ReferralError::AlreadyClaimed(_)
            | ReferralError::TrialExpired
            | ReferralError::TrialCourseAlreadySelected => ApiError::Conflict(e.to_string()),
            ReferralError::CourseSelectionRequired => ApiError::Validation(e.to_string()),
            ReferralError::CodeExhausted => ApiError::Internal(e.to_string()),
            ReferralError::Db(db) => db.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::Conflict("x".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::NotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_referral_conflicts_map_to_409() {
        let err: ApiError = ReferralError::AlreadyClaimed(1).into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        let err: ApiError = ReferralError::CourseSelectionRequired.into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_billing_owner_and_signature() {
        let err: ApiError = BillingError::NotOwner.into();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        let err: ApiError =
            BillingError::Signature(verba_billing::signature::SignatureError::Mismatch).into();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }
}
