//! Subscription creation and re-subscribe chaining.
//!
//! A new instance is written as `pending` before the user is sent to
//! checkout; the reconciler flips it to `active` when the provider
//! confirms payment.

use rusqlite::Connection;
use verba_types::subscription::SubscriptionStatus;
use verba_types::{CourseId, PlanId, SubscriptionId, DAY_SECS};

use verba_db::queries::{courses, subscriptions};

use crate::provider::{CheckoutRequest, RemoteSession};
use crate::{BillingError, Result};

/// A pending instance ready to be taken to the provider's checkout.
#[derive(Debug, Clone)]
pub struct PreparedCheckout {
    pub subscription_id: SubscriptionId,
    pub start_date: u64,
    /// Days until the paid window opens; zero for an immediate start.
    pub deferred_start_days: u32,
    pub price_id: String,
}

/// Validate a plan + course selection and write the pending instance.
///
/// Chained renewals never overlap: the start date is
/// max(today, latest prior end + 1 day) for the same (user, plan).
pub fn prepare_subscription(
    conn: &Connection,
    user_id: &str,
    plan_id: PlanId,
    course_ids: &[CourseId],
    now: u64,
) -> Result<PreparedCheckout> {
    let plan = match subscriptions::get_plan(conn, plan_id) {
        Ok(plan) => plan,
        Err(verba_db::DbError::NotFound(_)) => return Err(BillingError::PlanNotFound(plan_id)),
        Err(e) => return Err(e.into()),
    };
    if !plan.is_active {
        return Err(BillingError::PlanNotFound(plan_id));
    }
    let price_id = plan.external_price_id.clone().ok_or_else(|| {
        BillingError::Validation(format!("plan {plan_id} has no provider price"))
    })?;

    if course_ids.len() != plan.num_courses as usize {
        return Err(BillingError::Validation(format!(
            "plan requires {} course(s), got {}",
            plan.num_courses,
            course_ids.len()
        )));
    }
    let mut seen = course_ids.to_vec();
    seen.sort_unstable();
    seen.dedup();
    if seen.len() != course_ids.len() {
        return Err(BillingError::Validation("duplicate course selection".into()));
    }
    for &course_id in course_ids {
        if courses::get_opt(conn, course_id)?.is_none() {
            return Err(BillingError::Validation(format!("unknown course {course_id}")));
        }
    }

    // A leftover pending row is an abandoned checkout, not a live
    // subscription; supersede it instead of locking the plan. Only a
    // paid, active instance blocks a new attempt.
    let superseded = subscriptions::supersede_pending(conn, user_id, plan_id)?;
    if superseded > 0 {
        tracing::info!(
            user = %user_id,
            plan = plan_id,
            superseded,
            "superseded abandoned pending checkout"
        );
    }
    if subscriptions::has_active_instance(conn, user_id, plan_id)? {
        return Err(BillingError::Conflict(
            "an active subscription for this plan already exists".into(),
        ));
    }

    let start_date = match subscriptions::max_end_date_for_plan(conn, user_id, plan_id)? {
        Some(prior_end) => now.max(prior_end + DAY_SECS),
        None => now,
    };
    let deferred_start_days = if start_date > now {
        (start_date - now).div_ceil(DAY_SECS) as u32
    } else {
        0
    };

    let subscription_id = subscriptions::insert(
        conn,
        user_id,
        plan_id,
        start_date,
        SubscriptionStatus::Pending,
        plan.num_courses,
        now,
    )?;
    subscriptions::attach_courses(conn, subscription_id, course_ids)?;

    tracing::info!(
        user = %user_id,
        plan = plan_id,
        subscription = subscription_id,
        deferred_days = deferred_start_days,
        "prepared subscription checkout"
    );

    Ok(PreparedCheckout {
        subscription_id,
        start_date,
        deferred_start_days,
        price_id,
    })
}

/// Build the provider request for a prepared instance. Keeps the
/// session-creation call free of any database borrow.
pub fn checkout_request(
    prepared: &PreparedCheckout,
    customer_email: &str,
    success_url: &str,
    cancel_url: &str,
) -> CheckoutRequest {
    CheckoutRequest {
        price_id: prepared.price_id.clone(),
        customer_email: customer_email.to_string(),
        subscription_ref: prepared.subscription_id,
        deferred_start_days: prepared.deferred_start_days,
        success_url: success_url.to_string(),
        cancel_url: cancel_url.to_string(),
    }
}

/// Client-polled fallback for when the success page loads before the
/// webhook arrives: the caller fetches the session from the provider,
/// then this runs the same confirmation path the webhook would.
pub fn apply_remote_session(
    conn: &mut rusqlite::Connection,
    user_id: &str,
    session: &RemoteSession,
    now: u64,
) -> Result<crate::reconciler::ReconcileOutcome> {
    if !session.paid {
        return Err(BillingError::Conflict("checkout session not paid yet".into()));
    }
    let subscription_ref = session.subscription_ref.ok_or_else(|| {
        BillingError::MalformedEvent("session carries no subscription_ref metadata".into())
    })?;
    let external_subscription_id = session.external_subscription_id.as_deref().ok_or_else(|| {
        BillingError::MalformedEvent("paid session carries no subscription id".into())
    })?;

    let sub = match subscriptions::get(conn, subscription_ref) {
        Ok(sub) => sub,
        Err(verba_db::DbError::NotFound(_)) => {
            return Err(BillingError::SubscriptionNotFound(subscription_ref))
        }
        Err(e) => return Err(e.into()),
    };
    if sub.user_id != user_id {
        return Err(BillingError::NotOwner);
    }

    crate::reconciler::confirm_checkout(
        conn,
        subscription_ref,
        external_subscription_id,
        session.external_customer_id.as_deref(),
        now,
    )
}
