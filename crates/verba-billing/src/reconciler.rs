//! Webhook-driven lifecycle transitions.
//!
//! Every handler is idempotent (at-least-once delivery) and
//! transactional: either the instance row and all its grant rows move
//! together, or nothing moves. When an event references state we do not
//! have (out-of-order delivery), the handler logs the inconsistency and
//! acknowledges without writing; it never guesses.

use rusqlite::Connection;
use verba_types::subscription::SubscriptionStatus;
use verba_types::{SubscriptionId, BILLING_PERIOD_SECS};

use verba_db::queries::{access, subscriptions};

use crate::event::ProviderEvent;
use crate::provider::{PaymentProvider, RemoteCancelOutcome};
use crate::{BillingError, Result};

/// How an event landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// State changed.
    Applied,
    /// Replay of an already-applied event; no-op.
    AlreadyApplied,
    /// Event referenced state we do not have; logged, not applied.
    Skipped(String),
    /// Event kind is acknowledged but deliberately has no effect.
    Logged,
}

/// Apply one verified, parsed event.
pub fn apply_event(
    conn: &mut Connection,
    event: &ProviderEvent,
    now: u64,
) -> Result<ReconcileOutcome> {
    match event {
        ProviderEvent::CheckoutCompleted {
            subscription_ref,
            external_subscription_id,
            external_customer_id,
            ..
        } => confirm_checkout(
            conn,
            *subscription_ref,
            external_subscription_id,
            external_customer_id.as_deref(),
            now,
        ),
        ProviderEvent::InvoicePaid {
            external_subscription_id,
            invoice_id,
            period_end,
        } => invoice_paid(
            conn,
            external_subscription_id,
            invoice_id.as_deref(),
            *period_end,
            now,
        ),
        ProviderEvent::InvoicePaymentFailed {
            external_subscription_id,
        } => {
            // Deliberately no access suspension; the provider keeps
            // retrying the charge on its own schedule.
            tracing::warn!(
                external_subscription = %external_subscription_id,
                "invoice payment failed, access unchanged"
            );
            Ok(ReconcileOutcome::Logged)
        }
        ProviderEvent::SubscriptionDeleted {
            external_subscription_id,
            period_end,
        } => subscription_deleted(conn, external_subscription_id, *period_end, now),
        ProviderEvent::Unknown { kind } => {
            tracing::debug!(kind = %kind, "ignoring unhandled provider event");
            Ok(ReconcileOutcome::Logged)
        }
    }
}

/// Activate a pending instance once the provider confirms payment, and
/// fan out unrestricted grants for its chosen courses. Replays of an
/// already-active instance are a no-op on the ledger.
pub fn confirm_checkout(
    conn: &mut Connection,
    subscription_ref: SubscriptionId,
    external_subscription_id: &str,
    external_customer_id: Option<&str>,
    now: u64,
) -> Result<ReconcileOutcome> {
    let tx = conn.transaction().map_err(verba_db::DbError::Sqlite)?;

    let sub = match subscriptions::get(&tx, subscription_ref) {
        Ok(sub) => sub,
        Err(verba_db::DbError::NotFound(_)) => {
            tracing::warn!(
                subscription = subscription_ref,
                "checkout confirmation for unknown instance"
            );
            return Ok(ReconcileOutcome::Skipped("unknown instance".into()));
        }
        Err(e) => return Err(e.into()),
    };

    if sub.status == SubscriptionStatus::Active
        && sub.external_subscription_id.as_deref() == Some(external_subscription_id)
    {
        return Ok(ReconcileOutcome::AlreadyApplied);
    }
    if sub.status.is_terminal() {
        tracing::warn!(
            subscription = subscription_ref,
            status = sub.status.as_str(),
            "checkout confirmation for a closed instance"
        );
        return Ok(ReconcileOutcome::Skipped("instance already closed".into()));
    }

    // One billing period, anchored to the instance's (possibly
    // deferred) start date.
    let end_date = sub.start_date + BILLING_PERIOD_SECS;

    subscriptions::activate(&tx, subscription_ref, external_subscription_id)?;
    subscriptions::close(&tx, subscription_ref, SubscriptionStatus::Active, end_date)?;

    // Never two simultaneously-active instances for one (user, plan);
    // the provider id must resolve to exactly one local row.
    subscriptions::expire_active_siblings(&tx, &sub.user_id, sub.plan_id, subscription_ref, now)?;
    subscriptions::clear_external_id_from_siblings(&tx, external_subscription_id, subscription_ref)?;

    for course_id in subscriptions::courses_for(&tx, subscription_ref)? {
        access::upsert(
            &tx,
            &access::GrantUpsert {
                user_id: &sub.user_id,
                course_id,
                start_date: sub.start_date,
                end_date: Some(end_date),
                // Paid access is unrestricted.
                chapter_limit: None,
                external_subscription_id: Some(external_subscription_id),
                external_customer_id,
                granted_at: now,
            },
        )?;
    }

    tx.commit().map_err(verba_db::DbError::Sqlite)?;
    tracing::info!(
        subscription = subscription_ref,
        external_subscription = %external_subscription_id,
        end_date,
        "checkout confirmed, instance active"
    );
    Ok(ReconcileOutcome::Applied)
}

/// Extend the paid window on a renewal invoice. No new rows are
/// created; a renewal for an instance that is not active is an
/// out-of-order inconsistency and only logged. The invoice id makes
/// redeliveries no-ops.
fn invoice_paid(
    conn: &mut Connection,
    external_subscription_id: &str,
    invoice_id: Option<&str>,
    period_end: Option<u64>,
    now: u64,
) -> Result<ReconcileOutcome> {
    let tx = conn.transaction().map_err(verba_db::DbError::Sqlite)?;

    let Some(sub) = subscriptions::find_by_external_id(&tx, external_subscription_id)? else {
        tracing::warn!(
            external_subscription = %external_subscription_id,
            "renewal for unknown provider subscription"
        );
        return Ok(ReconcileOutcome::Skipped("unknown provider subscription".into()));
    };
    if sub.status != SubscriptionStatus::Active {
        tracing::warn!(
            subscription = sub.id,
            status = sub.status.as_str(),
            "renewal for a non-active instance, leaving state untouched"
        );
        return Ok(ReconcileOutcome::Skipped("instance not active".into()));
    }
    if invoice_id.is_some() && sub.last_invoice_id.as_deref() == invoice_id {
        return Ok(ReconcileOutcome::AlreadyApplied);
    }

    // The provider's reported period end wins; without one, extend the
    // current window by one billing period.
    let new_end = period_end.unwrap_or(sub.end_date.unwrap_or(now) + BILLING_PERIOD_SECS);

    access::extend_by_external_subscription(&tx, external_subscription_id, new_end)?;
    subscriptions::record_renewal(&tx, sub.id, new_end, invoice_id)?;

    tx.commit().map_err(verba_db::DbError::Sqlite)?;
    tracing::info!(
        subscription = sub.id,
        external_subscription = %external_subscription_id,
        new_end,
        "renewal applied"
    );
    Ok(ReconcileOutcome::Applied)
}

/// The provider ended the subscription. Grants stay valid until the
/// frozen end date; nothing is revoked immediately.
fn subscription_deleted(
    conn: &mut Connection,
    external_subscription_id: &str,
    period_end: Option<u64>,
    now: u64,
) -> Result<ReconcileOutcome> {
    let tx = conn.transaction().map_err(verba_db::DbError::Sqlite)?;

    let Some(sub) = subscriptions::find_by_external_id(&tx, external_subscription_id)? else {
        tracing::warn!(
            external_subscription = %external_subscription_id,
            "deletion for unknown provider subscription"
        );
        return Ok(ReconcileOutcome::Skipped("unknown provider subscription".into()));
    };
    if sub.status.is_terminal() {
        return Ok(ReconcileOutcome::AlreadyApplied);
    }

    let frozen_end = period_end.unwrap_or(now);
    access::cancel_by_external_subscription(&tx, external_subscription_id, frozen_end)?;
    subscriptions::close(&tx, sub.id, SubscriptionStatus::Cancelled, frozen_end)?;

    tx.commit().map_err(verba_db::DbError::Sqlite)?;
    tracing::info!(
        subscription = sub.id,
        external_subscription = %external_subscription_id,
        frozen_end,
        "upstream cancellation applied"
    );
    Ok(ReconcileOutcome::Applied)
}

/// Receipt for a user-initiated cancel.
#[derive(Debug, Clone)]
pub struct CancelReceipt {
    pub remote: RemoteCancelOutcome,
    /// Access remains valid until this date.
    pub end_date: u64,
}

/// Owner-checked snapshot of a live instance, taken before the
/// provider call so the connection need not be held across it.
#[derive(Debug, Clone)]
pub struct CancelClaim {
    pub subscription_id: SubscriptionId,
    pub external_subscription_id: Option<String>,
    pub end_date: Option<u64>,
}

/// First phase of a user-initiated cancel: verify ownership and that
/// the instance is still open.
pub fn begin_user_cancel(
    conn: &Connection,
    user_id: &str,
    subscription_id: SubscriptionId,
) -> Result<CancelClaim> {
    let sub = match subscriptions::get(conn, subscription_id) {
        Ok(sub) => sub,
        Err(verba_db::DbError::NotFound(_)) => {
            return Err(BillingError::SubscriptionNotFound(subscription_id))
        }
        Err(e) => return Err(e.into()),
    };
    if sub.user_id != user_id {
        return Err(BillingError::NotOwner);
    }
    if sub.status.is_terminal() {
        return Err(BillingError::Conflict("subscription already closed".into()));
    }
    Ok(CancelClaim {
        subscription_id,
        external_subscription_id: sub.external_subscription_id,
        end_date: sub.end_date,
    })
}

/// Best-effort upstream cancel, captured as data rather than an error.
pub async fn remote_cancel<P: PaymentProvider>(
    provider: &P,
    claim: &CancelClaim,
) -> RemoteCancelOutcome {
    match claim.external_subscription_id.as_deref() {
        None => RemoteCancelOutcome::Skipped,
        Some(external_id) => match provider.cancel_subscription(external_id).await {
            Ok(()) => RemoteCancelOutcome::Cancelled,
            Err(e) => {
                tracing::warn!(
                    subscription = claim.subscription_id,
                    external_subscription = %external_id,
                    error = %e,
                    "upstream cancel failed, applying local cancel anyway"
                );
                RemoteCancelOutcome::Failed(e.to_string())
            }
        },
    }
}

/// Final phase: apply the local transition. Local state is the source
/// of truth; a failed remote call never blocks it.
pub fn finish_user_cancel(
    conn: &mut Connection,
    claim: &CancelClaim,
    remote: RemoteCancelOutcome,
    now: u64,
) -> Result<CancelReceipt> {
    // Freeze access at the already-paid period end, or today if none.
    let frozen_end = claim.end_date.filter(|&end| end > now).unwrap_or(now);

    let tx = conn.transaction().map_err(verba_db::DbError::Sqlite)?;
    // The instance may have closed between the phases; never reopen it.
    let sub = subscriptions::get(&tx, claim.subscription_id)?;
    if sub.status.is_terminal() {
        return Err(BillingError::Conflict("subscription already closed".into()));
    }
    if let Some(external_id) = claim.external_subscription_id.as_deref() {
        access::cancel_by_external_subscription(&tx, external_id, frozen_end)?;
    }
    subscriptions::close(&tx, claim.subscription_id, SubscriptionStatus::Cancelled, frozen_end)?;
    tx.commit().map_err(verba_db::DbError::Sqlite)?;

    tracing::info!(
        subscription = claim.subscription_id,
        frozen_end,
        remote = ?remote,
        "subscription cancelled"
    );
    Ok(CancelReceipt {
        remote,
        end_date: frozen_end,
    })
}

/// User-initiated cancel, all three phases in order.
pub async fn user_cancel<P: PaymentProvider>(
    conn: &mut Connection,
    provider: &P,
    user_id: &str,
    subscription_id: SubscriptionId,
    now: u64,
) -> Result<CancelReceipt> {
    let claim = begin_user_cancel(conn, user_id, subscription_id)?;
    let remote = remote_cancel(provider, &claim).await;
    finish_user_cancel(conn, &claim, remote, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::prepare_subscription;
    use crate::provider::{CheckoutRequest, CheckoutSession, RemoteSession};
    use verba_db::queries::{courses, users};
    use verba_types::access::{GrantStatus, Role};
    use verba_types::course::CourseStatus;
    use verba_types::{CourseId, PlanId};

    const NOW: u64 = 1_000_000;

    fn setup() -> (Connection, PlanId, Vec<CourseId>) {
        let conn = verba_db::open_memory().expect("open test db");
        users::insert(&conn, "u1", "a@example.com", Role::User, None, None, 0).expect("user");
        let plan_id = verba_db::queries::subscriptions::insert_plan(
            &conn, "Duo", 2, 1490, "EUR", Some("price_duo"),
        )
        .expect("plan");
        let a = courses::insert(&conn, "Spanish A1", CourseStatus::Published, Some(990), None, 0)
            .expect("a");
        let b = courses::insert(&conn, "French A1", CourseStatus::Published, Some(990), None, 0)
            .expect("b");
        (conn, plan_id, vec![a, b])
    }

    fn checkout(conn: &mut Connection, plan_id: PlanId, course_ids: &[CourseId]) -> SubscriptionId {
        let prepared = prepare_subscription(conn, "u1", plan_id, course_ids, NOW).expect("prep");
        confirm_checkout(conn, prepared.subscription_id, "sub_ext", Some("cus_ext"), NOW)
            .expect("confirm");
        prepared.subscription_id
    }

    struct FakeProvider {
        cancel_ok: bool,
    }

    impl PaymentProvider for FakeProvider {
        async fn create_checkout_session(&self, _: &CheckoutRequest) -> Result<CheckoutSession> {
            Ok(CheckoutSession {
                session_id: "cs_fake".into(),
                url: "https://pay.example/cs_fake".into(),
            })
        }

        async fn fetch_checkout_session(&self, _: &str) -> Result<RemoteSession> {
            Ok(RemoteSession {
                subscription_ref: None,
                external_subscription_id: None,
                external_customer_id: None,
                paid: false,
            })
        }

        async fn cancel_subscription(&self, _: &str) -> Result<()> {
            if self.cancel_ok {
                Ok(())
            } else {
                Err(BillingError::Provider("timeout".into()))
            }
        }
    }

    #[test]
    fn test_checkout_fans_out_unrestricted_grants() {
        let (mut conn, plan_id, course_ids) = setup();
        let sub_id = checkout(&mut conn, plan_id, &course_ids);

        let sub = verba_db::queries::subscriptions::get(&conn, sub_id).expect("sub");
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.end_date, Some(NOW + BILLING_PERIOD_SECS));

        for &course_id in &course_ids {
            let grant = access::get(&conn, "u1", course_id).expect("get").expect("grant");
            assert_eq!(grant.status, GrantStatus::Active);
            assert_eq!(grant.chapter_limit, None);
            assert_eq!(grant.end_date, Some(NOW + BILLING_PERIOD_SECS));
            assert_eq!(grant.external_subscription_id.as_deref(), Some("sub_ext"));
        }
    }

    #[test]
    fn test_checkout_replay_is_a_no_op() {
        let (mut conn, plan_id, course_ids) = setup();
        let sub_id = checkout(&mut conn, plan_id, &course_ids);
        let end_before = access::get(&conn, "u1", course_ids[0])
            .expect("get")
            .expect("grant")
            .end_date;

        let outcome = confirm_checkout(&mut conn, sub_id, "sub_ext", Some("cus_ext"), NOW + 100)
            .expect("replay");
        assert_eq!(outcome, ReconcileOutcome::AlreadyApplied);

        let end_after = access::get(&conn, "u1", course_ids[0])
            .expect("get")
            .expect("grant")
            .end_date;
        assert_eq!(end_before, end_after, "replay must not extend the window");
    }

    #[test]
    fn test_checkout_activation_expires_active_sibling() {
        let (mut conn, plan_id, course_ids) = setup();
        let old = verba_db::queries::subscriptions::insert(
            &conn, "u1", plan_id, 0, SubscriptionStatus::Active, 2, 0,
        )
        .expect("old");

        let new_id = verba_db::queries::subscriptions::insert(
            &conn, "u1", plan_id, NOW, SubscriptionStatus::Pending, 2, NOW,
        )
        .expect("new");
        verba_db::queries::subscriptions::attach_courses(&conn, new_id, &course_ids)
            .expect("attach");
        confirm_checkout(&mut conn, new_id, "sub_new", None, NOW).expect("confirm");

        let old_row = verba_db::queries::subscriptions::get(&conn, old).expect("old row");
        assert_eq!(old_row.status, SubscriptionStatus::Expired);
        let new_row = verba_db::queries::subscriptions::get(&conn, new_id).expect("new row");
        assert_eq!(new_row.status, SubscriptionStatus::Active);
    }

    #[test]
    fn test_renewal_extends_grants() {
        let (mut conn, plan_id, course_ids) = setup();
        checkout(&mut conn, plan_id, &course_ids);

        let event = ProviderEvent::InvoicePaid {
            external_subscription_id: "sub_ext".into(),
            invoice_id: Some("in_1".into()),
            period_end: Some(NOW + 2 * BILLING_PERIOD_SECS),
        };
        let outcome = apply_event(&mut conn, &event, NOW + BILLING_PERIOD_SECS).expect("apply");
        assert_eq!(outcome, ReconcileOutcome::Applied);

        let grant = access::get(&conn, "u1", course_ids[0]).expect("get").expect("grant");
        assert_eq!(grant.end_date, Some(NOW + 2 * BILLING_PERIOD_SECS));
    }

    #[test]
    fn test_renewal_redelivery_does_not_extend_again() {
        let (mut conn, plan_id, course_ids) = setup();
        let sub_id = checkout(&mut conn, plan_id, &course_ids);

        // No period end in the payload, so a naive handler would extend
        // by a billing period on every delivery.
        let event = ProviderEvent::InvoicePaid {
            external_subscription_id: "sub_ext".into(),
            invoice_id: Some("in_1".into()),
            period_end: None,
        };
        let outcome = apply_event(&mut conn, &event, NOW + 100).expect("first delivery");
        assert_eq!(outcome, ReconcileOutcome::Applied);
        let end_after_first = verba_db::queries::subscriptions::get(&conn, sub_id)
            .expect("sub")
            .end_date;
        assert_eq!(end_after_first, Some(NOW + 2 * BILLING_PERIOD_SECS));

        let outcome = apply_event(&mut conn, &event, NOW + 200).expect("redelivery");
        assert_eq!(outcome, ReconcileOutcome::AlreadyApplied);
        let sub = verba_db::queries::subscriptions::get(&conn, sub_id).expect("sub");
        assert_eq!(sub.end_date, end_after_first, "redelivery must not extend the window");

        let grant = access::get(&conn, "u1", course_ids[0]).expect("get").expect("grant");
        assert_eq!(grant.end_date, end_after_first);

        // The next invoice is a genuinely new renewal.
        let next = ProviderEvent::InvoicePaid {
            external_subscription_id: "sub_ext".into(),
            invoice_id: Some("in_2".into()),
            period_end: None,
        };
        let outcome = apply_event(&mut conn, &next, NOW + 300).expect("next invoice");
        assert_eq!(outcome, ReconcileOutcome::Applied);
        let sub = verba_db::queries::subscriptions::get(&conn, sub_id).expect("sub");
        assert_eq!(sub.end_date, Some(NOW + 3 * BILLING_PERIOD_SECS));
    }

    #[test]
    fn test_out_of_order_renewal_is_skipped() {
        let (mut conn, _, _) = setup();
        let event = ProviderEvent::InvoicePaid {
            external_subscription_id: "sub_never_seen".into(),
            invoice_id: Some("in_9".into()),
            period_end: None,
        };
        let outcome = apply_event(&mut conn, &event, NOW).expect("apply");
        assert!(matches!(outcome, ReconcileOutcome::Skipped(_)));
    }

    #[test]
    fn test_payment_failed_changes_nothing() {
        let (mut conn, plan_id, course_ids) = setup();
        checkout(&mut conn, plan_id, &course_ids);

        let event = ProviderEvent::InvoicePaymentFailed {
            external_subscription_id: "sub_ext".into(),
        };
        let outcome = apply_event(&mut conn, &event, NOW + 100).expect("apply");
        assert_eq!(outcome, ReconcileOutcome::Logged);

        let grant = access::get(&conn, "u1", course_ids[0]).expect("get").expect("grant");
        assert_eq!(grant.status, GrantStatus::Active);
    }

    #[test]
    fn test_upstream_deletion_freezes_both_grants() {
        let (mut conn, plan_id, course_ids) = setup();
        let sub_id = checkout(&mut conn, plan_id, &course_ids);

        let period_end = NOW + BILLING_PERIOD_SECS;
        let event = ProviderEvent::SubscriptionDeleted {
            external_subscription_id: "sub_ext".into(),
            period_end: Some(period_end),
        };
        let outcome = apply_event(&mut conn, &event, NOW + 5).expect("apply");
        assert_eq!(outcome, ReconcileOutcome::Applied);

        for &course_id in &course_ids {
            let grant = access::get(&conn, "u1", course_id).expect("get").expect("grant");
            assert_eq!(grant.status, GrantStatus::Cancelled);
            assert_eq!(grant.end_date, Some(period_end), "access holds until period end");
        }
        let sub = verba_db::queries::subscriptions::get(&conn, sub_id).expect("sub");
        assert_eq!(sub.status, SubscriptionStatus::Cancelled);

        // Replaying the deletion is a no-op.
        let outcome = apply_event(&mut conn, &event, NOW + 10).expect("replay");
        assert_eq!(outcome, ReconcileOutcome::AlreadyApplied);
    }

    #[tokio::test]
    async fn test_user_cancel_applies_locally_even_when_upstream_fails() {
        let (mut conn, plan_id, course_ids) = setup();
        let sub_id = checkout(&mut conn, plan_id, &course_ids);

        let provider = FakeProvider { cancel_ok: false };
        let receipt = user_cancel(&mut conn, &provider, "u1", sub_id, NOW + 5)
            .await
            .expect("cancel");
        assert!(matches!(receipt.remote, RemoteCancelOutcome::Failed(_)));
        assert_eq!(receipt.end_date, NOW + BILLING_PERIOD_SECS);

        let sub = verba_db::queries::subscriptions::get(&conn, sub_id).expect("sub");
        assert_eq!(sub.status, SubscriptionStatus::Cancelled);
        let grant = access::get(&conn, "u1", course_ids[0]).expect("get").expect("grant");
        assert_eq!(grant.status, GrantStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_user_cancel_is_owner_only_and_single_shot() {
        let (mut conn, plan_id, course_ids) = setup();
        users::insert(&conn, "u2", "b@example.com", Role::User, None, None, 0).expect("user");
        let sub_id = checkout(&mut conn, plan_id, &course_ids);

        let provider = FakeProvider { cancel_ok: true };
        let err = user_cancel(&mut conn, &provider, "u2", sub_id, NOW).await.expect_err("owner");
        assert!(matches!(err, BillingError::NotOwner));

        user_cancel(&mut conn, &provider, "u1", sub_id, NOW).await.expect("cancel");
        let err = user_cancel(&mut conn, &provider, "u1", sub_id, NOW).await.expect_err("twice");
        assert!(matches!(err, BillingError::Conflict(_)));
    }
}
