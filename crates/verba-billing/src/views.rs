//! Merged subscription listing.

use std::collections::HashMap;

use rusqlite::Connection;
use verba_types::subscription::{SubscriptionStatus, SubscriptionView};
use verba_types::PlanId;

use verba_db::queries::{access, subscriptions};

use crate::Result;

/// List a user's subscriptions merged with plan metadata, one entry per
/// plan, preferring a live instance over closed ones and newer over
/// older. End date and provider id are taken from the grant rows when
/// the instance is bound to one, since renewals land there first.
pub fn list_subscriptions(conn: &Connection, user_id: &str) -> Result<Vec<SubscriptionView>> {
    let instances = subscriptions::list_for_user(conn, user_id)?;

    let mut per_plan: HashMap<PlanId, SubscriptionView> = HashMap::new();
    let mut order: Vec<PlanId> = Vec::new();

    for instance in instances {
        let plan = subscriptions::get_plan(conn, instance.plan_id)?;

        let (end_date, external_id) = match instance.external_subscription_id.as_deref() {
            Some(external_id) => {
                let grants = access::list_by_external_subscription(conn, external_id)?;
                let end = grants.iter().filter_map(|g| g.end_date).max();
                (
                    end.or(instance.end_date),
                    Some(external_id.to_string()),
                )
            }
            None => (instance.end_date, None),
        };

        let view = SubscriptionView {
            id: instance.id,
            plan_id: plan.id,
            plan_name: plan.name,
            num_courses: plan.num_courses,
            price_monthly: plan.price_monthly,
            currency: plan.currency,
            status: instance.status,
            start_date: instance.start_date,
            end_date,
            external_subscription_id: external_id,
            courses: subscriptions::courses_for(conn, instance.id)?,
        };

        match per_plan.get(&instance.plan_id) {
            None => {
                order.push(instance.plan_id);
                per_plan.insert(instance.plan_id, view);
            }
            // Instances arrive newest-first; only a live instance may
            // displace what is already there, and only if that one is
            // closed.
            Some(existing) if existing.status.is_terminal() && !view.status.is_terminal() => {
                per_plan.insert(instance.plan_id, view);
            }
            Some(_) => {}
        }
    }

    Ok(order
        .into_iter()
        .filter_map(|plan_id| per_plan.remove(&plan_id))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use verba_db::queries::users;
    use verba_types::access::Role;

    fn setup() -> (Connection, PlanId) {
        let conn = verba_db::open_memory().expect("open test db");
        users::insert(&conn, "u1", "a@example.com", Role::User, None, None, 0).expect("user");
        let plan_id = subscriptions::insert_plan(&conn, "Solo", 1, 990, "EUR", Some("price_solo"))
            .expect("plan");
        (conn, plan_id)
    }

    #[test]
    fn test_dedupe_prefers_live_instance() {
        let (conn, plan_id) = setup();
        let old = subscriptions::insert(&conn, "u1", plan_id, 0, SubscriptionStatus::Active, 1, 0)
            .expect("old");
        subscriptions::close(&conn, old, SubscriptionStatus::Expired, 100).expect("close");
        let live = subscriptions::insert(&conn, "u1", plan_id, 200, SubscriptionStatus::Active, 1, 50)
            .expect("live");

        let views = list_subscriptions(&conn, "u1").expect("list");
        assert_eq!(views.len(), 1, "one entry per plan");
        assert_eq!(views[0].id, live);
        assert_eq!(views[0].plan_name, "Solo");
    }

    #[test]
    fn test_closed_only_plan_still_listed() {
        let (conn, plan_id) = setup();
        let old = subscriptions::insert(&conn, "u1", plan_id, 0, SubscriptionStatus::Active, 1, 0)
            .expect("old");
        subscriptions::close(&conn, old, SubscriptionStatus::Cancelled, 100).expect("close");

        let views = list_subscriptions(&conn, "u1").expect("list");
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].status, SubscriptionStatus::Cancelled);
        assert_eq!(views[0].end_date, Some(100));
    }

    #[test]
    fn test_end_date_derived_from_grants() {
        let (conn, plan_id) = setup();
        let course_id = verba_db::queries::courses::insert(
            &conn,
            "Spanish A1",
            verba_types::course::CourseStatus::Published,
            Some(990),
            None,
            0,
        )
        .expect("course");
        let id = subscriptions::insert(&conn, "u1", plan_id, 0, SubscriptionStatus::Pending, 1, 0)
            .expect("sub");
        subscriptions::activate(&conn, id, "sub_ext").expect("activate");
        access::upsert(
            &conn,
            &access::GrantUpsert {
                user_id: "u1",
                course_id,
                start_date: 0,
                end_date: Some(9999),
                chapter_limit: None,
                external_subscription_id: Some("sub_ext"),
                external_customer_id: None,
                granted_at: 0,
            },
        )
        .expect("grant");

        let views = list_subscriptions(&conn, "u1").expect("list");
        assert_eq!(views[0].end_date, Some(9999), "renewals land on the grant rows");
        assert_eq!(views[0].external_subscription_id.as_deref(), Some("sub_ext"));
    }
}
