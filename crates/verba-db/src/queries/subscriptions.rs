//! Subscription plan and instance query functions.

use rusqlite::{Connection, OptionalExtension};
use verba_types::subscription::{Plan, SubscriptionInstance, SubscriptionStatus};
use verba_types::{CourseId, PlanId, SubscriptionId};

use crate::{DbError, Result};

const SUB_COLUMNS: &str = "id, user_id, plan_id, start_date, end_date, status, \
                           external_subscription_id, last_invoice_id, slots_total, created_at";

fn map_sub(row: &rusqlite::Row<'_>) -> rusqlite::Result<SubscriptionInstance> {
    let status_raw: String = row.get(5)?;
    Ok(SubscriptionInstance {
        id: row.get(0)?,
        user_id: row.get(1)?,
        plan_id: row.get(2)?,
        start_date: row.get::<_, i64>(3)? as u64,
        end_date: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
        status: SubscriptionStatus::parse(&status_raw).unwrap_or(SubscriptionStatus::None),
        external_subscription_id: row.get(6)?,
        last_invoice_id: row.get(7)?,
        slots_total: row.get(8)?,
        created_at: row.get::<_, i64>(9)? as u64,
    })
}

fn map_plan(row: &rusqlite::Row<'_>) -> rusqlite::Result<Plan> {
    Ok(Plan {
        id: row.get(0)?,
        name: row.get(1)?,
        num_courses: row.get(2)?,
        price_monthly: row.get(3)?,
        currency: row.get(4)?,
        external_price_id: row.get(5)?,
        is_active: row.get::<_, i64>(6)? != 0,
    })
}

/// Insert a plan, returning its id.
pub fn insert_plan(
    conn: &Connection,
    name: &str,
    num_courses: u32,
    price_monthly: i64,
    currency: &str,
    external_price_id: Option<&str>,
) -> Result<PlanId> {
    conn.execute(
        "INSERT INTO subscription_plans (name, num_courses, price_monthly, currency, external_price_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![name, num_courses, price_monthly, currency, external_price_id],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Fetch a plan by id.
pub fn get_plan(conn: &Connection, plan_id: PlanId) -> Result<Plan> {
    conn.query_row(
        "SELECT id, name, num_courses, price_monthly, currency, external_price_id, is_active
         FROM subscription_plans WHERE id = ?1",
        [plan_id],
        map_plan,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("plan {plan_id}")),
        other => DbError::Sqlite(other),
    })
}

/// List plans offered to users.
pub fn list_active_plans(conn: &Connection) -> Result<Vec<Plan>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, num_courses, price_monthly, currency, external_price_id, is_active
         FROM subscription_plans WHERE is_active = 1 ORDER BY price_monthly",
    )?;
    let rows = stmt.query_map([], map_plan)?;
    let mut plans = Vec::new();
    for row in rows {
        plans.push(row?);
    }
    Ok(plans)
}

/// Insert a subscription instance, returning its id.
pub fn insert(
    conn: &Connection,
    user_id: &str,
    plan_id: PlanId,
    start_date: u64,
    status: SubscriptionStatus,
    slots_total: u32,
    created_at: u64,
) -> Result<SubscriptionId> {
    conn.execute(
        "INSERT INTO subscriptions (user_id, plan_id, start_date, status, slots_total, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            user_id,
            plan_id,
            start_date as i64,
            status.as_str(),
            slots_total,
            created_at as i64,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Fetch a subscription instance by id.
pub fn get(conn: &Connection, id: SubscriptionId) -> Result<SubscriptionInstance> {
    conn.query_row(
        &format!("SELECT {SUB_COLUMNS} FROM subscriptions WHERE id = ?1"),
        [id],
        map_sub,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("subscription {id}")),
        other => DbError::Sqlite(other),
    })
}

/// List a user's subscription instances, newest first.
pub fn list_for_user(conn: &Connection, user_id: &str) -> Result<Vec<SubscriptionInstance>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SUB_COLUMNS} FROM subscriptions WHERE user_id = ?1 ORDER BY created_at DESC, id DESC"
    ))?;
    let rows = stmt.query_map([user_id], map_sub)?;
    let mut subs = Vec::new();
    for row in rows {
        subs.push(row?);
    }
    Ok(subs)
}

/// Find the instance carrying a provider subscription id.
pub fn find_by_external_id(
    conn: &Connection,
    external_subscription_id: &str,
) -> Result<Option<SubscriptionInstance>> {
    conn.query_row(
        &format!("SELECT {SUB_COLUMNS} FROM subscriptions WHERE external_subscription_id = ?1"),
        [external_subscription_id],
        map_sub,
    )
    .optional()
    .map_err(DbError::Sqlite)
}

/// Update an instance's status.
pub fn set_status(conn: &Connection, id: SubscriptionId, status: SubscriptionStatus) -> Result<()> {
    let updated = conn.execute(
        "UPDATE subscriptions SET status = ?1 WHERE id = ?2",
        rusqlite::params![status.as_str(), id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("subscription {id}")));
    }
    Ok(())
}

/// Activate an instance and bind the provider subscription id to it.
pub fn activate(conn: &Connection, id: SubscriptionId, external_subscription_id: &str) -> Result<()> {
    let updated = conn.execute(
        "UPDATE subscriptions SET status = 'active', external_subscription_id = ?1 WHERE id = ?2",
        rusqlite::params![external_subscription_id, id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("subscription {id}")));
    }
    Ok(())
}

/// Extend the paid window after a renewal invoice, remembering which
/// invoice produced it so redeliveries can be detected.
pub fn record_renewal(
    conn: &Connection,
    id: SubscriptionId,
    end_date: u64,
    invoice_id: Option<&str>,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE subscriptions SET end_date = ?1,
             last_invoice_id = COALESCE(?2, last_invoice_id)
         WHERE id = ?3",
        rusqlite::params![end_date as i64, invoice_id, id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("subscription {id}")));
    }
    Ok(())
}

/// Close an instance with a frozen end date.
pub fn close(
    conn: &Connection,
    id: SubscriptionId,
    status: SubscriptionStatus,
    end_date: u64,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE subscriptions SET status = ?1, end_date = ?2 WHERE id = ?3",
        rusqlite::params![status.as_str(), end_date as i64, id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("subscription {id}")));
    }
    Ok(())
}

/// Expire every other active instance for the same (user, plan). The
/// single-active-instance invariant is restored by the caller invoking
/// this whenever a new instance goes active. Returns rows touched.
pub fn expire_active_siblings(
    conn: &Connection,
    user_id: &str,
    plan_id: PlanId,
    keep_id: SubscriptionId,
    end_date: u64,
) -> Result<usize> {
    let updated = conn.execute(
        "UPDATE subscriptions SET status = 'expired', end_date = ?1
         WHERE user_id = ?2 AND plan_id = ?3 AND id != ?4 AND status = 'active'",
        rusqlite::params![end_date as i64, user_id, plan_id, keep_id],
    )?;
    Ok(updated)
}

/// Detach the provider subscription id from every other instance that
/// still carries it. The id must resolve to exactly one local row.
pub fn clear_external_id_from_siblings(
    conn: &Connection,
    external_subscription_id: &str,
    keep_id: SubscriptionId,
) -> Result<usize> {
    let updated = conn.execute(
        "UPDATE subscriptions SET external_subscription_id = NULL
         WHERE external_subscription_id = ?1 AND id != ?2",
        rusqlite::params![external_subscription_id, keep_id],
    )?;
    Ok(updated)
}

/// Latest end_date across a user's prior instances of a plan, for
/// chaining a successor's start date.
pub fn max_end_date_for_plan(conn: &Connection, user_id: &str, plan_id: PlanId) -> Result<Option<u64>> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(end_date) FROM subscriptions WHERE user_id = ?1 AND plan_id = ?2",
        rusqlite::params![user_id, plan_id],
        |row| row.get(0),
    )?;
    Ok(max.map(|v| v as u64))
}

/// Whether the user already has an active instance of the plan. Pending
/// rows do not count; an abandoned checkout must never lock the plan.
pub fn has_active_instance(conn: &Connection, user_id: &str, plan_id: PlanId) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM subscriptions
         WHERE user_id = ?1 AND plan_id = ?2 AND status = 'active'",
        rusqlite::params![user_id, plan_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Expire leftover pending rows for a (user, plan) before a fresh
/// checkout attempt. Returns rows touched.
pub fn supersede_pending(conn: &Connection, user_id: &str, plan_id: PlanId) -> Result<usize> {
    let updated = conn.execute(
        "UPDATE subscriptions SET status = 'expired'
         WHERE user_id = ?1 AND plan_id = ?2 AND status = 'pending'",
        rusqlite::params![user_id, plan_id],
    )?;
    Ok(updated)
}

/// Attach the chosen courses to an instance.
pub fn attach_courses(conn: &Connection, id: SubscriptionId, course_ids: &[CourseId]) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO subscription_courses (subscription_id, course_id) VALUES (?1, ?2)",
    )?;
    for course_id in course_ids {
        stmt.execute(rusqlite::params![id, course_id])?;
    }
    Ok(())
}

/// Courses attached to an instance.
pub fn courses_for(conn: &Connection, id: SubscriptionId) -> Result<Vec<CourseId>> {
    let mut stmt = conn.prepare(
        "SELECT course_id FROM subscription_courses WHERE subscription_id = ?1 ORDER BY course_id",
    )?;
    let rows = stmt.query_map([id], |row| row.get(0))?;
    let mut ids = Vec::new();
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}
