//! Entitlement grant query functions.
//!
//! One row per (user, course). Lifecycle changes rewrite the row in
//! place rather than appending history.

use rusqlite::{Connection, OptionalExtension};
use verba_types::access::{EntitlementGrant, GrantStatus};
use verba_types::CourseId;

use crate::{DbError, Result};

const GRANT_COLUMNS: &str = "id, user_id, course_id, start_date, end_date, chapter_limit, \
                             status, external_subscription_id, external_customer_id, granted_at";

fn map_grant(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntitlementGrant> {
    let status_raw: String = row.get(6)?;
    Ok(EntitlementGrant {
        id: row.get(0)?,
        user_id: row.get(1)?,
        course_id: row.get(2)?,
        start_date: row.get::<_, i64>(3)? as u64,
        end_date: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
        chapter_limit: row.get(5)?,
        status: GrantStatus::parse(&status_raw).unwrap_or(GrantStatus::Active),
        external_subscription_id: row.get(7)?,
        external_customer_id: row.get(8)?,
        granted_at: row.get::<_, i64>(9)? as u64,
    })
}

/// Fields for inserting or replacing a grant.
#[derive(Debug, Clone)]
pub struct GrantUpsert<'a> {
    pub user_id: &'a str,
    pub course_id: CourseId,
    pub start_date: u64,
    pub end_date: Option<u64>,
    pub chapter_limit: Option<u32>,
    pub external_subscription_id: Option<&'a str>,
    pub external_customer_id: Option<&'a str>,
    pub granted_at: u64,
}

/// Insert a grant, or rewrite the existing row for the same
/// (user, course). The rewrite reactivates the row.
pub fn upsert(conn: &Connection, grant: &GrantUpsert<'_>) -> Result<i64> {
    conn.execute(
        "INSERT INTO course_access
           (user_id, course_id, start_date, end_date, chapter_limit, status,
            external_subscription_id, external_customer_id, granted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'active', ?6, ?7, ?8)
         ON CONFLICT(user_id, course_id) DO UPDATE SET
           start_date = excluded.start_date,
           end_date = excluded.end_date,
           chapter_limit = excluded.chapter_limit,
           status = 'active',
           external_subscription_id = excluded.external_subscription_id,
           external_customer_id = excluded.external_customer_id,
           granted_at = excluded.granted_at",
        rusqlite::params![
            grant.user_id,
            grant.course_id,
            grant.start_date as i64,
            grant.end_date.map(|v| v as i64),
            grant.chapter_limit,
            grant.external_subscription_id,
            grant.external_customer_id,
            grant.granted_at as i64,
        ],
    )?;
    conn.query_row(
        "SELECT id FROM course_access WHERE user_id = ?1 AND course_id = ?2",
        rusqlite::params![grant.user_id, grant.course_id],
        |row| row.get(0),
    )
    .map_err(DbError::Sqlite)
}

/// Fetch the grant for a (user, course) pair, if one exists.
pub fn get(conn: &Connection, user_id: &str, course_id: CourseId) -> Result<Option<EntitlementGrant>> {
    conn.query_row(
        &format!("SELECT {GRANT_COLUMNS} FROM course_access WHERE user_id = ?1 AND course_id = ?2"),
        rusqlite::params![user_id, course_id],
        map_grant,
    )
    .optional()
    .map_err(DbError::Sqlite)
}

/// List all grants for a user.
pub fn list_for_user(conn: &Connection, user_id: &str) -> Result<Vec<EntitlementGrant>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {GRANT_COLUMNS} FROM course_access WHERE user_id = ?1 ORDER BY course_id"
    ))?;
    let rows = stmt.query_map([user_id], map_grant)?;
    let mut grants = Vec::new();
    for row in rows {
        grants.push(row?);
    }
    Ok(grants)
}

/// List the grants fanned out from one provider subscription.
pub fn list_by_external_subscription(
    conn: &Connection,
    external_subscription_id: &str,
) -> Result<Vec<EntitlementGrant>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {GRANT_COLUMNS} FROM course_access WHERE external_subscription_id = ?1"
    ))?;
    let rows = stmt.query_map([external_subscription_id], map_grant)?;
    let mut grants = Vec::new();
    for row in rows {
        grants.push(row?);
    }
    Ok(grants)
}

/// Push every grant tied to a provider subscription out to a new period
/// end. Returns the number of rows touched.
pub fn extend_by_external_subscription(
    conn: &Connection,
    external_subscription_id: &str,
    new_end_date: u64,
) -> Result<usize> {
    let updated = conn.execute(
        "UPDATE course_access SET end_date = ?1
         WHERE external_subscription_id = ?2 AND status = 'active'",
        rusqlite::params![new_end_date as i64, external_subscription_id],
    )?;
    Ok(updated)
}

/// Mark every grant tied to a provider subscription cancelled, freezing
/// the end date where one is not already set. Returns rows touched.
pub fn cancel_by_external_subscription(
    conn: &Connection,
    external_subscription_id: &str,
    frozen_end_date: u64,
) -> Result<usize> {
    let updated = conn.execute(
        "UPDATE course_access
         SET status = 'cancelled', end_date = COALESCE(end_date, ?1)
         WHERE external_subscription_id = ?2 AND status = 'active'",
        rusqlite::params![frozen_end_date as i64, external_subscription_id],
    )?;
    Ok(updated)
}

/// Adjust a grant's window and cap in place (admin edit).
pub fn update_window(
    conn: &Connection,
    grant_id: i64,
    start_date: u64,
    end_date: Option<u64>,
    chapter_limit: Option<u32>,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE course_access SET start_date = ?1, end_date = ?2, chapter_limit = ?3
         WHERE id = ?4",
        rusqlite::params![
            start_date as i64,
            end_date.map(|v| v as i64),
            chapter_limit,
            grant_id,
        ],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("grant {grant_id}")));
    }
    Ok(())
}

/// Remove a grant entirely (admin revoke).
pub fn revoke(conn: &Connection, grant_id: i64) -> Result<()> {
    let deleted = conn.execute("DELETE FROM course_access WHERE id = ?1", [grant_id])?;
    if deleted == 0 {
        return Err(DbError::NotFound(format!("grant {grant_id}")));
    }
    Ok(())
}

/// Latest end_date across a user's grants, if any grant is bounded.
pub fn max_end_date(conn: &Connection, user_id: &str) -> Result<Option<u64>> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(end_date) FROM course_access WHERE user_id = ?1",
        [user_id],
        |row| row.get(0),
    )?;
    Ok(max.map(|v| v as u64))
}

/// Whether the user holds a grant that is not backed by a provider
/// subscription (i.e. a trial or reward course selection).
pub fn has_unbacked_grant(conn: &Connection, user_id: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM course_access
         WHERE user_id = ?1 AND external_subscription_id IS NULL",
        [user_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
