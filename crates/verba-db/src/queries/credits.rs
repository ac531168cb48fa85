//! Credit ledger query functions.
//!
//! The ledger is append-only; every row snapshots the balance after it.

use rusqlite::{Connection, OptionalExtension};
use verba_types::referral::{CreditEntry, CreditEntryType};

use crate::{DbError, Result};

/// Current balance: the balance_after of the newest row, or zero.
pub fn balance(conn: &Connection, user_id: &str) -> Result<i64> {
    let latest: Option<i64> = conn
        .query_row(
            "SELECT balance_after FROM credit_ledger
             WHERE user_id = ?1 ORDER BY id DESC LIMIT 1",
            [user_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(DbError::Sqlite)?;
    Ok(latest.unwrap_or(0))
}

/// Append an earned entry. Returns the new balance.
pub fn append_earned(
    conn: &Connection,
    user_id: &str,
    amount: i64,
    description: &str,
    reference_id: Option<i64>,
    created_at: u64,
) -> Result<i64> {
    debug_assert!(amount > 0);
    let new_balance = balance(conn, user_id)? + amount;
    append(
        conn,
        user_id,
        CreditEntryType::Earned,
        amount,
        new_balance,
        description,
        reference_id,
        created_at,
    )?;
    Ok(new_balance)
}

/// Append a spent entry. Fails with `Constraint` when the balance would
/// go negative. Returns the new balance.
pub fn append_spent(
    conn: &Connection,
    user_id: &str,
    amount: i64,
    description: &str,
    reference_id: Option<i64>,
    created_at: u64,
) -> Result<i64> {
    debug_assert!(amount > 0);
    let current = balance(conn, user_id)?;
    if amount > current {
        return Err(DbError::Constraint(format!(
            "insufficient credits: balance {current}, requested {amount}"
        )));
    }
    let new_balance = current - amount;
    append(
        conn,
        user_id,
        CreditEntryType::Spent,
        -amount,
        new_balance,
        description,
        reference_id,
        created_at,
    )?;
    Ok(new_balance)
}

#[allow(clippy::too_many_arguments)]
fn append(
    conn: &Connection,
    user_id: &str,
    entry_type: CreditEntryType,
    amount: i64,
    balance_after: i64,
    description: &str,
    reference_id: Option<i64>,
    created_at: u64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO credit_ledger
           (user_id, entry_type, amount, balance_after, description, reference_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            user_id,
            entry_type.as_str(),
            amount,
            balance_after,
            description,
            reference_id,
            created_at as i64,
        ],
    )?;
    Ok(())
}

/// Recent ledger entries for a user, newest first.
pub fn recent_entries(conn: &Connection, user_id: &str, limit: u32) -> Result<Vec<CreditEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, entry_type, amount, balance_after, description, reference_id, created_at
         FROM credit_ledger WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(rusqlite::params![user_id, limit], |row| {
        let type_raw: String = row.get(2)?;
        Ok(CreditEntry {
            id: row.get(0)?,
            user_id: row.get(1)?,
            entry_type: CreditEntryType::parse(&type_raw).unwrap_or(CreditEntryType::Earned),
            amount: row.get(3)?,
            balance_after: row.get(4)?,
            description: row.get(5)?,
            reference_id: row.get(6)?,
            created_at: row.get::<_, i64>(7)? as u64,
        })
    })?;
    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use verba_types::access::Role;

    fn test_db() -> Connection {
        let conn = crate::open_memory().expect("open test db");
        crate::queries::users::insert(&conn, "u1", "a@example.com", Role::User, None, None, 0)
            .expect("user");
        conn
    }

    #[test]
    fn test_balance_starts_at_zero() {
        let conn = test_db();
        assert_eq!(balance(&conn, "u1").expect("balance"), 0);
    }

    #[test]
    fn test_earn_and_spend() {
        let conn = test_db();
        assert_eq!(
            append_earned(&conn, "u1", 500, "referral reward", Some(1), 10).expect("earn"),
            500
        );
        assert_eq!(
            append_spent(&conn, "u1", 200, "course purchase", None, 20).expect("spend"),
            300
        );
        assert_eq!(balance(&conn, "u1").expect("balance"), 300);
    }

    #[test]
    fn test_overdraft_rejected() {
        let conn = test_db();
        append_earned(&conn, "u1", 100, "referral reward", None, 10).expect("earn");
        let err = append_spent(&conn, "u1", 200, "course purchase", None, 20).expect_err("over");
        assert!(matches!(err, DbError::Constraint(_)));
        assert_eq!(balance(&conn, "u1").expect("balance"), 100);
    }

    #[test]
    fn test_recent_entries_newest_first() {
        let conn = test_db();
        append_earned(&conn, "u1", 100, "first", None, 10).expect("earn");
        append_earned(&conn, "u1", 50, "second", None, 20).expect("earn");

        let entries = recent_entries(&conn, "u1", 10).expect("entries");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].description, "second");
        assert_eq!(entries[0].balance_after, 150);
        assert_eq!(entries[1].amount, 100);
    }
}
