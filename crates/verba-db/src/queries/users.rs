//! User and session query functions.

use rusqlite::{Connection, OptionalExtension};
use verba_types::access::{Principal, Role};
use verba_types::UserId;

use crate::{DbError, Result};

/// A raw user row.
#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: UserId,
    pub email: String,
    pub role: Role,
    pub referral_code: Option<String>,
    pub referred_by: Option<UserId>,
    pub trial_expires_at: Option<u64>,
    pub onboarding_completed: bool,
    pub email_verified: bool,
    pub created_at: u64,
}

fn parse_role(s: &str) -> Role {
    match s {
        "admin" => Role::Admin,
        "editor" => Role::Editor,
        _ => Role::User,
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::Admin => "admin",
        Role::Editor => "editor",
        Role::User => "user",
    }
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        role: parse_role(&row.get::<_, String>(2)?),
        referral_code: row.get(3)?,
        referred_by: row.get(4)?,
        trial_expires_at: row.get::<_, Option<i64>>(5)?.map(|v| v as u64),
        onboarding_completed: row.get::<_, i64>(6)? != 0,
        email_verified: row.get::<_, i64>(7)? != 0,
        created_at: row.get::<_, i64>(8)? as u64,
    })
}

const USER_COLUMNS: &str = "id, email, role, referral_code, referred_by, trial_expires_at, \
                            onboarding_completed, email_verified, created_at";

/// Insert a new user.
pub fn insert(
    conn: &Connection,
    id: &str,
    email: &str,
    role: Role,
    referred_by: Option<&str>,
    trial_expires_at: Option<u64>,
    created_at: u64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, email, role, referred_by, trial_expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            id,
            email,
            role_str(role),
            referred_by,
            trial_expires_at.map(|v| v as i64),
            created_at as i64,
        ],
    )?;
    Ok(())
}

/// Fetch a user by id.
pub fn get(conn: &Connection, user_id: &str) -> Result<UserRow> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        [user_id],
        map_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("user {user_id}")),
        other => DbError::Sqlite(other),
    })
}

/// Fetch a user by referral code.
pub fn get_by_referral_code(conn: &Connection, code: &str) -> Result<Option<UserRow>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE referral_code = ?1"),
        [code],
        map_row,
    )
    .optional()
    .map_err(DbError::Sqlite)
}

/// Attach a referral code to a user (lazy generation).
pub fn set_referral_code(conn: &Connection, user_id: &str, code: &str) -> Result<()> {
    let updated = conn.execute(
        "UPDATE users SET referral_code = ?1 WHERE id = ?2",
        rusqlite::params![code, user_id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("user {user_id}")));
    }
    Ok(())
}

/// Mark onboarding as completed.
pub fn set_onboarding_completed(conn: &Connection, user_id: &str) -> Result<()> {
    let updated = conn.execute(
        "UPDATE users SET onboarding_completed = 1 WHERE id = ?1",
        [user_id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("user {user_id}")));
    }
    Ok(())
}

/// Mark the email as verified.
pub fn set_email_verified(conn: &Connection, user_id: &str) -> Result<()> {
    let updated = conn.execute(
        "UPDATE users SET email_verified = 1 WHERE id = ?1",
        [user_id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("user {user_id}")));
    }
    Ok(())
}

/// Insert a session token for a user.
pub fn insert_session(conn: &Connection, token: &str, user_id: &str, created_at: u64) -> Result<()> {
    conn.execute(
        "INSERT INTO sessions (token, user_id, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![token, user_id, created_at as i64],
    )?;
    Ok(())
}

/// Resolve a session token to the authenticated principal.
pub fn principal_for_session(conn: &Connection, token: &str) -> Result<Option<Principal>> {
    conn.query_row(
        "SELECT u.id, u.role FROM sessions s JOIN users u ON u.id = s.user_id WHERE s.token = ?1",
        [token],
        |row| {
            Ok(Principal {
                user_id: row.get(0)?,
                role: parse_role(&row.get::<_, String>(1)?),
            })
        },
    )
    .optional()
    .map_err(DbError::Sqlite)
}
