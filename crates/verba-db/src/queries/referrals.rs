//! Referral ledger, reward tier, and reward query functions.

use rusqlite::{Connection, OptionalExtension};
use verba_types::referral::{
    ReferralEventType, Reward, RewardStatus, RewardTier, RewardType,
};
use verba_types::{CourseId, RewardId, TierId};

use crate::{DbError, Result};

/// Record a referral event. Returns false when the (invited user, kind)
/// pair was already recorded; the ledger is append-once per pair.
pub fn insert_event(
    conn: &Connection,
    referrer_user_id: &str,
    invited_user_id: &str,
    event_type: ReferralEventType,
    created_at: u64,
) -> Result<bool> {
    let result = conn.execute(
        "INSERT INTO referral_events (referrer_user_id, invited_user_id, event_type, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            referrer_user_id,
            invited_user_id,
            event_type.as_str(),
            created_at as i64,
        ],
    );
    match result {
        Ok(_) => Ok(true),
        Err(e) => {
            let err = DbError::Sqlite(e);
            if err.is_constraint_violation() {
                Ok(false)
            } else {
                Err(err)
            }
        }
    }
}

/// Count a referrer's events of one kind.
pub fn count_events(
    conn: &Connection,
    referrer_user_id: &str,
    event_type: ReferralEventType,
) -> Result<u32> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM referral_events WHERE referrer_user_id = ?1 AND event_type = ?2",
        rusqlite::params![referrer_user_id, event_type.as_str()],
        |row| row.get(0),
    )?;
    Ok(count as u32)
}

fn map_tier(row: &rusqlite::Row<'_>) -> rusqlite::Result<RewardTier> {
    let type_raw: String = row.get(2)?;
    Ok(RewardTier {
        id: row.get(0)?,
        required_invites: row.get(1)?,
        reward_type: RewardType::parse(&type_raw).unwrap_or(RewardType::Credits),
        reward_value: row.get(3)?,
        chapter_limit: row.get(4)?,
        is_active: row.get::<_, i64>(5)? != 0,
        display_order: row.get(6)?,
    })
}

const TIER_COLUMNS: &str =
    "id, required_invites, reward_type, reward_value, chapter_limit, is_active, display_order";

/// Insert a reward tier, returning its id. Fails on a duplicate
/// invite threshold.
pub fn insert_tier(
    conn: &Connection,
    required_invites: u32,
    reward_type: RewardType,
    reward_value: u32,
    chapter_limit: Option<u32>,
    display_order: u32,
) -> Result<TierId> {
    conn.execute(
        "INSERT INTO reward_tiers (required_invites, reward_type, reward_value, chapter_limit, display_order)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            required_invites,
            reward_type.as_str(),
            reward_value,
            chapter_limit,
            display_order,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Fetch a tier by id.
pub fn get_tier(conn: &Connection, tier_id: TierId) -> Result<RewardTier> {
    conn.query_row(
        &format!("SELECT {TIER_COLUMNS} FROM reward_tiers WHERE id = ?1"),
        [tier_id],
        map_tier,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("reward tier {tier_id}")),
        other => DbError::Sqlite(other),
    })
}

/// Update a tier in place.
pub fn update_tier(conn: &Connection, tier: &RewardTier) -> Result<()> {
    let updated = conn.execute(
        "UPDATE reward_tiers
         SET required_invites = ?1, reward_type = ?2, reward_value = ?3,
             chapter_limit = ?4, is_active = ?5, display_order = ?6
         WHERE id = ?7",
        rusqlite::params![
            tier.required_invites,
            tier.reward_type.as_str(),
            tier.reward_value,
            tier.chapter_limit,
            tier.is_active as i64,
            tier.display_order,
            tier.id,
        ],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("reward tier {}", tier.id)));
    }
    Ok(())
}

/// Deactivate a tier. Earned rewards keep their snapshot of its terms.
pub fn deactivate_tier(conn: &Connection, tier_id: TierId) -> Result<()> {
    let updated = conn.execute(
        "UPDATE reward_tiers SET is_active = 0 WHERE id = ?1",
        [tier_id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("reward tier {tier_id}")));
    }
    Ok(())
}

/// List active tiers, ladder order.
pub fn list_active_tiers(conn: &Connection) -> Result<Vec<RewardTier>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TIER_COLUMNS} FROM reward_tiers WHERE is_active = 1
         ORDER BY required_invites"
    ))?;
    let rows = stmt.query_map([], map_tier)?;
    let mut tiers = Vec::new();
    for row in rows {
        tiers.push(row?);
    }
    Ok(tiers)
}

/// List every tier regardless of state, display order.
pub fn list_all_tiers(conn: &Connection) -> Result<Vec<RewardTier>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TIER_COLUMNS} FROM reward_tiers ORDER BY display_order, required_invites"
    ))?;
    let rows = stmt.query_map([], map_tier)?;
    let mut tiers = Vec::new();
    for row in rows {
        tiers.push(row?);
    }
    Ok(tiers)
}

/// Active tiers the user has reached but holds no reward for yet.
pub fn eligible_tiers(conn: &Connection, user_id: &str, invite_count: u32) -> Result<Vec<RewardTier>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TIER_COLUMNS} FROM reward_tiers t
         WHERE t.is_active = 1 AND t.required_invites <= ?1
           AND NOT EXISTS (SELECT 1 FROM rewards r WHERE r.user_id = ?2 AND r.tier_id = t.id)
         ORDER BY t.required_invites"
    ))?;
    let rows = stmt.query_map(rusqlite::params![invite_count, user_id], map_tier)?;
    let mut tiers = Vec::new();
    for row in rows {
        tiers.push(row?);
    }
    Ok(tiers)
}

/// Smallest active threshold above the invite count, for the
/// "N invites until next reward" stat.
pub fn next_threshold(conn: &Connection, invite_count: u32) -> Result<Option<u32>> {
    conn.query_row(
        "SELECT MIN(required_invites) FROM reward_tiers
         WHERE is_active = 1 AND required_invites > ?1",
        [invite_count],
        |row| row.get(0),
    )
    .map_err(DbError::Sqlite)
}

const REWARD_COLUMNS: &str = "id, user_id, tier_id, reward_type, reward_value, chapter_limit, \
                              status, invites_at_grant, course_id, created_at, claimed_at";

fn map_reward(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reward> {
    let type_raw: String = row.get(3)?;
    let status_raw: String = row.get(6)?;
    Ok(Reward {
        id: row.get(0)?,
        user_id: row.get(1)?,
        tier_id: row.get(2)?,
        reward_type: RewardType::parse(&type_raw).unwrap_or(RewardType::Credits),
        reward_value: row.get(4)?,
        chapter_limit: row.get(5)?,
        status: RewardStatus::parse(&status_raw).unwrap_or(RewardStatus::Pending),
        invites_at_grant: row.get(7)?,
        course_id: row.get(8)?,
        created_at: row.get::<_, i64>(9)? as u64,
        claimed_at: row.get::<_, Option<i64>>(10)?.map(|v| v as u64),
    })
}

/// Materialize a reward from a tier snapshot. Returns None when the
/// (user, tier) reward already exists.
pub fn insert_reward(
    conn: &Connection,
    user_id: &str,
    tier: &RewardTier,
    invites_at_grant: u32,
    created_at: u64,
) -> Result<Option<RewardId>> {
    let result = conn.execute(
        "INSERT INTO rewards
           (user_id, tier_id, reward_type, reward_value, chapter_limit, invites_at_grant, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            user_id,
            tier.id,
            tier.reward_type.as_str(),
            tier.reward_value,
            tier.chapter_limit,
            invites_at_grant,
            created_at as i64,
        ],
    );
    match result {
        Ok(_) => Ok(Some(conn.last_insert_rowid())),
        Err(e) => {
            let err = DbError::Sqlite(e);
            if err.is_constraint_violation() {
                Ok(None)
            } else {
                Err(err)
            }
        }
    }
}

/// Fetch a reward by id.
pub fn get_reward(conn: &Connection, reward_id: RewardId) -> Result<Reward> {
    conn.query_row(
        &format!("SELECT {REWARD_COLUMNS} FROM rewards WHERE id = ?1"),
        [reward_id],
        map_reward,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("reward {reward_id}")),
        other => DbError::Sqlite(other),
    })
}

/// Fetch a user's reward for a specific tier, if any.
pub fn reward_for_tier(conn: &Connection, user_id: &str, tier_id: TierId) -> Result<Option<Reward>> {
    conn.query_row(
        &format!("SELECT {REWARD_COLUMNS} FROM rewards WHERE user_id = ?1 AND tier_id = ?2"),
        rusqlite::params![user_id, tier_id],
        map_reward,
    )
    .optional()
    .map_err(DbError::Sqlite)
}

/// List a user's rewards, newest first.
pub fn list_rewards(conn: &Connection, user_id: &str) -> Result<Vec<Reward>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {REWARD_COLUMNS} FROM rewards WHERE user_id = ?1 ORDER BY created_at DESC, id DESC"
    ))?;
    let rows = stmt.query_map([user_id], map_reward)?;
    let mut rewards = Vec::new();
    for row in rows {
        rewards.push(row?);
    }
    Ok(rewards)
}

/// Mark a reward granted, recording the claim time and any course
/// selection. Only touches a pending reward; returns false if the row
/// was already granted.
pub fn mark_granted(
    conn: &Connection,
    reward_id: RewardId,
    course_id: Option<CourseId>,
    claimed_at: u64,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE rewards SET status = 'granted', course_id = ?1, claimed_at = ?2
         WHERE id = ?3 AND status = 'pending'",
        rusqlite::params![course_id, claimed_at as i64, reward_id],
    )?;
    Ok(updated > 0)
}
