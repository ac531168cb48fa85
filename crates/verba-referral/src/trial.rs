//! Signup trial policy and trial course selection.
//!
//! A referred signup gets the longer invited-user trial INSTEAD OF the
//! base one (substitution, never addition). Tiered rewards are a
//! separate thing earned by the referrer later.

use rusqlite::Connection;
use verba_types::access::Role;
use verba_types::{CourseId, DAY_SECS, DEFAULT_TRIAL_CHAPTER_LIMIT};

use verba_db::queries::{access, courses, settings, users};

use crate::{code, events, ReferralError, Result};

/// Outcome of registering a new account.
#[derive(Debug, Clone)]
pub struct SignupOutcome {
    pub trial_expires_at: u64,
    /// Referrer credited with the signup event, when the code resolved.
    pub referred_by: Option<String>,
}

/// Create a user with the trial policy applied. An invalid or unknown
/// referral code skips the bonus without failing the signup; a code
/// resolving to the new account itself is treated as absent.
pub fn register_user(
    conn: &Connection,
    user_id: &str,
    email: &str,
    referral_code: Option<&str>,
    now: u64,
) -> Result<SignupOutcome> {
    let referrer = match referral_code {
        Some(code) => code::validate(conn, code)?.filter(|id| id != user_id),
        None => None,
    };

    let trial_days = if referrer.is_some() {
        settings::get_u64(conn, "invited_user_trial_days", 14)?
    } else {
        settings::get_u64(conn, "new_user_trial_days", 7)?
    };
    let trial_expires_at = now + trial_days * DAY_SECS;

    users::insert(
        conn,
        user_id,
        email,
        Role::User,
        referrer.as_deref(),
        Some(trial_expires_at),
        now,
    )?;

    if let Some(referrer_id) = referrer.as_deref() {
        events::record_event(
            conn,
            referrer_id,
            user_id,
            verba_types::referral::ReferralEventType::Signup,
            now,
        )?;
    }

    tracing::info!(
        user = %user_id,
        trial_days,
        referred = referrer.is_some(),
        "user registered"
    );
    Ok(SignupOutcome {
        trial_expires_at,
        referred_by: referrer,
    })
}

/// Grant the user's one trial course: access until `trial_expires_at`
/// under the configured trial chapter cap. Rejected once the trial is
/// over or a trial course was already chosen.
pub fn select_trial_course(
    conn: &Connection,
    user_id: &str,
    course_id: CourseId,
    now: u64,
) -> Result<()> {
    let user = match users::get(conn, user_id) {
        Ok(user) => user,
        Err(verba_db::DbError::NotFound(_)) => {
            return Err(ReferralError::UserNotFound(user_id.to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    let trial_end = user.trial_expires_at.filter(|&end| end > now);
    let Some(trial_end) = trial_end else {
        return Err(ReferralError::TrialExpired);
    };

    if access::has_unbacked_grant(conn, user_id)? {
        return Err(ReferralError::TrialCourseAlreadySelected);
    }
    if courses::get_opt(conn, course_id)?.is_none() {
        return Err(ReferralError::CourseNotFound(course_id));
    }

    let cap = settings::get_opt_u32(conn, "trial_chapter_limit")?
        .unwrap_or(DEFAULT_TRIAL_CHAPTER_LIMIT);
    access::upsert(
        conn,
        &access::GrantUpsert {
            user_id,
            course_id,
            start_date: now,
            end_date: Some(trial_end),
            chapter_limit: Some(cap),
            external_subscription_id: None,
            external_customer_id: None,
            granted_at: now,
        },
    )?;

    tracing::info!(user = %user_id, course = course_id, trial_end, "trial course selected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use verba_types::course::CourseStatus;
    use verba_types::referral::ReferralEventType;

    const NOW: u64 = 1_000_000;

    fn test_db() -> Connection {
        let conn = verba_db::open_memory().expect("open test db");
        users::insert(&conn, "ref", "ref@example.com", Role::User, None, None, 0).expect("user");
        conn
    }

    #[test]
    fn test_plain_signup_gets_base_trial() {
        let conn = test_db();
        let outcome = register_user(&conn, "u1", "a@example.com", None, NOW).expect("register");
        assert_eq!(outcome.trial_expires_at, NOW + 7 * DAY_SECS);
        assert!(outcome.referred_by.is_none());
    }

    #[test]
    fn test_referred_signup_substitutes_trial_days() {
        let conn = test_db();
        let code = code::ensure_code(&conn, "ref").expect("code");

        let outcome =
            register_user(&conn, "u1", "a@example.com", Some(&code), NOW).expect("register");
        // 14 days, not 7 + 14.
        assert_eq!(outcome.trial_expires_at, NOW + 14 * DAY_SECS);
        assert_eq!(outcome.referred_by.as_deref(), Some("ref"));
        assert_eq!(
            verba_db::queries::referrals::count_events(&conn, "ref", ReferralEventType::Signup)
                .expect("count"),
            1
        );
    }

    #[test]
    fn test_unknown_code_skips_bonus_without_failing() {
        let conn = test_db();
        let outcome = register_user(&conn, "u1", "a@example.com", Some("BADCODE999"), NOW)
            .expect("register still succeeds");
        assert_eq!(outcome.trial_expires_at, NOW + 7 * DAY_SECS);
        assert!(outcome.referred_by.is_none());
    }

    #[test]
    fn test_select_trial_course() {
        let conn = test_db();
        register_user(&conn, "u1", "a@example.com", None, NOW).expect("register");
        let course_id = courses::insert(&conn, "Spanish A1", CourseStatus::Published, Some(990), None, 0)
            .expect("course");

        select_trial_course(&conn, "u1", course_id, NOW + 10).expect("select");

        let grant = access::get(&conn, "u1", course_id).expect("get").expect("grant");
        assert_eq!(grant.end_date, Some(NOW + 7 * DAY_SECS));
        assert_eq!(grant.chapter_limit, Some(5));
    }

    #[test]
    fn test_second_trial_course_rejected() {
        let conn = test_db();
        register_user(&conn, "u1", "a@example.com", None, NOW).expect("register");
        let a = courses::insert(&conn, "Spanish A1", CourseStatus::Published, Some(990), None, 0)
            .expect("a");
        let b = courses::insert(&conn, "French A1", CourseStatus::Published, Some(990), None, 0)
            .expect("b");

        select_trial_course(&conn, "u1", a, NOW + 10).expect("first");
        let err = select_trial_course(&conn, "u1", b, NOW + 20).expect_err("second");
        assert!(matches!(err, ReferralError::TrialCourseAlreadySelected));
    }

    #[test]
    fn test_expired_trial_rejected() {
        let conn = test_db();
        register_user(&conn, "u1", "a@example.com", None, NOW).expect("register");
        let course_id = courses::insert(&conn, "Spanish A1", CourseStatus::Published, Some(990), None, 0)
            .expect("course");

        let after_trial = NOW + 8 * DAY_SECS;
        let err = select_trial_course(&conn, "u1", course_id, after_trial).expect_err("expired");
        assert!(matches!(err, ReferralError::TrialExpired));
    }
}
