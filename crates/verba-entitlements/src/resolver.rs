//! Course and chapter access resolution.

use rusqlite::Connection;
use verba_types::access::{AccessDecision, AccessReason, Principal};
use verba_types::course::{Chapter, CourseStatus};
use verba_types::{ChapterId, CourseId, DEFAULT_TRIAL_CHAPTER_LIMIT};

use verba_db::queries::{access, courses, settings};

use crate::{EntitlementError, Result};

/// Resolve whether `principal` may access `course_id` at `now`.
///
/// Rules apply in order, first match wins:
/// 1. admins are always allowed, unbounded;
/// 2. unpublished courses are denied to everyone else;
/// 3. free courses are allowed, unbounded, authenticated or not;
/// 4. anonymous callers get no further consideration on priced courses;
/// 5. no grant row means implicit trial with the configured chapter cap
///    (absence of a row is NOT denial);
/// 6. a grant's window is date-driven: a past `end_date` denies even if
///    the row's status still says active, a future `start_date` denies
///    until it opens;
/// 7. otherwise the grant's own chapter cap applies.
pub fn resolve_course_access(
    conn: &Connection,
    principal: Option<&Principal>,
    course_id: CourseId,
    now: u64,
) -> Result<AccessDecision> {
    let course = courses::get_opt(conn, course_id)?
        .ok_or(EntitlementError::CourseNotFound(course_id))?;

    if principal.is_some_and(Principal::is_admin) {
        return Ok(AccessDecision::allowed(None, AccessReason::Admin));
    }

    if course.status != CourseStatus::Published {
        return Ok(AccessDecision::denied(AccessReason::NotPublished));
    }

    if course.is_free() {
        return Ok(AccessDecision::allowed(None, AccessReason::FreeCourse));
    }

    let Some(principal) = principal else {
        // Priced course, anonymous caller: no anonymous trial.
        return Ok(AccessDecision::denied(AccessReason::NoAccess));
    };

    let Some(grant) = access::get(conn, &principal.user_id, course_id)? else {
        let cap = trial_chapter_limit(conn)?;
        return Ok(AccessDecision::allowed(Some(cap), AccessReason::Trial));
    };

    if grant.end_date.is_some_and(|end| end < now) {
        return Ok(AccessDecision::denied(AccessReason::Expired).with_end_date(grant.end_date));
    }

    if grant.start_date > now {
        return Ok(AccessDecision::denied(AccessReason::NotStarted));
    }

    Ok(AccessDecision::allowed(grant.chapter_limit, AccessReason::Granted)
        .with_end_date(grant.end_date))
}

/// Resolve access to a single chapter: course access plus the cap check
/// against the chapter's position.
pub fn resolve_chapter_access(
    conn: &Connection,
    principal: Option<&Principal>,
    chapter_id: ChapterId,
    now: u64,
) -> Result<AccessDecision> {
    let chapter = match courses::get_chapter(conn, chapter_id) {
        Ok(chapter) => chapter,
        Err(verba_db::DbError::NotFound(_)) => {
            return Err(EntitlementError::ChapterNotFound(chapter_id))
        }
        Err(e) => return Err(e.into()),
    };

    let decision = resolve_course_access(conn, principal, chapter.course_id, now)?;
    if !decision.allowed {
        return Ok(decision);
    }

    if decision.chapter_limit.is_some_and(|cap| chapter.position > cap) {
        return Ok(AccessDecision::denied(AccessReason::NoAccess));
    }

    Ok(decision)
}

/// List a course's chapters trimmed to what the caller may read. A
/// denied caller sees an empty list; the course decision itself carries
/// the reason.
pub fn filter_chapters(
    conn: &Connection,
    principal: Option<&Principal>,
    course_id: CourseId,
    now: u64,
) -> Result<Vec<Chapter>> {
    let decision = resolve_course_access(conn, principal, course_id, now)?;
    if !decision.allowed {
        return Ok(Vec::new());
    }

    let chapters = courses::list_chapters(conn, course_id)?;
    match decision.chapter_limit {
        Some(cap) => Ok(chapters.into_iter().filter(|c| c.position <= cap).collect()),
        None => Ok(chapters),
    }
}

fn trial_chapter_limit(conn: &Connection) -> Result<u32> {
    Ok(settings::get_opt_u32(conn, "trial_chapter_limit")?
        .unwrap_or(DEFAULT_TRIAL_CHAPTER_LIMIT))
}
