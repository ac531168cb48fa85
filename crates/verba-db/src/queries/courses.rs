//! Course and chapter query functions.

use rusqlite::{Connection, OptionalExtension};
use verba_types::course::{Chapter, Course, CourseStatus};
use verba_types::CourseId;

use crate::{DbError, Result};

fn map_course(row: &rusqlite::Row<'_>) -> rusqlite::Result<Course> {
    let status_raw: String = row.get(2)?;
    Ok(Course {
        id: row.get(0)?,
        title: row.get(1)?,
        status: CourseStatus::parse(&status_raw).unwrap_or(CourseStatus::Draft),
        price_monthly: row.get(3)?,
        currency: row.get(4)?,
        created_at: row.get::<_, i64>(5)? as u64,
    })
}

/// Insert a course, returning its id.
pub fn insert(
    conn: &Connection,
    title: &str,
    status: CourseStatus,
    price_monthly: Option<i64>,
    currency: Option<&str>,
    created_at: u64,
) -> Result<CourseId> {
    conn.execute(
        "INSERT INTO courses (title, status, price_monthly, currency, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![title, status.as_str(), price_monthly, currency, created_at as i64],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Fetch a course by id.
pub fn get(conn: &Connection, course_id: CourseId) -> Result<Course> {
    conn.query_row(
        "SELECT id, title, status, price_monthly, currency, created_at
         FROM courses WHERE id = ?1",
        [course_id],
        map_course,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("course {course_id}")),
        other => DbError::Sqlite(other),
    })
}

/// Fetch a course if it exists.
pub fn get_opt(conn: &Connection, course_id: CourseId) -> Result<Option<Course>> {
    conn.query_row(
        "SELECT id, title, status, price_monthly, currency, created_at
         FROM courses WHERE id = ?1",
        [course_id],
        map_course,
    )
    .optional()
    .map_err(DbError::Sqlite)
}

/// List all published courses.
pub fn list_published(conn: &Connection) -> Result<Vec<Course>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, status, price_monthly, currency, created_at
         FROM courses WHERE status = 'published' ORDER BY id",
    )?;
    let rows = stmt.query_map([], map_course)?;
    let mut courses = Vec::new();
    for row in rows {
        courses.push(row?);
    }
    Ok(courses)
}

/// Insert a chapter, returning its id.
pub fn insert_chapter(
    conn: &Connection,
    course_id: CourseId,
    title: &str,
    position: u32,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO chapters (course_id, title, position) VALUES (?1, ?2, ?3)",
        rusqlite::params![course_id, title, position],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Fetch a single chapter.
pub fn get_chapter(conn: &Connection, chapter_id: i64) -> Result<Chapter> {
    conn.query_row(
        "SELECT id, course_id, title, position FROM chapters WHERE id = ?1",
        [chapter_id],
        |row| {
            Ok(Chapter {
                id: row.get(0)?,
                course_id: row.get(1)?,
                title: row.get(2)?,
                position: row.get(3)?,
            })
        },
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("chapter {chapter_id}")),
        other => DbError::Sqlite(other),
    })
}

/// List a course's chapters ordered by position.
pub fn list_chapters(conn: &Connection, course_id: CourseId) -> Result<Vec<Chapter>> {
    let mut stmt = conn.prepare(
        "SELECT id, course_id, title, position FROM chapters
         WHERE course_id = ?1 ORDER BY position",
    )?;
    let rows = stmt.query_map([course_id], |row| {
        Ok(Chapter {
            id: row.get(0)?,
            course_id: row.get(1)?,
            title: row.get(2)?,
            position: row.get(3)?,
        })
    })?;
    let mut chapters = Vec::new();
    for row in rows {
        chapters.push(row?);
    }
    Ok(chapters)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    #[test]
    fn test_insert_and_get() {
        let conn = test_db();
        let id = insert(&conn, "Spanish A1", CourseStatus::Published, Some(990), Some("EUR"), 10)
            .expect("insert");
        let course = get(&conn, id).expect("get");
        assert_eq!(course.title, "Spanish A1");
        assert_eq!(course.status, CourseStatus::Published);
        assert!(!course.is_free());
    }

    #[test]
    fn test_list_published_excludes_drafts() {
        let conn = test_db();
        insert(&conn, "Live", CourseStatus::Published, None, None, 0).expect("insert");
        insert(&conn, "WIP", CourseStatus::Draft, None, None, 0).expect("insert");

        let courses = list_published(&conn).expect("list");
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].title, "Live");
    }

    #[test]
    fn test_chapters_ordered_by_position() {
        let conn = test_db();
        let course_id =
            insert(&conn, "Spanish A1", CourseStatus::Published, None, None, 0).expect("insert");
        insert_chapter(&conn, course_id, "Greetings", 2).expect("ch");
        insert_chapter(&conn, course_id, "Alphabet", 1).expect("ch");

        let chapters = list_chapters(&conn, course_id).expect("list");
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].title, "Alphabet");
        assert_eq!(chapters[1].title, "Greetings");
    }

    #[test]
    fn test_missing_course() {
        let conn = test_db();
        assert!(matches!(get(&conn, 42), Err(DbError::NotFound(_))));
        assert!(get_opt(&conn, 42).expect("opt").is_none());
    }
}
