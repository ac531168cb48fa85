//! Entitlement resolver: pure read-path access decisions.
//!
//! Given an (optional) authenticated principal and a course or chapter,
//! produce an [`AccessDecision`] with a machine-readable reason. No
//! resolution ever writes.

pub mod resolver;

pub use resolver::{filter_chapters, resolve_chapter_access, resolve_course_access};

use verba_types::{ChapterId, CourseId};

#[derive(Debug, thiserror::Error)]
pub enum EntitlementError {
    /// Unknown course id. A distinct error, never a silent denial.
    #[error("course {0} not found")]
    CourseNotFound(CourseId),

    /// Unknown chapter id.
    #[error("chapter {0} not found")]
    ChapterNotFound(ChapterId),

    #[error(transparent)]
    Db(#[from] verba_db::DbError),
}

pub type Result<T> = std::result::Result<T, EntitlementError>;
