//! Course and chapter structures.

use serde::{Deserialize, Serialize};

use crate::{ChapterId, CourseId};

/// Publication state of a course.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CourseStatus {
    Draft,
    Preview,
    Published,
}

impl CourseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CourseStatus::Draft => "draft",
            CourseStatus::Preview => "preview",
            CourseStatus::Published => "published",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(CourseStatus::Draft),
            "preview" => Some(CourseStatus::Preview),
            "published" => Some(CourseStatus::Published),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct Course {
    pub id: CourseId,
    pub title: String,
    pub status: CourseStatus,
    /// Monthly price in minor currency units. None or 0 = free.
    pub price_monthly: Option<i64>,
    pub currency: Option<String>,
    pub created_at: u64,
}

impl Course {
    /// A course with no price (or a zero price) is free.
    pub fn is_free(&self) -> bool {
        matches!(self.price_monthly, None | Some(0))
    }
}

/// A chapter within a course. `position` is the ordinal used for
/// chapter-cap enforcement.
#[derive(Clone, Debug, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct Chapter {
    pub id: ChapterId,
    pub course_id: CourseId,
    pub title: String,
    pub position: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_course_is_free() {
        let mut course = Course {
            id: 1,
            title: "Spanish A1".to_string(),
            status: CourseStatus::Published,
            price_monthly: None,
            currency: None,
            created_at: 0,
        };
        assert!(course.is_free());
        course.price_monthly = Some(0);
        assert!(course.is_free());
        course.price_monthly = Some(9900);
        assert!(!course.is_free());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(CourseStatus::parse("published"), Some(CourseStatus::Published));
        assert_eq!(CourseStatus::parse("unlisted"), None);
    }
}
