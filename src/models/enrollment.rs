//! Enrollment and progress models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: i64,
    pub user_id: i64,
    pub course_id: i64,
    pub status: EnrollmentStatus,
    /// 0.0..=100.0, two decimals
    pub progress_percent: f64,
    pub completed_lessons: i64,
    pub completed_quizzes: i64,
    pub payment_id: Option<i64>,
    pub enrolled_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_accessed_at: DateTime<Utc>,
}

impl Enrollment {
    /// Refunded enrollments no longer grant access
    pub fn has_access(&self) -> bool {
        self.status != EnrollmentStatus::Refunded
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    #[default]
    Active,
    Completed,
    Refunded,
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnrollmentStatus::Active => write!(f, "active"),
            EnrollmentStatus::Completed => write!(f, "completed"),
            EnrollmentStatus::Refunded => write!(f, "refunded"),
        }
    }
}

impl FromStr for EnrollmentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(EnrollmentStatus::Active),
            "completed" => Ok(EnrollmentStatus::Completed),
            "refunded" => Ok(EnrollmentStatus::Refunded),
            _ => Err(anyhow::anyhow!("Invalid enrollment status: {}", s)),
        }
    }
}

/// What a progress record marks as done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum ProgressItem {
    Lesson(i64),
    Quiz(i64),
}

/// One completed lesson or passed quiz
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub id: i64,
    pub enrollment_id: i64,
    pub item: ProgressItem,
    pub completed_at: DateTime<Utc>,
}

/// Progress inside one section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionProgress {
    pub section_id: i64,
    pub title: String,
    pub total_items: i64,
    pub completed_items: i64,
    pub progress_percent: f64,
    pub completed_lesson_ids: Vec<i64>,
    pub completed_quiz_ids: Vec<i64>,
}

/// Full progress breakdown for one enrollment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseProgress {
    pub enrollment: Enrollment,
    pub sections: Vec<SectionProgress>,
    pub certificate_number: Option<String>,
}

/// An enrollment joined with the course fields a dashboard needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentWithCourse {
    #[serde(flatten)]
    pub enrollment: Enrollment,
    pub course_slug: String,
    pub course_title: String,
    pub course_thumbnail_url: Option<String>,
}

/// A student row on an instructor's roster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseStudent {
    pub user_id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub status: EnrollmentStatus,
    pub progress_percent: f64,
    pub enrolled_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Completed items out of total, as a percentage rounded to two decimals.
/// A course with nothing to complete reports 0.
pub fn progress_percent(completed: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    let completed = completed.clamp(0, total);
    round2(completed as f64 * 100.0 / total as f64)
}

/// Round to two decimal places
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_progress_percent_basics() {
        assert_eq!(progress_percent(0, 0), 0.0);
        assert_eq!(progress_percent(0, 4), 0.0);
        assert_eq!(progress_percent(1, 4), 25.0);
        assert_eq!(progress_percent(1, 3), 33.33);
        assert_eq!(progress_percent(2, 3), 66.67);
        assert_eq!(progress_percent(3, 3), 100.0);
    }

    #[test]
    fn test_progress_percent_clamps_overcount() {
        assert_eq!(progress_percent(5, 3), 100.0);
    }

    #[test]
    fn test_progress_item_serialization() {
        let json = serde_json::to_value(ProgressItem::Lesson(7)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "lesson", "id": 7}));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(EnrollmentStatus::from_str("Refunded").unwrap(), EnrollmentStatus::Refunded);
        assert!(EnrollmentStatus::from_str("paused").is_err());
    }

    proptest! {
        #[test]
        fn property_progress_is_bounded(completed in 0i64..500, total in 0i64..500) {
            let pct = progress_percent(completed, total);
            prop_assert!((0.0..=100.0).contains(&pct));
            if total > 0 && completed >= total {
                prop_assert_eq!(pct, 100.0);
            }
        }
    }
}
