//! Course model
//!
//! A course is owned by one instructor and is made of ordered sections,
//! each holding ordered lessons and quizzes. The `total_*` fields are
//! denormalized stats recomputed whenever the content underneath changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{Lesson, Quiz, Section};

/// Course entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: i64,
    pub instructor_id: i64,
    pub slug: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub description: String,
    pub category: String,
    pub level: CourseLevel,
    /// Price in the smallest currency unit. Zero means free.
    pub price_cents: i64,
    pub currency: String,
    pub thumbnail_url: Option<String>,
    pub status: CourseStatus,
    pub total_sections: i64,
    pub total_lessons: i64,
    pub total_quizzes: i64,
    pub total_duration_minutes: i64,
    pub enrollment_count: i64,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Course {
    /// Create a new draft course
    pub fn new(instructor_id: i64, slug: String, title: String, currency: String) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            instructor_id,
            slug,
            title,
            subtitle: None,
            description: String::new(),
            category: "general".to_string(),
            level: CourseLevel::default(),
            price_cents: 0,
            currency,
            thumbnail_url: None,
            status: CourseStatus::Draft,
            total_sections: 0,
            total_lessons: 0,
            total_quizzes: 0,
            total_duration_minutes: 0,
            enrollment_count: 0,
            published_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_free(&self) -> bool {
        self.price_cents == 0
    }

    pub fn is_published(&self) -> bool {
        self.status == CourseStatus::Published
    }

    /// Lessons plus quizzes: the units a student has to complete
    pub fn total_items(&self) -> i64 {
        self.total_lessons + self.total_quizzes
    }
}

/// Publication state of a course
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CourseStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

impl fmt::Display for CourseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CourseStatus::Draft => write!(f, "draft"),
            CourseStatus::Published => write!(f, "published"),
            CourseStatus::Archived => write!(f, "archived"),
        }
    }
}

impl FromStr for CourseStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(CourseStatus::Draft),
            "published" => Ok(CourseStatus::Published),
            "archived" => Ok(CourseStatus::Archived),
            _ => Err(anyhow::anyhow!("Invalid course status: {}", s)),
        }
    }
}

/// Target audience of a course
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CourseLevel {
    Beginner,
    Intermediate,
    Advanced,
    #[default]
    AllLevels,
}

impl fmt::Display for CourseLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CourseLevel::Beginner => write!(f, "beginner"),
            CourseLevel::Intermediate => write!(f, "intermediate"),
            CourseLevel::Advanced => write!(f, "advanced"),
            CourseLevel::AllLevels => write!(f, "all_levels"),
        }
    }
}

impl FromStr for CourseLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "beginner" => Ok(CourseLevel::Beginner),
            "intermediate" => Ok(CourseLevel::Intermediate),
            "advanced" => Ok(CourseLevel::Advanced),
            "all_levels" | "all" => Ok(CourseLevel::AllLevels),
            _ => Err(anyhow::anyhow!("Invalid course level: {}", s)),
        }
    }
}

/// Input for creating a course
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateCourseInput {
    pub title: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub level: Option<CourseLevel>,
    #[serde(default)]
    pub price_cents: Option<i64>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

/// Input for updating a course. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCourseInput {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub subtitle: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub level: Option<CourseLevel>,
    pub price_cents: Option<i64>,
    pub thumbnail_url: Option<String>,
}

/// Catalog filters
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CourseFilter {
    pub category: Option<String>,
    pub level: Option<CourseLevel>,
    pub search: Option<String>,
    pub instructor_id: Option<i64>,
}

/// Pagination parameters
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ListParams {
    /// Page number (1-indexed)
    pub page: u32,
    pub per_page: u32,
}

impl ListParams {
    /// Clamp page to >= 1 and per_page to 1..=100
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, 100),
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.per_page)
    }

    pub fn limit(&self) -> i64 {
        self.per_page as i64
    }
}

impl Default for ListParams {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

/// One page of results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

impl<T> PagedResult<T> {
    pub fn new(items: Vec<T>, total: i64, params: &ListParams) -> Self {
        Self {
            items,
            total,
            page: params.page,
            per_page: params.per_page,
        }
    }

    pub fn total_pages(&self) -> u32 {
        if self.per_page == 0 || self.total <= 0 {
            return 0;
        }
        ((self.total as u64 + self.per_page as u64 - 1) / self.per_page as u64) as u32
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PagedResult<U> {
        PagedResult {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
        }
    }
}

/// A section with its ordered lessons and quizzes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionOutline {
    pub section: Section,
    pub lessons: Vec<Lesson>,
    pub quizzes: Vec<Quiz>,
}

/// A course with its full ordered content tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseOutline {
    pub course: Course,
    pub instructor_name: String,
    pub sections: Vec<SectionOutline>,
}

impl CourseOutline {
    /// Replace lesson bodies with empty strings, except preview lessons.
    pub fn strip_locked_content(mut self) -> Self {
        for section in &mut self.sections {
            for lesson in &mut section.lessons {
                if !lesson.is_preview {
                    lesson.content.clear();
                    lesson.content_html.clear();
                    lesson.video_url = None;
                }
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_new_course_is_free_draft() {
        let course = Course::new(1, "rust-101".to_string(), "Rust 101".to_string(), "usd".to_string());
        assert!(course.is_free());
        assert!(!course.is_published());
        assert_eq!(course.level, CourseLevel::AllLevels);
        assert_eq!(course.total_items(), 0);
    }

    #[test]
    fn test_level_parse_and_display() {
        assert_eq!(CourseLevel::from_str("all").unwrap(), CourseLevel::AllLevels);
        assert_eq!(CourseLevel::AllLevels.to_string(), "all_levels");
        assert_eq!(
            serde_json::to_value(CourseLevel::AllLevels).unwrap(),
            serde_json::json!("all_levels")
        );
        assert!(CourseLevel::from_str("expert").is_err());
    }

    #[test]
    fn test_list_params_clamping() {
        let params = ListParams::new(0, 1000);
        assert_eq!(params.page, 1);
        assert_eq!(params.per_page, 100);
        assert_eq!(params.offset(), 0);

        let params = ListParams::new(3, 10);
        assert_eq!(params.offset(), 20);

        let params = ListParams::new(u32::MAX, 100);
        assert_eq!(params.offset(), (u32::MAX as i64 - 1) * 100);
    }

    #[test]
    fn test_total_pages() {
        let params = ListParams::new(1, 10);
        assert_eq!(PagedResult::<i32>::new(vec![], 0, &params).total_pages(), 0);
        assert_eq!(PagedResult::<i32>::new(vec![], 10, &params).total_pages(), 1);
        assert_eq!(PagedResult::<i32>::new(vec![], 11, &params).total_pages(), 2);
    }

    proptest! {
        #[test]
        fn property_total_pages_covers_all_items(total in 0i64..10_000, per_page in 1u32..=100) {
            let params = ListParams::new(1, per_page);
            let pages = PagedResult::<()>::new(vec![], total, &params).total_pages() as i64;
            prop_assert!(pages * per_page as i64 >= total);
            prop_assert!(pages == 0 || (pages - 1) * (per_page as i64) < total);
        }
    }
}
