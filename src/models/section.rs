//! Section and lesson models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An ordered group of lessons and quizzes inside a course.
///
/// `lesson_count`, `quiz_count` and `duration_minutes` are recomputed from
/// the section's children and never written directly by callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub id: i64,
    pub course_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub sort_order: i64,
    pub lesson_count: i64,
    pub quiz_count: i64,
    pub duration_minutes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single lesson. `content` is Markdown, `content_html` its rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub id: i64,
    pub section_id: i64,
    pub course_id: i64,
    pub title: String,
    pub content: String,
    pub content_html: String,
    pub video_url: Option<String>,
    pub duration_minutes: i64,
    pub sort_order: i64,
    /// Preview lessons are readable without enrolling
    pub is_preview: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSectionInput {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Appended after the last section when absent
    #[serde(default)]
    pub sort_order: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSectionInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateLessonInput {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub duration_minutes: i64,
    #[serde(default)]
    pub sort_order: Option<i64>,
    #[serde(default)]
    pub is_preview: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateLessonInput {
    pub title: Option<String>,
    pub content: Option<String>,
    pub video_url: Option<String>,
    pub duration_minutes: Option<i64>,
    pub sort_order: Option<i64>,
    pub is_preview: Option<bool>,
    /// Move the lesson to another section of the same course
    pub section_id: Option<i64>,
}

/// New position for one item in a reorder request
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct ReorderItem {
    pub id: i64,
    pub sort_order: i64,
}
