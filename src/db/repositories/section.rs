//! Section and lesson repository
//!
//! Database operations for the ordered content inside a course. Stats on
//! sections are maintained by `CourseRepository::recompute_stats`.

use crate::db::Database;
use crate::models::{Lesson, ReorderItem, Section};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

#[async_trait]
pub trait SectionRepository: Send + Sync {
    async fn create_section(&self, section: &Section) -> Result<Section>;

    async fn get_section(&self, id: i64) -> Result<Option<Section>>;

    /// Sections of a course in display order
    async fn list_sections(&self, course_id: i64) -> Result<Vec<Section>>;

    async fn update_section(&self, section: &Section) -> Result<Section>;

    /// Delete a section together with its lessons and quizzes
    async fn delete_section(&self, id: i64) -> Result<()>;

    /// Apply new sort orders atomically. Items not belonging to the course
    /// are ignored; returns how many rows changed.
    async fn reorder_sections(&self, course_id: i64, items: &[ReorderItem]) -> Result<u64>;

    /// Sort order that places a new section last
    async fn next_section_order(&self, course_id: i64) -> Result<i64>;

    async fn create_lesson(&self, lesson: &Lesson) -> Result<Lesson>;

    async fn get_lesson(&self, id: i64) -> Result<Option<Lesson>>;

    /// Lessons of a course ordered by section, then lesson order
    async fn list_lessons(&self, course_id: i64) -> Result<Vec<Lesson>>;

    async fn update_lesson(&self, lesson: &Lesson) -> Result<Lesson>;

    async fn delete_lesson(&self, id: i64) -> Result<()>;

    /// Sort order that places a new lesson last in its section
    async fn next_lesson_order(&self, section_id: i64) -> Result<i64>;
}

pub struct SqlxSectionRepository {
    db: Database,
}

impl SqlxSectionRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn boxed(db: Database) -> Arc<dyn SectionRepository> {
        Arc::new(Self::new(db))
    }
}

#[async_trait]
impl SectionRepository for SqlxSectionRepository {
    async fn create_section(&self, section: &Section) -> Result<Section> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO sections (course_id, title, description, sort_order, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(section.course_id)
        .bind(&section.title)
        .bind(&section.description)
        .bind(section.sort_order)
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await
        .context("Failed to create section")?;

        get_section_by_id(self.db.pool(), result.last_insert_rowid())
            .await?
            .ok_or_else(|| anyhow::anyhow!("Section not found after insert"))
    }

    async fn get_section(&self, id: i64) -> Result<Option<Section>> {
        get_section_by_id(self.db.pool(), id).await
    }

    async fn list_sections(&self, course_id: i64) -> Result<Vec<Section>> {
        let sql = format!(
            "SELECT {} FROM sections WHERE course_id = ? ORDER BY sort_order, id",
            SECTION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(course_id)
            .fetch_all(self.db.pool())
            .await
            .context("Failed to list sections")?;
        Ok(rows.iter().map(row_to_section).collect())
    }

    async fn update_section(&self, section: &Section) -> Result<Section> {
        sqlx::query(
            "UPDATE sections SET title = ?, description = ?, sort_order = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&section.title)
        .bind(&section.description)
        .bind(section.sort_order)
        .bind(Utc::now())
        .bind(section.id)
        .execute(self.db.pool())
        .await
        .context("Failed to update section")?;

        get_section_by_id(self.db.pool(), section.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Section not found after update"))
    }

    async fn delete_section(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM sections WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await
            .context("Failed to delete section")?;
        Ok(())
    }

    async fn reorder_sections(&self, course_id: i64, items: &[ReorderItem]) -> Result<u64> {
        let mut tx = self.db.begin().await?;
        let mut changed = 0;
        let now = Utc::now();

        for item in items {
            let result = sqlx::query(
                "UPDATE sections SET sort_order = ?, updated_at = ? WHERE id = ? AND course_id = ?",
            )
            .bind(item.sort_order)
            .bind(now)
            .bind(item.id)
            .bind(course_id)
            .execute(&mut *tx)
            .await
            .context("Failed to reorder section")?;
            changed += result.rows_affected();
        }

        tx.commit().await.context("Failed to commit section order")?;
        Ok(changed)
    }

    async fn next_section_order(&self, course_id: i64) -> Result<i64> {
        let next: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM sections WHERE course_id = ?",
        )
        .bind(course_id)
        .fetch_one(self.db.pool())
        .await
        .context("Failed to get next section order")?;
        Ok(next)
    }

    async fn create_lesson(&self, lesson: &Lesson) -> Result<Lesson> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO lessons (section_id, course_id, title, content, content_html, video_url,
                                 duration_minutes, sort_order, is_preview, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(lesson.section_id)
        .bind(lesson.course_id)
        .bind(&lesson.title)
        .bind(&lesson.content)
        .bind(&lesson.content_html)
        .bind(&lesson.video_url)
        .bind(lesson.duration_minutes)
        .bind(lesson.sort_order)
        .bind(lesson.is_preview)
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await
        .context("Failed to create lesson")?;

        get_lesson_by_id(self.db.pool(), result.last_insert_rowid())
            .await?
            .ok_or_else(|| anyhow::anyhow!("Lesson not found after insert"))
    }

    async fn get_lesson(&self, id: i64) -> Result<Option<Lesson>> {
        get_lesson_by_id(self.db.pool(), id).await
    }

    async fn list_lessons(&self, course_id: i64) -> Result<Vec<Lesson>> {
        let rows = sqlx::query(
            r#"
            SELECT l.id, l.section_id, l.course_id, l.title, l.content, l.content_html, l.video_url,
                   l.duration_minutes, l.sort_order, l.is_preview, l.created_at, l.updated_at
            FROM lessons l
            JOIN sections s ON s.id = l.section_id
            WHERE l.course_id = ?
            ORDER BY s.sort_order, s.id, l.sort_order, l.id
            "#,
        )
        .bind(course_id)
        .fetch_all(self.db.pool())
        .await
        .context("Failed to list lessons")?;
        Ok(rows.iter().map(row_to_lesson).collect())
    }

    async fn update_lesson(&self, lesson: &Lesson) -> Result<Lesson> {
        sqlx::query(
            r#"
            UPDATE lessons
            SET section_id = ?, title = ?, content = ?, content_html = ?, video_url = ?,
                duration_minutes = ?, sort_order = ?, is_preview = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(lesson.section_id)
        .bind(&lesson.title)
        .bind(&lesson.content)
        .bind(&lesson.content_html)
        .bind(&lesson.video_url)
        .bind(lesson.duration_minutes)
        .bind(lesson.sort_order)
        .bind(lesson.is_preview)
        .bind(Utc::now())
        .bind(lesson.id)
        .execute(self.db.pool())
        .await
        .context("Failed to update lesson")?;

        get_lesson_by_id(self.db.pool(), lesson.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Lesson not found after update"))
    }

    async fn delete_lesson(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM lessons WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await
            .context("Failed to delete lesson")?;
        Ok(())
    }

    async fn next_lesson_order(&self, section_id: i64) -> Result<i64> {
        let next: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM lessons WHERE section_id = ?",
        )
        .bind(section_id)
        .fetch_one(self.db.pool())
        .await
        .context("Failed to get next lesson order")?;
        Ok(next)
    }
}

const SECTION_COLUMNS: &str = "id, course_id, title, description, sort_order, lesson_count, quiz_count, duration_minutes, created_at, updated_at";

const LESSON_COLUMNS: &str = "id, section_id, course_id, title, content, content_html, video_url, duration_minutes, sort_order, is_preview, created_at, updated_at";

async fn get_section_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Section>> {
    let sql = format!("SELECT {} FROM sections WHERE id = ?", SECTION_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get section by ID")?;
    Ok(row.as_ref().map(row_to_section))
}

async fn get_lesson_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Lesson>> {
    let sql = format!("SELECT {} FROM lessons WHERE id = ?", LESSON_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get lesson by ID")?;
    Ok(row.as_ref().map(row_to_lesson))
}

fn row_to_section(row: &SqliteRow) -> Section {
    Section {
        id: row.get("id"),
        course_id: row.get("course_id"),
        title: row.get("title"),
        description: row.get("description"),
        sort_order: row.get("sort_order"),
        lesson_count: row.get("lesson_count"),
        quiz_count: row.get("quiz_count"),
        duration_minutes: row.get("duration_minutes"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_lesson(row: &SqliteRow) -> Lesson {
    Lesson {
        id: row.get("id"),
        section_id: row.get("section_id"),
        course_id: row.get("course_id"),
        title: row.get("title"),
        content: row.get("content"),
        content_html: row.get("content_html"),
        video_url: row.get("video_url"),
        duration_minutes: row.get("duration_minutes"),
        sort_order: row.get("sort_order"),
        is_preview: row.get("is_preview"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
