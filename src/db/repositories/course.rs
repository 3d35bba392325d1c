//! Course repository
//!
//! Database operations for courses, including the recomputation of the
//! denormalized section and course statistics.

use crate::db::Database;
use crate::models::{Course, CourseFilter, CourseLevel, CourseStatus, ListParams};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use std::sync::Arc;

/// Course repository trait
#[async_trait]
pub trait CourseRepository: Send + Sync {
    async fn create(&self, course: &Course) -> Result<Course>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Course>>;

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Course>>;

    /// Check whether a slug is taken, ignoring the course `exclude_id`
    async fn slug_exists(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool>;

    /// Persist editable fields (not status or stats)
    async fn update(&self, course: &Course) -> Result<Course>;

    async fn set_status(
        &self,
        id: i64,
        status: CourseStatus,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<Course>;

    async fn delete(&self, id: i64) -> Result<()>;

    /// Whether any enrollment or payment references the course
    async fn has_purchases(&self, id: i64) -> Result<bool>;

    /// Published courses matching the filter, newest first
    async fn list_published(
        &self,
        filter: &CourseFilter,
        params: &ListParams,
    ) -> Result<(Vec<Course>, i64)>;

    /// Every course of an instructor, any status
    async fn list_by_instructor(&self, instructor_id: i64) -> Result<Vec<Course>>;

    async fn count_by_status(&self) -> Result<Vec<(CourseStatus, i64)>>;

    /// Recompute stats for the given sections, then the course totals,
    /// in one transaction.
    async fn recompute_stats(&self, course_id: i64, section_ids: &[i64]) -> Result<Course>;
}

/// SQLx-based course repository implementation
pub struct SqlxCourseRepository {
    db: Database,
}

impl SqlxCourseRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn boxed(db: Database) -> Arc<dyn CourseRepository> {
        Arc::new(Self::new(db))
    }
}

#[async_trait]
impl CourseRepository for SqlxCourseRepository {
    async fn create(&self, course: &Course) -> Result<Course> {
        create_course(self.db.pool(), course).await
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Course>> {
        get_course_by_id(self.db.pool(), id).await
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Course>> {
        let sql = format!("SELECT {} FROM courses WHERE slug = ?", COURSE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(slug)
            .fetch_optional(self.db.pool())
            .await
            .context("Failed to get course by slug")?;
        row.map(|r| row_to_course(&r)).transpose()
    }

    async fn slug_exists(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM courses WHERE slug = ? AND id <> ?")
                .bind(slug)
                .bind(exclude_id.unwrap_or(0))
                .fetch_one(self.db.pool())
                .await
                .context("Failed to check course slug")?;
        Ok(count > 0)
    }

    async fn update(&self, course: &Course) -> Result<Course> {
        update_course(self.db.pool(), course).await
    }

    async fn set_status(
        &self,
        id: i64,
        status: CourseStatus,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<Course> {
        sqlx::query("UPDATE courses SET status = ?, published_at = ?, updated_at = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(published_at)
            .bind(Utc::now())
            .bind(id)
            .execute(self.db.pool())
            .await
            .context("Failed to update course status")?;

        get_course_by_id(self.db.pool(), id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Course not found after status update"))
    }

    async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM courses WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await
            .context("Failed to delete course")?;
        Ok(())
    }

    async fn has_purchases(&self, id: i64) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT (SELECT COUNT(*) FROM enrollments WHERE course_id = ?)
                 + (SELECT COUNT(*) FROM payments WHERE course_id = ?)
            "#,
        )
        .bind(id)
        .bind(id)
        .fetch_one(self.db.pool())
        .await
        .context("Failed to count course purchases")?;
        Ok(count > 0)
    }

    async fn list_published(
        &self,
        filter: &CourseFilter,
        params: &ListParams,
    ) -> Result<(Vec<Course>, i64)> {
        list_published_courses(self.db.pool(), filter, params).await
    }

    async fn list_by_instructor(&self, instructor_id: i64) -> Result<Vec<Course>> {
        let sql = format!(
            "SELECT {} FROM courses WHERE instructor_id = ? ORDER BY created_at DESC, id DESC",
            COURSE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(instructor_id)
            .fetch_all(self.db.pool())
            .await
            .context("Failed to list instructor courses")?;
        rows.iter().map(row_to_course).collect()
    }

    async fn count_by_status(&self) -> Result<Vec<(CourseStatus, i64)>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM courses GROUP BY status")
            .fetch_all(self.db.pool())
            .await
            .context("Failed to count courses by status")?;

        rows.iter()
            .map(|row| {
                let status: String = row.get("status");
                Ok((CourseStatus::from_str(&status)?, row.get("count")))
            })
            .collect()
    }

    async fn recompute_stats(&self, course_id: i64, section_ids: &[i64]) -> Result<Course> {
        let mut tx = self.db.begin().await?;
        for section_id in section_ids {
            recompute_section(&mut tx, *section_id).await?;
        }
        recompute_course(&mut tx, course_id).await?;
        tx.commit().await.context("Failed to commit stats update")?;

        get_course_by_id(self.db.pool(), course_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Course not found after stats update"))
    }
}

const COURSE_COLUMNS: &str = r#"id, instructor_id, slug, title, subtitle, description, category, level,
    price_cents, currency, thumbnail_url, status, total_sections, total_lessons, total_quizzes,
    total_duration_minutes, enrollment_count, published_at, created_at, updated_at"#;

async fn create_course(pool: &SqlitePool, course: &Course) -> Result<Course> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO courses (instructor_id, slug, title, subtitle, description, category, level,
                             price_cents, currency, thumbnail_url, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(course.instructor_id)
    .bind(&course.slug)
    .bind(&course.title)
    .bind(&course.subtitle)
    .bind(&course.description)
    .bind(&course.category)
    .bind(course.level.to_string())
    .bind(course.price_cents)
    .bind(&course.currency)
    .bind(&course.thumbnail_url)
    .bind(course.status.to_string())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create course")?;

    get_course_by_id(pool, result.last_insert_rowid())
        .await?
        .ok_or_else(|| anyhow::anyhow!("Course not found after insert"))
}

async fn get_course_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Course>> {
    let sql = format!("SELECT {} FROM courses WHERE id = ?", COURSE_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get course by ID")?;
    row.map(|r| row_to_course(&r)).transpose()
}

async fn update_course(pool: &SqlitePool, course: &Course) -> Result<Course> {
    sqlx::query(
        r#"
        UPDATE courses
        SET slug = ?, title = ?, subtitle = ?, description = ?, category = ?, level = ?,
            price_cents = ?, thumbnail_url = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&course.slug)
    .bind(&course.title)
    .bind(&course.subtitle)
    .bind(&course.description)
    .bind(&course.category)
    .bind(course.level.to_string())
    .bind(course.price_cents)
    .bind(&course.thumbnail_url)
    .bind(Utc::now())
    .bind(course.id)
    .execute(pool)
    .await
    .context("Failed to update course")?;

    get_course_by_id(pool, course.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Course not found after update"))
}

async fn list_published_courses(
    pool: &SqlitePool,
    filter: &CourseFilter,
    params: &ListParams,
) -> Result<(Vec<Course>, i64)> {
    let level = filter.level.map(|l| l.to_string());
    let search = filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s));

    let conditions = r#"
        status = 'published'
        AND (?1 IS NULL OR category = ?1)
        AND (?2 IS NULL OR level = ?2)
        AND (?3 IS NULL OR instructor_id = ?3)
        AND (?4 IS NULL OR title LIKE ?4 OR subtitle LIKE ?4 OR description LIKE ?4)
    "#;

    let sql = format!(
        "SELECT {} FROM courses WHERE {} ORDER BY published_at DESC, id DESC LIMIT ?5 OFFSET ?6",
        COURSE_COLUMNS, conditions
    );
    let rows = sqlx::query(&sql)
        .bind(&filter.category)
        .bind(&level)
        .bind(filter.instructor_id)
        .bind(&search)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .context("Failed to list published courses")?;

    let count_sql = format!("SELECT COUNT(*) FROM courses WHERE {}", conditions);
    let total: i64 = sqlx::query_scalar(&count_sql)
        .bind(&filter.category)
        .bind(&level)
        .bind(filter.instructor_id)
        .bind(&search)
        .fetch_one(pool)
        .await
        .context("Failed to count published courses")?;

    let courses = rows.iter().map(row_to_course).collect::<Result<Vec<_>>>()?;
    Ok((courses, total))
}

async fn recompute_section(tx: &mut Transaction<'static, Sqlite>, section_id: i64) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE sections SET
            lesson_count = (SELECT COUNT(*) FROM lessons WHERE section_id = sections.id),
            quiz_count = (SELECT COUNT(*) FROM quizzes WHERE section_id = sections.id),
            duration_minutes = (SELECT COALESCE(SUM(duration_minutes), 0)
                                FROM lessons WHERE section_id = sections.id),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(Utc::now())
    .bind(section_id)
    .execute(&mut **tx)
    .await
    .context("Failed to recompute section stats")?;
    Ok(())
}

async fn recompute_course(tx: &mut Transaction<'static, Sqlite>, course_id: i64) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE courses SET
            total_sections = (SELECT COUNT(*) FROM sections WHERE course_id = courses.id),
            total_lessons = (SELECT COUNT(*) FROM lessons WHERE course_id = courses.id),
            total_quizzes = (SELECT COUNT(*) FROM quizzes WHERE course_id = courses.id),
            total_duration_minutes = (SELECT COALESCE(SUM(duration_minutes), 0)
                                      FROM lessons WHERE course_id = courses.id),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(Utc::now())
    .bind(course_id)
    .execute(&mut **tx)
    .await
    .context("Failed to recompute course stats")?;
    Ok(())
}

fn row_to_course(row: &SqliteRow) -> Result<Course> {
    let status: String = row.get("status");
    let level: String = row.get("level");

    Ok(Course {
        id: row.get("id"),
        instructor_id: row.get("instructor_id"),
        slug: row.get("slug"),
        title: row.get("title"),
        subtitle: row.get("subtitle"),
        description: row.get("description"),
        category: row.get("category"),
        level: CourseLevel::from_str(&level).unwrap_or_default(),
        price_cents: row.get("price_cents"),
        currency: row.get("currency"),
        thumbnail_url: row.get("thumbnail_url"),
        status: CourseStatus::from_str(&status)
            .with_context(|| format!("Invalid course status in database: {}", status))?,
        total_sections: row.get("total_sections"),
        total_lessons: row.get("total_lessons"),
        total_quizzes: row.get("total_quizzes"),
        total_duration_minutes: row.get("total_duration_minutes"),
        enrollment_count: row.get("enrollment_count"),
        published_at: row.get("published_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::*;
    use crate::models::UserRole;

    async fn setup() -> (Database, SqlxCourseRepository, i64) {
        let db = setup_db().await;
        let instructor = insert_user(&db, "teach", UserRole::Instructor).await;
        (db.clone(), SqlxCourseRepository::new(db), instructor)
    }

    fn draft(instructor_id: i64, slug: &str) -> Course {
        Course::new(instructor_id, slug.to_string(), format!("Title {}", slug), "usd".to_string())
    }

    #[tokio::test]
    async fn test_create_get_update() {
        let (_db, repo, instructor) = setup().await;

        let mut course = repo.create(&draft(instructor, "rust")).await.unwrap();
        assert_eq!(course.status, CourseStatus::Draft);
        assert_eq!(repo.get_by_slug("rust").await.unwrap().unwrap().id, course.id);

        course.title = "Rust in Depth".to_string();
        course.price_cents = 4_999;
        course.level = CourseLevel::Advanced;
        let updated = repo.update(&course).await.unwrap();
        assert_eq!(updated.title, "Rust in Depth");
        assert_eq!(updated.price_cents, 4_999);
        assert_eq!(updated.level, CourseLevel::Advanced);
    }

    #[tokio::test]
    async fn test_slug_exists_excludes_self() {
        let (_db, repo, instructor) = setup().await;
        let course = repo.create(&draft(instructor, "rust")).await.unwrap();

        assert!(repo.slug_exists("rust", None).await.unwrap());
        assert!(!repo.slug_exists("rust", Some(course.id)).await.unwrap());
        assert!(!repo.slug_exists("go", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_published_filters() {
        let (_db, repo, instructor) = setup().await;

        let mut a = draft(instructor, "rust-basics");
        a.category = "programming".to_string();
        let a = repo.create(&a).await.unwrap();
        repo.set_status(a.id, CourseStatus::Published, Some(Utc::now())).await.unwrap();

        let mut b = draft(instructor, "watercolor");
        b.category = "art".to_string();
        let b = repo.create(&b).await.unwrap();
        repo.set_status(b.id, CourseStatus::Published, Some(Utc::now())).await.unwrap();

        repo.create(&draft(instructor, "hidden-draft")).await.unwrap();

        let params = ListParams::default();
        let (all, total) = repo.list_published(&CourseFilter::default(), &params).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(all.len(), 2);

        let filter = CourseFilter {
            category: Some("art".to_string()),
            ..Default::default()
        };
        let (art, total) = repo.list_published(&filter, &params).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(art[0].slug, "watercolor");

        let filter = CourseFilter {
            search: Some("basics".to_string()),
            ..Default::default()
        };
        let (found, _) = repo.list_published(&filter, &params).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].slug, "rust-basics");
    }

    #[tokio::test]
    async fn test_recompute_stats_matches_rows() {
        let (db, repo, instructor) = setup().await;
        let course = repo.create(&draft(instructor, "rust")).await.unwrap();

        let s1 = insert_section(&db, course.id, 0).await;
        let s2 = insert_section(&db, course.id, 1).await;
        insert_lesson(&db, course.id, s1, 10).await;
        insert_lesson(&db, course.id, s1, 15).await;
        insert_lesson(&db, course.id, s2, 5).await;

        let course = repo.recompute_stats(course.id, &[s1, s2]).await.unwrap();
        assert_eq!(course.total_sections, 2);
        assert_eq!(course.total_lessons, 3);
        assert_eq!(course.total_quizzes, 0);
        assert_eq!(course.total_duration_minutes, 30);

        let (count, minutes): (i64, i64) =
            sqlx::query_as("SELECT lesson_count, duration_minutes FROM sections WHERE id = ?")
                .bind(s1)
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(count, 2);
        assert_eq!(minutes, 25);
    }

    #[tokio::test]
    async fn test_has_purchases() {
        let (db, repo, instructor) = setup().await;
        let course = repo.create(&draft(instructor, "rust")).await.unwrap();
        assert!(!repo.has_purchases(course.id).await.unwrap());

        let student = insert_user(&db, "stu", UserRole::Student).await;
        insert_enrollment(&db, student, course.id).await;
        assert!(repo.has_purchases(course.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_count_by_status() {
        let (_db, repo, instructor) = setup().await;
        repo.create(&draft(instructor, "a")).await.unwrap();
        let b = repo.create(&draft(instructor, "b")).await.unwrap();
        repo.set_status(b.id, CourseStatus::Published, Some(Utc::now())).await.unwrap();

        let counts = repo.count_by_status().await.unwrap();
        assert!(counts.contains(&(CourseStatus::Draft, 1)));
        assert!(counts.contains(&(CourseStatus::Published, 1)));
    }
}
