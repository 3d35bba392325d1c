//! Enrollment repository
//!
//! Enrollments, progress rows and the progress rollup. The rollup always
//! derives its counts from the progress rows so the stored percentages
//! cannot drift from what was actually completed.

use crate::db::Database;
use crate::models::{
    progress_percent, CourseStudent, Enrollment, EnrollmentStatus, EnrollmentWithCourse,
    ProgressItem, ProgressRecord,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

/// Result of a progress rollup
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub enrollment: Enrollment,
    /// True when this rollup moved the enrollment to `completed`
    pub newly_completed: bool,
}

#[async_trait]
pub trait EnrollmentRepository: Send + Sync {
    /// Create an active enrollment and refresh the course's enrollment count
    async fn create(&self, user_id: i64, course_id: i64, payment_id: Option<i64>)
        -> Result<Enrollment>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Enrollment>>;

    async fn get(&self, user_id: i64, course_id: i64) -> Result<Option<Enrollment>>;

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<EnrollmentWithCourse>>;

    async fn list_students(&self, course_id: i64) -> Result<Vec<CourseStudent>>;

    /// Ids of the course's enrollments that are still in progress
    async fn list_active_ids(&self, course_id: i64) -> Result<Vec<i64>>;

    /// Record a completed item. Returns false when it was already recorded.
    async fn record_progress(&self, enrollment_id: i64, item: ProgressItem) -> Result<bool>;

    async fn list_progress(&self, enrollment_id: i64) -> Result<Vec<ProgressRecord>>;

    /// Recompute completed counts and percentage from the progress rows.
    /// Reaching 100% marks the enrollment completed; a completed enrollment
    /// is never moved back to active.
    async fn refresh_progress(&self, enrollment_id: i64) -> Result<ProgressUpdate>;

    /// Change status (used by refunds) and refresh the course's enrollment count
    async fn set_status(&self, enrollment_id: i64, status: EnrollmentStatus) -> Result<Enrollment>;

    async fn touch(&self, enrollment_id: i64) -> Result<()>;

    async fn count_all(&self) -> Result<i64>;

    /// Distinct students and completed enrollments across an instructor's courses
    async fn instructor_totals(&self, instructor_id: i64) -> Result<(i64, i64)>;
}

pub struct SqlxEnrollmentRepository {
    db: Database,
}

impl SqlxEnrollmentRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn boxed(db: Database) -> Arc<dyn EnrollmentRepository> {
        Arc::new(Self::new(db))
    }
}

#[async_trait]
impl EnrollmentRepository for SqlxEnrollmentRepository {
    async fn create(
        &self,
        user_id: i64,
        course_id: i64,
        payment_id: Option<i64>,
    ) -> Result<Enrollment> {
        let mut tx = self.db.begin().await?;
        let id = insert_or_reactivate(&mut tx, user_id, course_id, payment_id).await?;
        refresh_enrollment_count(&mut tx, course_id).await?;
        tx.commit().await.context("Failed to commit enrollment")?;

        get_enrollment_by_id(self.db.pool(), id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Enrollment not found after insert"))
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Enrollment>> {
        get_enrollment_by_id(self.db.pool(), id).await
    }

    async fn get(&self, user_id: i64, course_id: i64) -> Result<Option<Enrollment>> {
        let sql = format!(
            "SELECT {} FROM enrollments WHERE user_id = ? AND course_id = ?",
            ENROLLMENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(user_id)
            .bind(course_id)
            .fetch_optional(self.db.pool())
            .await
            .context("Failed to get enrollment")?;
        row.map(|r| row_to_enrollment(&r)).transpose()
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<EnrollmentWithCourse>> {
        let rows = sqlx::query(
            r#"
            SELECT e.id, e.user_id, e.course_id, e.status, e.progress_percent, e.completed_lessons,
                   e.completed_quizzes, e.payment_id, e.enrolled_at, e.completed_at,
                   e.last_accessed_at, c.slug AS course_slug, c.title AS course_title,
                   c.thumbnail_url AS course_thumbnail_url
            FROM enrollments e
            JOIN courses c ON c.id = e.course_id
            WHERE e.user_id = ?
            ORDER BY e.last_accessed_at DESC, e.id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.db.pool())
        .await
        .context("Failed to list enrollments")?;

        rows.iter()
            .map(|row| {
                Ok(EnrollmentWithCourse {
                    enrollment: row_to_enrollment(row)?,
                    course_slug: row.get("course_slug"),
                    course_title: row.get("course_title"),
                    course_thumbnail_url: row.get("course_thumbnail_url"),
                })
            })
            .collect()
    }

    async fn list_active_ids(&self, course_id: i64) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar(
            "SELECT id FROM enrollments WHERE course_id = ? AND status = 'active' ORDER BY id",
        )
        .bind(course_id)
        .fetch_all(self.db.pool())
        .await
        .context("Failed to list active enrollments")?;
        Ok(ids)
    }

    async fn list_students(&self, course_id: i64) -> Result<Vec<CourseStudent>> {
        let rows = sqlx::query(
            r#"
            SELECT u.id AS user_id, u.username, u.display_name, e.status, e.progress_percent,
                   e.enrolled_at, e.completed_at
            FROM enrollments e
            JOIN users u ON u.id = e.user_id
            WHERE e.course_id = ?
            ORDER BY e.enrolled_at, e.id
            "#,
        )
        .bind(course_id)
        .fetch_all(self.db.pool())
        .await
        .context("Failed to list course students")?;

        rows.iter()
            .map(|row| {
                let status: String = row.get("status");
                Ok(CourseStudent {
                    user_id: row.get("user_id"),
                    username: row.get("username"),
                    display_name: row.get("display_name"),
                    status: EnrollmentStatus::from_str(&status)?,
                    progress_percent: row.get("progress_percent"),
                    enrolled_at: row.get("enrolled_at"),
                    completed_at: row.get("completed_at"),
                })
            })
            .collect()
    }

    async fn record_progress(&self, enrollment_id: i64, item: ProgressItem) -> Result<bool> {
        let (lesson_id, quiz_id) = match item {
            ProgressItem::Lesson(id) => (Some(id), None),
            ProgressItem::Quiz(id) => (None, Some(id)),
        };

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO progress (enrollment_id, lesson_id, quiz_id, completed_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(enrollment_id)
        .bind(lesson_id)
        .bind(quiz_id)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await
        .context("Failed to record progress")?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_progress(&self, enrollment_id: i64) -> Result<Vec<ProgressRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, enrollment_id, lesson_id, quiz_id, completed_at
            FROM progress WHERE enrollment_id = ? ORDER BY completed_at, id
            "#,
        )
        .bind(enrollment_id)
        .fetch_all(self.db.pool())
        .await
        .context("Failed to list progress")?;

        rows.iter()
            .map(|row| {
                let lesson_id: Option<i64> = row.get("lesson_id");
                let quiz_id: Option<i64> = row.get("quiz_id");
                let item = match (lesson_id, quiz_id) {
                    (Some(id), _) => ProgressItem::Lesson(id),
                    (None, Some(id)) => ProgressItem::Quiz(id),
                    (None, None) => anyhow::bail!("Progress row without lesson or quiz"),
                };
                Ok(ProgressRecord {
                    id: row.get("id"),
                    enrollment_id: row.get("enrollment_id"),
                    item,
                    completed_at: row.get("completed_at"),
                })
            })
            .collect()
    }

    async fn refresh_progress(&self, enrollment_id: i64) -> Result<ProgressUpdate> {
        let mut tx = self.db.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT e.status,
                   (SELECT COUNT(*) FROM progress p JOIN lessons l ON l.id = p.lesson_id
                    WHERE p.enrollment_id = e.id AND l.course_id = e.course_id) AS done_lessons,
                   (SELECT COUNT(*) FROM progress p JOIN quizzes q ON q.id = p.quiz_id
                    WHERE p.enrollment_id = e.id AND q.course_id = e.course_id) AS done_quizzes,
                   (SELECT COUNT(*) FROM lessons WHERE course_id = e.course_id) AS total_lessons,
                   (SELECT COUNT(*) FROM quizzes WHERE course_id = e.course_id) AS total_quizzes
            FROM enrollments e
            WHERE e.id = ?
            "#,
        )
        .bind(enrollment_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to load progress counts")?
        .ok_or_else(|| anyhow::anyhow!("Enrollment {} not found", enrollment_id))?;

        let status: String = row.get("status");
        let status = EnrollmentStatus::from_str(&status)?;
        let done_lessons: i64 = row.get("done_lessons");
        let done_quizzes: i64 = row.get("done_quizzes");
        let total: i64 = row.get::<i64, _>("total_lessons") + row.get::<i64, _>("total_quizzes");
        let percent = progress_percent(done_lessons + done_quizzes, total);

        let newly_completed =
            status == EnrollmentStatus::Active && total > 0 && done_lessons + done_quizzes >= total;
        let now = Utc::now();

        sqlx::query(
            r#"
            UPDATE enrollments
            SET completed_lessons = ?, completed_quizzes = ?, progress_percent = ?,
                last_accessed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(done_lessons)
        .bind(done_quizzes)
        .bind(percent)
        .bind(now)
        .bind(enrollment_id)
        .execute(&mut *tx)
        .await
        .context("Failed to update progress")?;

        if newly_completed {
            sqlx::query("UPDATE enrollments SET status = 'completed', completed_at = ? WHERE id = ?")
                .bind(now)
                .bind(enrollment_id)
                .execute(&mut *tx)
                .await
                .context("Failed to mark enrollment completed")?;
        }

        tx.commit().await.context("Failed to commit progress")?;

        let enrollment = get_enrollment_by_id(self.db.pool(), enrollment_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Enrollment not found after progress update"))?;

        Ok(ProgressUpdate {
            enrollment,
            newly_completed,
        })
    }

    async fn set_status(&self, enrollment_id: i64, status: EnrollmentStatus) -> Result<Enrollment> {
        let mut tx = self.db.begin().await?;

        let course_id: i64 = sqlx::query_scalar("SELECT course_id FROM enrollments WHERE id = ?")
            .bind(enrollment_id)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to load enrollment")?
            .ok_or_else(|| anyhow::anyhow!("Enrollment {} not found", enrollment_id))?;

        sqlx::query("UPDATE enrollments SET status = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(enrollment_id)
            .execute(&mut *tx)
            .await
            .context("Failed to update enrollment status")?;

        refresh_enrollment_count(&mut tx, course_id).await?;
        tx.commit().await.context("Failed to commit enrollment status")?;

        get_enrollment_by_id(self.db.pool(), enrollment_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Enrollment not found after status update"))
    }

    async fn touch(&self, enrollment_id: i64) -> Result<()> {
        sqlx::query("UPDATE enrollments SET last_accessed_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(enrollment_id)
            .execute(self.db.pool())
            .await
            .context("Failed to touch enrollment")?;
        Ok(())
    }

    async fn count_all(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM enrollments")
            .fetch_one(self.db.pool())
            .await
            .context("Failed to count enrollments")?;
        Ok(count)
    }

    async fn instructor_totals(&self, instructor_id: i64) -> Result<(i64, i64)> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(DISTINCT CASE WHEN e.status <> 'refunded' THEN e.user_id END) AS students,
                   COALESCE(SUM(CASE WHEN e.status = 'completed' THEN 1 ELSE 0 END), 0) AS completed
            FROM enrollments e
            JOIN courses c ON c.id = e.course_id
            WHERE c.instructor_id = ?
            "#,
        )
        .bind(instructor_id)
        .fetch_one(self.db.pool())
        .await
        .context("Failed to compute instructor totals")?;

        Ok((row.get("students"), row.get("completed")))
    }
}

const ENROLLMENT_COLUMNS: &str = "id, user_id, course_id, status, progress_percent, completed_lessons, completed_quizzes, payment_id, enrolled_at, completed_at, last_accessed_at";

/// Insert an enrollment, or give a refunded one its access back.
/// Returns the enrollment id.
pub(crate) async fn insert_or_reactivate(
    conn: &mut SqliteConnection,
    user_id: i64,
    course_id: i64,
    payment_id: Option<i64>,
) -> Result<i64> {
    let now = Utc::now();
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO enrollments (user_id, course_id, status, payment_id, enrolled_at, last_accessed_at)
        VALUES (?, ?, 'active', ?, ?, ?)
        ON CONFLICT (user_id, course_id) DO UPDATE SET
            status = CASE WHEN enrollments.completed_at IS NULL THEN 'active' ELSE 'completed' END,
            payment_id = excluded.payment_id,
            last_accessed_at = excluded.last_accessed_at
        WHERE enrollments.status = 'refunded'
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(course_id)
    .bind(payment_id)
    .bind(now)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await
    .context("Failed to create enrollment")?
    .ok_or_else(|| anyhow::anyhow!("User {} is already enrolled in course {}", user_id, course_id))?;

    Ok(id)
}

/// Recount non-refunded enrollments onto the course row
pub(crate) async fn refresh_enrollment_count(
    conn: &mut SqliteConnection,
    course_id: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE courses SET enrollment_count = (
            SELECT COUNT(*) FROM enrollments WHERE course_id = ? AND status <> 'refunded'
        )
        WHERE id = ?
        "#,
    )
    .bind(course_id)
    .bind(course_id)
    .execute(&mut *conn)
    .await
    .context("Failed to refresh enrollment count")?;
    Ok(())
}

async fn get_enrollment_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Enrollment>> {
    let sql = format!("SELECT {} FROM enrollments WHERE id = ?", ENROLLMENT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get enrollment by ID")?;
    row.map(|r| row_to_enrollment(&r)).transpose()
}

fn row_to_enrollment(row: &SqliteRow) -> Result<Enrollment> {
    let status: String = row.get("status");
    Ok(Enrollment {
        id: row.get("id"),
        user_id: row.get("user_id"),
        course_id: row.get("course_id"),
        status: EnrollmentStatus::from_str(&status)
            .with_context(|| format!("Invalid enrollment status in database: {}", status))?,
        progress_percent: row.get("progress_percent"),
        completed_lessons: row.get("completed_lessons"),
        completed_quizzes: row.get("completed_quizzes"),
        payment_id: row.get("payment_id"),
        enrolled_at: row.get("enrolled_at"),
        completed_at: row.get("completed_at"),
        last_accessed_at: row.get("last_accessed_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::*;
    use crate::models::UserRole;

    struct Fixture {
        db: Database,
        repo: SqlxEnrollmentRepository,
        student: i64,
        course_id: i64,
        section_id: i64,
    }

    async fn setup() -> Fixture {
        let db = setup_db().await;
        let instructor = insert_user(&db, "teach", UserRole::Instructor).await;
        let student = insert_user(&db, "stu", UserRole::Student).await;
        let course_id = insert_course(&db, instructor, "rust", 0).await;
        let section_id = insert_section(&db, course_id, 0).await;
        Fixture {
            repo: SqlxEnrollmentRepository::new(db.clone()),
            db,
            student,
            course_id,
            section_id,
        }
    }

    async fn enrollment_count(db: &Database, course_id: i64) -> i64 {
        sqlx::query_scalar("SELECT enrollment_count FROM courses WHERE id = ?")
            .bind(course_id)
            .fetch_one(db.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_updates_enrollment_count() {
        let f = setup().await;
        let enrollment = f.repo.create(f.student, f.course_id, None).await.unwrap();
        assert_eq!(enrollment.status, EnrollmentStatus::Active);
        assert_eq!(enrollment_count(&f.db, f.course_id).await, 1);

        let duplicate = f.repo.create(f.student, f.course_id, None).await;
        assert!(duplicate.is_err());
        assert_eq!(enrollment_count(&f.db, f.course_id).await, 1);
    }

    #[tokio::test]
    async fn test_refund_then_reenroll() {
        let f = setup().await;
        let enrollment = f.repo.create(f.student, f.course_id, None).await.unwrap();

        f.repo.set_status(enrollment.id, EnrollmentStatus::Refunded).await.unwrap();
        assert_eq!(enrollment_count(&f.db, f.course_id).await, 0);

        let again = f.repo.create(f.student, f.course_id, None).await.unwrap();
        assert_eq!(again.id, enrollment.id);
        assert_eq!(again.status, EnrollmentStatus::Active);
        assert_eq!(enrollment_count(&f.db, f.course_id).await, 1);
    }

    #[tokio::test]
    async fn test_record_progress_is_idempotent() {
        let f = setup().await;
        let lesson = insert_lesson(&f.db, f.course_id, f.section_id, 5).await;
        let enrollment = f.repo.create(f.student, f.course_id, None).await.unwrap();

        assert!(f.repo.record_progress(enrollment.id, ProgressItem::Lesson(lesson)).await.unwrap());
        assert!(!f.repo.record_progress(enrollment.id, ProgressItem::Lesson(lesson)).await.unwrap());

        let records = f.repo.list_progress(enrollment.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].item, ProgressItem::Lesson(lesson));
    }

    #[tokio::test]
    async fn test_refresh_progress_rolls_up_and_completes() {
        let f = setup().await;
        let l1 = insert_lesson(&f.db, f.course_id, f.section_id, 5).await;
        let l2 = insert_lesson(&f.db, f.course_id, f.section_id, 5).await;
        let l3 = insert_lesson(&f.db, f.course_id, f.section_id, 5).await;
        let enrollment = f.repo.create(f.student, f.course_id, None).await.unwrap();

        f.repo.record_progress(enrollment.id, ProgressItem::Lesson(l1)).await.unwrap();
        let update = f.repo.refresh_progress(enrollment.id).await.unwrap();
        assert_eq!(update.enrollment.completed_lessons, 1);
        assert_eq!(update.enrollment.progress_percent, 33.33);
        assert!(!update.newly_completed);

        f.repo.record_progress(enrollment.id, ProgressItem::Lesson(l2)).await.unwrap();
        f.repo.record_progress(enrollment.id, ProgressItem::Lesson(l3)).await.unwrap();
        let update = f.repo.refresh_progress(enrollment.id).await.unwrap();
        assert_eq!(update.enrollment.progress_percent, 100.0);
        assert_eq!(update.enrollment.status, EnrollmentStatus::Completed);
        assert!(update.enrollment.completed_at.is_some());
        assert!(update.newly_completed);

        // Already completed: no second completion event
        let update = f.repo.refresh_progress(enrollment.id).await.unwrap();
        assert!(!update.newly_completed);
    }

    #[tokio::test]
    async fn test_completed_enrollment_stays_completed_when_content_grows() {
        let f = setup().await;
        let l1 = insert_lesson(&f.db, f.course_id, f.section_id, 5).await;
        let enrollment = f.repo.create(f.student, f.course_id, None).await.unwrap();
        f.repo.record_progress(enrollment.id, ProgressItem::Lesson(l1)).await.unwrap();
        f.repo.refresh_progress(enrollment.id).await.unwrap();

        insert_lesson(&f.db, f.course_id, f.section_id, 5).await;
        let update = f.repo.refresh_progress(enrollment.id).await.unwrap();
        assert_eq!(update.enrollment.progress_percent, 50.0);
        assert_eq!(update.enrollment.status, EnrollmentStatus::Completed);
    }

    #[tokio::test]
    async fn test_empty_course_reports_zero() {
        let f = setup().await;
        let enrollment = f.repo.create(f.student, f.course_id, None).await.unwrap();
        let update = f.repo.refresh_progress(enrollment.id).await.unwrap();
        assert_eq!(update.enrollment.progress_percent, 0.0);
        assert!(!update.newly_completed);
    }

    #[tokio::test]
    async fn test_listings_and_totals() {
        let f = setup().await;
        f.repo.create(f.student, f.course_id, None).await.unwrap();

        let mine = f.repo.list_for_user(f.student).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].course_slug, "rust");

        let roster = f.repo.list_students(f.course_id).await.unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].username, "stu");

        let instructor_id: i64 = sqlx::query_scalar("SELECT instructor_id FROM courses WHERE id = ?")
            .bind(f.course_id)
            .fetch_one(f.db.pool())
            .await
            .unwrap();
        assert_eq!(f.repo.instructor_totals(instructor_id).await.unwrap(), (1, 0));
        assert_eq!(f.repo.count_all().await.unwrap(), 1);
    }
}
