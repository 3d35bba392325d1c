//! Fixtures shared by repository and service tests.

use crate::db::{create_test_pool, migrations, Database};
use crate::models::UserRole;
use chrono::Utc;

/// Fresh in-memory database with every migration applied
pub async fn setup_db() -> Database {
    let db = create_test_pool().await.expect("Failed to create test pool");
    migrations::run_migrations(&db)
        .await
        .expect("Failed to run migrations");
    db
}

/// Insert a user row directly and return its id
pub async fn insert_user(db: &Database, username: &str, role: UserRole) -> i64 {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO users (username, email, password_hash, role, status, created_at, updated_at)
        VALUES (?, ?, 'hash', ?, 'active', ?, ?)
        "#,
    )
    .bind(username)
    .bind(format!("{}@example.com", username))
    .bind(role.to_string())
    .bind(now)
    .bind(now)
    .execute(db.pool())
    .await
    .expect("Failed to insert user")
    .last_insert_rowid()
}

/// Insert a published course directly and return its id
pub async fn insert_course(db: &Database, instructor_id: i64, slug: &str, price_cents: i64) -> i64 {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO courses (instructor_id, slug, title, price_cents, currency, status,
                             published_at, created_at, updated_at)
        VALUES (?, ?, ?, ?, 'usd', 'published', ?, ?, ?)
        "#,
    )
    .bind(instructor_id)
    .bind(slug)
    .bind(format!("Course {}", slug))
    .bind(price_cents)
    .bind(now)
    .bind(now)
    .bind(now)
    .execute(db.pool())
    .await
    .expect("Failed to insert course")
    .last_insert_rowid()
}

/// Insert a section and return its id
pub async fn insert_section(db: &Database, course_id: i64, sort_order: i64) -> i64 {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO sections (course_id, title, sort_order, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(course_id)
    .bind(format!("Section {}", sort_order))
    .bind(sort_order)
    .bind(now)
    .bind(now)
    .execute(db.pool())
    .await
    .expect("Failed to insert section")
    .last_insert_rowid()
}

/// Insert a lesson and return its id
pub async fn insert_lesson(db: &Database, course_id: i64, section_id: i64, minutes: i64) -> i64 {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO lessons (section_id, course_id, title, duration_minutes, created_at, updated_at)
        VALUES (?, ?, 'Lesson', ?, ?, ?)
        "#,
    )
    .bind(section_id)
    .bind(course_id)
    .bind(minutes)
    .bind(now)
    .bind(now)
    .execute(db.pool())
    .await
    .expect("Failed to insert lesson")
    .last_insert_rowid()
}

/// Insert an active enrollment and return its id
pub async fn insert_enrollment(db: &Database, user_id: i64, course_id: i64) -> i64 {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO enrollments (user_id, course_id, enrolled_at, last_accessed_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(course_id)
    .bind(now)
    .bind(now)
    .execute(db.pool())
    .await
    .expect("Failed to insert enrollment")
    .last_insert_rowid()
}
