//! Database migrations module
//!
//! Code-based migrations for Coursely. Every migration is embedded in the
//! binary as SQL, applied in version order, and recorded in `_migrations`
//! so re-running is a no-op.
//!
//! # Usage
//!
//! ```ignore
//! use coursely::db::{create_pool, migrations};
//!
//! let db = create_pool(&config).await?;
//! migrations::run_migrations(&db).await?;
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;

use super::Database;

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Migration version number (must be unique and sequential)
    pub version: i32,
    /// Human-readable migration name
    pub name: &'static str,
    /// SQL statements, separated by semicolons
    pub up: &'static str,
}

/// Migration record stored in the database
#[derive(Debug, Clone)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// All migrations, in application order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_users",
        up: r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username VARCHAR(50) NOT NULL UNIQUE,
                email VARCHAR(255) NOT NULL UNIQUE,
                password_hash VARCHAR(255) NOT NULL,
                display_name VARCHAR(100),
                bio TEXT,
                role VARCHAR(20) NOT NULL DEFAULT 'student',
                status VARCHAR(20) NOT NULL DEFAULT 'active',
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);
        "#,
    },
    Migration {
        version: 2,
        name: "create_sessions",
        up: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id VARCHAR(64) PRIMARY KEY,
                user_id INTEGER NOT NULL,
                expires_at TIMESTAMP NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at);
        "#,
    },
    Migration {
        version: 3,
        name: "create_courses",
        up: r#"
            CREATE TABLE IF NOT EXISTS courses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                instructor_id INTEGER NOT NULL,
                slug VARCHAR(255) NOT NULL UNIQUE,
                title VARCHAR(255) NOT NULL,
                subtitle VARCHAR(255),
                description TEXT NOT NULL DEFAULT '',
                category VARCHAR(100) NOT NULL DEFAULT 'general',
                level VARCHAR(20) NOT NULL DEFAULT 'all_levels',
                price_cents INTEGER NOT NULL DEFAULT 0,
                currency VARCHAR(10) NOT NULL DEFAULT 'usd',
                thumbnail_url TEXT,
                status VARCHAR(20) NOT NULL DEFAULT 'draft',
                total_sections INTEGER NOT NULL DEFAULT 0,
                total_lessons INTEGER NOT NULL DEFAULT 0,
                total_quizzes INTEGER NOT NULL DEFAULT 0,
                total_duration_minutes INTEGER NOT NULL DEFAULT 0,
                enrollment_count INTEGER NOT NULL DEFAULT 0,
                published_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (instructor_id) REFERENCES users(id)
            );
            CREATE INDEX IF NOT EXISTS idx_courses_instructor ON courses(instructor_id);
            CREATE INDEX IF NOT EXISTS idx_courses_status ON courses(status);
            CREATE INDEX IF NOT EXISTS idx_courses_category ON courses(category);

            CREATE TABLE IF NOT EXISTS sections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                course_id INTEGER NOT NULL,
                title VARCHAR(255) NOT NULL,
                description TEXT,
                sort_order INTEGER NOT NULL DEFAULT 0,
                lesson_count INTEGER NOT NULL DEFAULT 0,
                quiz_count INTEGER NOT NULL DEFAULT 0,
                duration_minutes INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_sections_course ON sections(course_id, sort_order);

            CREATE TABLE IF NOT EXISTS lessons (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                section_id INTEGER NOT NULL,
                course_id INTEGER NOT NULL,
                title VARCHAR(255) NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                content_html TEXT NOT NULL DEFAULT '',
                video_url TEXT,
                duration_minutes INTEGER NOT NULL DEFAULT 0,
                sort_order INTEGER NOT NULL DEFAULT 0,
                is_preview BOOLEAN NOT NULL DEFAULT 0,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (section_id) REFERENCES sections(id) ON DELETE CASCADE,
                FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_lessons_section ON lessons(section_id, sort_order);
            CREATE INDEX IF NOT EXISTS idx_lessons_course ON lessons(course_id);
        "#,
    },
    Migration {
        version: 4,
        name: "create_quizzes",
        up: r#"
            CREATE TABLE IF NOT EXISTS quizzes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                course_id INTEGER NOT NULL,
                section_id INTEGER NOT NULL,
                title VARCHAR(255) NOT NULL,
                description TEXT,
                passing_score INTEGER NOT NULL DEFAULT 70,
                max_attempts INTEGER,
                sort_order INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE,
                FOREIGN KEY (section_id) REFERENCES sections(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_quizzes_section ON quizzes(section_id, sort_order);
            CREATE INDEX IF NOT EXISTS idx_quizzes_course ON quizzes(course_id);

            CREATE TABLE IF NOT EXISTS questions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                quiz_id INTEGER NOT NULL,
                prompt TEXT NOT NULL,
                kind VARCHAR(20) NOT NULL DEFAULT 'single_choice',
                points INTEGER NOT NULL DEFAULT 1,
                explanation TEXT,
                sort_order INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (quiz_id) REFERENCES quizzes(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_questions_quiz ON questions(quiz_id, sort_order);

            CREATE TABLE IF NOT EXISTS answers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                question_id INTEGER NOT NULL,
                text TEXT NOT NULL,
                is_correct BOOLEAN NOT NULL DEFAULT 0,
                sort_order INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (question_id) REFERENCES questions(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_answers_question ON answers(question_id, sort_order);

            CREATE TABLE IF NOT EXISTS quiz_attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                quiz_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                score_percent REAL NOT NULL,
                points_earned INTEGER NOT NULL,
                points_possible INTEGER NOT NULL,
                passed BOOLEAN NOT NULL,
                results TEXT NOT NULL DEFAULT '[]',
                submitted_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (quiz_id) REFERENCES quizzes(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_attempts_quiz_user ON quiz_attempts(quiz_id, user_id);
        "#,
    },
    Migration {
        version: 5,
        name: "create_enrollments",
        up: r#"
            CREATE TABLE IF NOT EXISTS enrollments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                course_id INTEGER NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'active',
                progress_percent REAL NOT NULL DEFAULT 0,
                completed_lessons INTEGER NOT NULL DEFAULT 0,
                completed_quizzes INTEGER NOT NULL DEFAULT 0,
                payment_id INTEGER,
                enrolled_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                completed_at TIMESTAMP,
                last_accessed_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (course_id) REFERENCES courses(id),
                UNIQUE (user_id, course_id)
            );
            CREATE INDEX IF NOT EXISTS idx_enrollments_course ON enrollments(course_id);

            CREATE TABLE IF NOT EXISTS progress (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                enrollment_id INTEGER NOT NULL,
                lesson_id INTEGER,
                quiz_id INTEGER,
                completed_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (enrollment_id) REFERENCES enrollments(id) ON DELETE CASCADE,
                FOREIGN KEY (lesson_id) REFERENCES lessons(id) ON DELETE CASCADE,
                FOREIGN KEY (quiz_id) REFERENCES quizzes(id) ON DELETE CASCADE,
                UNIQUE (enrollment_id, lesson_id),
                UNIQUE (enrollment_id, quiz_id)
            );
            CREATE INDEX IF NOT EXISTS idx_progress_enrollment ON progress(enrollment_id);
        "#,
    },
    Migration {
        version: 6,
        name: "create_payments",
        up: r#"
            CREATE TABLE IF NOT EXISTS payments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                course_id INTEGER NOT NULL,
                amount_cents INTEGER NOT NULL,
                currency VARCHAR(10) NOT NULL,
                platform_fee_cents INTEGER NOT NULL,
                instructor_share_cents INTEGER NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                provider_reference VARCHAR(255),
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                completed_at TIMESTAMP,
                refunded_at TIMESTAMP,
                FOREIGN KEY (user_id) REFERENCES users(id),
                FOREIGN KEY (course_id) REFERENCES courses(id)
            );
            CREATE INDEX IF NOT EXISTS idx_payments_user ON payments(user_id);
            CREATE INDEX IF NOT EXISTS idx_payments_course_status ON payments(course_id, status);
        "#,
    },
    Migration {
        version: 7,
        name: "create_certificates",
        up: r#"
            CREATE TABLE IF NOT EXISTS certificate_templates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name VARCHAR(100) NOT NULL,
                layout TEXT NOT NULL,
                is_default BOOLEAN NOT NULL DEFAULT 0,
                created_by INTEGER,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (created_by) REFERENCES users(id) ON DELETE SET NULL
            );

            CREATE TABLE IF NOT EXISTS certificates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                certificate_number VARCHAR(64) NOT NULL UNIQUE,
                enrollment_id INTEGER NOT NULL UNIQUE,
                user_id INTEGER NOT NULL,
                course_id INTEGER NOT NULL,
                template_id INTEGER,
                student_name VARCHAR(255) NOT NULL,
                course_title VARCHAR(255) NOT NULL,
                instructor_name VARCHAR(255) NOT NULL,
                rendered TEXT NOT NULL,
                issued_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (enrollment_id) REFERENCES enrollments(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (course_id) REFERENCES courses(id),
                FOREIGN KEY (template_id) REFERENCES certificate_templates(id) ON DELETE SET NULL
            );
            CREATE INDEX IF NOT EXISTS idx_certificates_user ON certificates(user_id);
        "#,
    },
    Migration {
        version: 8,
        name: "create_messaging",
        up: r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_a_id INTEGER NOT NULL,
                user_b_id INTEGER NOT NULL,
                course_id INTEGER,
                last_message_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (user_a_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (user_b_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE SET NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_pair
                ON conversations(user_a_id, user_b_id, IFNULL(course_id, 0));
            CREATE INDEX IF NOT EXISTS idx_conversations_user_b ON conversations(user_b_id);

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id INTEGER NOT NULL,
                sender_id INTEGER NOT NULL,
                body TEXT NOT NULL,
                read_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
                FOREIGN KEY (sender_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, created_at);
        "#,
    },
    Migration {
        version: 9,
        name: "create_notifications",
        up: r#"
            CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                kind VARCHAR(20) NOT NULL,
                title VARCHAR(255) NOT NULL,
                body TEXT NOT NULL DEFAULT '',
                link VARCHAR(255),
                is_read BOOLEAN NOT NULL DEFAULT 0,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, is_read);
        "#,
    },
];

/// Run all pending migrations, returning how many were applied.
pub async fn run_migrations(db: &Database) -> Result<usize> {
    create_migrations_table(db).await?;

    let applied = get_applied_migrations(db).await?;
    let applied_versions: Vec<i32> = applied.iter().map(|m| m.version as i32).collect();

    let mut count = 0;

    for migration in MIGRATIONS {
        if !applied_versions.contains(&migration.version) {
            tracing::info!(
                "Applying migration {}: {}",
                migration.version,
                migration.name
            );
            apply_migration(db, migration)
                .await
                .with_context(|| format!("Failed to apply migration: {}", migration.name))?;
            count += 1;
        }
    }

    if count > 0 {
        tracing::info!("Applied {} migration(s)", count);
    } else {
        tracing::debug!("No pending migrations");
    }

    Ok(count)
}

async fn create_migrations_table(db: &Database) -> Result<()> {
    db.execute(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL UNIQUE,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .await?;
    Ok(())
}

async fn get_applied_migrations(db: &Database) -> Result<Vec<MigrationRecord>> {
    let rows = sqlx::query("SELECT version, name, applied_at FROM _migrations ORDER BY version")
        .fetch_all(db.pool())
        .await
        .context("Failed to read applied migrations")?;

    Ok(rows
        .iter()
        .map(|row| MigrationRecord {
            version: row.get("version"),
            name: row.get("name"),
            applied_at: row.get("applied_at"),
        })
        .collect())
}

/// Apply one migration atomically: its statements and its record commit together.
async fn apply_migration(db: &Database, migration: &Migration) -> Result<()> {
    let mut tx = db.begin().await?;

    for statement in split_sql_statements(migration.up) {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
    }

    sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .execute(&mut *tx)
        .await?;

    tx.commit().await.context("Failed to commit migration")?;
    Ok(())
}

fn truncate_sql(sql: &str) -> String {
    match sql.char_indices().nth(100) {
        Some((idx, _)) => format!("{}...", &sql[..idx]),
        None => sql.to_string(),
    }
}

/// Split SQL into individual statements, dropping comment-only fragments
fn split_sql_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty() && !is_comment_only(stmt))
        .collect()
}

fn is_comment_only(s: &str) -> bool {
    s.lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}

/// Number of embedded migrations not yet applied
pub async fn pending_count(db: &Database) -> Result<usize> {
    create_migrations_table(db).await?;
    let applied = get_applied_migrations(db).await?;
    Ok(MIGRATIONS.len().saturating_sub(applied.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    async fn migrated() -> Database {
        let db = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&db).await.expect("Failed to run migrations");
        db
    }

    #[tokio::test]
    async fn test_run_migrations_is_idempotent() {
        let db = create_test_pool().await.expect("Failed to create test pool");

        let count = run_migrations(&db).await.expect("Failed to run migrations");
        assert_eq!(count, MIGRATIONS.len());

        let count = run_migrations(&db).await.expect("Failed to run migrations");
        assert_eq!(count, 0);
        assert_eq!(pending_count(&db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pending_count_before_migrations() {
        let db = create_test_pool().await.expect("Failed to create test pool");
        assert_eq!(pending_count(&db).await.unwrap(), MIGRATIONS.len());
    }

    #[tokio::test]
    async fn test_versions_are_sequential() {
        for (i, migration) in MIGRATIONS.iter().enumerate() {
            assert_eq!(migration.version, i as i32 + 1);
        }
    }

    #[tokio::test]
    async fn test_enrollment_unique_per_student_and_course() {
        let db = migrated().await;
        let pool = db.pool();

        sqlx::query("INSERT INTO users (username, email, password_hash, role) VALUES ('t', 't@x.io', 'h', 'instructor')")
            .execute(pool).await.unwrap();
        sqlx::query("INSERT INTO users (username, email, password_hash) VALUES ('s', 's@x.io', 'h')")
            .execute(pool).await.unwrap();
        sqlx::query("INSERT INTO courses (instructor_id, slug, title) VALUES (1, 'rust', 'Rust')")
            .execute(pool).await.unwrap();

        sqlx::query("INSERT INTO enrollments (user_id, course_id) VALUES (2, 1)")
            .execute(pool).await.unwrap();
        let dup = sqlx::query("INSERT INTO enrollments (user_id, course_id) VALUES (2, 1)")
            .execute(pool).await;
        assert!(dup.is_err());
    }

    #[tokio::test]
    async fn test_conversation_pair_unique_without_course() {
        let db = migrated().await;
        let pool = db.pool();

        for name in ["a", "b"] {
            sqlx::query("INSERT INTO users (username, email, password_hash) VALUES (?, ?, 'h')")
                .bind(name)
                .bind(format!("{}@x.io", name))
                .execute(pool).await.unwrap();
        }

        sqlx::query("INSERT INTO conversations (user_a_id, user_b_id) VALUES (1, 2)")
            .execute(pool).await.unwrap();
        let dup = sqlx::query("INSERT INTO conversations (user_a_id, user_b_id) VALUES (1, 2)")
            .execute(pool).await;
        assert!(dup.is_err());
    }

    #[tokio::test]
    async fn test_session_foreign_key_enforced() {
        let db = migrated().await;

        let result = sqlx::query(
            "INSERT INTO sessions (id, user_id, expires_at) VALUES ('s', 999, datetime('now', '+1 day'))",
        )
        .execute(db.pool())
        .await;

        assert!(result.is_err());
    }

    #[test]
    fn test_split_sql_statements() {
        let statements = split_sql_statements("CREATE TABLE a (id INT); CREATE TABLE b (id INT);");
        assert_eq!(statements.len(), 2);

        let statements = split_sql_statements("-- Comment\nCREATE TABLE a (id INT);\n-- trailing");
        assert_eq!(statements.len(), 1);
    }

    #[test]
    fn test_is_comment_only() {
        assert!(is_comment_only("-- This is a comment"));
        assert!(is_comment_only("-- Line 1\n-- Line 2"));
        assert!(!is_comment_only("CREATE TABLE test"));
        assert!(!is_comment_only("-- Comment\nCREATE TABLE test"));
    }
}
