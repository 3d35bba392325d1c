//! User repository
//!
//! Database operations for users.
//!
//! This module provides:
//! - `UserRepository` trait defining the interface for user data access
//! - `SqlxUserRepository` implementing the trait on SQLite

use crate::db::Database;
use crate::models::{User, UserRole, UserStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

/// User repository trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a new user
    async fn create(&self, user: &User) -> Result<User>;

    /// Get user by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<User>>;

    /// Get user by username
    async fn get_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Get user by email
    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Update a user
    async fn update(&self, user: &User) -> Result<User>;

    /// Count total users
    async fn count(&self) -> Result<i64>;

    /// Number of users per role
    async fn count_by_role(&self) -> Result<Vec<(UserRole, i64)>>;

    /// List users with pagination, optionally filtered by role
    async fn list(
        &self,
        page: i64,
        per_page: i64,
        role: Option<UserRole>,
    ) -> Result<(Vec<User>, i64)>;
}

/// SQLx-based user repository implementation
pub struct SqlxUserRepository {
    db: Database,
}

impl SqlxUserRepository {
    /// Create a new SQLx user repository
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(db: Database) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(db))
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, user: &User) -> Result<User> {
        create_user(self.db.pool(), user).await
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        get_user_by(self.db.pool(), "id = ?", id.to_string()).await
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        get_user_by(self.db.pool(), "username = ?", username.to_string()).await
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        get_user_by(self.db.pool(), "LOWER(email) = LOWER(?)", email.to_string()).await
    }

    async fn update(&self, user: &User) -> Result<User> {
        update_user(self.db.pool(), user).await
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(self.db.pool())
            .await
            .context("Failed to count users")?;
        Ok(count)
    }

    async fn count_by_role(&self) -> Result<Vec<(UserRole, i64)>> {
        count_users_by_role(self.db.pool()).await
    }

    async fn list(
        &self,
        page: i64,
        per_page: i64,
        role: Option<UserRole>,
    ) -> Result<(Vec<User>, i64)> {
        list_users(self.db.pool(), page, per_page, role).await
    }
}

const USER_COLUMNS: &str = "id, username, email, password_hash, display_name, bio, role, status, created_at, updated_at";

async fn create_user(pool: &SqlitePool, user: &User) -> Result<User> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO users (username, email, password_hash, display_name, bio, role, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&user.username)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(&user.display_name)
    .bind(&user.bio)
    .bind(user.role.to_string())
    .bind(user.status.to_string())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create user")?;

    let id = result.last_insert_rowid();
    get_user_by(pool, "id = ?", id.to_string())
        .await?
        .ok_or_else(|| anyhow::anyhow!("User not found after insert"))
}

/// Look up a single user by one column. The value is bound as text, which
/// SQLite compares against integer ids through type affinity.
async fn get_user_by(pool: &SqlitePool, condition: &str, value: String) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE {}", USER_COLUMNS, condition);
    let row = sqlx::query(&sql)
        .bind(value)
        .fetch_optional(pool)
        .await
        .context("Failed to get user")?;

    row.map(|r| row_to_user(&r)).transpose()
}

async fn update_user(pool: &SqlitePool, user: &User) -> Result<User> {
    sqlx::query(
        r#"
        UPDATE users
        SET username = ?, email = ?, password_hash = ?, display_name = ?, bio = ?,
            role = ?, status = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&user.username)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(&user.display_name)
    .bind(&user.bio)
    .bind(user.role.to_string())
    .bind(user.status.to_string())
    .bind(Utc::now())
    .bind(user.id)
    .execute(pool)
    .await
    .context("Failed to update user")?;

    get_user_by(pool, "id = ?", user.id.to_string())
        .await?
        .ok_or_else(|| anyhow::anyhow!("User not found after update"))
}

async fn count_users_by_role(pool: &SqlitePool) -> Result<Vec<(UserRole, i64)>> {
    let rows = sqlx::query("SELECT role, COUNT(*) AS count FROM users GROUP BY role ORDER BY role")
        .fetch_all(pool)
        .await
        .context("Failed to count users by role")?;

    rows.iter()
        .map(|row| {
            let role: String = row.get("role");
            let role = UserRole::from_str(&role)
                .with_context(|| format!("Invalid role in database: {}", role))?;
            Ok((role, row.get("count")))
        })
        .collect()
}

async fn list_users(
    pool: &SqlitePool,
    page: i64,
    per_page: i64,
    role: Option<UserRole>,
) -> Result<(Vec<User>, i64)> {
    let offset = (page.max(1) - 1) * per_page;
    let role = role.map(|r| r.to_string());

    let sql = format!(
        "SELECT {} FROM users WHERE (? IS NULL OR role = ?) ORDER BY id LIMIT ? OFFSET ?",
        USER_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(&role)
        .bind(&role)
        .bind(per_page)
        .bind(offset)
        .fetch_all(pool)
        .await
        .context("Failed to list users")?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE (? IS NULL OR role = ?)")
        .bind(&role)
        .bind(&role)
        .fetch_one(pool)
        .await
        .context("Failed to count users")?;

    let users = rows.iter().map(row_to_user).collect::<Result<Vec<_>>>()?;
    Ok((users, total))
}

fn row_to_user(row: &SqliteRow) -> Result<User> {
    let role_str: String = row.get("role");
    let role = UserRole::from_str(&role_str)
        .with_context(|| format!("Invalid role in database: {}", role_str))?;

    let status_str: String = row.get("status");
    let status = UserStatus::from_str(&status_str).unwrap_or_default();

    Ok(User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        display_name: row.get("display_name"),
        bio: row.get("bio"),
        role,
        status,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::setup_db;

    fn new_user(name: &str, role: UserRole) -> User {
        User::new(
            name.to_string(),
            format!("{}@example.com", name),
            "hash".to_string(),
            role,
        )
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let repo = SqlxUserRepository::new(setup_db().await);

        let created = repo.create(&new_user("ada", UserRole::Instructor)).await.unwrap();
        assert!(created.id > 0);
        assert_eq!(created.role, UserRole::Instructor);

        let by_id = repo.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(by_id.username, "ada");

        let by_name = repo.get_by_username("ada").await.unwrap();
        assert!(by_name.is_some());

        let by_email = repo.get_by_email("ADA@example.com").await.unwrap();
        assert_eq!(by_email.unwrap().id, created.id);

        assert!(repo.get_by_username("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username_fails() {
        let repo = SqlxUserRepository::new(setup_db().await);
        repo.create(&new_user("ada", UserRole::Student)).await.unwrap();

        let mut dup = new_user("ada", UserRole::Student);
        dup.email = "other@example.com".to_string();
        assert!(repo.create(&dup).await.is_err());
    }

    #[tokio::test]
    async fn test_update_profile_fields() {
        let repo = SqlxUserRepository::new(setup_db().await);
        let mut user = repo.create(&new_user("ada", UserRole::Student)).await.unwrap();

        user.display_name = Some("Ada Lovelace".to_string());
        user.bio = Some("Analyst".to_string());
        user.status = UserStatus::Banned;
        let updated = repo.update(&user).await.unwrap();

        assert_eq!(updated.display_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(updated.bio.as_deref(), Some("Analyst"));
        assert_eq!(updated.status, UserStatus::Banned);
    }

    #[tokio::test]
    async fn test_list_and_count_by_role() {
        let repo = SqlxUserRepository::new(setup_db().await);
        repo.create(&new_user("admin", UserRole::Admin)).await.unwrap();
        repo.create(&new_user("t1", UserRole::Instructor)).await.unwrap();
        for i in 0..3 {
            repo.create(&new_user(&format!("s{}", i), UserRole::Student)).await.unwrap();
        }

        assert_eq!(repo.count().await.unwrap(), 5);

        let (students, total) = repo.list(1, 2, Some(UserRole::Student)).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(students.len(), 2);

        let (all, total) = repo.list(1, 50, None).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(all.len(), 5);

        let counts = repo.count_by_role().await.unwrap();
        assert!(counts.contains(&(UserRole::Student, 3)));
        assert!(counts.contains(&(UserRole::Admin, 1)));
    }
}
