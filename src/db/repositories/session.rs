//! Session repository
//!
//! Database operations for login sessions.

use crate::db::Database;
use crate::models::Session;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::sync::Arc;

/// Session repository trait
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Create a new session
    async fn create(&self, session: &Session) -> Result<Session>;

    /// Get session by ID (token)
    async fn get_by_id(&self, id: &str) -> Result<Option<Session>>;

    /// Delete a session
    async fn delete(&self, id: &str) -> Result<()>;

    /// Delete all sessions for a user
    async fn delete_by_user(&self, user_id: i64) -> Result<()>;

    /// Delete all sessions for a user except `keep_id`
    async fn delete_others(&self, user_id: i64, keep_id: &str) -> Result<u64>;

    /// Delete expired sessions, returning how many were removed
    async fn delete_expired(&self) -> Result<u64>;
}

/// SQLx-based session repository implementation
pub struct SqlxSessionRepository {
    db: Database,
}

impl SqlxSessionRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn boxed(db: Database) -> Arc<dyn SessionRepository> {
        Arc::new(Self::new(db))
    }
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn create(&self, session: &Session) -> Result<Session> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, expires_at, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(session.user_id)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(self.db.pool())
        .await
        .context("Failed to create session")?;

        Ok(session.clone())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(
            "SELECT id, user_id, expires_at, created_at FROM sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .context("Failed to get session by ID")?;

        Ok(row.as_ref().map(row_to_session))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await
            .context("Failed to delete session")?;
        Ok(())
    }

    async fn delete_by_user(&self, user_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE user_id = ?")
            .bind(user_id)
            .execute(self.db.pool())
            .await
            .context("Failed to delete sessions by user")?;
        Ok(())
    }

    async fn delete_others(&self, user_id: i64, keep_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = ? AND id <> ?")
            .bind(user_id)
            .bind(keep_id)
            .execute(self.db.pool())
            .await
            .context("Failed to delete other sessions")?;
        Ok(result.rows_affected())
    }

    async fn delete_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
            .bind(Utc::now())
            .execute(self.db.pool())
            .await
            .context("Failed to delete expired sessions")?;
        Ok(result.rows_affected())
    }
}

fn row_to_session(row: &SqliteRow) -> Session {
    Session {
        id: row.get("id"),
        user_id: row.get("user_id"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::{insert_user, setup_db};
    use crate::models::UserRole;
    use chrono::Duration;
    use uuid::Uuid;

    fn session_for(user_id: i64, days: i64) -> Session {
        Session::new(Uuid::new_v4().to_string(), user_id, days)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let db = setup_db().await;
        let user_id = insert_user(&db, "ada", UserRole::Student).await;
        let repo = SqlxSessionRepository::new(db);

        let session = repo.create(&session_for(user_id, 7)).await.unwrap();
        let found = repo.get_by_id(&session.id).await.unwrap().unwrap();
        assert_eq!(found.user_id, user_id);
        assert!(!found.is_expired());

        assert!(repo.get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_expired_keeps_live_sessions() {
        let db = setup_db().await;
        let user_id = insert_user(&db, "ada", UserRole::Student).await;
        let repo = SqlxSessionRepository::new(db);

        let live = repo.create(&session_for(user_id, 7)).await.unwrap();
        let mut stale = session_for(user_id, 7);
        stale.expires_at = Utc::now() - Duration::hours(1);
        repo.create(&stale).await.unwrap();

        assert_eq!(repo.delete_expired().await.unwrap(), 1);
        assert!(repo.get_by_id(&live.id).await.unwrap().is_some());
        assert!(repo.get_by_id(&stale.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_others() {
        let db = setup_db().await;
        let user_id = insert_user(&db, "ada", UserRole::Student).await;
        let repo = SqlxSessionRepository::new(db);

        let keep = repo.create(&session_for(user_id, 7)).await.unwrap();
        repo.create(&session_for(user_id, 7)).await.unwrap();
        repo.create(&session_for(user_id, 7)).await.unwrap();

        assert_eq!(repo.delete_others(user_id, &keep.id).await.unwrap(), 2);
        assert!(repo.get_by_id(&keep.id).await.unwrap().is_some());

        repo.delete_by_user(user_id).await.unwrap();
        assert!(repo.get_by_id(&keep.id).await.unwrap().is_none());
    }
}
