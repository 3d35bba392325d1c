//! Notification repository

use crate::db::Database;
use crate::models::{NewNotification, Notification, NotificationKind};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::str::FromStr;
use std::sync::Arc;

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn create(&self, notification: &NewNotification) -> Result<Notification>;

    /// Notifications of a user, newest first
    async fn list(
        &self,
        user_id: i64,
        unread_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Notification>, i64)>;

    async fn unread_count(&self, user_id: i64) -> Result<i64>;

    /// Returns false when the notification does not belong to the user
    async fn mark_read(&self, user_id: i64, id: i64) -> Result<bool>;

    async fn mark_all_read(&self, user_id: i64) -> Result<u64>;

    /// Returns false when the notification does not belong to the user
    async fn delete(&self, user_id: i64, id: i64) -> Result<bool>;
}

pub struct SqlxNotificationRepository {
    db: Database,
}

impl SqlxNotificationRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn boxed(db: Database) -> Arc<dyn NotificationRepository> {
        Arc::new(Self::new(db))
    }
}

#[async_trait]
impl NotificationRepository for SqlxNotificationRepository {
    async fn create(&self, notification: &NewNotification) -> Result<Notification> {
        let mut conn = self
            .db
            .pool()
            .acquire()
            .await
            .context("Failed to acquire connection")?;
        let id = insert_notification(&mut conn, notification).await?;
        drop(conn);

        let row = sqlx::query(&format!("SELECT {} FROM notifications WHERE id = ?", COLUMNS))
            .bind(id)
            .fetch_one(self.db.pool())
            .await
            .context("Failed to load notification")?;
        row_to_notification(&row)
    }

    async fn list(
        &self,
        user_id: i64,
        unread_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Notification>, i64)> {
        let sql = format!(
            r#"
            SELECT {} FROM notifications
            WHERE user_id = ?1 AND (?2 = 0 OR is_read = 0)
            ORDER BY created_at DESC, id DESC
            LIMIT ?3 OFFSET ?4
            "#,
            COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(unread_only)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.db.pool())
            .await
            .context("Failed to list notifications")?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND (?2 = 0 OR is_read = 0)",
        )
        .bind(user_id)
        .bind(unread_only)
        .fetch_one(self.db.pool())
        .await
        .context("Failed to count notifications")?;

        let items = rows.iter().map(row_to_notification).collect::<Result<Vec<_>>>()?;
        Ok((items, total))
    }

    async fn unread_count(&self, user_id: i64) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = ? AND is_read = 0")
                .bind(user_id)
                .fetch_one(self.db.pool())
                .await
                .context("Failed to count unread notifications")?;
        Ok(count)
    }

    async fn mark_read(&self, user_id: i64, id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(self.db.pool())
            .await
            .context("Failed to mark notification read")?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_read(&self, user_id: i64) -> Result<u64> {
        let result =
            sqlx::query("UPDATE notifications SET is_read = 1 WHERE user_id = ? AND is_read = 0")
                .bind(user_id)
                .execute(self.db.pool())
                .await
                .context("Failed to mark notifications read")?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, user_id: i64, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(self.db.pool())
            .await
            .context("Failed to delete notification")?;
        Ok(result.rows_affected() > 0)
    }
}

const COLUMNS: &str = "id, user_id, kind, title, body, link, is_read, created_at";

/// Insert a notification on an existing connection or transaction
pub(crate) async fn insert_notification(
    conn: &mut SqliteConnection,
    notification: &NewNotification,
) -> Result<i64> {
    let id = sqlx::query(
        r#"
        INSERT INTO notifications (user_id, kind, title, body, link, is_read, created_at)
        VALUES (?, ?, ?, ?, ?, 0, ?)
        "#,
    )
    .bind(notification.user_id)
    .bind(notification.kind.to_string())
    .bind(&notification.title)
    .bind(&notification.body)
    .bind(&notification.link)
    .bind(Utc::now())
    .execute(conn)
    .await
    .context("Failed to create notification")?
    .last_insert_rowid();
    Ok(id)
}

fn row_to_notification(row: &SqliteRow) -> Result<Notification> {
    let kind: String = row.get("kind");
    Ok(Notification {
        id: row.get("id"),
        user_id: row.get("user_id"),
        kind: NotificationKind::from_str(&kind)?,
        title: row.get("title"),
        body: row.get("body"),
        link: row.get("link"),
        is_read: row.get("is_read"),
        created_at: row.get("created_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::*;
    use crate::models::UserRole;

    async fn setup() -> (SqlxNotificationRepository, i64, i64) {
        let db = setup_db().await;
        let alice = insert_user(&db, "alice", UserRole::Student).await;
        let bob = insert_user(&db, "bob", UserRole::Student).await;
        (SqlxNotificationRepository::new(db), alice, bob)
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let (repo, alice, _bob) = setup().await;
        let created = repo
            .create(&NewNotification::new(alice, NotificationKind::System, "Welcome").body("hi"))
            .await
            .unwrap();
        assert_eq!(created.kind, NotificationKind::System);
        assert!(!created.is_read);

        repo.create(&NewNotification::new(alice, NotificationKind::Quiz, "Passed"))
            .await
            .unwrap();

        let (items, total) = repo.list(alice, false, 10, 0).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(items[0].title, "Passed");
    }

    #[tokio::test]
    async fn test_read_flags_and_ownership() {
        let (repo, alice, bob) = setup().await;
        let n1 = repo
            .create(&NewNotification::new(alice, NotificationKind::System, "one"))
            .await
            .unwrap();
        repo.create(&NewNotification::new(alice, NotificationKind::System, "two"))
            .await
            .unwrap();

        assert!(!repo.mark_read(bob, n1.id).await.unwrap());
        assert!(repo.mark_read(alice, n1.id).await.unwrap());
        assert_eq!(repo.unread_count(alice).await.unwrap(), 1);

        let (unread, total) = repo.list(alice, true, 10, 0).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(unread[0].title, "two");

        assert_eq!(repo.mark_all_read(alice).await.unwrap(), 1);
        assert_eq!(repo.unread_count(alice).await.unwrap(), 0);

        assert!(!repo.delete(bob, n1.id).await.unwrap());
        assert!(repo.delete(alice, n1.id).await.unwrap());
    }
}
