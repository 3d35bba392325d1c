//! Messaging repository
//!
//! Conversations and messages. Sending is a single transaction that finds
//! or creates the conversation, stores the message, bumps the conversation
//! and queues a notification for the recipient.

use super::notification::insert_notification;
use crate::db::Database;
use crate::models::{
    ordered_pair, Conversation, ConversationSummary, Message, NewNotification,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Store a message from `sender_id` to `recipient_id` and notify the
    /// recipient, all or nothing.
    async fn send(
        &self,
        sender_id: i64,
        recipient_id: i64,
        course_id: Option<i64>,
        body: &str,
        notification: &NewNotification,
    ) -> Result<(Conversation, Message)>;

    async fn get_conversation(&self, id: i64) -> Result<Option<Conversation>>;

    /// Conversations of a user, most recent activity first
    async fn list_conversations(&self, user_id: i64) -> Result<Vec<ConversationSummary>>;

    /// Messages oldest first, paginated
    async fn list_messages(
        &self,
        conversation_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Message>, i64)>;

    /// Mark every message in the conversation not sent by `reader_id` as read
    async fn mark_read(&self, conversation_id: i64, reader_id: i64) -> Result<u64>;
}

pub struct SqlxMessageRepository {
    db: Database,
}

impl SqlxMessageRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn boxed(db: Database) -> Arc<dyn MessageRepository> {
        Arc::new(Self::new(db))
    }
}

#[async_trait]
impl MessageRepository for SqlxMessageRepository {
    async fn send(
        &self,
        sender_id: i64,
        recipient_id: i64,
        course_id: Option<i64>,
        body: &str,
        notification: &NewNotification,
    ) -> Result<(Conversation, Message)> {
        let (user_a, user_b) = ordered_pair(sender_id, recipient_id);
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO conversations (user_a_id, user_b_id, course_id, last_message_at, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_a)
        .bind(user_b)
        .bind(course_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to create conversation")?;

        let conversation_id: i64 = sqlx::query_scalar(
            r#"
            SELECT id FROM conversations
            WHERE user_a_id = ? AND user_b_id = ? AND IFNULL(course_id, 0) = IFNULL(?, 0)
            "#,
        )
        .bind(user_a)
        .bind(user_b)
        .bind(course_id)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to find conversation")?;

        let message_id = sqlx::query(
            "INSERT INTO messages (conversation_id, sender_id, body, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(conversation_id)
        .bind(sender_id)
        .bind(body)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to store message")?
        .last_insert_rowid();

        sqlx::query("UPDATE conversations SET last_message_at = ? WHERE id = ?")
            .bind(now)
            .bind(conversation_id)
            .execute(&mut *tx)
            .await
            .context("Failed to update conversation")?;

        let mut notification = notification.clone();
        notification.link = Some(format!("/conversations/{}", conversation_id));
        insert_notification(&mut tx, &notification).await?;

        tx.commit().await.context("Failed to commit message")?;

        let conversation = get_conversation_by_id(self.db.pool(), conversation_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Conversation not found after send"))?;

        Ok((
            conversation,
            Message {
                id: message_id,
                conversation_id,
                sender_id,
                body: body.to_string(),
                read_at: None,
                created_at: now,
            },
        ))
    }

    async fn get_conversation(&self, id: i64) -> Result<Option<Conversation>> {
        get_conversation_by_id(self.db.pool(), id).await
    }

    async fn list_conversations(&self, user_id: i64) -> Result<Vec<ConversationSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.course_id, c.last_message_at,
                   CASE WHEN c.user_a_id = ?1 THEN c.user_b_id ELSE c.user_a_id END AS other_user_id,
                   COALESCE(NULLIF(TRIM(u.display_name), ''), u.username) AS other_user_name,
                   (SELECT m.body FROM messages m WHERE m.conversation_id = c.id
                    ORDER BY m.created_at DESC, m.id DESC LIMIT 1) AS last_message,
                   (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id
                    AND m.sender_id <> ?1 AND m.read_at IS NULL) AS unread_count
            FROM conversations c
            JOIN users u ON u.id = CASE WHEN c.user_a_id = ?1 THEN c.user_b_id ELSE c.user_a_id END
            WHERE c.user_a_id = ?1 OR c.user_b_id = ?1
            ORDER BY c.last_message_at DESC, c.id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.db.pool())
        .await
        .context("Failed to list conversations")?;

        Ok(rows
            .iter()
            .map(|row| ConversationSummary {
                id: row.get("id"),
                course_id: row.get("course_id"),
                other_user_id: row.get("other_user_id"),
                other_user_name: row.get("other_user_name"),
                last_message: row.get("last_message"),
                last_message_at: row.get("last_message_at"),
                unread_count: row.get("unread_count"),
            })
            .collect())
    }

    async fn list_messages(
        &self,
        conversation_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Message>, i64)> {
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, sender_id, body, read_at, created_at
            FROM messages WHERE conversation_id = ?
            ORDER BY created_at, id
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(conversation_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.pool())
        .await
        .context("Failed to list messages")?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE conversation_id = ?")
            .bind(conversation_id)
            .fetch_one(self.db.pool())
            .await
            .context("Failed to count messages")?;

        Ok((rows.iter().map(row_to_message).collect(), total))
    }

    async fn mark_read(&self, conversation_id: i64, reader_id: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE messages SET read_at = ?
            WHERE conversation_id = ? AND sender_id <> ? AND read_at IS NULL
            "#,
        )
        .bind(Utc::now())
        .bind(conversation_id)
        .bind(reader_id)
        .execute(self.db.pool())
        .await
        .context("Failed to mark messages read")?;
        Ok(result.rows_affected())
    }
}

async fn get_conversation_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Conversation>> {
    let row = sqlx::query(
        "SELECT id, user_a_id, user_b_id, course_id, last_message_at, created_at FROM conversations WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get conversation")?;

    Ok(row.map(|row| Conversation {
        id: row.get("id"),
        user_a_id: row.get("user_a_id"),
        user_b_id: row.get("user_b_id"),
        course_id: row.get("course_id"),
        last_message_at: row.get("last_message_at"),
        created_at: row.get("created_at"),
    }))
}

fn row_to_message(row: &SqliteRow) -> Message {
    Message {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        sender_id: row.get("sender_id"),
        body: row.get("body"),
        read_at: row.get("read_at"),
        created_at: row.get("created_at"),
    }
}
