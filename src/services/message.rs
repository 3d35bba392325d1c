//! Message service
//!
//! Direct messages between two users, optionally about a course.

use crate::db::repositories::{CourseRepository, MessageRepository, UserRepository};
use crate::models::{
    ConversationSummary, ListParams, Message, NewNotification, NotificationKind, PagedResult,
    SendMessageInput, User, MAX_MESSAGE_LENGTH,
};
use anyhow::Context;
use std::sync::Arc;

const PREVIEW_LENGTH: usize = 120;

#[derive(Debug, thiserror::Error)]
pub enum MessageServiceError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct MessageService {
    message_repo: Arc<dyn MessageRepository>,
    user_repo: Arc<dyn UserRepository>,
    course_repo: Arc<dyn CourseRepository>,
}

impl MessageService {
    pub fn new(
        message_repo: Arc<dyn MessageRepository>,
        user_repo: Arc<dyn UserRepository>,
        course_repo: Arc<dyn CourseRepository>,
    ) -> Self {
        Self {
            message_repo,
            user_repo,
            course_repo,
        }
    }

    /// Send a message, creating the conversation on first contact.
    /// The recipient is notified in the same transaction.
    pub async fn send_message(
        &self,
        sender: &User,
        input: SendMessageInput,
    ) -> Result<Message, MessageServiceError> {
        let body = input.body.trim();
        if body.is_empty() {
            return Err(MessageServiceError::ValidationError(
                "Message cannot be empty".to_string(),
            ));
        }
        if body.chars().count() > MAX_MESSAGE_LENGTH {
            return Err(MessageServiceError::ValidationError(format!(
                "Message is longer than {} characters",
                MAX_MESSAGE_LENGTH
            )));
        }
        if input.recipient_id == sender.id {
            return Err(MessageServiceError::ValidationError(
                "You cannot message yourself".to_string(),
            ));
        }

        let recipient = self
            .user_repo
            .get_by_id(input.recipient_id)
            .await
            .context("Failed to get recipient")?
            .ok_or(MessageServiceError::NotFound("Recipient"))?;

        if let Some(course_id) = input.course_id {
            self.course_repo
                .get_by_id(course_id)
                .await
                .context("Failed to get course")?
                .ok_or(MessageServiceError::NotFound("Course"))?;
        }

        let notification = NewNotification::new(
            recipient.id,
            NotificationKind::Message,
            format!("New message from {}", sender.public_name()),
        )
        .body(preview(body));

        let (conversation, message) = self
            .message_repo
            .send(sender.id, recipient.id, input.course_id, body, &notification)
            .await
            .context("Failed to send message")?;

        tracing::debug!(
            conversation_id = conversation.id,
            sender_id = sender.id,
            "Message sent"
        );
        Ok(message)
    }

    pub async fn list_conversations(&self, user_id: i64) -> Result<Vec<ConversationSummary>, MessageServiceError> {
        Ok(self
            .message_repo
            .list_conversations(user_id)
            .await
            .context("Failed to list conversations")?)
    }

    /// A page of a conversation, oldest first. Reading marks the other
    /// participant's messages as read.
    pub async fn get_messages(
        &self,
        user_id: i64,
        conversation_id: i64,
        params: &ListParams,
    ) -> Result<PagedResult<Message>, MessageServiceError> {
        let conversation = self
            .message_repo
            .get_conversation(conversation_id)
            .await
            .context("Failed to get conversation")?
            .filter(|c| c.has_participant(user_id))
            // Outsiders get the same answer as for a missing conversation
            .ok_or(MessageServiceError::NotFound("Conversation"))?;

        let (items, total) = self
            .message_repo
            .list_messages(conversation.id, params.limit(), params.offset())
            .await
            .context("Failed to list messages")?;

        self.message_repo
            .mark_read(conversation.id, user_id)
            .await
            .context("Failed to mark messages read")?;

        Ok(PagedResult::new(items, total, params))
    }
}

fn preview(body: &str) -> String {
    if body.chars().count() <= PREVIEW_LENGTH {
        return body.to_string();
    }
    let cut: String = body.chars().take(PREVIEW_LENGTH).collect();
    format!("{}...", cut.trim_end())
}
