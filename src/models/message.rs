//! Direct messaging models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest accepted message body, in characters
pub const MAX_MESSAGE_LENGTH: usize = 5000;

/// A two-party conversation. `user_a_id` is always the lower user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub user_a_id: i64,
    pub user_b_id: i64,
    pub course_id: Option<i64>,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_participant(&self, user_id: i64) -> bool {
        self.user_a_id == user_id || self.user_b_id == user_id
    }

    /// The participant that is not `user_id`
    pub fn other_participant(&self, user_id: i64) -> i64 {
        if self.user_a_id == user_id {
            self.user_b_id
        } else {
            self.user_a_id
        }
    }
}

/// Order a pair of user ids the way conversations store them
pub fn ordered_pair(a: i64, b: i64) -> (i64, i64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub body: String,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Conversation list entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: i64,
    pub course_id: Option<i64>,
    pub other_user_id: i64,
    pub other_user_name: String,
    pub last_message: Option<String>,
    pub last_message_at: DateTime<Utc>,
    pub unread_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageInput {
    pub recipient_id: i64,
    #[serde(default)]
    pub course_id: Option<i64>,
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_pair() {
        assert_eq!(ordered_pair(5, 2), (2, 5));
        assert_eq!(ordered_pair(2, 5), (2, 5));
    }

    #[test]
    fn test_other_participant() {
        let now = Utc::now();
        let conv = Conversation {
            id: 1,
            user_a_id: 2,
            user_b_id: 5,
            course_id: None,
            last_message_at: now,
            created_at: now,
        };
        assert_eq!(conv.other_participant(2), 5);
        assert_eq!(conv.other_participant(5), 2);
        assert!(conv.has_participant(5));
        assert!(!conv.has_participant(3));
    }
}
