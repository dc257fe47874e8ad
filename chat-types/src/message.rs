//! Chat message model and the remote row shape it is built from.

use serde::{Deserialize, Serialize};

use crate::error::TypesError;
use crate::ids::{MessageId, Timestamp, UserId};

/// Label shown for the current user's own messages.
pub const SELF_LABEL: &str = "You";

/// Label shown when an author's profile could not be resolved.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Delivery status of a message in the local view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Came from, or was verified against, the remote store.
    Confirmed,
    /// Inserted optimistically, waiting for the durable write.
    Pending,
    /// Durable write rejected; never persisted.
    Failed,
}

/// A chat message as rendered by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server id, or a provisional id for unconfirmed messages.
    pub id: MessageId,
    /// Author-supplied text.
    pub content: String,
    /// Sending user.
    pub author_id: UserId,
    /// Display name or email resolved at fetch time.
    pub author_label: Option<String>,
    /// Server time for confirmed messages, send time for provisional ones.
    pub created_at: Timestamp,
    /// Delivery status.
    pub status: MessageStatus,
}

impl Message {
    /// Build an optimistic message for a local send attempt.
    ///
    /// The content is stored trimmed.
    pub fn pending(author_id: UserId, content: &str, created_at: Timestamp) -> Self {
        Self {
            id: MessageId::provisional(),
            content: content.trim().to_string(),
            author_id,
            author_label: None,
            created_at,
            status: MessageStatus::Pending,
        }
    }

    /// Build a confirmed message from a fetched row.
    pub fn from_row(row: MessageRow) -> Result<Self, TypesError> {
        let id = MessageId::from_server(row.id)?;
        let author_label = row.profiles.into_iter().next().map(|p| p.email);
        Ok(Self {
            id,
            content: row.content,
            author_id: row.user_id,
            author_label,
            created_at: row.created_at,
            status: MessageStatus::Confirmed,
        })
    }

    /// Whether the given user wrote this message.
    ///
    /// Derived at render time; never stored on the message.
    pub fn is_from(&self, user: Option<&UserId>) -> bool {
        user.is_some_and(|u| *u == self.author_id)
    }

    /// Sender label for rendering: "You", the profile email, or "Unknown".
    pub fn display_label(&self, current_user: Option<&UserId>) -> &str {
        if self.is_from(current_user) {
            SELF_LABEL
        } else {
            self.author_label.as_deref().unwrap_or(UNKNOWN_LABEL)
        }
    }

    /// Whether the message is waiting for its durable write.
    pub fn is_pending(&self) -> bool {
        self.status == MessageStatus::Pending
    }
}

/// Author profile joined onto a message row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Author email, used as display label.
    pub email: String,
}

/// A row of the remote `messages` table, joined with author profiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRow {
    /// Server-assigned id.
    pub id: String,
    /// Message text.
    pub content: String,
    /// Server insert time.
    pub created_at: Timestamp,
    /// Author id.
    pub user_id: UserId,
    /// Joined profile rows; the first one labels the author.
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, email: Option<&str>) -> MessageRow {
        MessageRow {
            id: id.to_string(),
            content: "hi class".to_string(),
            created_at: Timestamp::from_millis(1_700_000_000_000),
            user_id: UserId::new("instructor-1"),
            profiles: email
                .map(|e| {
                    vec![Profile {
                        email: e.to_string(),
                    }]
                })
                .unwrap_or_default(),
        }
    }

    #[test]
    fn pending_message_trims_and_is_provisional() {
        let msg = Message::pending(UserId::new("u1"), "  hello  ", Timestamp::from_millis(5));
        assert_eq!(msg.content, "hello");
        assert!(msg.id.is_provisional());
        assert!(msg.is_pending());
        assert!(msg.author_label.is_none());
    }

    #[test]
    fn row_becomes_confirmed_message() {
        let msg = Message::from_row(row("m-1", Some("ms.frizzle@school.edu"))).unwrap();
        assert_eq!(msg.status, MessageStatus::Confirmed);
        assert_eq!(msg.author_label.as_deref(), Some("ms.frizzle@school.edu"));
        assert_eq!(msg.id.as_str(), "m-1");
    }

    #[test]
    fn row_with_provisional_id_is_rejected() {
        assert!(Message::from_row(row("temp-99", None)).is_err());
    }

    #[test]
    fn display_label_prefers_self() {
        let msg = Message::from_row(row("m-1", Some("ms.frizzle@school.edu"))).unwrap();
        let me = UserId::new("instructor-1");
        let other = UserId::new("student-3");

        assert_eq!(msg.display_label(Some(&me)), "You");
        assert_eq!(msg.display_label(Some(&other)), "ms.frizzle@school.edu");
        assert_eq!(msg.display_label(None), "ms.frizzle@school.edu");
    }

    #[test]
    fn display_label_falls_back_to_unknown() {
        let msg = Message::from_row(row("m-2", None)).unwrap();
        assert_eq!(msg.display_label(None), "Unknown");
    }

    #[test]
    fn row_parses_joined_profile_shape() {
        let json = r#"{
            "id": "m-9",
            "content": "quiz tomorrow",
            "created_at": 1700000000123,
            "user_id": "instructor-1",
            "profiles": [{ "email": "t@school.edu" }]
        }"#;
        let row: MessageRow = serde_json::from_str(json).unwrap();
        assert_eq!(row.created_at.as_millis(), 1_700_000_000_123);
        assert_eq!(row.profiles[0].email, "t@school.edu");
    }

    #[test]
    fn row_without_profiles_defaults_to_empty() {
        let json = r#"{"id":"m-1","content":"x","created_at":1,"user_id":"u"}"#;
        let row: MessageRow = serde_json::from_str(json).unwrap();
        assert!(row.profiles.is_empty());
    }
}
