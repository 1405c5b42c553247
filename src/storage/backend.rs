//! Backend traits for user and message persistence.
//!
//! The presence subsystem only needs `find_user_by_id` and
//! `update_user_last_seen`; the message service uses the rest.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::postgres::PostgresPoolError;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{0} not found")]
    NotFound(String),

    /// A message with this client id was already stored for the sender
    #[error("Duplicate message {client_message_id} from {sender_id}")]
    DuplicateMessage {
        sender_id: String,
        client_message_id: String,
    },

    #[error("A user with email {0} already exists")]
    DuplicateUser(String),

    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] PostgresPoolError),

    /// Backend is temporarily unavailable
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub profile_pic: Option<String>,
    /// `None` while the user is online (or has never connected)
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    /// Explicit id, or `None` to have one generated
    pub id: Option<String>,
    pub full_name: String,
    pub email: String,
    pub profile_pic: Option<String>,
}

/// A persisted direct message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: Uuid,
    pub sender_id: String,
    pub receiver_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub videos: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MessageRecord {
    /// Whether `user_id` is one of the two participants
    pub fn involves(&self, user_id: &str) -> bool {
        self.sender_id == user_id || self.receiver_id == user_id
    }
}

/// Input for `MessageStore::create_message`. Media entries are public URLs.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub sender_id: String,
    pub receiver_id: String,
    pub text: Option<String>,
    pub images: Vec<String>,
    pub videos: Vec<String>,
    pub client_message_id: Option<String>,
}

impl NewMessage {
    pub(crate) fn into_record(self) -> MessageRecord {
        let now = Utc::now();
        MessageRecord {
            id: Uuid::new_v4(),
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            text: self.text,
            images: self.images,
            videos: self.videos,
            client_message_id: self.client_message_id,
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, user: NewUser) -> Result<User, StorageError>;

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, StorageError>;

    /// Every user except `user_id` (the chat sidebar)
    async fn list_users_except(&self, user_id: &str) -> Result<Vec<User>, StorageError>;

    /// Persist presence: `None` marks the user online, `Some(t)` last seen at `t`
    async fn update_user_last_seen(
        &self,
        user_id: &str,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message. Fails with `DuplicateMessage` if the sender already
    /// stored one with the same client message id.
    async fn create_message(&self, message: NewMessage) -> Result<MessageRecord, StorageError>;

    async fn find_message(&self, id: Uuid) -> Result<Option<MessageRecord>, StorageError>;

    async fn find_message_by_client_id(
        &self,
        sender_id: &str,
        client_message_id: &str,
    ) -> Result<Option<MessageRecord>, StorageError>;

    /// Both directions between two users, oldest first
    async fn list_conversation(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<Vec<MessageRecord>, StorageError>;

    /// Returns false if there was nothing to delete
    async fn delete_message(&self, id: Uuid) -> Result<bool, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_record_wire_format() {
        let record = NewMessage {
            sender_id: "a".into(),
            receiver_id: "b".into(),
            text: Some("hi".into()),
            ..Default::default()
        }
        .into_record();

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["senderId"], "a");
        assert_eq!(value["receiverId"], "b");
        assert_eq!(value["text"], "hi");
        assert!(value["images"].as_array().unwrap().is_empty());
        assert!(value.get("clientMessageId").is_none());
        assert!(value.get("createdAt").is_some());

        assert!(record.involves("a"));
        assert!(record.involves("b"));
        assert!(!record.involves("c"));
    }
}
