//! In-memory storage backend.
//!
//! Everything lives in process memory and is lost on restart. Used for
//! development and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::backend::{MessageStore, MessageRecord, NewMessage, NewUser, StorageError, User, UserStore};

pub struct MemoryStorage {
    users: DashMap<String, User>,
    /// Insertion order is creation order
    messages: RwLock<Vec<MessageRecord>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            messages: RwLock::new(Vec::new()),
        }
    }

    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore for MemoryStorage {
    async fn create_user(&self, user: NewUser) -> Result<User, StorageError> {
        if self.users.iter().any(|u| u.email == user.email) {
            return Err(StorageError::DuplicateUser(user.email));
        }

        let record = User {
            id: user.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            full_name: user.full_name,
            email: user.email,
            profile_pic: user.profile_pic,
            last_seen: None,
            created_at: Utc::now(),
        };
        self.users.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, StorageError> {
        Ok(self.users.get(user_id).map(|u| u.clone()))
    }

    async fn list_users_except(&self, user_id: &str) -> Result<Vec<User>, StorageError> {
        let mut users: Vec<User> = self
            .users
            .iter()
            .filter(|u| u.key() != user_id)
            .map(|u| u.value().clone())
            .collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(users)
    }

    async fn update_user_last_seen(
        &self,
        user_id: &str,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        match self.users.get_mut(user_id) {
            Some(mut user) => {
                user.last_seen = last_seen;
                Ok(())
            }
            None => Err(StorageError::NotFound(format!("user {}", user_id))),
        }
    }
}

#[async_trait]
impl MessageStore for MemoryStorage {
    async fn create_message(&self, message: NewMessage) -> Result<MessageRecord, StorageError> {
        let mut messages = self.messages.write().await;

        if let Some(client_id) = &message.client_message_id {
            let exists = messages.iter().any(|m| {
                m.sender_id == message.sender_id && m.client_message_id.as_ref() == Some(client_id)
            });
            if exists {
                return Err(StorageError::DuplicateMessage {
                    sender_id: message.sender_id,
                    client_message_id: client_id.clone(),
                });
            }
        }

        let record = message.into_record();
        messages.push(record.clone());
        Ok(record)
    }

    async fn find_message(&self, id: Uuid) -> Result<Option<MessageRecord>, StorageError> {
        Ok(self.messages.read().await.iter().find(|m| m.id == id).cloned())
    }

    async fn find_message_by_client_id(
        &self,
        sender_id: &str,
        client_message_id: &str,
    ) -> Result<Option<MessageRecord>, StorageError> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .find(|m| {
                m.sender_id == sender_id && m.client_message_id.as_deref() == Some(client_message_id)
            })
            .cloned())
    }

    async fn list_conversation(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<Vec<MessageRecord>, StorageError> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| {
                (m.sender_id == user_a && m.receiver_id == user_b)
                    || (m.sender_id == user_b && m.receiver_id == user_a)
            })
            .cloned()
            .collect())
    }

    async fn delete_message(&self, id: Uuid) -> Result<bool, StorageError> {
        let mut messages = self.messages.write().await;
        let before = messages.len();
        messages.retain(|m| m.id != id);
        Ok(messages.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(name: &str) -> NewUser {
        NewUser {
            id: Some(name.to_string()),
            full_name: name.to_string(),
            email: format!("{}@example.com", name),
            profile_pic: None,
        }
    }

    fn text_message(from: &str, to: &str, text: &str) -> NewMessage {
        NewMessage {
            sender_id: from.into(),
            receiver_id: to.into(),
            text: Some(text.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_last_seen_round_trip() {
        let store = MemoryStorage::new();
        store.create_user(new_user("alice")).await.unwrap();

        let now = Utc::now();
        store.update_user_last_seen("alice", Some(now)).await.unwrap();
        let user = store.find_user_by_id("alice").await.unwrap().unwrap();
        assert_eq!(user.last_seen, Some(now));

        store.update_user_last_seen("alice", None).await.unwrap();
        let user = store.find_user_by_id("alice").await.unwrap().unwrap();
        assert_eq!(user.last_seen, None);
    }

    #[tokio::test]
    async fn test_last_seen_unknown_user() {
        let store = MemoryStorage::new();
        let err = store.update_user_last_seen("ghost", None).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let store = MemoryStorage::new();
        store.create_user(new_user("alice")).await.unwrap();
        let mut dup = new_user("alice2");
        dup.email = "alice@example.com".into();
        assert!(matches!(
            store.create_user(dup).await,
            Err(StorageError::DuplicateUser(_))
        ));
    }

    #[tokio::test]
    async fn test_sidebar_excludes_caller() {
        let store = MemoryStorage::new();
        for name in ["alice", "bob", "carol"] {
            store.create_user(new_user(name)).await.unwrap();
        }
        let others = store.list_users_except("bob").await.unwrap();
        let ids: Vec<&str> = others.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(others.len(), 2);
        assert!(!ids.contains(&"bob"));
    }

    #[tokio::test]
    async fn test_conversation_both_directions_in_order() {
        let store = MemoryStorage::new();
        store.create_message(text_message("a", "b", "1")).await.unwrap();
        store.create_message(text_message("b", "a", "2")).await.unwrap();
        store.create_message(text_message("a", "c", "other")).await.unwrap();

        let convo = store.list_conversation("b", "a").await.unwrap();
        let texts: Vec<_> = convo.iter().filter_map(|m| m.text.as_deref()).collect();
        assert_eq!(texts, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_client_message_id_is_unique_per_sender() {
        let store = MemoryStorage::new();
        let mut msg = text_message("a", "b", "hi");
        msg.client_message_id = Some("c-1".into());

        let first = store.create_message(msg.clone()).await.unwrap();
        assert!(matches!(
            store.create_message(msg.clone()).await,
            Err(StorageError::DuplicateMessage { .. })
        ));

        // another sender may reuse the same client id
        msg.sender_id = "z".into();
        store.create_message(msg).await.unwrap();

        let found = store.find_message_by_client_id("a", "c-1").await.unwrap();
        assert_eq!(found.map(|m| m.id), Some(first.id));
    }

    #[tokio::test]
    async fn test_delete_message() {
        let store = MemoryStorage::new();
        let record = store.create_message(text_message("a", "b", "x")).await.unwrap();

        assert!(store.delete_message(record.id).await.unwrap());
        assert!(!store.delete_message(record.id).await.unwrap());
        assert!(store.find_message(record.id).await.unwrap().is_none());
        assert_eq!(store.message_count().await, 0);
    }
}
