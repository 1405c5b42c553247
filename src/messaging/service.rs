use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::connection_manager::ConnectionRegistry;
use crate::delivery::{DeliveryOutcome, DeliveryRouter};
use crate::error::{AppError, Result};
use crate::media::{MediaKind, MediaUploader};
use crate::metrics::DeliveryMetrics;
use crate::storage::{MessageRecord, MessageStore, NewMessage, StorageError, User, UserStore};

/// Longest accepted client-generated message id
const MAX_CLIENT_MESSAGE_ID_LEN: usize = 128;

/// Body of a send request. Attachments are base64 or `data:` URLs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendMessageRequest {
    pub text: Option<String>,
    pub images: Vec<String>,
    pub videos: Vec<String>,
    /// Client-chosen id making retries idempotent per sender
    pub client_message_id: Option<String>,
}

impl SendMessageRequest {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    fn normalized_text(&self) -> Option<String> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub record: MessageRecord,
    /// `None` when the request replayed an already stored message
    pub delivery: Option<DeliveryOutcome>,
}

impl SendOutcome {
    pub fn replayed(&self) -> bool {
        self.delivery.is_none()
    }
}

/// A contact as shown in the chat sidebar
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SidebarUser {
    #[serde(flatten)]
    pub user: User,
    pub is_online: bool,
}

/// Message use cases behind the HTTP API.
pub struct MessageService {
    users: Arc<dyn UserStore>,
    messages: Arc<dyn MessageStore>,
    media: Arc<dyn MediaUploader>,
    router: Arc<DeliveryRouter>,
    registry: Arc<ConnectionRegistry>,
}

impl MessageService {
    pub fn new(
        users: Arc<dyn UserStore>,
        messages: Arc<dyn MessageStore>,
        media: Arc<dyn MediaUploader>,
        router: Arc<DeliveryRouter>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            users,
            messages,
            media,
            router,
            registry,
        }
    }

    /// Upload attachments, persist, then push to the recipient if online.
    ///
    /// A repeated `client_message_id` returns the stored record and pushes nothing.
    #[tracing::instrument(name = "messages.send", skip(self, request))]
    pub async fn send(
        &self,
        sender_id: &str,
        receiver_id: &str,
        request: SendMessageRequest,
    ) -> Result<SendOutcome> {
        let text = request.normalized_text();
        if text.is_none() && request.images.is_empty() && request.videos.is_empty() {
            return Err(AppError::Validation(
                "Message must contain text or at least one attachment".into(),
            ));
        }

        if let Some(client_id) = &request.client_message_id {
            if client_id.is_empty() || client_id.len() > MAX_CLIENT_MESSAGE_ID_LEN {
                return Err(AppError::Validation(format!(
                    "clientMessageId must be 1-{} characters",
                    MAX_CLIENT_MESSAGE_ID_LEN
                )));
            }
            if let Some(existing) = self
                .messages
                .find_message_by_client_id(sender_id, client_id)
                .await?
            {
                return self.replay(existing, receiver_id);
            }
        }

        if self.users.find_user_by_id(receiver_id).await?.is_none() {
            return Err(AppError::NotFound(format!("User {}", receiver_id)));
        }

        let (images, videos) = self.upload_attachments(&request).await?;
        let uploaded: Vec<String> = images.iter().chain(&videos).cloned().collect();

        let new_message = NewMessage {
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            text,
            images,
            videos,
            client_message_id: request.client_message_id.clone(),
        };

        let record = match self.messages.create_message(new_message).await {
            Ok(record) => record,
            Err(StorageError::DuplicateMessage {
                sender_id,
                client_message_id,
            }) => {
                // lost a race with a concurrent retry, whose record holds its own uploads
                self.discard_uploads(&uploaded).await;
                let existing = self
                    .messages
                    .find_message_by_client_id(&sender_id, &client_message_id)
                    .await?
                    .ok_or_else(|| StorageError::NotFound(format!("message {}", client_message_id)))?;
                return self.replay(existing, receiver_id);
            }
            Err(e) => {
                self.discard_uploads(&uploaded).await;
                return Err(e.into());
            }
        };
        DeliveryMetrics::record_persisted();

        let delivery = self.router.deliver(receiver_id, &record).await;
        tracing::debug!(
            message_id = %record.id,
            delivery = delivery.as_str(),
            "Message sent"
        );

        Ok(SendOutcome {
            record,
            delivery: Some(delivery),
        })
    }

    /// Upload images then videos. If one fails, the ones already stored are
    /// discarded before the error is returned.
    async fn upload_attachments(
        &self,
        request: &SendMessageRequest,
    ) -> Result<(Vec<String>, Vec<String>)> {
        let mut images = Vec::with_capacity(request.images.len());
        let mut videos = Vec::with_capacity(request.videos.len());
        let pending = request
            .images
            .iter()
            .map(|raw| (raw, MediaKind::Image))
            .chain(request.videos.iter().map(|raw| (raw, MediaKind::Video)));

        for (raw, kind) in pending {
            match self.media.upload(raw, kind).await {
                Ok(url) => match kind {
                    MediaKind::Image => images.push(url),
                    MediaKind::Video => videos.push(url),
                },
                Err(e) => {
                    self.discard_uploads(&images).await;
                    self.discard_uploads(&videos).await;
                    return Err(e.into());
                }
            }
        }
        Ok((images, videos))
    }

    /// Best effort: a failed discard only leaves an unreferenced file behind.
    async fn discard_uploads(&self, urls: &[String]) {
        for url in urls {
            if let Err(e) = self.media.discard(url).await {
                tracing::warn!(url = %url, error = %e, "Failed to discard unused attachment");
            }
        }
    }

    fn replay(&self, existing: MessageRecord, receiver_id: &str) -> Result<SendOutcome> {
        if existing.receiver_id != receiver_id {
            return Err(AppError::Validation(
                "clientMessageId was already used for another conversation".into(),
            ));
        }
        DeliveryMetrics::record_replayed();
        tracing::debug!(message_id = %existing.id, "Replayed send, not delivering again");
        Ok(SendOutcome {
            record: existing,
            delivery: None,
        })
    }

    /// Messages between the two users in both directions, oldest first
    pub async fn conversation(&self, user_id: &str, other_id: &str) -> Result<Vec<MessageRecord>> {
        Ok(self.messages.list_conversation(user_id, other_id).await?)
    }

    /// Only the sender may delete a message
    #[tracing::instrument(name = "messages.delete", skip(self))]
    pub async fn delete(&self, user_id: &str, message_id: Uuid) -> Result<()> {
        let message = self
            .messages
            .find_message(message_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Message".into()))?;

        if message.sender_id != user_id {
            return Err(AppError::Forbidden(
                "You can only delete your own messages".into(),
            ));
        }

        self.messages.delete_message(message_id).await?;
        tracing::debug!(message_id = %message_id, "Message deleted");
        Ok(())
    }

    /// Everyone except the caller, flagged with live presence
    pub async fn sidebar(&self, user_id: &str) -> Result<Vec<SidebarUser>> {
        let users = self.users.list_users_except(user_id).await?;
        let online = self.registry.list_online().await;

        Ok(users
            .into_iter()
            .map(|user| SidebarUser {
                is_online: online.contains(&user.id),
                user,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use crate::connection_manager::ConnectionHandle;
    use crate::media::MediaError;
    use crate::storage::{MemoryStorage, NewUser};

    #[derive(Default)]
    struct FakeMedia {
        discarded: std::sync::Mutex<Vec<String>>,
    }

    impl FakeMedia {
        fn discarded(&self) -> Vec<String> {
            self.discarded.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MediaUploader for FakeMedia {
        async fn upload(&self, raw: &str, kind: MediaKind) -> std::result::Result<String, MediaError> {
            if raw == "broken" {
                return Err(MediaError::Io(std::io::Error::other("disk full")));
            }
            Ok(format!("https://cdn.test/{}/{}", kind.folder(), raw))
        }

        async fn discard(&self, url: &str) -> std::result::Result<(), MediaError> {
            self.discarded.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    async fn service(users: &[&str]) -> (MessageService, Arc<MemoryStorage>, Arc<ConnectionRegistry>) {
        service_with_media(users, Arc::new(FakeMedia::default())).await
    }

    async fn service_with_media(
        users: &[&str],
        media: Arc<FakeMedia>,
    ) -> (MessageService, Arc<MemoryStorage>, Arc<ConnectionRegistry>) {
        let store = Arc::new(MemoryStorage::new());
        for user in users {
            store
                .create_user(NewUser {
                    id: Some(user.to_string()),
                    full_name: user.to_string(),
                    email: format!("{}@example.com", user),
                    profile_pic: None,
                })
                .await
                .unwrap();
        }
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(DeliveryRouter::new(registry.clone(), Duration::from_millis(50)));
        let service = MessageService::new(
            store.clone(),
            store.clone(),
            media,
            router,
            registry.clone(),
        );
        (service, store, registry)
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let (service, _, _) = service(&["a", "b"]).await;
        let err = service
            .send("a", "b", SendMessageRequest::text("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_unknown_recipient() {
        let (service, _, _) = service(&["a"]).await;
        let err = service
            .send("a", "zed", SendMessageRequest::text("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_attachments_become_urls() {
        let (service, _, _) = service(&["a", "b"]).await;
        let request = SendMessageRequest {
            images: vec!["img1".into()],
            videos: vec!["vid1".into()],
            ..Default::default()
        };
        let outcome = service.send("a", "b", request).await.unwrap();
        assert_eq!(outcome.record.text, None);
        assert_eq!(outcome.record.images, vec!["https://cdn.test/chat-images/img1"]);
        assert_eq!(outcome.record.videos, vec!["https://cdn.test/chat-videos/vid1"]);
        assert_eq!(outcome.delivery, Some(DeliveryOutcome::RecipientOffline));
    }

    #[tokio::test]
    async fn test_media_failure_aborts_send() {
        let (service, store, _) = service(&["a", "b"]).await;
        let request = SendMessageRequest {
            text: Some("look".into()),
            images: vec!["ok".into(), "broken".into()],
            ..Default::default()
        };
        let err = service.send("a", "b", request).await.unwrap_err();
        assert!(matches!(err, AppError::Media(_)));
        assert_eq!(store.message_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_upload_discards_earlier_attachments() {
        let media = Arc::new(FakeMedia::default());
        let (service, store, _) = service_with_media(&["a", "b"], media.clone()).await;
        let request = SendMessageRequest {
            images: vec!["img-ok".into()],
            videos: vec!["vid-ok".into(), "broken".into()],
            ..Default::default()
        };

        assert!(service.send("a", "b", request).await.is_err());
        assert_eq!(store.message_count().await, 0);
        assert_eq!(
            media.discarded(),
            vec![
                "https://cdn.test/chat-images/img-ok".to_string(),
                "https://cdn.test/chat-videos/vid-ok".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_successful_send_keeps_attachments() {
        let media = Arc::new(FakeMedia::default());
        let (service, _, _) = service_with_media(&["a", "b"], media.clone()).await;
        let request = SendMessageRequest {
            images: vec!["img1".into()],
            ..Default::default()
        };

        service.send("a", "b", request).await.unwrap();
        assert!(media.discarded().is_empty());
    }

    #[tokio::test]
    async fn test_retry_with_client_id_is_not_delivered_twice() {
        let (service, store, registry) = service(&["a", "b"]).await;
        let (tx, mut rx) = mpsc::channel(8);
        registry
            .register("b", Arc::new(ConnectionHandle::new(Some("b".into()), tx)))
            .await;

        let request = SendMessageRequest {
            text: Some("hi".into()),
            client_message_id: Some("c-42".into()),
            ..Default::default()
        };
        let first = service.send("a", "b", request.clone()).await.unwrap();
        let retry = service.send("a", "b", request).await.unwrap();

        assert!(!first.replayed());
        assert!(retry.replayed());
        assert_eq!(first.record.id, retry.record.id);
        assert_eq!(store.message_count().await, 1);

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_client_id_reused_for_other_recipient() {
        let (service, _, _) = service(&["a", "b", "c"]).await;
        let mut request = SendMessageRequest::text("hi");
        request.client_message_id = Some("c-1".into());

        service.send("a", "b", request.clone()).await.unwrap();
        let err = service.send("a", "c", request).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_only_sender_may_delete() {
        let (service, _, _) = service(&["a", "b"]).await;
        let sent = service
            .send("a", "b", SendMessageRequest::text("oops"))
            .await
            .unwrap();

        let err = service.delete("b", sent.record.id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        service.delete("a", sent.record.id).await.unwrap();
        let err = service.delete("a", sent.record.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_sidebar_marks_online_users() {
        let (service, _, registry) = service(&["a", "b", "c"]).await;
        let (tx, _rx) = mpsc::channel(1);
        registry
            .register("c", Arc::new(ConnectionHandle::new(Some("c".into()), tx)))
            .await;

        let sidebar = service.sidebar("a").await.unwrap();
        assert_eq!(sidebar.len(), 2);
        for entry in sidebar {
            assert_eq!(entry.is_online, entry.user.id == "c");
        }
    }
}
