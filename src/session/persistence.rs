//! Background writer for persisted presence.
//!
//! The lifecycle never awaits storage. It submits `lastSeen` updates here and
//! a single task applies them in submission order, so a user's "online" write
//! can never land after the "offline" write that followed it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::metrics::StorageMetrics;
use crate::storage::UserStore;

enum WriterCommand {
    SetLastSeen {
        user_id: String,
        last_seen: Option<DateTime<Utc>>,
    },
    Flush(oneshot::Sender<()>),
}

/// Cheap to clone; every clone feeds the same writer task.
#[derive(Clone)]
pub struct LastSeenWriter {
    tx: mpsc::UnboundedSender<WriterCommand>,
}

impl LastSeenWriter {
    /// Spawn the writer task. It exits once every `LastSeenWriter` clone is dropped.
    pub fn spawn(users: Arc<dyn UserStore>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_writer(users, rx));
        (Self { tx }, handle)
    }

    /// Queue a write. Never blocks and never fails the caller.
    pub fn submit(&self, user_id: &str, last_seen: Option<DateTime<Utc>>) {
        let command = WriterCommand::SetLastSeen {
            user_id: user_id.to_string(),
            last_seen,
        };
        if self.tx.send(command).is_err() {
            StorageMetrics::record_write_failure("update_last_seen");
            tracing::warn!(user_id = %user_id, "Presence writer stopped, lastSeen update dropped");
        }
    }

    /// Wait until every write submitted before this call has been applied.
    ///
    /// Returns false if the writer task is gone.
    pub async fn flush(&self) -> bool {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(WriterCommand::Flush(done_tx)).is_err() {
            return false;
        }
        done_rx.await.is_ok()
    }
}

async fn run_writer(users: Arc<dyn UserStore>, mut rx: mpsc::UnboundedReceiver<WriterCommand>) {
    tracing::debug!("Presence writer started");

    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::SetLastSeen { user_id, last_seen } => {
                if let Err(e) = users.update_user_last_seen(&user_id, last_seen).await {
                    StorageMetrics::record_write_failure("update_last_seen");
                    tracing::warn!(
                        user_id = %user_id,
                        online = last_seen.is_none(),
                        error = %e,
                        "Failed to persist lastSeen"
                    );
                }
            }
            WriterCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    tracing::debug!("Presence writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, NewUser};

    async fn store_with(user: &str) -> Arc<MemoryStorage> {
        let store = Arc::new(MemoryStorage::new());
        store
            .create_user(NewUser {
                id: Some(user.to_string()),
                full_name: user.to_string(),
                email: format!("{}@example.com", user),
                profile_pic: None,
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_writes_apply_in_submission_order() {
        let store = store_with("alice").await;
        let (writer, _task) = LastSeenWriter::spawn(store.clone());

        let t = Utc::now();
        writer.submit("alice", None);
        writer.submit("alice", Some(t));
        assert!(writer.flush().await);

        let user = store.find_user_by_id("alice").await.unwrap().unwrap();
        assert_eq!(user.last_seen, Some(t));
    }

    #[tokio::test]
    async fn test_failed_write_does_not_stop_writer() {
        let store = store_with("alice").await;
        let (writer, _task) = LastSeenWriter::spawn(store.clone());

        let t = Utc::now();
        writer.submit("ghost", Some(t));
        writer.submit("alice", Some(t));
        assert!(writer.flush().await);

        let user = store.find_user_by_id("alice").await.unwrap().unwrap();
        assert_eq!(user.last_seen, Some(t));
    }

    #[tokio::test]
    async fn test_task_exits_when_writers_dropped() {
        let store = store_with("alice").await;
        let (writer, task) = LastSeenWriter::spawn(store);
        drop(writer);
        tokio_test::assert_ok!(task.await);
    }
}
