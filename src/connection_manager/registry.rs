use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use super::ConnectionHandle;

/// Maps each online user to the one connection that represents them.
///
/// At most one entry exists per user: a later `register` overwrites the
/// earlier one. Every operation takes the lock once and never holds it
/// across an await point, so the operations are atomic with respect to
/// each other and `list_online` is a consistent snapshot.
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<String, Arc<ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or overwrite the entry for `user_id`.
    ///
    /// Returns the handle that was displaced, if any. Displacing is not an
    /// error; the old channel stays open but no longer represents the user.
    pub async fn register(
        &self,
        user_id: &str,
        handle: Arc<ConnectionHandle>,
    ) -> Option<Arc<ConnectionHandle>> {
        let connection_id = handle.id;
        let previous = self
            .entries
            .write()
            .await
            .insert(user_id.to_string(), handle);

        match &previous {
            Some(old) => tracing::debug!(
                user_id = %user_id,
                connection_id = %connection_id,
                replaced_connection_id = %old.id,
                "Registry entry overwritten"
            ),
            None => tracing::debug!(
                user_id = %user_id,
                connection_id = %connection_id,
                "Registry entry created"
            ),
        }

        previous
    }

    /// Current connection for `user_id`, if the user is online
    pub async fn lookup(&self, user_id: &str) -> Option<Arc<ConnectionHandle>> {
        self.entries.read().await.get(user_id).cloned()
    }

    /// Remove the entry for `user_id` regardless of which connection owns it.
    pub async fn unregister(&self, user_id: &str) -> Option<Arc<ConnectionHandle>> {
        let removed = self.entries.write().await.remove(user_id);
        if let Some(handle) = &removed {
            tracing::debug!(
                user_id = %user_id,
                connection_id = %handle.id,
                "Registry entry removed"
            );
        }
        removed
    }

    /// Remove the entry for `user_id` only if it still points at `connection_id`.
    ///
    /// Returns false when a newer connection has taken over the entry (or
    /// there is no entry at all); the registry is left untouched then.
    pub async fn unregister_connection(&self, user_id: &str, connection_id: Uuid) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(user_id) {
            Some(current) if current.id == connection_id => {
                entries.remove(user_id);
                tracing::debug!(
                    user_id = %user_id,
                    connection_id = %connection_id,
                    "Registry entry removed"
                );
                true
            }
            Some(current) => {
                tracing::debug!(
                    user_id = %user_id,
                    connection_id = %connection_id,
                    current_connection_id = %current.id,
                    "Registry entry owned by a newer connection, leaving it in place"
                );
                false
            }
            None => false,
        }
    }

    /// Snapshot of every registered user, sorted for stable output
    pub async fn list_online(&self) -> BTreeSet<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Remove every entry at once, returning what was registered.
    pub async fn drain(&self) -> Vec<(String, Arc<ConnectionHandle>)> {
        self.entries.write().await.drain().collect()
    }

    pub async fn online_count(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.entries.read().await.contains_key(user_id)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
