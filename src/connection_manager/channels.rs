//! Every open transport channel, tracked or anonymous.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use super::ConnectionHandle;

/// All currently open channels, keyed by connection id.
///
/// This is the fan-out target for presence broadcasts. It is independent of
/// the identity registry: anonymous channels live here only.
pub struct OpenChannels {
    channels: DashMap<Uuid, Arc<ConnectionHandle>>,
}

impl OpenChannels {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    pub fn attach(&self, handle: Arc<ConnectionHandle>) {
        tracing::debug!(
            connection_id = %handle.id,
            user_id = ?handle.user_id,
            "Channel attached"
        );
        self.channels.insert(handle.id, handle);
    }

    pub fn detach(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        let removed = self.channels.remove(&connection_id).map(|(_, h)| h);
        if removed.is_some() {
            tracing::debug!(connection_id = %connection_id, "Channel detached");
        }
        removed
    }

    /// Snapshot of all open channels
    pub fn all(&self) -> Vec<Arc<ConnectionHandle>> {
        self.channels.iter().map(|r| r.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn anonymous_count(&self) -> usize {
        self.channels.iter().filter(|r| !r.value().is_tracked()).count()
    }
}

impl Default for OpenChannels {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_attach_detach() {
        let channels = OpenChannels::new();
        let (tx, _rx) = mpsc::channel(1);
        let tracked = Arc::new(ConnectionHandle::new(Some("u1".into()), tx.clone()));
        let anonymous = Arc::new(ConnectionHandle::new(None, tx));

        channels.attach(tracked.clone());
        channels.attach(anonymous.clone());
        assert_eq!(channels.len(), 2);
        assert_eq!(channels.anonymous_count(), 1);

        assert!(channels.detach(tracked.id).is_some());
        assert!(channels.detach(tracked.id).is_none());
        let remaining = channels.all();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, anonymous.id);
    }
}
