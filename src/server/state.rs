use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::auth::JwtValidator;
use crate::config::Settings;
use crate::connection_manager::{ConnectionRegistry, ConnectionStats, OpenChannels};
use crate::delivery::DeliveryRouter;
use crate::media::MediaUploader;
use crate::messaging::MessageService;
use crate::postgres::PostgresPool;
use crate::presence::PresenceBroadcaster;
use crate::session::{LastSeenWriter, SessionLifecycleManager};
use crate::storage::StorageBackends;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub jwt_validator: Arc<JwtValidator>,
    pub registry: Arc<ConnectionRegistry>,
    pub channels: Arc<OpenChannels>,
    pub lifecycle: Arc<SessionLifecycleManager>,
    pub router: Arc<DeliveryRouter>,
    pub messages: Arc<MessageService>,
    pub storage: StorageBackends,
    pub postgres_pool: Option<PostgresPool>,
    pub start_time: Instant,
}

impl AppState {
    /// Wire the presence subsystem and message service together.
    ///
    /// Spawns the lastSeen writer, so this must run inside a tokio runtime.
    pub fn new(
        settings: Settings,
        storage: StorageBackends,
        media: Arc<dyn MediaUploader>,
        postgres_pool: Option<PostgresPool>,
    ) -> Self {
        let send_timeout = Duration::from_millis(settings.websocket.send_timeout_ms);

        let jwt_validator = Arc::new(JwtValidator::new(&settings.jwt));
        let registry = Arc::new(ConnectionRegistry::new());
        let channels = Arc::new(OpenChannels::new());
        let broadcaster = Arc::new(PresenceBroadcaster::new(channels.clone(), send_timeout));

        let (last_seen_writer, _writer_task) = LastSeenWriter::spawn(storage.users.clone());
        let lifecycle = Arc::new(SessionLifecycleManager::new(
            registry.clone(),
            channels.clone(),
            broadcaster,
            last_seen_writer,
            settings.presence.guard_stale_disconnect,
        ));

        let router = Arc::new(DeliveryRouter::new(registry.clone(), send_timeout));
        let messages = Arc::new(MessageService::new(
            storage.users.clone(),
            storage.messages.clone(),
            media,
            router.clone(),
            registry.clone(),
        ));

        Self {
            settings: Arc::new(settings),
            jwt_validator,
            registry,
            channels,
            lifecycle,
            router,
            messages,
            storage,
            postgres_pool,
            start_time: Instant::now(),
        }
    }

    pub async fn connection_stats(&self) -> ConnectionStats {
        ConnectionStats {
            open_channels: self.channels.len(),
            online_users: self.registry.online_count().await,
            anonymous_channels: self.channels.anonymous_count(),
        }
    }
}
