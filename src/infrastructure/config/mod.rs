mod settings;

pub use settings::{
    JwtConfig, LoggingConfig, MediaConfig, OtelConfig, PresenceConfig, ServerConfig, Settings,
    StorageConfig, WebSocketConfig,
};
