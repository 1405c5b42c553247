// Infrastructure layer (shared components)
pub mod infrastructure;

pub use infrastructure::auth;
pub use infrastructure::config;
pub use infrastructure::error;
pub use infrastructure::metrics;
pub use infrastructure::postgres;

// Presence and real-time delivery core
pub mod connection_manager;
pub mod delivery;
pub mod presence;
pub mod session;

// Collaborators
pub mod media;
pub mod messaging;
pub mod storage;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;

// Supporting modules
pub mod shutdown;
pub mod tasks;
pub mod telemetry;
