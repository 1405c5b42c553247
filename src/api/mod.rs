//! API layer - HTTP endpoint handlers.

mod health;
mod messages;
mod metrics;
mod routes;

pub use health::{health, stats};
pub use messages::{delete_message, get_conversation, send_message, sidebar_users};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
