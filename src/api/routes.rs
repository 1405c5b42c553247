use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::server::{jwt_auth, AppState};

use super::health::{health, stats};
use super::messages::{delete_message, get_conversation, send_message, sidebar_users};
use super::metrics::prometheus_metrics;

pub fn api_routes(state: AppState) -> Router<AppState> {
    let messages = Router::new()
        .route("/users", get(sidebar_users))
        .route("/send/{id}", post(send_message))
        .route("/{id}", get(get_conversation).delete(delete_message))
        .route_layer(middleware::from_fn_with_state(state, jwt_auth));

    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        // Direct messages (Bearer JWT)
        .nest("/api/messages", messages)
}
