use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::auth::JwtValidator;
use crate::connection_manager::ConnectionHandle;
use crate::metrics::WsMessageMetrics;
use crate::server::AppState;
use crate::session::Session;

use super::message::{ClientMessage, OutboundMessage, ServerMessage};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsQuery {
    pub user_id: Option<String>,
    pub token: Option<String>,
}

/// WebSocket upgrade handler.
///
/// Never rejects: a missing or invalid identity yields an anonymous channel
/// that still receives presence broadcasts.
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query, headers),
    fields(has_user_id = query.user_id.is_some(), has_query_token = query.token.is_some())
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    let identity = resolve_identity(
        &query,
        &headers,
        &state.jwt_validator,
        state.settings.websocket.require_token,
    );

    tracing::debug!(user_id = ?identity, "WebSocket upgrade requested");

    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

/// Decide which user, if any, this connection represents.
///
/// A valid token always wins. A bare `userId` is trusted unless tokens are
/// required.
pub fn resolve_identity(
    query: &WsQuery,
    headers: &HeaderMap,
    validator: &JwtValidator,
    require_token: bool,
) -> Option<String> {
    let claimed = query
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty());

    if let Some(token) = extract_token(query, headers) {
        return match validator.validate(&token) {
            Ok(claims) => {
                if let Some(claimed) = claimed {
                    if claimed != claims.user_id() {
                        tracing::warn!(
                            claimed = %claimed,
                            token_subject = %claims.user_id(),
                            "userId does not match token subject, using token"
                        );
                    }
                }
                Some(claims.user_id().to_string())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Invalid WebSocket token, connecting anonymously");
                None
            }
        };
    }

    if require_token {
        if claimed.is_some() {
            tracing::warn!("userId without token rejected, connecting anonymously");
        }
        return None;
    }

    claimed.map(str::to_string)
}

fn extract_token(query: &WsQuery, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query.token.as_deref().filter(|t| !t.is_empty()) {
        return Some(token.to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Handle an established WebSocket connection
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state, identity),
    fields(user_id = ?identity, otel.kind = "server")
)]
async fn handle_socket(socket: WebSocket, state: AppState, identity: Option<String>) {
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(state.settings.websocket.channel_buffer);
    let handle = Arc::new(ConnectionHandle::new(identity, tx));
    let connection_id = handle.id;

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // start draining before connect so the connect broadcasts cannot fill the buffer
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match msg.to_json() {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize message");
                    continue;
                }
            };

            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let mut session = Session::new(handle.clone());
    state.lifecycle.connect(&mut session).await;

    tracing::info!(connection_id = %connection_id, "WebSocket connection established");

    let recv_handle = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_message(msg, &recv_handle).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
        }
        _ = &mut recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
        }
        _ = handle.close_requested() => {
            tracing::debug!(connection_id = %connection_id, "Server closed the connection");
        }
    }
    recv_task.abort();

    state.lifecycle.disconnect(&mut session).await;

    tracing::info!(connection_id = %connection_id, "WebSocket connection closed");
}

/// Process a received WebSocket frame.
/// Returns false if the connection should be closed.
async fn process_message(msg: Message, handle: &Arc<ConnectionHandle>) -> bool {
    match msg {
        Message::Text(text) => {
            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Ping) => {
                    WsMessageMetrics::record_ping();
                    let _ = handle.send(ServerMessage::Pong).await;
                }
                Err(e) => {
                    WsMessageMetrics::record_invalid();
                    tracing::debug!(error = %e, "Failed to parse client message");
                    let _ = handle
                        .send(ServerMessage::error("INVALID_MESSAGE", e.to_string()))
                        .await;
                }
            }
            true
        }
        Message::Binary(_) => {
            WsMessageMetrics::record_invalid();
            let _ = handle
                .send(ServerMessage::error(
                    "UNSUPPORTED_FORMAT",
                    "Binary messages are not supported",
                ))
                .await;
            true
        }
        // axum answers protocol pings itself
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Claims;
    use crate::config::JwtConfig;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "ws-test-secret";

    fn validator() -> JwtValidator {
        JwtValidator::new(&JwtConfig {
            secret: SECRET.to_string(),
            issuer: None,
            audience: None,
        })
    }

    fn token(sub: &str) -> String {
        encode(
            &Header::default(),
            &Claims::for_user(sub, 3600),
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn query(user_id: Option<&str>, token: Option<String>) -> WsQuery {
        WsQuery {
            user_id: user_id.map(str::to_string),
            token,
        }
    }

    #[test]
    fn test_bare_user_id_accepted_by_default() {
        let id = resolve_identity(&query(Some("alice"), None), &HeaderMap::new(), &validator(), false);
        assert_eq!(id.as_deref(), Some("alice"));
    }

    #[test]
    fn test_missing_or_blank_user_id_is_anonymous() {
        let v = validator();
        assert_eq!(resolve_identity(&query(None, None), &HeaderMap::new(), &v, false), None);
        assert_eq!(
            resolve_identity(&query(Some("  "), None), &HeaderMap::new(), &v, false),
            None
        );
    }

    #[test]
    fn test_require_token_ignores_bare_user_id() {
        let id = resolve_identity(&query(Some("alice"), None), &HeaderMap::new(), &validator(), true);
        assert_eq!(id, None);
    }

    #[test]
    fn test_token_subject_wins() {
        let id = resolve_identity(
            &query(Some("mallory"), Some(token("alice"))),
            &HeaderMap::new(),
            &validator(),
            true,
        );
        assert_eq!(id.as_deref(), Some("alice"));
    }

    #[test]
    fn test_bearer_header_token() {
        let mut headers = HeaderMap::new();
        let value = format!("Bearer {}", token("bob"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&value).unwrap());

        let id = resolve_identity(&WsQuery::default(), &headers, &validator(), true);
        assert_eq!(id.as_deref(), Some("bob"));
    }

    #[test]
    fn test_invalid_token_is_anonymous() {
        let id = resolve_identity(
            &query(Some("alice"), Some("garbage".into())),
            &HeaderMap::new(),
            &validator(),
            false,
        );
        assert_eq!(id, None);
    }
}
