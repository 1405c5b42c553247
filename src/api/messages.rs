//! Direct message endpoints. All require a Bearer JWT whose subject is the caller.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::auth::Claims;
use crate::error::{AppError, Result};
use crate::messaging::{SendMessageRequest, SidebarUser};
use crate::server::AppState;
use crate::storage::MessageRecord;

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub message: String,
}

/// GET /api/messages/users
pub async fn sidebar_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<SidebarUser>>> {
    Ok(Json(state.messages.sidebar(claims.user_id()).await?))
}

/// GET /api/messages/{id}
pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(other_id): Path<String>,
) -> Result<Json<Vec<MessageRecord>>> {
    Ok(Json(
        state
            .messages
            .conversation(claims.user_id(), &other_id)
            .await?,
    ))
}

/// POST /api/messages/send/{id}
///
/// 201 with the new record, or 200 with the stored one when the request
/// repeats a `clientMessageId`.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(receiver_id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessageRecord>)> {
    let outcome = state
        .messages
        .send(claims.user_id(), &receiver_id, request)
        .await?;

    let status = if outcome.replayed() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome.record)))
}

/// DELETE /api/messages/{id}
pub async fn delete_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(message_id): Path<String>,
) -> Result<Json<DeleteResponse>> {
    let message_id = Uuid::parse_str(&message_id)
        .map_err(|_| AppError::Validation(format!("Invalid message id: {}", message_id)))?;

    state.messages.delete(claims.user_id(), message_id).await?;

    Ok(Json(DeleteResponse {
        message: "Message deleted successfully".to_string(),
    }))
}
